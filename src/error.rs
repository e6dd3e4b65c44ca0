//! Crate-level error type.
//!
//! Inputs are validated at API boundaries (workflow, evaluator, scoring);
//! internal invariants use `debug_assert!`. Cache I/O failures carry the
//! underlying [`CacheError`](crate::cache::CacheError).

use thiserror::Error;

use crate::cache::CacheError;

/// Errors surfaced by the optimizer's public API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SolverError {
    /// Malformed catalog file, invalid probabilities, bad counts, unknown
    /// objective.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The efficiency plan failed validation. Carries every row error so the
    /// caller can surface all of them at once.
    #[error("invalid efficiency plan: {}", .0.join("; "))]
    InvalidPlan(Vec<String>),

    /// Zero dice, or a degenerate face distribution.
    #[error("invalid loadout: {0}")]
    InvalidLoadout(String),

    /// Cooperative cancellation. Propagated, never swallowed.
    #[error("operation canceled")]
    Canceled,

    /// I/O or database failure opening or writing the result cache.
    #[error("cache unavailable: {0}")]
    Cache(#[from] CacheError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_plan_joins_messages() {
        let err = SolverError::InvalidPlan(vec!["row 0: bad".into(), "row 1: worse".into()]);
        let text = err.to_string();
        assert!(text.contains("row 0: bad"));
        assert!(text.contains("row 1: worse"));
    }
}
