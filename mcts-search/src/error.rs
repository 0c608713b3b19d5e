use thiserror::Error;

/// Errors the search core can surface. `Cancelled` is deliberately absent:
/// per spec.md §4.G, cancellation is a clean stop condition, not a failure,
/// and shows up as `StopReason::Cancelled` inside a successful `SearchOutcome`.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("arena exhausted: requested {requested} nodes, {available} available")]
    ArenaExhausted { requested: u32, available: u32 },

    #[error("NN evaluator failed: {0}")]
    EvaluatorFailure(#[from] nn_eval::NnError),

    #[error("illegal move encoding {0} at root")]
    IllegalMove(u16),

    #[error("invalid starting position: {0}")]
    InvalidPosition(#[from] chess_position::PositionError),

    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),
}

pub type SearchResult<T> = Result<T, SearchError>;
