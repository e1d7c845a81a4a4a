use thiserror::Error;

/// Error kinds exposed by the routing core.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration or input data is unusable before any solve begins.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// All distance-matrix tiers failed for at least one required pair.
    #[error("distance matrix unavailable: {0}")]
    MatrixUnavailable(String),

    /// A constraint is unsatisfiable at model-build time.
    #[error("routing model infeasible: {0}")]
    ModelInfeasible(String),

    /// No worker found a feasible first solution within the time budget.
    #[error("no feasible solution found within the time budget")]
    NoSolution,

    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
