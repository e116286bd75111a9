use crate::linear_solver::ConvergedReason;
use thiserror::Error;

/// Error type for invalid operations.
#[derive(Error, Debug)]
pub enum CryoError {
    /// Unknown flow law name, missing or ill-typed parameter, missing required option.
    #[error("{0}")]
    Configuration(String),
    #[error("{context}: linear solve failed to converge (KSP reason {reason})")]
    LinearSolve {
        context: String,
        reason: ConvergedReason,
    },
    #[error("nonlinear solve failed to converge after {iterations} iterations (residual norm {residual_norm:e})")]
    SolverDivergence {
        iterations: usize,
        residual_norm: f64,
    },
    #[error("field {field} must have dof == {expected}, got {found}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        found: usize,
    },
    #[error("variable {0} is not available in the input")]
    MissingField(String),
    #[error("{0} is not supported")]
    Unsupported(String),
    #[error("{0} was used before init()")]
    NotInitialized(String),
    #[error("invalid grid: {0}")]
    Grid(String),
}

/// Convenience type for `Result<T, CryoError>`.
pub type CryoResult<T> = Result<T, CryoError>;
