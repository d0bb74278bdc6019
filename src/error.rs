//! Error types for assignment runs.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::diagnosis::InfeasibilityReport;

/// Which kind of edge record referenced an unknown entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Conflict,
    Affinity,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeKind::Conflict => f.write_str("conflict"),
            EdgeKind::Affinity => f.write_str("affinity"),
        }
    }
}

/// A malformed or contradictory input record.
///
/// Raised before any solve attempt. Every variant names the offending
/// entity so the caller can fix the input without re-deriving anything.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("duplicate reviewer id: {0}")]
    DuplicateReviewer(String),

    #[error("duplicate project id: {0}")]
    DuplicateProject(String),

    #[error("project {project_id}: needs must be at least 1, got {needs}")]
    NonPositiveNeeds { project_id: String, needs: i64 },

    #[error("reviewer {reviewer_id}: min_load must be non-negative, got {min_load}")]
    NegativeMinLoad { reviewer_id: String, min_load: i64 },

    #[error("reviewer {reviewer_id}: min_load {min_load} exceeds max_load {max_load}")]
    InvertedLoadBounds {
        reviewer_id: String,
        min_load: i64,
        max_load: i64,
    },

    #[error("{edge} edge references unknown reviewer: {reviewer_id}")]
    UnknownReviewer { edge: EdgeKind, reviewer_id: String },

    #[error("{edge} edge references unknown project: {project_id}")]
    UnknownProject { edge: EdgeKind, project_id: String },

    #[error("duplicate affinity for ({reviewer_id}, {project_id})")]
    DuplicateAffinity {
        reviewer_id: String,
        project_id: String,
    },

    #[error("affinity for ({reviewer_id}, {project_id}) is not finite: {score}")]
    NonFiniteAffinity {
        reviewer_id: String,
        project_id: String,
        score: f64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<ConfigError> for InputError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(msg) => InputError::InvalidConfig(msg),
            other => InputError::InvalidConfig(other.to_string()),
        }
    }
}

/// Main error type for assignment runs.
#[derive(Debug, Error)]
pub enum AssignError {
    /// Input records failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),

    /// Hard constraints admit no solution and softening is disabled.
    #[error(
        "model is infeasible: {} constraint(s) in the minimal conflict set",
        .report.mus.len()
    )]
    InfeasibleModel { report: Box<InfeasibilityReport> },

    /// No feasible assignment was found before the time limit.
    #[error("no feasible assignment found within {time_limit:?}")]
    SolverTimeout { time_limit: Duration },

    /// Even the maximum allowed relaxation leaves the model infeasible.
    #[error(
        "softened model is still infeasible: {} constraint(s) in the minimal conflict set",
        .report.mus.len()
    )]
    SofteningExceeded { report: Box<InfeasibilityReport> },

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AssignError {
    /// The diagnosis attached to an infeasibility error, if any.
    pub fn report(&self) -> Option<&InfeasibilityReport> {
        match self {
            AssignError::InfeasibleModel { report } | AssignError::SofteningExceeded { report } => {
                Some(report)
            }
            _ => None,
        }
    }
}

/// Result type alias for assignment operations.
pub type Result<T> = std::result::Result<T, AssignError>;
