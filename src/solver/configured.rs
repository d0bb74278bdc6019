//! Backend chosen by configuration.

use std::time::Duration;

use super::backend::{BackendOutcome, Problem, SolverBackend};
use super::milp::MilpBackend;
use super::search::BranchAndBound;
use crate::config::BackendKind;
use crate::model::LinearExpr;

/// The backend named by [`BackendKind`].
///
/// This is the default backend of [`StagedSolver`](super::StagedSolver),
/// the analyzer, and the engine.
#[derive(Debug, Clone)]
pub enum ConfiguredBackend {
    Milp(MilpBackend),
    BranchAndBound(BranchAndBound),
}

impl ConfiguredBackend {
    /// Builds the backend of `kind`. The node budget only applies to
    /// branch and bound.
    pub fn new(kind: BackendKind, node_limit: Option<u64>) -> Self {
        match kind {
            BackendKind::Milp => ConfiguredBackend::Milp(MilpBackend::new()),
            BackendKind::BranchAndBound => {
                ConfiguredBackend::BranchAndBound(BranchAndBound::new().with_node_limit(node_limit))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            ConfiguredBackend::Milp(_) => BackendKind::Milp,
            ConfiguredBackend::BranchAndBound(_) => BackendKind::BranchAndBound,
        }
    }
}

impl Default for ConfiguredBackend {
    fn default() -> Self {
        Self::new(BackendKind::default(), None)
    }
}

impl SolverBackend for ConfiguredBackend {
    fn name(&self) -> &str {
        match self {
            ConfiguredBackend::Milp(b) => b.name(),
            ConfiguredBackend::BranchAndBound(b) => b.name(),
        }
    }

    fn set_time_limit(&mut self, limit: Option<Duration>) {
        match self {
            ConfiguredBackend::Milp(b) => b.set_time_limit(limit),
            ConfiguredBackend::BranchAndBound(b) => b.set_time_limit(limit),
        }
    }

    fn solve_feasibility(&self, problem: &Problem<'_>) -> BackendOutcome {
        match self {
            ConfiguredBackend::Milp(b) => b.solve_feasibility(problem),
            ConfiguredBackend::BranchAndBound(b) => b.solve_feasibility(problem),
        }
    }

    fn optimize(&self, problem: &Problem<'_>, objective: &LinearExpr) -> BackendOutcome {
        match self {
            ConfiguredBackend::Milp(b) => b.optimize(problem, objective),
            ConfiguredBackend::BranchAndBound(b) => b.optimize(problem, objective),
        }
    }
}
