//! Backend capability used by the staged solver and the analyzer.

use std::time::Duration;

use crate::model::{Constraint, LinearExpr, VarId, Variable};

/// One backend call: variables, the rows to satisfy, and fixings.
#[derive(Debug, Clone)]
pub struct Problem<'a> {
    /// Variables with their domains.
    pub variables: &'a [Variable],
    /// Rows every solution must satisfy.
    pub rows: Vec<&'a Constraint>,
    /// Preferred branching order over integral variables.
    pub branch_order: &'a [VarId],
    /// Variables pinned to a value.
    pub fixed: &'a [(VarId, f64)],
}

impl<'a> Problem<'a> {
    pub fn new(
        variables: &'a [Variable],
        rows: Vec<&'a Constraint>,
        branch_order: &'a [VarId],
    ) -> Self {
        Self {
            variables,
            rows,
            branch_order,
            fixed: &[],
        }
    }

    /// Pins variables to values.
    pub fn with_fixed(mut self, fixed: &'a [(VarId, f64)]) -> Self {
        self.fixed = fixed;
        self
    }
}

/// Status of a single backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    /// Search completed; the values are optimal (or, for a feasibility
    /// call, a witness).
    Optimal,
    /// A solution was found but a search budget ran out first.
    Feasible,
    /// Search completed without finding a solution.
    Infeasible,
    /// The deadline or node budget ended the search before any answer.
    TimedOut,
}

/// Result of a backend call.
#[derive(Debug, Clone)]
pub struct BackendOutcome {
    /// How the call ended.
    pub status: BackendStatus,
    /// Best solution found, one value per variable.
    pub values: Option<Vec<f64>>,
    /// Objective value of `values` (0 for feasibility calls).
    pub objective: Option<f64>,
    /// Search nodes explored; one per solver call for MILP backends.
    pub nodes: u64,
}

impl BackendOutcome {
    /// A proven-infeasible outcome.
    pub fn infeasible(nodes: u64) -> Self {
        Self {
            status: BackendStatus::Infeasible,
            values: None,
            objective: None,
            nodes,
        }
    }

    pub fn is_solution_found(&self) -> bool {
        self.values.is_some()
    }

    /// Proven infeasible (not merely out of time).
    pub fn is_infeasible(&self) -> bool {
        self.status == BackendStatus::Infeasible
    }
}

/// Exact solver capability.
///
/// Implementations must be deterministic: the same problem yields the
/// same outcome whenever the search completes within its limits.
pub trait SolverBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Wall-clock limit for each subsequent call; `None` removes it.
    fn set_time_limit(&mut self, limit: Option<Duration>);

    /// Finds any point satisfying every row.
    fn solve_feasibility(&self, problem: &Problem<'_>) -> BackendOutcome;

    /// Minimizes `objective` over the rows.
    fn optimize(&self, problem: &Problem<'_>, objective: &LinearExpr) -> BackendOutcome;
}
