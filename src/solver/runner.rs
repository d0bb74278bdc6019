//! Staged lexicographic solving.
//!
//! [`StagedSolver`] runs the model's objective stages in order. After
//! each stage its optimum is frozen as a two-sided row, so later stages
//! can only choose among solutions that are optimal for every earlier
//! one. A final tie-break pass then fixes the assignment variables one
//! at a time in a seeded order, which makes the returned assignment
//! independent of how the backend happened to explore the search tree.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::backend::{BackendStatus, Problem, SolverBackend};
use super::configured::ConfiguredBackend;
use crate::config::{AssignConfig, BackendKind};
use crate::determinism::TieBreaker;
use crate::model::{Assignment, Constraint, Model, VarId};

/// Final status of a staged solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Every stage and the tie-break pass completed.
    Optimal,
    /// A valid assignment, but the node budget cut a search short.
    FeasibleNonOptimal,
    /// The hard constraints admit no solution.
    Infeasible,
    /// The time limit elapsed; the best incumbent, if any, is kept.
    TimedOut,
}

/// Observable lifecycle of a [`StagedSolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Unsolved,
    Solving,
    Finished(SolveStatus),
}

/// Value of one objective stage at the returned solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageValue {
    /// Stage name.
    pub name: String,
    /// Stage expression evaluated at the solution.
    pub value: f64,
}

/// Result of [`StagedSolver::solve`].
#[derive(Debug, Clone)]
pub struct SolveResult {
    /// How the solve ended.
    pub status: SolveStatus,
    /// Assignment of the incumbent; `None` when nothing was found.
    pub assignment: Option<Assignment>,
    /// Full variable vector of the incumbent.
    pub values: Option<Vec<f64>>,
    /// Stage values in priority order.
    pub stage_values: Vec<StageValue>,
    /// Search nodes across all backend calls.
    pub nodes: u64,
    /// Wall-clock time of the whole solve.
    pub elapsed: Duration,
}

impl SolveResult {
    pub fn is_solution_found(&self) -> bool {
        self.assignment.is_some()
    }

    /// Value of the named stage.
    pub fn stage_value(&self, name: &str) -> Option<f64> {
        self.stage_values
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value)
    }
}

/// Solver configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    /// Maximum solve time in milliseconds.
    pub time_limit_ms: u64,
    /// Seed of the tie-break permutation.
    pub seed: u64,
    /// Tolerance used when freezing a stage optimum.
    pub freeze_tolerance: f64,
    /// Exact backend built by [`StagedSolver::new`].
    pub backend: BackendKind,
    /// Node budget per backend call (branch and bound only).
    pub node_limit: Option<u64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit_ms: 60_000,
            seed: 0,
            freeze_tolerance: 1e-6,
            backend: BackendKind::Milp,
            node_limit: None,
        }
    }
}

impl SolverConfig {
    pub fn with_time_limit_ms(mut self, ms: u64) -> Self {
        self.time_limit_ms = ms;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_node_limit(mut self, nodes: Option<u64>) -> Self {
        self.node_limit = nodes;
        self
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }
}

impl From<&AssignConfig> for SolverConfig {
    fn from(config: &AssignConfig) -> Self {
        Self {
            time_limit_ms: config.time_limit_s.saturating_mul(1000),
            seed: config.seed,
            freeze_tolerance: config.freeze_tolerance,
            backend: config.backend,
            node_limit: config.node_limit,
        }
    }
}

/// Lexicographic solver over a [`SolverBackend`].
///
/// # Examples
///
/// ```
/// use u_assign::config::AssignConfig;
/// use u_assign::model::ModelBuilder;
/// use u_assign::records::{Project, RecordSet, Reviewer};
/// use u_assign::solver::{SolveStatus, SolverConfig, StagedSolver};
///
/// let records = RecordSet::new(
///     vec![Reviewer::new("R01", 0, 1), Reviewer::new("R02", 0, 1)],
///     vec![Project::new("P001", "ML", 2)],
/// );
/// let model = ModelBuilder::build(&records, &AssignConfig::default()).unwrap();
///
/// let mut solver = StagedSolver::new(SolverConfig::default());
/// let result = solver.solve(&model);
/// assert_eq!(result.status, SolveStatus::Optimal);
/// assert_eq!(result.assignment.unwrap().len(), 2);
/// ```
pub struct StagedSolver<B: SolverBackend = ConfiguredBackend> {
    backend: B,
    config: SolverConfig,
    state: SolverState,
}

impl StagedSolver<ConfiguredBackend> {
    /// Creates a solver with the backend named by `config`.
    pub fn new(config: SolverConfig) -> Self {
        let backend = ConfiguredBackend::new(config.backend, config.node_limit);
        Self::with_backend(backend, config)
    }
}

impl<B: SolverBackend> StagedSolver<B> {
    /// Creates a solver with a custom backend.
    pub fn with_backend(backend: B, config: SolverConfig) -> Self {
        Self {
            backend,
            config,
            state: SolverState::Unsolved,
        }
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solves every stage of `model`, then runs the tie-break pass.
    pub fn solve(&mut self, model: &Model) -> SolveResult {
        let start = Instant::now();
        let deadline = start.checked_add(self.config.time_limit());
        self.state = SolverState::Solving;

        info!(
            event = "solve_start",
            backend = self.backend.name(),
            variables = model.variables.len(),
            rows = model.constraints.len() + model.linking.len(),
            stages = model.stages.len(),
        );

        let base_rows = model.rows();
        let order = model.branch_order();
        let mut frozen: Vec<Constraint> = Vec::new();
        let mut incumbent: Option<Vec<f64>> = None;
        let mut nodes = 0;
        let mut degraded = false;
        let mut timed_out = false;

        if model.stages.is_empty() {
            self.backend.set_time_limit(budget(deadline));
            let outcome = self
                .backend
                .solve_feasibility(&Problem::new(&model.variables, base_rows.clone(), &order));
            nodes += outcome.nodes;
            timed_out = outcome.status == BackendStatus::TimedOut;
            incumbent = outcome.values;
        }

        for (index, stage) in model.stages.iter().enumerate() {
            if expired(deadline) {
                timed_out = true;
                break;
            }
            self.backend.set_time_limit(budget(deadline));

            let rows: Vec<&Constraint> = base_rows.iter().copied().chain(frozen.iter()).collect();
            let problem = Problem::new(&model.variables, rows, &order);
            let outcome = self.backend.optimize(&problem, &stage.minimization_expr());
            nodes += outcome.nodes;

            match outcome.status {
                BackendStatus::Optimal => {}
                BackendStatus::Feasible => degraded = true,
                BackendStatus::TimedOut => timed_out = true,
                BackendStatus::Infeasible => {
                    if index == 0 {
                        return self.finish(model, SolveStatus::Infeasible, None, nodes, start);
                    }
                    degraded = true;
                }
            }

            let Some(values) = outcome.values else {
                break;
            };
            let value = stage.expr.evaluate(&values);
            info!(
                event = "stage_end",
                stage = %stage.name,
                index,
                value,
                status = ?outcome.status,
                nodes = outcome.nodes,
            );
            frozen.push(stage.freeze(value, self.config.freeze_tolerance));
            incumbent = Some(values);
            if timed_out {
                break;
            }
        }

        let Some(witness) = incumbent else {
            let status = if timed_out {
                SolveStatus::TimedOut
            } else {
                SolveStatus::Infeasible
            };
            return self.finish(model, status, None, nodes, start);
        };

        let witness = if timed_out {
            witness
        } else {
            let rows: Vec<&Constraint> = base_rows.iter().copied().chain(frozen.iter()).collect();
            let (witness, complete) =
                self.tie_break(model, rows, &order, witness, deadline, &mut nodes);
            if !complete {
                if expired(deadline) {
                    timed_out = true;
                } else {
                    degraded = true;
                }
            }
            witness
        };

        let status = if timed_out {
            SolveStatus::TimedOut
        } else if degraded {
            SolveStatus::FeasibleNonOptimal
        } else {
            SolveStatus::Optimal
        };
        self.finish(model, status, Some(witness), nodes, start)
    }

    /// Fixes assignment variables in seeded order, preferring 1.
    ///
    /// Returns the final witness and whether every variable was decided.
    fn tie_break(
        &mut self,
        model: &Model,
        rows: Vec<&Constraint>,
        order: &[VarId],
        mut witness: Vec<f64>,
        deadline: Option<Instant>,
        nodes: &mut u64,
    ) -> (Vec<f64>, bool) {
        let names: Vec<&str> = model
            .assignments
            .iter()
            .map(|a| model.variables[a.var].name.as_str())
            .collect();
        let permutation = TieBreaker::new(self.config.seed).permutation(&names);

        let mut fixed: Vec<(VarId, f64)> = Vec::with_capacity(names.len());
        let mut checks = 0usize;
        for index in permutation {
            let var = model.assignments[index].var;
            if witness[var] > 0.5 {
                fixed.push((var, 1.0));
                continue;
            }
            if expired(deadline) {
                return (witness, false);
            }
            self.backend.set_time_limit(budget(deadline));

            fixed.push((var, 1.0));
            let problem = Problem::new(&model.variables, rows.clone(), order).with_fixed(&fixed);
            let outcome = self.backend.solve_feasibility(&problem);
            *nodes += outcome.nodes;
            checks += 1;

            match outcome.values {
                Some(values) => witness = values,
                None => {
                    fixed.pop();
                    fixed.push((var, 0.0));
                    if outcome.status != BackendStatus::Infeasible {
                        return (witness, false);
                    }
                }
            }
        }
        debug!(seed = self.config.seed, checks, "tie-break pass complete");
        (witness, true)
    }

    fn finish(
        &mut self,
        model: &Model,
        status: SolveStatus,
        values: Option<Vec<f64>>,
        nodes: u64,
        start: Instant,
    ) -> SolveResult {
        let elapsed = start.elapsed();
        let stage_values = values
            .as_ref()
            .map(|v| {
                model
                    .stages
                    .iter()
                    .map(|s| StageValue {
                        name: s.name.clone(),
                        value: s.expr.evaluate(v),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let assignment = values.as_ref().map(|v| model.assignment_from_values(v));

        info!(
            event = "solve_end",
            status = ?status,
            assigned = assignment.as_ref().map_or(0, Assignment::len),
            nodes,
            elapsed_ms = elapsed.as_millis() as u64,
        );

        self.state = SolverState::Finished(status);
        SolveResult {
            status,
            assignment,
            values,
            stage_values,
            nodes,
            elapsed,
        }
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

fn budget(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}
