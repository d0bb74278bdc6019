//! MILP backend over `good_lp`.
//!
//! Each backend call translates the [`Problem`] into a fresh `good_lp`
//! model and hands it to the pure-Rust `microlp` solver. Fixings become
//! variable bounds; two-sided rows become a pair of inequalities.
//!
//! # Limitations
//!
//! `microlp` cannot be interrupted, so the time limit is checked before
//! each call only. A call that starts before the deadline runs to
//! completion.

use std::time::{Duration, Instant};

use good_lp::solvers::microlp::microlp;
use good_lp::{
    variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel,
    Variable as LpVariable,
};
use tracing::{trace, warn};

use super::backend::{BackendOutcome, BackendStatus, Problem, SolverBackend};
use crate::model::{LinearExpr, VarKind};

/// Exact backend solving each call as a mixed-integer program.
///
/// # Examples
///
/// ```
/// use u_assign::model::{Bound, Constraint, ConstraintKind, LinearExpr, Scope, Variable};
/// use u_assign::solver::{BackendStatus, MilpBackend, Problem, SolverBackend};
///
/// let variables = vec![Variable::binary("a"), Variable::binary("b")];
/// let row = Constraint::new(
///     "pick_one",
///     ConstraintKind::Coverage,
///     Scope::Global,
///     LinearExpr::sum([0, 1]),
///     Bound::Exactly(1.0),
/// );
/// let order = [0, 1];
/// let problem = Problem::new(&variables, vec![&row], &order);
///
/// // prefer b
/// let cost = LinearExpr::new().with_term(0, 2.0).with_term(1, 1.0);
/// let outcome = MilpBackend::new().optimize(&problem, &cost);
/// assert_eq!(outcome.status, BackendStatus::Optimal);
/// assert_eq!(outcome.values.unwrap(), vec![0.0, 1.0]);
/// ```
#[derive(Debug, Clone)]
pub struct MilpBackend {
    time_limit: Option<Duration>,
    tolerance: f64,
}

impl Default for MilpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MilpBackend {
    pub fn new() -> Self {
        Self {
            time_limit: None,
            tolerance: 1e-6,
        }
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Feasibility tolerance for rows without variables and for
    /// out-of-range fixings.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn run(&self, problem: &Problem<'_>, objective: Option<&LinearExpr>) -> BackendOutcome {
        let start = Instant::now();
        if self.time_limit.is_some_and(|limit| limit.is_zero()) {
            return timed_out();
        }

        let mut lower: Vec<f64> = problem.variables.iter().map(|v| v.lower).collect();
        let mut upper: Vec<f64> = problem.variables.iter().map(|v| v.upper).collect();
        for &(var, value) in problem.fixed {
            if value < lower[var] - self.tolerance || value > upper[var] + self.tolerance {
                return BackendOutcome::infeasible(0);
            }
            lower[var] = value;
            upper[var] = value;
        }

        let mut vars = ProblemVariables::new();
        let handles: Vec<LpVariable> = problem
            .variables
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let definition = match v.kind {
                    VarKind::Binary if lower[i] == 0.0 && upper[i] == 1.0 => variable().binary(),
                    VarKind::Continuous => variable(),
                    VarKind::Binary | VarKind::Integer => variable().integer(),
                };
                let definition = if lower[i].is_finite() {
                    definition.min(lower[i])
                } else {
                    definition
                };
                let definition = if upper[i].is_finite() {
                    definition.max(upper[i])
                } else {
                    definition
                };
                vars.add(definition)
            })
            .collect();

        let cost = objective.map_or_else(
            || Expression::with_capacity(0),
            |expr| translate(expr, &handles),
        );
        let mut model = vars.minimise(cost).using(microlp);

        for row in &problem.rows {
            let lo = row.bound.lower() - row.expr.constant;
            let hi = row.bound.upper() - row.expr.constant;
            if row.expr.terms.iter().all(|&(_, c)| c == 0.0) {
                if lo > self.tolerance || hi < -self.tolerance {
                    trace!(row = %row.id, "empty row cannot hold");
                    return BackendOutcome::infeasible(0);
                }
                continue;
            }
            let expr = translate(&row.expr, &handles);
            if lo == hi {
                model = model.with(expr.eq(lo));
                continue;
            }
            if lo.is_finite() {
                model = model.with(expr.clone().geq(lo));
            }
            if hi.is_finite() {
                model = model.with(expr.leq(hi));
            }
        }

        match model.solve() {
            Ok(solution) => {
                let values: Vec<f64> = handles
                    .iter()
                    .zip(problem.variables)
                    .map(|(&handle, v)| {
                        let value = solution.value(handle);
                        if v.is_integral() {
                            value.round()
                        } else {
                            value
                        }
                    })
                    .collect();
                let objective_value = objective.map_or(0.0, |expr| expr.evaluate(&values));
                trace!(
                    objective = objective_value,
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "milp solved"
                );
                BackendOutcome {
                    status: BackendStatus::Optimal,
                    values: Some(values),
                    objective: Some(objective_value),
                    nodes: 1,
                }
            }
            Err(ResolutionError::Infeasible) => BackendOutcome::infeasible(1),
            Err(err) => {
                warn!(error = %err, "milp solver gave no answer");
                BackendOutcome {
                    nodes: 1,
                    ..timed_out()
                }
            }
        }
    }
}

impl SolverBackend for MilpBackend {
    fn name(&self) -> &str {
        "milp-microlp"
    }

    fn set_time_limit(&mut self, limit: Option<Duration>) {
        self.time_limit = limit;
    }

    fn solve_feasibility(&self, problem: &Problem<'_>) -> BackendOutcome {
        self.run(problem, None)
    }

    fn optimize(&self, problem: &Problem<'_>, objective: &LinearExpr) -> BackendOutcome {
        self.run(problem, Some(objective))
    }
}

fn translate(expr: &LinearExpr, handles: &[LpVariable]) -> Expression {
    let mut out = Expression::with_capacity(expr.terms.len());
    for &(var, coefficient) in &expr.terms {
        out += coefficient * handles[var];
    }
    out
}

fn timed_out() -> BackendOutcome {
    BackendOutcome {
        status: BackendStatus::TimedOut,
        values: None,
        objective: None,
        nodes: 0,
    }
}
