//! Built-in exact backend: depth-first branch and bound.

use std::time::{Duration, Instant};

use tracing::debug;

use super::backend::{BackendOutcome, BackendStatus, Problem, SolverBackend};
use crate::model::{Constraint, LinearExpr, VarId, VarKind};

/// Propagation sweeps per node before giving up on a fixpoint.
const MAX_ROUNDS: usize = 64;

/// Smallest bound change that counts as progress.
const EPS: f64 = 1e-9;

type Domain = (f64, f64);

/// Depth-first branch and bound with interval bound propagation.
///
/// Integral variables are branched on in the problem's branch order,
/// trying the value the objective favors first. Every node runs bound
/// propagation over all rows to a fixpoint; a node is pruned when the
/// objective's interval lower bound cannot beat the incumbent.
///
/// The search is deterministic: the same problem and limits give the
/// same outcome.
///
/// # Limitations
///
/// - Continuous variables are never branched on. At a leaf each one is
///   set to the bound its objective coefficient favors and propagation
///   re-runs. This is exact for variables implied by the integral ones,
///   such as deviation pairs, and only a heuristic otherwise.
/// - No LP relaxation: pruning uses interval bounds only, so large
///   instances rely on `node_limit` or the time limit.
#[derive(Debug, Clone)]
pub struct BranchAndBound {
    time_limit: Option<Duration>,
    node_limit: Option<u64>,
    tolerance: f64,
}

impl BranchAndBound {
    pub fn new() -> Self {
        Self {
            time_limit: None,
            node_limit: None,
            tolerance: 1e-6,
        }
    }

    /// Sets the wall-clock limit per call.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Sets the node budget per call.
    pub fn with_node_limit(mut self, limit: Option<u64>) -> Self {
        self.node_limit = limit;
        self
    }

    /// Sets the relative feasibility tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn node_limit(&self) -> Option<u64> {
        self.node_limit
    }
}

impl Default for BranchAndBound {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverBackend for BranchAndBound {
    fn name(&self) -> &str {
        "branch-and-bound"
    }

    fn set_time_limit(&mut self, limit: Option<Duration>) {
        self.time_limit = limit;
    }

    fn solve_feasibility(&self, problem: &Problem<'_>) -> BackendOutcome {
        Search::new(self, problem, None).run()
    }

    fn optimize(&self, problem: &Problem<'_>, objective: &LinearExpr) -> BackendOutcome {
        Search::new(self, problem, Some(objective)).run()
    }
}

/// Why a search stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Deadline,
    NodeLimit,
    FirstFound,
}

struct Search<'p, 'a> {
    problem: &'p Problem<'a>,
    objective: Option<&'p LinearExpr>,
    /// Dense objective coefficients.
    weights: Vec<f64>,
    order: Vec<VarId>,
    continuous: Vec<VarId>,
    tolerance: f64,
    deadline: Option<Instant>,
    node_limit: Option<u64>,
    nodes: u64,
    halt: Option<Halt>,
    best: Option<(Vec<f64>, f64)>,
}

impl<'p, 'a> Search<'p, 'a> {
    fn new(
        backend: &BranchAndBound,
        problem: &'p Problem<'a>,
        objective: Option<&'p LinearExpr>,
    ) -> Self {
        let n = problem.variables.len();

        let mut seen = vec![false; n];
        let mut order = Vec::new();
        for &var in problem.branch_order {
            if var < n && !seen[var] && problem.variables[var].is_integral() {
                seen[var] = true;
                order.push(var);
            }
        }
        for (var, v) in problem.variables.iter().enumerate() {
            if !seen[var] && v.is_integral() {
                order.push(var);
            }
        }
        let continuous = problem
            .variables
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_integral())
            .map(|(i, _)| i)
            .collect();

        Self {
            problem,
            objective,
            weights: objective.map_or_else(|| vec![0.0; n], |o| o.to_dense(n)),
            order,
            continuous,
            tolerance: backend.tolerance,
            deadline: backend
                .time_limit
                .and_then(|limit| Instant::now().checked_add(limit)),
            node_limit: backend.node_limit,
            nodes: 0,
            halt: None,
            best: None,
        }
    }

    fn run(mut self) -> BackendOutcome {
        let mut domains: Vec<Domain> = self
            .problem
            .variables
            .iter()
            .map(|v| (v.lower, v.upper))
            .collect();

        for &(var, value) in self.problem.fixed {
            let Some(domain) = domains.get_mut(var) else {
                continue;
            };
            if value < domain.0 - self.tolerance || value > domain.1 + self.tolerance {
                return BackendOutcome::infeasible(0);
            }
            *domain = (value, value);
        }

        if self.propagate(&mut domains) {
            self.dfs(domains);
        }
        self.finish()
    }

    fn finish(self) -> BackendOutcome {
        let status = match (self.halt, self.best.is_some()) {
            (None, true) | (Some(Halt::FirstFound), _) => BackendStatus::Optimal,
            (None, false) => BackendStatus::Infeasible,
            (Some(Halt::NodeLimit), true) => BackendStatus::Feasible,
            (Some(_), _) => BackendStatus::TimedOut,
        };
        debug!(
            backend = "branch-and-bound",
            nodes = self.nodes,
            status = ?status,
            "search finished"
        );
        let (values, objective) = match self.best {
            Some((values, objective)) => (Some(values), Some(objective)),
            None => (None, None),
        };
        BackendOutcome {
            status,
            values,
            objective,
            nodes: self.nodes,
        }
    }

    fn dfs(&mut self, domains: Vec<Domain>) {
        if self.halt.is_some() {
            return;
        }
        self.nodes += 1;
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.halt = Some(Halt::Deadline);
            return;
        }
        if self.node_limit.is_some_and(|limit| self.nodes > limit) {
            self.halt = Some(Halt::NodeLimit);
            return;
        }
        if self.is_dominated(&domains) {
            return;
        }

        let Some(var) = self.next_branch_var(&domains) else {
            self.complete(domains);
            return;
        };

        for branch in self.branches(var, domains[var]) {
            let mut child = domains.clone();
            child[var] = branch;
            if self.propagate(&mut child) {
                self.dfs(child);
            }
            if self.halt.is_some() {
                return;
            }
        }
    }

    fn is_dominated(&self, domains: &[Domain]) -> bool {
        match (self.objective, &self.best) {
            (Some(objective), Some((_, best))) => {
                objective.lower_bound(domains) >= best - self.tolerance * (1.0 + best.abs())
            }
            _ => false,
        }
    }

    fn next_branch_var(&self, domains: &[Domain]) -> Option<VarId> {
        self.order.iter().copied().find(|&v| {
            let (lo, hi) = domains[v];
            hi - lo > EPS
        })
    }

    /// Child domains for `var`, preferred branch first.
    fn branches(&self, var: VarId, (lo, hi): Domain) -> [Domain; 2] {
        let c = self.weights[var];
        let prefer_low = if c > 0.0 {
            true
        } else if c < 0.0 {
            false
        } else {
            self.problem.variables[var].kind != VarKind::Binary
        };
        if prefer_low {
            [(lo, lo), (lo + 1.0, hi)]
        } else {
            [(hi, hi), (lo, hi - 1.0)]
        }
    }

    /// Leaf: fixes continuous variables, verifies, and records the point.
    fn complete(&mut self, mut domains: Vec<Domain>) {
        for &var in &self.continuous {
            let (lo, hi) = domains[var];
            if hi - lo <= EPS {
                continue;
            }
            let value = if self.weights[var] < 0.0 && hi.is_finite() {
                hi
            } else if lo.is_finite() {
                lo
            } else if hi.is_finite() {
                hi
            } else {
                0.0
            };
            domains[var] = (value, value);
            if !self.propagate(&mut domains) {
                return;
            }
        }

        let values: Vec<f64> = domains
            .iter()
            .zip(self.problem.variables)
            .map(|(&(lo, _), v)| if v.is_integral() { lo.round() } else { lo })
            .collect();

        if !self
            .problem
            .rows
            .iter()
            .all(|row| row.is_satisfied_by(&values, self.tolerance))
        {
            return;
        }

        let objective = self.objective.map_or(0.0, |o| o.evaluate(&values));
        let improves = match &self.best {
            None => true,
            Some((_, best)) => objective < best - self.tolerance * (1.0 + best.abs()),
        };
        if improves {
            self.best = Some((values, objective));
        }
        if self.objective.is_none() {
            self.halt = Some(Halt::FirstFound);
        }
    }

    /// Tightens domains to a fixpoint. `false` when a row is violated.
    fn propagate(&self, domains: &mut [Domain]) -> bool {
        for _ in 0..MAX_ROUNDS {
            let mut changed = false;
            for row in &self.problem.rows {
                match self.tighten(row, domains) {
                    Some(c) => changed |= c,
                    None => return false,
                }
            }
            if !changed {
                return true;
            }
        }
        true
    }

    /// One pass of interval reasoning over `lower ≤ Σ c·x ≤ upper`.
    ///
    /// Returns `None` on infeasibility, otherwise whether a domain shrank.
    fn tighten(&self, row: &Constraint, domains: &mut [Domain]) -> Option<bool> {
        let lower = row.bound.lower() - row.expr.constant;
        let upper = row.bound.upper() - row.expr.constant;

        let (mut min_sum, mut min_inf, mut max_sum, mut max_inf) = (0.0, 0usize, 0.0, 0usize);
        for &(var, c) in &row.expr.terms {
            let (a, b) = contribution(c, domains[var]);
            if a.is_finite() {
                min_sum += a;
            } else {
                min_inf += 1;
            }
            if b.is_finite() {
                max_sum += b;
            } else {
                max_inf += 1;
            }
        }

        if min_inf == 0 && min_sum > upper + self.tolerance * (1.0 + upper.abs()) {
            return None;
        }
        if max_inf == 0 && max_sum < lower - self.tolerance * (1.0 + lower.abs()) {
            return None;
        }

        let mut changed = false;
        for &(var, c) in &row.expr.terms {
            let (lo, hi) = domains[var];
            let (a, b) = contribution(c, (lo, hi));
            let rest_min = residual(min_sum, min_inf, a, f64::NEG_INFINITY);
            let rest_max = residual(max_sum, max_inf, b, f64::INFINITY);

            // lower - rest_max ≤ c·x ≤ upper - rest_min
            let cx_lo = lower - rest_max;
            let cx_hi = upper - rest_min;
            let (mut new_lo, mut new_hi) = if c > 0.0 {
                (cx_lo / c, cx_hi / c)
            } else {
                (cx_hi / c, cx_lo / c)
            };
            let integral = self.problem.variables[var].is_integral();
            if integral {
                new_lo = (new_lo - self.tolerance).ceil();
                new_hi = (new_hi + self.tolerance).floor();
            }
            let mut new_lo = new_lo.max(lo);
            let mut new_hi = new_hi.min(hi);

            if new_lo > new_hi {
                if new_lo - new_hi > self.tolerance * (1.0 + new_lo.abs()) {
                    return None;
                }
                let v = new_lo.min(hi);
                new_lo = v;
                new_hi = v;
            }

            if new_lo > lo + EPS || new_hi < hi - EPS {
                domains[var] = (new_lo, new_hi);
                changed = true;
            }
        }
        Some(changed)
    }
}

/// `(min, max)` of `c·x` over `domain`.
fn contribution(c: f64, (lo, hi): Domain) -> (f64, f64) {
    if c > 0.0 {
        (c * lo, c * hi)
    } else {
        (c * hi, c * lo)
    }
}

/// Sum of the other terms' extremes, given this term's extreme `own`.
fn residual(sum: f64, infinite: usize, own: f64, unbounded: f64) -> f64 {
    match (own.is_finite(), infinite) {
        (true, 0) => sum - own,
        (false, 1) => sum,
        _ => unbounded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bound, ConstraintKind, Scope, Variable};

    fn row(id: &str, expr: LinearExpr, bound: Bound) -> Constraint {
        Constraint::new(id, ConstraintKind::Coverage, Scope::Global, expr, bound)
    }

    #[test]
    fn test_optimize_binary() {
        let vars = vec![Variable::binary("a"), Variable::binary("b")];
        let rows = [row("pick_one", LinearExpr::sum([0, 1]), Bound::Exactly(1.0))];
        let order = [0, 1];
        let problem = Problem::new(&vars, rows.iter().collect(), &order);

        let out = BranchAndBound::new().optimize(&problem, &LinearExpr::new().with_term(0, 1.0));
        assert_eq!(out.status, BackendStatus::Optimal);
        assert_eq!(out.values, Some(vec![0.0, 1.0]));
        assert_eq!(out.objective, Some(0.0));
    }

    #[test]
    fn test_infeasible() {
        let vars = vec![Variable::binary("a"), Variable::binary("b")];
        let rows = [row("too_many", LinearExpr::sum([0, 1]), Bound::Exactly(3.0))];
        let problem = Problem::new(&vars, rows.iter().collect(), &[]);

        let out = BranchAndBound::new().solve_feasibility(&problem);
        assert!(out.is_infeasible());
        assert!(!out.is_solution_found());
    }

    #[test]
    fn test_integer_bounds_tighten() {
        let vars = vec![Variable::integer("y", 0, 5)];
        let rows = [row("half", LinearExpr::new().with_term(0, 2.0), Bound::AtLeast(5.0))];
        let problem = Problem::new(&vars, rows.iter().collect(), &[]);

        let out = BranchAndBound::new().optimize(&problem, &LinearExpr::sum([0]));
        assert_eq!(out.values, Some(vec![3.0]));
    }

    #[test]
    fn test_continuous_deviation_completion() {
        // x0 + x1 - pos + neg = 0.5, x0 + x1 = 1
        let vars = vec![
            Variable::binary("x0"),
            Variable::binary("x1"),
            Variable::continuous("pos", 0.0, 2.0),
            Variable::continuous("neg", 0.0, 0.5),
        ];
        let link = LinearExpr::sum([0, 1]).with_term(2, -1.0).with_term(3, 1.0);
        let rows = [
            row("cover", LinearExpr::sum([0, 1]), Bound::Exactly(1.0)),
            row("link", link, Bound::Exactly(0.5)),
        ];
        let order = [0, 1];
        let problem = Problem::new(&vars, rows.iter().collect(), &order);

        let out = BranchAndBound::new().optimize(&problem, &LinearExpr::sum([2, 3]));
        let values = out.values.unwrap();
        assert_eq!(out.status, BackendStatus::Optimal);
        assert!((values[2] - 0.5).abs() < 1e-9);
        assert_eq!(values[3], 0.0);
    }

    #[test]
    fn test_fixed_values() {
        let vars = vec![Variable::binary("a"), Variable::binary("b")];
        let rows = [row("pick_one", LinearExpr::sum([0, 1]), Bound::Exactly(1.0))];
        let fixed = [(0, 1.0)];
        let problem = Problem::new(&vars, rows.iter().collect(), &[]).with_fixed(&fixed);

        let out = BranchAndBound::new().solve_feasibility(&problem);
        assert_eq!(out.values, Some(vec![1.0, 0.0]));

        let fixed = [(0, 2.0)];
        let problem = Problem::new(&vars, rows.iter().collect(), &[]).with_fixed(&fixed);
        assert!(BranchAndBound::new().solve_feasibility(&problem).is_infeasible());
    }

    #[test]
    fn test_node_limit_without_incumbent() {
        let vars: Vec<Variable> = (0..4).map(|i| Variable::binary(format!("x{i}"))).collect();
        let rows = [row("two", LinearExpr::sum(0..4), Bound::Exactly(2.0))];
        let problem = Problem::new(&vars, rows.iter().collect(), &[]);

        let out = BranchAndBound::new()
            .with_node_limit(Some(1))
            .optimize(&problem, &LinearExpr::new());
        assert_eq!(out.status, BackendStatus::TimedOut);
        assert!(out.values.is_none());
    }

    #[test]
    fn test_zero_deadline_times_out() {
        let vars = vec![Variable::binary("a")];
        let problem = Problem::new(&vars, Vec::new(), &[]);

        let mut backend = BranchAndBound::new();
        backend.set_time_limit(Some(Duration::ZERO));
        let out = backend.solve_feasibility(&problem);
        assert_eq!(out.status, BackendStatus::TimedOut);
    }

    #[test]
    fn test_deterministic() {
        let vars: Vec<Variable> = (0..6).map(|i| Variable::binary(format!("x{i}"))).collect();
        let rows = [row("three", LinearExpr::sum(0..6), Bound::Exactly(3.0))];
        let order: Vec<VarId> = (0..6).rev().collect();
        let problem = Problem::new(&vars, rows.iter().collect(), &order);
        let objective = LinearExpr::new().with_term(2, -1.0).with_term(4, -1.0);

        let first = BranchAndBound::new().optimize(&problem, &objective);
        for _ in 0..3 {
            let again = BranchAndBound::new().optimize(&problem, &objective);
            assert_eq!(again.values, first.values);
            assert_eq!(again.nodes, first.nodes);
        }
        assert_eq!(first.objective, Some(-2.0));
    }
}
