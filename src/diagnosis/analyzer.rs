//! Minimal unsatisfiable subsets by deletion filtering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::report::{ConstraintRef, InfeasibilityReport};
use crate::config::AssignConfig;
use crate::model::{Constraint, ConstraintKind, Model, ModelBuilder};
use crate::records::RecordSet;
use crate::soften::Softener;
use crate::solver::{ConfiguredBackend, Problem, SolverBackend};

/// Outcome of one feasibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Check {
    Feasible,
    Infeasible,
    /// The check ran out of time or budget.
    Unknown,
}

/// Explains infeasible models.
///
/// [`diagnose`](Self::diagnose) runs a deletion filter over the model's
/// hard constraints: each candidate is removed in turn and kept out
/// only if the rest stays infeasible. The survivors form a minimal
/// unsatisfiable subset (minimal, not minimum). Linking rows are always
/// present and never reported.
///
/// All checks of one diagnosis share a single budget, the configured
/// time limit. Once it is spent the remaining checks count as unknown
/// and the report is marked incomplete. A check already running when
/// the budget ends is allowed to finish.
///
/// With the `parallel` feature and `config.parallel`, the independent
/// checks behind interchangeable constraints and remedies run on rayon.
/// Results are gathered in input order, so the report does not depend
/// on scheduling.
///
/// # Examples
///
/// ```
/// use u_assign::config::AssignConfig;
/// use u_assign::diagnosis::FeasibilityAnalyzer;
/// use u_assign::model::ModelBuilder;
/// use u_assign::records::{Project, RecordSet, Reviewer};
///
/// let records = RecordSet::new(
///     vec![Reviewer::new("R01", 0, 1)],
///     vec![Project::new("P001", "ML", 2)],
/// );
/// let config = AssignConfig::default();
/// let model = ModelBuilder::build(&records, &config).unwrap();
///
/// let report = FeasibilityAnalyzer::new(&config).diagnose(&model);
/// assert!(report.in_mus("coverage:P001"));
/// ```
pub struct FeasibilityAnalyzer<B: SolverBackend = ConfiguredBackend> {
    backend: B,
    config: AssignConfig,
    budget: Duration,
}

impl FeasibilityAnalyzer<ConfiguredBackend> {
    /// Creates an analyzer with the backend named by `config.backend`.
    pub fn new(config: &AssignConfig) -> Self {
        let backend = ConfiguredBackend::new(config.backend, config.node_limit);
        Self::with_backend(backend, config)
    }
}

impl<B: SolverBackend> FeasibilityAnalyzer<B> {
    /// Creates an analyzer with a custom backend.
    pub fn with_backend(mut backend: B, config: &AssignConfig) -> Self {
        backend.set_time_limit(Some(config.time_limit()));
        Self {
            backend,
            config: config.clone(),
            budget: config.time_limit(),
        }
    }

    /// Overrides the total time budget of one diagnosis.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Diagnoses `model`. Returns an empty report if it is feasible.
    pub fn diagnose(&self, model: &Model) -> InfeasibilityReport {
        let session = Session {
            backend: &self.backend,
            parallel: self.config.parallel,
            model,
            deadline: Instant::now().checked_add(self.budget),
            checks: AtomicUsize::new(0),
            expired: AtomicUsize::new(0),
        };

        info!(
            event = "diagnosis_start",
            backend = self.backend.name(),
            constraints = model.constraints.len(),
            parallel = self.config.parallel,
        );

        let mut complete = true;
        let mut members: Vec<usize> = (0..model.constraints.len()).collect();
        match session.check_subset(&members) {
            Check::Feasible => {
                info!(event = "diagnosis_end", feasible = true);
                return InfeasibilityReport {
                    checks: session.checks(),
                    ..InfeasibilityReport::default()
                };
            }
            Check::Unknown => {
                warn!("feasibility of the full model is unknown; diagnosing anyway");
                complete = false;
            }
            Check::Infeasible => {}
        }

        let mut pos = 0;
        while pos < members.len() {
            let removed = members.remove(pos);
            let id = &model.constraints[removed].id;
            match session.check_subset(&members) {
                Check::Infeasible => debug!(constraint = %id, "dropped from core"),
                Check::Feasible => {
                    members.insert(pos, removed);
                    pos += 1;
                }
                Check::Unknown => {
                    warn!(constraint = %id, "check timed out; keeping constraint");
                    complete = false;
                    members.insert(pos, removed);
                    pos += 1;
                }
            }
        }

        let interchangeable = session.interchangeable(&members);
        let remedies = session.remedies(&members, &interchangeable);
        if session.expired() > 0 {
            warn!(
                skipped = session.expired(),
                budget_ms = self.budget.as_millis() as u64,
                "diagnosis budget spent; report is incomplete"
            );
            complete = false;
        }
        let mut report = InfeasibilityReport {
            mus: members
                .iter()
                .map(|&i| ConstraintRef::from(&model.constraints[i]))
                .collect(),
            interchangeable: interchangeable
                .iter()
                .map(|&i| ConstraintRef::from(&model.constraints[i]))
                .collect(),
            remedies,
            checks: 0,
            complete,
        };
        report.rank_remedies();
        report.checks = session.checks();

        info!(
            event = "diagnosis_end",
            feasible = false,
            mus = report.mus.len(),
            interchangeable = report.interchangeable.len(),
            remedies = report.remedies.len(),
            checks = report.checks,
            complete,
        );
        report
    }
}

/// State of one diagnosis.
pub(super) struct Session<'a, B: SolverBackend> {
    backend: &'a B,
    parallel: bool,
    pub(super) model: &'a Model,
    /// Shared end of the diagnosis budget.
    deadline: Option<Instant>,
    checks: AtomicUsize,
    /// Checks skipped because the budget was spent.
    expired: AtomicUsize,
}

impl<'a, B: SolverBackend> Session<'a, B> {
    pub(super) fn checks(&self) -> usize {
        self.checks.load(Ordering::Relaxed)
    }

    fn expired(&self) -> usize {
        self.expired.load(Ordering::Relaxed)
    }

    /// Feasibility of the given constraints plus the linking rows.
    pub(super) fn check_subset(&self, members: &[usize]) -> Check {
        let rows = members
            .iter()
            .map(|&i| &self.model.constraints[i])
            .chain(self.model.linking.iter())
            .collect();
        self.check_rows(self.model, rows)
    }

    /// Feasibility of a model rebuilt from modified inputs.
    ///
    /// The rebuilt model is softened the same way as the diagnosed one.
    pub(super) fn check_rebuilt(&self, records: &RecordSet, config: &AssignConfig) -> Check {
        let model = match ModelBuilder::build(records, config) {
            Ok(model) => model,
            Err(err) => {
                debug!(error = %err, "trial model rejected");
                return Check::Unknown;
            }
        };
        let model = if self.model.is_softened() {
            match Softener::soften(&model, config) {
                Ok(model) => model,
                Err(err) => {
                    debug!(error = %err, "trial model rejected");
                    return Check::Unknown;
                }
            }
        } else {
            model
        };
        self.check_rows(&model, model.rows())
    }

    fn check_rows(&self, model: &Model, rows: Vec<&Constraint>) -> Check {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            self.expired.fetch_add(1, Ordering::Relaxed);
            return Check::Unknown;
        }
        let order = model.branch_order();
        let outcome = self
            .backend
            .solve_feasibility(&Problem::new(&model.variables, rows, &order));
        self.checks.fetch_add(1, Ordering::Relaxed);

        if outcome.is_solution_found() {
            Check::Feasible
        } else if outcome.is_infeasible() {
            Check::Infeasible
        } else {
            Check::Unknown
        }
    }

    /// Load-bound constraints outside `members` that can stand in for a
    /// same-side load-bound member.
    fn interchangeable(&self, members: &[usize]) -> Vec<usize> {
        let constraints = &self.model.constraints;
        let load_members: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&i| constraints[i].kind == ConstraintKind::LoadBound)
            .collect();
        if load_members.is_empty() {
            return Vec::new();
        }

        let swaps: Vec<(usize, usize)> = (0..constraints.len())
            .filter(|i| !members.contains(i))
            .filter(|&i| constraints[i].kind == ConstraintKind::LoadBound)
            .filter_map(|outside| {
                let side = constraints[outside].bound.has_upper();
                load_members
                    .iter()
                    .copied()
                    .find(|&m| constraints[m].bound.has_upper() == side)
                    .map(|member| (outside, member))
            })
            .collect();

        let results = self.map(&swaps, |&(outside, member)| {
            let swapped: Vec<usize> = members
                .iter()
                .map(|&i| if i == member { outside } else { i })
                .collect();
            self.check_subset(&swapped) == Check::Infeasible
        });

        swaps
            .iter()
            .zip(results)
            .filter(|(_, infeasible)| *infeasible)
            .map(|(&(outside, _), _)| outside)
            .collect()
    }

    /// Maps `f` over `items`, on rayon when enabled. Output follows input
    /// order.
    pub(super) fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            if self.parallel {
                use rayon::prelude::*;
                return items.par_iter().map(f).collect();
            }
        }
        #[cfg(not(feature = "parallel"))]
        let _ = self.parallel;

        items.iter().map(f).collect()
    }
}
