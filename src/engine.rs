//! End-to-end assignment runs.
//!
//! ```text
//! records ─▶ build ─▶ solve ─┬─▶ audit ─▶ AssignmentOutcome
//!                            │
//!                 infeasible ▼
//!                        diagnose ─▶ soften ─▶ solve ─▶ audit
//! ```

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{ObjectiveReport, ResultAuditor};
use crate::config::AssignConfig;
use crate::diagnosis::{FeasibilityAnalyzer, InfeasibilityReport};
use crate::error::{AssignError, Result};
use crate::model::{Assignment, Model, ModelBuilder};
use crate::records::RecordSet;
use crate::soften::Softener;
use crate::solver::{
    ConfiguredBackend, SolveResult, SolveStatus, SolverBackend, SolverConfig, StagedSolver,
};

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentOutcome {
    pub status: SolveStatus,
    pub assignment: Assignment,
    pub report: ObjectiveReport,
    /// Diagnosis of the original model when softening was needed.
    pub diagnosis: Option<InfeasibilityReport>,
}

/// Runs build, solve, diagnosis, softening and audit with one
/// configuration.
pub struct AssignmentEngine<B: SolverBackend + Clone = ConfiguredBackend> {
    backend: B,
    config: AssignConfig,
}

impl AssignmentEngine<ConfiguredBackend> {
    /// Creates an engine with the backend named by `config.backend`.
    pub fn new(config: AssignConfig) -> Self {
        let backend = ConfiguredBackend::new(config.backend, config.node_limit);
        Self::with_backend(backend, config)
    }
}

impl<B: SolverBackend + Clone> AssignmentEngine<B> {
    pub fn with_backend(backend: B, config: AssignConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &AssignConfig {
        &self.config
    }

    /// Assigns reviewers to projects.
    ///
    /// # Errors
    ///
    /// - [`AssignError::InvalidInput`] for malformed records or config.
    /// - [`AssignError::InfeasibleModel`] when the hard constraints admit
    ///   no solution and nothing may be softened.
    /// - [`AssignError::SofteningExceeded`] when the softened model is
    ///   still infeasible.
    /// - [`AssignError::SolverTimeout`] when no assignment was found in
    ///   time.
    pub fn run(&self, records: &RecordSet) -> Result<AssignmentOutcome> {
        let model = ModelBuilder::build(records, &self.config)?;
        let result = self.solver().solve(&model);
        if result.status != SolveStatus::Infeasible {
            return self.finish(&model, result, None);
        }

        let diagnosis = self.analyzer().diagnose(&model);
        if !self.config.softening_enabled() {
            return Err(AssignError::InfeasibleModel {
                report: Box::new(diagnosis),
            });
        }

        let softened = Softener::soften(&model, &self.config)?;
        if !softened.is_softened() {
            warn!("softening enabled but no constraint is relaxable");
            return Err(AssignError::InfeasibleModel {
                report: Box::new(diagnosis),
            });
        }

        let result = self.solver().solve(&softened);
        if result.status == SolveStatus::Infeasible {
            let report = self.analyzer().diagnose(&softened);
            return Err(AssignError::SofteningExceeded {
                report: Box::new(report),
            });
        }
        self.finish(&softened, result, Some(diagnosis))
    }

    fn solver(&self) -> StagedSolver<B> {
        StagedSolver::with_backend(self.backend.clone(), SolverConfig::from(&self.config))
    }

    fn analyzer(&self) -> FeasibilityAnalyzer<B> {
        FeasibilityAnalyzer::with_backend(self.backend.clone(), &self.config)
    }

    fn finish(
        &self,
        model: &Model,
        result: SolveResult,
        diagnosis: Option<InfeasibilityReport>,
    ) -> Result<AssignmentOutcome> {
        let Some(assignment) = result.assignment else {
            return Err(AssignError::SolverTimeout {
                time_limit: self.config.time_limit(),
            });
        };
        let report = ResultAuditor::summarize(model, &assignment);

        info!(
            event = "assignment_complete",
            status = ?result.status,
            pairs = assignment.len(),
            softened = report.softenings.len(),
        );
        Ok(AssignmentOutcome {
            status: result.status,
            assignment,
            report,
            diagnosis,
        })
    }
}

/// Runs one assignment with the built-in backend.
///
/// # Examples
///
/// ```
/// use u_assign::config::AssignConfig;
/// use u_assign::records::{Project, RecordSet, Reviewer};
///
/// let records = RecordSet::new(
///     vec![Reviewer::new("R01", 1, 2), Reviewer::new("R02", 1, 2)],
///     vec![Project::new("P001", "ML", 1), Project::new("P002", "ML", 1)],
/// );
/// let outcome = u_assign::assign(&records, &AssignConfig::default()).unwrap();
/// assert_eq!(outcome.assignment.len(), 2);
/// assert!(outcome.report.is_clean());
/// ```
pub fn assign(records: &RecordSet, config: &AssignConfig) -> Result<AssignmentOutcome> {
    AssignmentEngine::new(config.clone()).run(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InputError;
    use crate::model::SoftenKind;
    use crate::records::{Project, Reviewer};

    fn overloaded() -> RecordSet {
        RecordSet::new(
            vec![Reviewer::new("R01", 2, 2), Reviewer::new("R02", 0, 2)],
            vec![
                Project::new("P001", "ML", 2),
                Project::new("P002", "ML", 2),
                Project::new("P003", "ML", 1),
            ],
        )
    }

    #[test]
    fn test_invalid_input() {
        let mut records = overloaded();
        records.reviewers[1].max_load = -1;
        let err = assign(&records, &AssignConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            AssignError::InvalidInput(InputError::InvertedLoadBounds { .. })
        ));
    }

    #[test]
    fn test_infeasible_without_softening() {
        let config = AssignConfig::default().with_parallel(false);
        let err = assign(&overloaded(), &config).unwrap_err();
        let report = err.report().unwrap();
        assert!(matches!(err, AssignError::InfeasibleModel { .. }));
        assert!(report.in_mus("coverage:P001"));
    }

    #[test]
    fn test_softening_recovers() {
        let config = AssignConfig::default()
            .with_needs_softening(1)
            .with_parallel(false);
        let outcome = assign(&overloaded(), &config).unwrap();

        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(outcome.assignment.len(), 4);
        assert!(outcome.diagnosis.is_some());
        assert_eq!(outcome.report.softenings.len(), 1);
        assert_eq!(outcome.report.softenings[0].kind, SoftenKind::ProjectNeeds);
        assert_eq!(outcome.report.softenings[0].magnitude, 1);
        assert!(outcome.report.is_clean());
    }

    #[test]
    fn test_softening_exceeded() {
        let records = RecordSet::new(
            vec![Reviewer::new("R01", 0, 1)],
            vec![Project::new("P001", "ML", 3)],
        );
        let config = AssignConfig::default()
            .with_needs_softening(1)
            .with_parallel(false);
        let err = assign(&records, &config).unwrap_err();
        assert!(matches!(err, AssignError::SofteningExceeded { .. }));
        assert!(err.report().unwrap().in_mus("coverage:P001"));
    }
}
