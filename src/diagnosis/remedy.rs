//! Remedy estimation.
//!
//! Each remedy is sized by re-running the model builder on modified
//! inputs and searching for the smallest change that makes the rebuilt
//! model feasible. Changes are monotone (more capacity never hurts), so
//! a binary search over the delta finds the minimum.

use std::collections::BTreeSet;

use tracing::debug;

use super::analyzer::{Check, Session};
use super::report::{Remedy, RemedySuggestion};
use crate::determinism::order;
use crate::model::{ConstraintKind, Scope};
use crate::records::{RecordSet, Reviewer};
use crate::solver::SolverBackend;

/// One remedy search.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Trial {
    RaiseMaxLoad(Vec<String>),
    LowerMinLoad(Vec<String>),
    Recruit(String),
    RaiseCap(ConstraintKind),
}

impl<B: SolverBackend> Session<'_, B> {
    /// Remedies for the core `mus` and its `interchangeable` members.
    pub(super) fn remedies(&self, mus: &[usize], interchangeable: &[usize]) -> Vec<RemedySuggestion> {
        let mut remedies: Vec<RemedySuggestion> =
            self.coi_density().into_iter().map(Into::into).collect();

        let trials = self.trials(mus, interchangeable);
        let found = self.map(&trials, |trial| self.estimate(trial));
        remedies.extend(found.into_iter().flatten().map(RemedySuggestion::from));
        remedies
    }

    /// Entities whose eligible counterparts, after conflicts, fall short.
    fn coi_density(&self) -> Vec<Remedy> {
        let records = &self.model.records;
        let config = &self.model.config;
        let conflicts: BTreeSet<(&str, &str)> = self
            .model
            .conflicts
            .iter()
            .map(|c| (c.reviewer_id.as_str(), c.project_id.as_str()))
            .collect();
        let mut remedies = Vec::new();

        for p in order(&records.projects) {
            let conflicted = conflicts.iter().filter(|(_, pid)| *pid == p.id).count();
            if conflicted == 0 {
                continue;
            }
            let eligible = records
                .reviewers
                .iter()
                .filter(|r| !conflicts.contains(&(r.id.as_str(), p.id.as_str())))
                .filter(|r| !config.enforce_area_match || r.covers(&p.area))
                .count();
            if (eligible as i64) < p.needs {
                remedies.push(Remedy::ReduceConflicts {
                    scope: Scope::Project(p.id.clone()),
                    conflicts: conflicted,
                    eligible,
                    required: p.needs,
                });
            }
        }

        for r in order(&records.reviewers) {
            let conflicted = conflicts.iter().filter(|(rid, _)| *rid == r.id).count();
            if conflicted == 0 {
                continue;
            }
            let eligible = records
                .projects
                .iter()
                .filter(|p| !conflicts.contains(&(r.id.as_str(), p.id.as_str())))
                .filter(|p| !config.enforce_area_match || r.covers(&p.area))
                .count();
            if (eligible as i64) < r.min_load {
                remedies.push(Remedy::ReduceConflicts {
                    scope: Scope::Reviewer(r.id.clone()),
                    conflicts: conflicted,
                    eligible,
                    required: r.min_load,
                });
            }
        }
        remedies
    }

    fn trials(&self, mus: &[usize], interchangeable: &[usize]) -> Vec<Trial> {
        let constraints = &self.model.constraints;
        let mut raise = BTreeSet::new();
        let mut lower = BTreeSet::new();
        let mut areas = BTreeSet::new();
        let mut caps = BTreeSet::new();

        for &i in mus.iter().chain(interchangeable) {
            let c = &constraints[i];
            match (c.kind, &c.scope) {
                (ConstraintKind::LoadBound, Scope::Reviewer(id)) => {
                    if c.bound.has_upper() {
                        raise.insert(id.clone());
                    } else {
                        lower.insert(id.clone());
                    }
                }
                (ConstraintKind::Coverage | ConstraintKind::AreaMatch, Scope::Project(id)) => {
                    if let Some(p) = self.model.records.project(id) {
                        areas.insert(p.area.clone());
                    }
                }
                (ConstraintKind::Diversity | ConstraintKind::InstitutionCap, _) => {
                    caps.insert(c.kind);
                }
                _ => {}
            }
        }

        let mut trials = Vec::new();
        if !raise.is_empty() {
            trials.push(Trial::RaiseMaxLoad(raise.into_iter().collect()));
        }
        if !lower.is_empty() {
            trials.push(Trial::LowerMinLoad(lower.into_iter().collect()));
        }
        trials.extend(areas.into_iter().map(Trial::Recruit));
        trials.extend(caps.into_iter().map(Trial::RaiseCap));
        trials
    }

    /// Smallest change for `trial`, if any restores feasibility.
    fn estimate(&self, trial: &Trial) -> Option<Remedy> {
        let records = &self.model.records;
        let config = &self.model.config;
        let ceiling = records.total_needs().max(1);

        let remedy = match trial {
            Trial::RaiseMaxLoad(ids) => {
                let delta = minimal_delta(ceiling, |delta| {
                    let mut changed = records.clone();
                    for r in changed.reviewers.iter_mut().filter(|r| ids.contains(&r.id)) {
                        r.max_load += delta;
                    }
                    self.check_rebuilt(&changed, config)
                })?;
                Remedy::RaiseMaxLoad {
                    reviewer_ids: ids.clone(),
                    delta,
                }
            }
            Trial::LowerMinLoad(ids) => {
                let ceiling = records
                    .reviewers
                    .iter()
                    .filter(|r| ids.contains(&r.id))
                    .map(|r| r.min_load)
                    .max()
                    .unwrap_or(0);
                let delta = minimal_delta(ceiling, |delta| {
                    let mut changed = records.clone();
                    for r in changed.reviewers.iter_mut().filter(|r| ids.contains(&r.id)) {
                        r.min_load = (r.min_load - delta).max(0);
                    }
                    self.check_rebuilt(&changed, config)
                })?;
                Remedy::LowerMinLoad {
                    reviewer_ids: ids.clone(),
                    delta,
                }
            }
            Trial::Recruit(area) => {
                let count = minimal_delta(ceiling, |count| {
                    self.check_rebuilt(&with_recruits(records, area, count), config)
                })?;
                Remedy::RecruitReviewers {
                    area: area.clone(),
                    count,
                }
            }
            Trial::RaiseCap(kind) => {
                let delta = minimal_delta(ceiling, |delta| {
                    let mut changed = config.clone();
                    match kind {
                        ConstraintKind::Diversity => changed.diversity_cap += delta,
                        _ => changed.institution_cap += delta,
                    }
                    self.check_rebuilt(records, &changed)
                })?;
                Remedy::RaiseCap { kind: *kind, delta }
            }
        };
        debug!(remedy = %remedy, "remedy estimated");
        Some(remedy)
    }
}

/// Smallest `delta` in `1..=ceiling` with a feasible check.
fn minimal_delta(ceiling: i64, check: impl Fn(i64) -> Check) -> Option<i64> {
    if ceiling < 1 || check(ceiling) != Check::Feasible {
        return None;
    }
    let (mut lo, mut hi) = (1, ceiling);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if check(mid) == Check::Feasible {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Some(hi)
}

/// `records` plus `count` new reviewers covering `area`.
///
/// Recruits take the largest existing max_load. Each gets a distinct
/// institution when every reviewer has one, so institution caps stay
/// applicable.
fn with_recruits(records: &RecordSet, area: &str, count: i64) -> RecordSet {
    let max_load = records
        .reviewers
        .iter()
        .map(|r| r.max_load)
        .max()
        .unwrap_or(1)
        .max(1);
    let institutions = records.reviewers.iter().all(|r| r.institution.is_some());

    let mut changed = records.clone();
    for i in 1..=count {
        let id = format!("recruit:{area}:{i}");
        let mut recruit = Reviewer::new(id.clone(), 0, max_load).with_areas([area]);
        if institutions {
            recruit = recruit.with_institution(id);
        }
        changed.reviewers.push(recruit);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssignConfig;
    use crate::diagnosis::{FeasibilityAnalyzer, RemedyCategory};
    use crate::model::ModelBuilder;
    use crate::records::{ConflictEdge, Project};

    #[test]
    fn test_minimal_delta() {
        let check = |d: i64| if d >= 3 { Check::Feasible } else { Check::Infeasible };
        assert_eq!(minimal_delta(10, check), Some(3));
        assert_eq!(minimal_delta(2, check), None);
        assert_eq!(minimal_delta(0, check), None);
        assert_eq!(minimal_delta(5, |_| Check::Unknown), None);
    }

    #[test]
    fn test_with_recruits() {
        let records = RecordSet::new(
            vec![Reviewer::new("R01", 0, 3).with_institution("A")],
            vec![Project::new("P001", "ML", 1)],
        );
        let changed = with_recruits(&records, "NLP", 2);
        assert_eq!(changed.reviewers.len(), 3);
        let recruit = changed.reviewer("recruit:NLP:2").unwrap();
        assert!(recruit.covers("NLP"));
        assert_eq!(recruit.max_load, 3);
        assert_eq!(recruit.institution.as_deref(), Some("recruit:NLP:2"));
    }

    #[test]
    fn test_overload_remedies() {
        let records = RecordSet::new(
            vec![Reviewer::new("R01", 0, 2), Reviewer::new("R02", 0, 2)],
            vec![
                Project::new("P001", "ML", 2),
                Project::new("P002", "ML", 2),
                Project::new("P003", "ML", 2),
            ],
        );
        let config = AssignConfig::default().with_parallel(false);
        let model = ModelBuilder::build(&records, &config).unwrap();
        let report = FeasibilityAnalyzer::new(&config).diagnose(&model);

        let first = &report.remedies[0];
        assert_eq!(
            first.remedy,
            Remedy::RaiseMaxLoad {
                reviewer_ids: vec!["R01".into(), "R02".into()],
                delta: 1,
            }
        );
        assert!(report.remedies.iter().any(|r| r.remedy
            == Remedy::RecruitReviewers {
                area: "ML".into(),
                count: 1,
            }));
    }

    #[test]
    fn test_min_load_remedy() {
        // three reviewers must each take two of two single-reviewer projects
        let records = RecordSet::new(
            vec![
                Reviewer::new("R01", 2, 3),
                Reviewer::new("R02", 2, 3),
                Reviewer::new("R03", 0, 3),
            ],
            vec![Project::new("P001", "ML", 1), Project::new("P002", "ML", 1)],
        );
        let config = AssignConfig::default().with_parallel(false);
        let model = ModelBuilder::build(&records, &config).unwrap();
        let report = FeasibilityAnalyzer::new(&config).diagnose(&model);

        assert!(report.remedies.iter().any(|r| matches!(
            &r.remedy,
            Remedy::LowerMinLoad { delta: 1, .. }
        )));
    }

    #[test]
    fn test_coi_density_remedy() {
        let records = RecordSet::new(
            vec![Reviewer::new("R01", 0, 3), Reviewer::new("R02", 0, 3)],
            vec![Project::new("P001", "ML", 2)],
        )
        .with_conflicts(vec![ConflictEdge::new("R02", "P001")]);
        let config = AssignConfig::default().with_parallel(false);
        let model = ModelBuilder::build(&records, &config).unwrap();
        let report = FeasibilityAnalyzer::new(&config).diagnose(&model);

        let coi = report
            .remedies
            .iter()
            .find(|r| r.category == RemedyCategory::CoiDensity)
            .unwrap();
        assert_eq!(
            coi.remedy,
            Remedy::ReduceConflicts {
                scope: Scope::Project("P001".into()),
                conflicts: 1,
                eligible: 1,
                required: 2,
            }
        );
    }

    #[test]
    fn test_home_institution_counts_as_conflict() {
        let records = RecordSet::new(
            vec![
                Reviewer::new("R01", 0, 3).with_institution("KAIST"),
                Reviewer::new("R02", 0, 3).with_institution("SNU"),
            ],
            vec![Project::new("P001", "ML", 2).with_institution("KAIST")],
        );
        let config = AssignConfig::default().with_parallel(false);
        let model = ModelBuilder::build(&records, &config).unwrap();
        let report = FeasibilityAnalyzer::new(&config).diagnose(&model);

        let coi = report
            .remedies
            .iter()
            .find(|r| r.category == RemedyCategory::CoiDensity)
            .unwrap();
        assert_eq!(
            coi.remedy,
            Remedy::ReduceConflicts {
                scope: Scope::Project("P001".into()),
                conflicts: 1,
                eligible: 1,
                required: 2,
            }
        );
    }

    #[test]
    fn test_cap_remedy() {
        let records = RecordSet::new(
            vec![Reviewer::new("R01", 0, 3), Reviewer::new("R02", 0, 3)],
            vec![
                Project::new("P001", "ML", 2),
                Project::new("P002", "ML", 2),
            ],
        );
        let config = AssignConfig::default()
            .with_diversity_cap(1)
            .with_parallel(false);
        let model = ModelBuilder::build(&records, &config).unwrap();
        let report = FeasibilityAnalyzer::new(&config).diagnose(&model);

        assert!(report.remedies.iter().any(|r| r.remedy
            == Remedy::RaiseCap {
                kind: ConstraintKind::Diversity,
                delta: 1,
            }));
    }
}
