//! Objective breakdown and constraint satisfaction table.
//!
//! [`ResultAuditor::summarize`] recomputes everything from the final
//! assignment alone, so a report can be checked independently of the
//! solver that produced the assignment.

use serde::{Deserialize, Serialize};

use crate::determinism::order;
use crate::model::{Assignment, ConstraintKind, Model, Scope};
use crate::soften::{softening_records, SofteningRecord};
use crate::solver::StageValue;

const TOLERANCE: f64 = 1e-6;

/// Satisfaction of one row under the final assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SatisfactionStatus {
    /// Holds without slack.
    Satisfied,
    /// Satisfied only thanks to `magnitude` units of slack.
    Softened { magnitude: i64 },
    /// Off by `magnitude`.
    Violated { magnitude: f64 },
    /// The family was not part of the model.
    NotApplicable { reason: String },
}

/// One line of the satisfaction table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintStatus {
    /// Constraint id, `conflict:R:P` for conflict edges, or `kind:*`
    /// for a skipped family.
    pub id: String,
    /// Family of the row.
    pub kind: ConstraintKind,
    /// Entity the row is about.
    pub scope: Scope,
    pub status: SatisfactionStatus,
}

/// Final load of one reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerLoad {
    /// Reviewer id.
    pub reviewer_id: String,
    /// Projects assigned.
    pub load: i64,
    /// Declared lower bound, before any softening.
    pub min_load: i64,
    /// Declared upper bound.
    pub max_load: i64,
}

/// Objective terms, independent of the objective mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveComponents {
    /// `Σ_r |load_r − target|`.
    pub load_balance: f64,
    /// `Σ affinity` over assigned pairs.
    pub affinity: f64,
    /// `Σ penalty · slack`.
    pub softening_penalty: f64,
}

/// Audit of one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveReport {
    /// Target of the balance stage.
    pub target_load: f64,
    /// Objective terms recomputed from the assignment.
    pub components: ObjectiveComponents,
    /// Model stage values in priority order.
    pub stages: Vec<StageValue>,
    /// Satisfaction table: model rows, conflict edges, skipped families.
    pub constraints: Vec<ConstraintStatus>,
    /// Every relaxation in effect.
    pub softenings: Vec<SofteningRecord>,
    /// Per-reviewer loads in id order.
    pub loads: Vec<ReviewerLoad>,
}

impl ObjectiveReport {
    /// Rows that are violated.
    pub fn violations(&self) -> impl Iterator<Item = &ConstraintStatus> {
        self.constraints
            .iter()
            .filter(|c| matches!(c.status, SatisfactionStatus::Violated { .. }))
    }

    pub fn is_clean(&self) -> bool {
        self.violations().next().is_none()
    }

    pub fn status_of(&self, id: &str) -> Option<&SatisfactionStatus> {
        self.constraints
            .iter()
            .find(|c| c.id == id)
            .map(|c| &c.status)
    }

    pub fn load_of(&self, reviewer_id: &str) -> Option<i64> {
        self.loads
            .iter()
            .find(|l| l.reviewer_id == reviewer_id)
            .map(|l| l.load)
    }
}

/// Builds [`ObjectiveReport`]s.
pub struct ResultAuditor;

impl ResultAuditor {
    /// Audits `assignment` against `model`.
    pub fn summarize(model: &Model, assignment: &Assignment) -> ObjectiveReport {
        let values = model.values_from_assignment(assignment);
        let records = &model.records;

        let loads: Vec<ReviewerLoad> = order(&records.reviewers)
            .into_iter()
            .map(|r| ReviewerLoad {
                reviewer_id: r.id.clone(),
                load: assignment.load_of(&r.id) as i64,
                min_load: r.min_load,
                max_load: r.max_load,
            })
            .collect();

        let affinity = records.affinity_map();
        let components = ObjectiveComponents {
            load_balance: loads
                .iter()
                .map(|l| (l.load as f64 - model.target_load).abs())
                .sum(),
            affinity: assignment
                .iter()
                .filter_map(|p| {
                    affinity
                        .get(&(p.reviewer_id.as_str(), p.project_id.as_str()))
                        .copied()
                })
                .sum(),
            softening_penalty: model.slacks.iter().map(|s| s.penalty * values[s.var]).sum(),
        };

        let stages = model
            .stages
            .iter()
            .map(|s| StageValue {
                name: s.name.clone(),
                value: s.expr.evaluate(&values),
            })
            .collect();

        let mut constraints = Vec::new();
        for c in &model.constraints {
            let slack = model
                .slacks
                .iter()
                .find(|s| s.constraint_id == c.id)
                .map_or(0, |s| values[s.var].round() as i64);
            let status = if !c.is_satisfied_by(&values, TOLERANCE) {
                SatisfactionStatus::Violated {
                    magnitude: c.bound.violation(c.activity(&values)),
                }
            } else if slack > 0 {
                SatisfactionStatus::Softened { magnitude: slack }
            } else {
                SatisfactionStatus::Satisfied
            };
            constraints.push(ConstraintStatus {
                id: c.id.clone(),
                kind: c.kind,
                scope: c.scope.clone(),
                status,
            });
        }

        for edge in &model.conflicts {
            let status = if assignment.contains(&edge.project_id, &edge.reviewer_id) {
                SatisfactionStatus::Violated { magnitude: 1.0 }
            } else {
                SatisfactionStatus::Satisfied
            };
            constraints.push(ConstraintStatus {
                id: format!("conflict:{}:{}", edge.reviewer_id, edge.project_id),
                kind: ConstraintKind::Conflict,
                scope: Scope::Pair {
                    reviewer_id: edge.reviewer_id.clone(),
                    project_id: edge.project_id.clone(),
                },
                status,
            });
        }

        for family in &model.skipped {
            constraints.push(ConstraintStatus {
                id: format!("{}:*", family.kind),
                kind: family.kind,
                scope: Scope::Global,
                status: SatisfactionStatus::NotApplicable {
                    reason: family.reason.clone(),
                },
            });
        }

        ObjectiveReport {
            target_load: model.target_load,
            components,
            stages,
            constraints,
            softenings: softening_records(model, &values),
            loads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssignConfig;
    use crate::model::{stage, AssignedPair, ModelBuilder};
    use crate::records::{AffinityEdge, ConflictEdge, Project, RecordSet, Reviewer};
    use crate::soften::Softener;

    fn pair(p: &str, r: &str) -> AssignedPair {
        AssignedPair {
            project_id: p.into(),
            reviewer_id: r.into(),
        }
    }

    fn records() -> RecordSet {
        RecordSet::new(
            vec![Reviewer::new("R01", 1, 2), Reviewer::new("R02", 1, 2)],
            vec![Project::new("P001", "ML", 1), Project::new("P002", "ML", 1)],
        )
        .with_conflicts(vec![ConflictEdge::new("R01", "P001")])
        .with_affinities(vec![AffinityEdge::new("R02", "P001", 0.5)])
    }

    #[test]
    fn test_clean_assignment() {
        let model = ModelBuilder::build(&records(), &AssignConfig::default()).unwrap();
        let assignment = Assignment::new(vec![pair("P001", "R02"), pair("P002", "R01")]);
        let report = ResultAuditor::summarize(&model, &assignment);

        assert!(report.is_clean());
        assert_eq!(report.components.load_balance, 0.0);
        assert_eq!(report.components.affinity, 0.5);
        assert_eq!(report.load_of("R01"), Some(1));
        assert_eq!(
            report.status_of("conflict:R01:P001"),
            Some(&SatisfactionStatus::Satisfied)
        );
        assert_eq!(
            report.stages.iter().find(|s| s.name == stage::AFFINITY).unwrap().value,
            0.5
        );
        assert!(matches!(
            report.status_of("area-match:*"),
            Some(SatisfactionStatus::NotApplicable { .. })
        ));
    }

    #[test]
    fn test_violations_are_reported() {
        let model = ModelBuilder::build(&records(), &AssignConfig::default()).unwrap();
        let assignment = Assignment::new(vec![
            pair("P001", "R01"),
            pair("P001", "R02"),
        ]);
        let report = ResultAuditor::summarize(&model, &assignment);

        // the conflicted pair has no variable, so coverage only sees R02
        assert_eq!(
            report.status_of("coverage:P001"),
            Some(&SatisfactionStatus::Satisfied)
        );
        assert_eq!(
            report.status_of("coverage:P002"),
            Some(&SatisfactionStatus::Violated { magnitude: 1.0 })
        );
        assert_eq!(
            report.status_of("conflict:R01:P001"),
            Some(&SatisfactionStatus::Violated { magnitude: 1.0 })
        );
        assert!(!report.is_clean());
    }

    #[test]
    fn test_softened_rows() {
        let config = AssignConfig::default().with_needs_softening(1);
        let model = ModelBuilder::build(&records(), &config).unwrap();
        let model = Softener::soften(&model, &config).unwrap();
        let assignment = Assignment::new(vec![pair("P001", "R02")]);
        let report = ResultAuditor::summarize(&model, &assignment);

        assert_eq!(
            report.status_of("coverage:P002"),
            Some(&SatisfactionStatus::Softened { magnitude: 1 })
        );
        // R01 is idle
        assert_eq!(
            report.status_of("load_min:R01"),
            Some(&SatisfactionStatus::Violated { magnitude: 1.0 })
        );
        assert_eq!(report.softenings.len(), 1);
        assert_eq!(report.softenings[0].entity_id, "P002");
        assert_eq!(report.components.softening_penalty, config.penalty_needs);
    }
}
