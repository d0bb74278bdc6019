//! Infeasibility report types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Constraint, ConstraintKind, Scope};

/// Identity of a model constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintRef {
    /// Constraint id within the diagnosed model.
    pub id: String,
    /// Family of the constraint.
    pub kind: ConstraintKind,
    /// Entity the constraint is about.
    pub scope: Scope,
}

impl From<&Constraint> for ConstraintRef {
    fn from(c: &Constraint) -> Self {
        Self {
            id: c.id.clone(),
            kind: c.kind,
            scope: c.scope.clone(),
        }
    }
}

/// Root-cause family of a remedy. Declaration order is the ranking
/// order for remedies of equal magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemedyCategory {
    CoiDensity,
    LoadBoundTightness,
    AreaScarcity,
    CapTightness,
}

impl fmt::Display for RemedyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemedyCategory::CoiDensity => "COI density",
            RemedyCategory::LoadBoundTightness => "load-bound tightness",
            RemedyCategory::AreaScarcity => "area scarcity",
            RemedyCategory::CapTightness => "cap tightness",
        };
        f.write_str(name)
    }
}

/// A concrete input change that restores feasibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remedy {
    /// Too few eligible counterparts once conflicts are removed.
    ReduceConflicts {
        scope: Scope,
        conflicts: usize,
        eligible: usize,
        required: i64,
    },
    RaiseMaxLoad { reviewer_ids: Vec<String>, delta: i64 },
    LowerMinLoad { reviewer_ids: Vec<String>, delta: i64 },
    RecruitReviewers { area: String, count: i64 },
    RaiseCap { kind: ConstraintKind, delta: i64 },
}

impl Remedy {
    pub fn category(&self) -> RemedyCategory {
        match self {
            Remedy::ReduceConflicts { .. } => RemedyCategory::CoiDensity,
            Remedy::RaiseMaxLoad { .. } | Remedy::LowerMinLoad { .. } => {
                RemedyCategory::LoadBoundTightness
            }
            Remedy::RecruitReviewers { .. } => RemedyCategory::AreaScarcity,
            Remedy::RaiseCap { .. } => RemedyCategory::CapTightness,
        }
    }

    /// Size of the change: missing counterparts, load delta, recruits,
    /// or cap delta.
    pub fn magnitude(&self) -> i64 {
        match self {
            Remedy::ReduceConflicts {
                eligible, required, ..
            } => (required - *eligible as i64).max(0),
            Remedy::RaiseMaxLoad { delta, .. }
            | Remedy::LowerMinLoad { delta, .. }
            | Remedy::RaiseCap { delta, .. } => *delta,
            Remedy::RecruitReviewers { count, .. } => *count,
        }
    }
}

impl fmt::Display for Remedy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remedy::ReduceConflicts {
                scope,
                conflicts,
                eligible,
                required,
            } => write!(
                f,
                "{scope} has {eligible} eligible counterpart(s) after {conflicts} conflict(s) \
                 but requires {required}"
            ),
            Remedy::RaiseMaxLoad {
                reviewer_ids,
                delta,
            } => write!(f, "raise max_load of {} by {delta}", reviewer_ids.join(", ")),
            Remedy::LowerMinLoad {
                reviewer_ids,
                delta,
            } => write!(f, "lower min_load of {} by {delta}", reviewer_ids.join(", ")),
            Remedy::RecruitReviewers { area, count } => {
                write!(f, "recruit {count} reviewer(s) in area {area}")
            }
            Remedy::RaiseCap { kind, delta } => write!(f, "raise the {kind} cap by {delta}"),
        }
    }
}

/// A ranked remedy with its summary line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemedySuggestion {
    /// Ranking bucket of `remedy`.
    pub category: RemedyCategory,
    /// The suggested change.
    pub remedy: Remedy,
    /// Size of the change, used for ranking.
    pub magnitude: i64,
    /// Human-readable description of `remedy`.
    pub summary: String,
}

impl From<Remedy> for RemedySuggestion {
    fn from(remedy: Remedy) -> Self {
        Self {
            category: remedy.category(),
            magnitude: remedy.magnitude(),
            summary: remedy.to_string(),
            remedy,
        }
    }
}

/// Diagnosis of an infeasible model.
///
/// Empty when the model turned out to be feasible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfeasibilityReport {
    /// Minimal unsatisfiable subset, in model order.
    pub mus: Vec<ConstraintRef>,
    /// Constraints outside the MUS that can replace one of its
    /// load-bound members and keep the set infeasible.
    pub interchangeable: Vec<ConstraintRef>,
    /// Remedies ranked by magnitude, then category, then summary.
    pub remedies: Vec<RemedySuggestion>,
    /// Feasibility checks performed.
    pub checks: usize,
    /// `false` when a timed-out check left minimality unproven.
    pub complete: bool,
}

impl Default for InfeasibilityReport {
    fn default() -> Self {
        Self {
            mus: Vec::new(),
            interchangeable: Vec::new(),
            remedies: Vec::new(),
            checks: 0,
            complete: true,
        }
    }
}

impl InfeasibilityReport {
    /// Whether nothing was diagnosed.
    pub fn is_empty(&self) -> bool {
        self.mus.is_empty()
    }

    /// Whether `id` is in the MUS.
    pub fn in_mus(&self, id: &str) -> bool {
        self.mus.iter().any(|c| c.id == id)
    }

    /// Whether `id` is in the MUS or interchangeable with a member.
    pub fn implicates(&self, id: &str) -> bool {
        self.in_mus(id) || self.interchangeable.iter().any(|c| c.id == id)
    }

    /// Sorts remedies into ranking order.
    pub(crate) fn rank_remedies(&mut self) {
        self.remedies.sort_by(|a, b| {
            a.magnitude
                .cmp(&b.magnitude)
                .then(a.category.cmp(&b.category))
                .then_with(|| a.summary.cmp(&b.summary))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remedy_summaries() {
        let remedy = Remedy::RaiseMaxLoad {
            reviewer_ids: vec!["R01".into(), "R02".into()],
            delta: 1,
        };
        assert_eq!(remedy.to_string(), "raise max_load of R01, R02 by 1");
        assert_eq!(remedy.category(), RemedyCategory::LoadBoundTightness);

        let remedy = Remedy::ReduceConflicts {
            scope: Scope::Project("P001".into()),
            conflicts: 3,
            eligible: 1,
            required: 2,
        };
        assert_eq!(remedy.magnitude(), 1);
        assert_eq!(
            remedy.to_string(),
            "project P001 has 1 eligible counterpart(s) after 3 conflict(s) but requires 2"
        );

        let remedy = Remedy::RaiseCap {
            kind: ConstraintKind::Diversity,
            delta: 2,
        };
        assert_eq!(remedy.to_string(), "raise the diversity cap by 2");
    }

    #[test]
    fn test_ranking() {
        let mut report = InfeasibilityReport::default();
        report.remedies = vec![
            Remedy::RecruitReviewers {
                area: "ML".into(),
                count: 1,
            }
            .into(),
            Remedy::RaiseCap {
                kind: ConstraintKind::Diversity,
                delta: 1,
            }
            .into(),
            Remedy::RaiseMaxLoad {
                reviewer_ids: vec!["R01".into()],
                delta: 2,
            }
            .into(),
            Remedy::LowerMinLoad {
                reviewer_ids: vec!["R02".into()],
                delta: 1,
            }
            .into(),
        ];
        report.rank_remedies();

        let categories: Vec<RemedyCategory> = report.remedies.iter().map(|r| r.category).collect();
        assert_eq!(
            categories,
            vec![
                RemedyCategory::LoadBoundTightness,
                RemedyCategory::AreaScarcity,
                RemedyCategory::CapTightness,
                RemedyCategory::LoadBoundTightness,
            ]
        );
    }

    #[test]
    fn test_default_is_empty_and_complete() {
        let report = InfeasibilityReport::default();
        assert!(report.is_empty());
        assert!(report.complete);
        assert!(!report.implicates("coverage:P001"));
    }
}
