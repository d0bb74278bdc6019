//! Constraint model for one assignment run.
//!
//! A [`Model`] is the solver-facing form of a [`RecordSet`]: binary
//! assignment variables, named linear constraints, and an ordered list
//! of [`ObjectiveStage`]s. It is produced by [`ModelBuilder`], optionally
//! rewritten by the softener, and only read afterwards.
//!
//! # Variable layout
//!
//! | Variables | Kind | Name |
//! |-----------|------|------|
//! | assignment, project-major in id order | binary | `x[R,P]` |
//! | deviation pair per reviewer | continuous | `dev_pos[R]`, `dev_neg[R]` |
//! | slack per softened row | integer | `slack[<constraint id>]` |

mod builder;
mod constraints;
mod variables;

pub use builder::ModelBuilder;
pub use constraints::{Bound, Constraint, ConstraintKind, Direction, ObjectiveStage, Scope};
pub use variables::{LinearExpr, VarId, VarKind, Variable};

use serde::{Deserialize, Serialize};

use crate::config::AssignConfig;
use crate::determinism::compare_ids;
use crate::records::{ConflictEdge, RecordSet};

/// Stage names used by the builder and the softener.
pub mod stage {
    pub const LOAD_BALANCE: &str = "load_balance";
    pub const AFFINITY: &str = "affinity";
    pub const SOFTENING_PENALTY: &str = "softening_penalty";
    pub const WEIGHTED: &str = "weighted";
}

/// `x[r,p]`: whether reviewer `r` reviews project `p`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentVariable {
    /// Reviewer of the pair.
    pub reviewer_id: String,
    /// Project of the pair.
    pub project_id: String,
    /// Index of the binary variable.
    pub var: VarId,
}

/// `load_r − target = pos − neg` for one reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationPair {
    /// Reviewer whose load is measured.
    pub reviewer_id: String,
    /// Load above target.
    pub pos: VarId,
    /// Load below target.
    pub neg: VarId,
}

/// Which requirement a slack relaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftenKind {
    /// A project's reviewer count.
    ProjectNeeds,
    /// A reviewer's minimum load.
    MinLoad,
}

/// Slack variable attached to a softened constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackVariable {
    /// Index of the integer slack variable.
    pub var: VarId,
    /// Id of the relaxed constraint.
    pub constraint_id: String,
    /// Requirement the slack relaxes.
    pub kind: SoftenKind,
    /// Project or reviewer id.
    pub entity_id: String,
    /// Largest admissible relaxation.
    pub max: i64,
    /// Penalty per unit of relaxation.
    pub penalty: f64,
}

/// A constraint family that was not added to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFamily {
    /// Family left out.
    pub kind: ConstraintKind,
    /// Why the family was left out, for the audit table.
    pub reason: String,
}

/// One `(project, reviewer)` pair with `x = 1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssignedPair {
    /// Reviewed project.
    pub project_id: String,
    /// Assigned reviewer.
    pub reviewer_id: String,
}

/// Output mapping, ordered by project id then reviewer id.
///
/// # Examples
///
/// ```
/// use u_assign::model::{AssignedPair, Assignment};
///
/// let pair = |p: &str, r: &str| AssignedPair {
///     project_id: p.into(),
///     reviewer_id: r.into(),
/// };
/// let a = Assignment::new(vec![pair("P002", "R01"), pair("P001", "R02")]);
///
/// assert_eq!(a.pairs[0].project_id, "P001");
/// assert_eq!(a.pairs[0].reviewer_id, "R02");
/// assert_eq!(a.load_of("R01"), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// Sorted, duplicate-free pairs.
    pub pairs: Vec<AssignedPair>,
}

impl Assignment {
    /// Creates an assignment from pairs in any order.
    pub fn new(mut pairs: Vec<AssignedPair>) -> Self {
        pairs.sort_by(|a, b| {
            compare_ids(&a.project_id, &b.project_id)
                .then_with(|| compare_ids(&a.reviewer_id, &b.reviewer_id))
        });
        pairs.dedup();
        Self { pairs }
    }

    pub fn contains(&self, project_id: &str, reviewer_id: &str) -> bool {
        self.pairs
            .iter()
            .any(|p| p.project_id == project_id && p.reviewer_id == reviewer_id)
    }

    /// Reviewers assigned to `project_id`, in id order.
    pub fn reviewers_for(&self, project_id: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|p| p.project_id == project_id)
            .map(|p| p.reviewer_id.as_str())
            .collect()
    }

    /// Number of projects assigned to `reviewer_id`.
    pub fn load_of(&self, reviewer_id: &str) -> usize {
        self.pairs
            .iter()
            .filter(|p| p.reviewer_id == reviewer_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssignedPair> {
        self.pairs.iter()
    }
}

/// A built constraint model.
#[derive(Debug, Clone)]
pub struct Model {
    /// Records the model was built from.
    pub records: RecordSet,
    /// Configuration the model was built with.
    pub config: AssignConfig,
    /// Every variable, indexed by [`VarId`].
    pub variables: Vec<Variable>,
    /// One per non-conflicted pair, project-major.
    pub assignments: Vec<AssignmentVariable>,
    /// One per reviewer, in id order.
    pub deviations: Vec<DeviationPair>,
    /// Hard (or softened) constraints subject to diagnosis.
    pub constraints: Vec<Constraint>,
    /// Deviation linearization rows; always active, never diagnosed.
    pub linking: Vec<Constraint>,
    /// Conflict edges, deduplicated and sorted. Enforced by omission.
    pub conflicts: Vec<ConflictEdge>,
    /// Objective stages in priority order.
    pub stages: Vec<ObjectiveStage>,
    /// Slacks added by the softener; empty for a hard model.
    pub slacks: Vec<SlackVariable>,
    /// Families left out of the model.
    pub skipped: Vec<SkippedFamily>,
    /// Per-reviewer target load of the balance stage.
    pub target_load: f64,
}

impl Model {
    /// Builds a model. Shorthand for [`ModelBuilder::build`].
    pub fn build(records: &RecordSet, config: &AssignConfig) -> crate::Result<Self> {
        ModelBuilder::build(records, config)
    }

    /// Every row the solver must satisfy: constraints, then linking rows.
    pub fn rows(&self) -> Vec<&Constraint> {
        self.constraints.iter().chain(self.linking.iter()).collect()
    }

    /// Branching order: assignment variables, then slacks.
    pub fn branch_order(&self) -> Vec<VarId> {
        self.assignments
            .iter()
            .map(|a| a.var)
            .chain(self.slacks.iter().map(|s| s.var))
            .collect()
    }

    /// Variable of `x[reviewer, project]`; `None` for conflicted pairs.
    pub fn assignment_var(&self, reviewer_id: &str, project_id: &str) -> Option<VarId> {
        self.assignments
            .iter()
            .find(|a| a.reviewer_id == reviewer_id && a.project_id == project_id)
            .map(|a| a.var)
    }

    pub fn constraint(&self, id: &str) -> Option<&Constraint> {
        self.constraints
            .iter()
            .chain(self.linking.iter())
            .find(|c| c.id == id)
    }

    pub fn stage(&self, name: &str) -> Option<&ObjectiveStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Whether the softener has added slacks.
    pub fn is_softened(&self) -> bool {
        !self.slacks.is_empty()
    }

    /// Pairs with `x = 1` in a solver value vector.
    pub fn assignment_from_values(&self, values: &[f64]) -> Assignment {
        let pairs = self
            .assignments
            .iter()
            .filter(|a| values.get(a.var).copied().unwrap_or(0.0) > 0.5)
            .map(|a| AssignedPair {
                project_id: a.project_id.clone(),
                reviewer_id: a.reviewer_id.clone(),
            })
            .collect();
        Assignment::new(pairs)
    }

    /// Reconstructs a full value vector from an assignment.
    ///
    /// Deviations take their minimal values and slacks cover exactly the
    /// deficit of their row, which is what every optimal solve produces.
    pub fn values_from_assignment(&self, assignment: &Assignment) -> Vec<f64> {
        let mut values = vec![0.0; self.variables.len()];
        for a in &self.assignments {
            if assignment.contains(&a.project_id, &a.reviewer_id) {
                values[a.var] = 1.0;
            }
        }
        for d in &self.deviations {
            let load = assignment.load_of(&d.reviewer_id) as f64;
            values[d.pos] = (load - self.target_load).max(0.0);
            values[d.neg] = (self.target_load - load).max(0.0);
        }
        for s in &self.slacks {
            let deficit = match s.kind {
                SoftenKind::ProjectNeeds => self
                    .records
                    .project(&s.entity_id)
                    .map_or(0, |p| p.needs - assignment.reviewers_for(&p.id).len() as i64),
                SoftenKind::MinLoad => self
                    .records
                    .reviewer(&s.entity_id)
                    .map_or(0, |r| r.min_load - assignment.load_of(&r.id) as i64),
            };
            values[s.var] = deficit.clamp(0, s.max) as f64;
        }
        values
    }
}
