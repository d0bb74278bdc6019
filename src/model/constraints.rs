//! Constraints and objective stages.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::variables::LinearExpr;

/// Right-hand side of a linear constraint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    /// `expr ≥ lo`.
    AtLeast(f64),
    /// `expr ≤ hi`.
    AtMost(f64),
    /// `expr = value`.
    Exactly(f64),
    /// `lo ≤ expr ≤ hi`.
    Between(f64, f64),
}

impl Bound {
    pub fn lower(&self) -> f64 {
        match *self {
            Bound::AtLeast(lo) | Bound::Exactly(lo) | Bound::Between(lo, _) => lo,
            Bound::AtMost(_) => f64::NEG_INFINITY,
        }
    }

    pub fn upper(&self) -> f64 {
        match *self {
            Bound::AtMost(hi) | Bound::Exactly(hi) | Bound::Between(_, hi) => hi,
            Bound::AtLeast(_) => f64::INFINITY,
        }
    }

    /// Whether the lower side is finite.
    pub fn has_lower(&self) -> bool {
        self.lower().is_finite()
    }

    /// Whether the upper side is finite.
    pub fn has_upper(&self) -> bool {
        self.upper().is_finite()
    }

    /// Distance from `value` to the admissible range (0 when inside).
    pub fn violation(&self, value: f64) -> f64 {
        (self.lower() - value).max(value - self.upper()).max(0.0)
    }
}

/// Family a constraint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintKind {
    /// `Σ_r x[r,p] = needs_p`.
    Coverage,
    /// `min_load_r ≤ Σ_p x[r,p] ≤ max_load_r` (one row per side).
    LoadBound,
    /// Forbidden pair; enforced structurally by omitting the variable.
    Conflict,
    /// Only reviewers covering the project's area.
    AreaMatch,
    /// Per-reviewer, per-area cap.
    Diversity,
    /// Per-project, per-institution cap.
    InstitutionCap,
    /// Deviation linearization row of the balance stage.
    Linking,
    /// Frozen optimum of an earlier objective stage.
    StageFreeze,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::Coverage => "coverage",
            ConstraintKind::LoadBound => "load-bound",
            ConstraintKind::Conflict => "conflict",
            ConstraintKind::AreaMatch => "area-match",
            ConstraintKind::Diversity => "diversity",
            ConstraintKind::InstitutionCap => "institution-cap",
            ConstraintKind::Linking => "linking",
            ConstraintKind::StageFreeze => "stage-freeze",
        };
        f.write_str(name)
    }
}

/// Entity a constraint is about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Project(String),
    Reviewer(String),
    ReviewerArea { reviewer_id: String, area: String },
    ProjectInstitution { project_id: String, institution: String },
    Pair { reviewer_id: String, project_id: String },
    Stage(String),
    Global,
}

impl Scope {
    /// Primary entity id, if the scope names one.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Scope::Project(id) | Scope::Reviewer(id) => Some(id),
            Scope::ReviewerArea { reviewer_id, .. } => Some(reviewer_id),
            Scope::ProjectInstitution { project_id, .. } => Some(project_id),
            Scope::Pair { reviewer_id, .. } => Some(reviewer_id),
            Scope::Stage(_) | Scope::Global => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Project(id) => write!(f, "project {id}"),
            Scope::Reviewer(id) => write!(f, "reviewer {id}"),
            Scope::ReviewerArea { reviewer_id, area } => {
                write!(f, "reviewer {reviewer_id} in area {area}")
            }
            Scope::ProjectInstitution {
                project_id,
                institution,
            } => write!(f, "reviewers of institution {institution} on project {project_id}"),
            Scope::Pair {
                reviewer_id,
                project_id,
            } => write!(f, "pair ({reviewer_id}, {project_id})"),
            Scope::Stage(name) => write!(f, "stage {name}"),
            Scope::Global => f.write_str("all entities"),
        }
    }
}

/// A named linear rule `lower ≤ expr ≤ upper`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Stable identifier, e.g. `coverage:P001`.
    pub id: String,
    /// Family the row belongs to.
    pub kind: ConstraintKind,
    /// Entity the row is about.
    pub scope: Scope,
    /// Left-hand side.
    pub expr: LinearExpr,
    /// Admissible range of `expr`.
    pub bound: Bound,
}

impl Constraint {
    pub fn new(
        id: impl Into<String>,
        kind: ConstraintKind,
        scope: Scope,
        expr: LinearExpr,
        bound: Bound,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            scope,
            expr,
            bound,
        }
    }

    /// Left-hand side value at `values`.
    pub fn activity(&self, values: &[f64]) -> f64 {
        self.expr.evaluate(values)
    }

    /// Whether `values` satisfies the row within a relative tolerance.
    pub fn is_satisfied_by(&self, values: &[f64], tolerance: f64) -> bool {
        let activity = self.activity(values);
        let lower = self.bound.lower();
        let upper = self.bound.upper();
        activity >= lower - tolerance * (1.0 + lower.abs())
            && activity <= upper + tolerance * (1.0 + upper.abs())
    }
}

/// Optimization direction of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Minimize,
    Maximize,
}

/// One lexicographic priority level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveStage {
    /// Stage name, one of [`stage`](super::stage).
    pub name: String,
    /// Expression optimized in `direction`.
    pub expr: LinearExpr,
    /// Whether `expr` is minimized or maximized.
    pub direction: Direction,
    /// Weight used when stages are summed (weighted mode).
    pub weight: f64,
}

impl ObjectiveStage {
    pub fn new(name: impl Into<String>, expr: LinearExpr, direction: Direction, weight: f64) -> Self {
        Self {
            name: name.into(),
            expr,
            direction,
            weight,
        }
    }

    /// The expression to minimize for this stage.
    pub fn minimization_expr(&self) -> LinearExpr {
        match self.direction {
            Direction::Minimize => self.expr.clone(),
            Direction::Maximize => self.expr.scaled(-1.0),
        }
    }

    /// Freezes `value` as `value ± tolerance` for later stages.
    pub fn freeze(&self, value: f64, tolerance: f64) -> Constraint {
        let slack = tolerance * (1.0 + value.abs());
        Constraint::new(
            format!("freeze:{}", self.name),
            ConstraintKind::StageFreeze,
            Scope::Stage(self.name.clone()),
            self.expr.clone(),
            Bound::Between(value - slack, value + slack),
        )
    }
}
