//! Input records.
//!
//! Plain, serializable values produced by external collaborators
//! (spreadsheet readers, anonymizers, conflict matchers). The engine
//! never mutates them; [`RecordSet::validate`] is the only behavior.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::determinism::Keyed;
use crate::error::{EdgeKind, InputError};

/// A reviewer eligible for assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    /// Unique (anonymized) id.
    pub id: String,
    /// Normalized expertise areas.
    #[serde(default)]
    pub areas: BTreeSet<String>,
    /// Minimum number of assignments.
    #[serde(default)]
    pub min_load: i64,
    /// Maximum number of assignments.
    pub max_load: i64,
    /// Home institution, used by institution caps and the
    /// home-institution exclusion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
}

impl Reviewer {
    /// Creates a reviewer with no areas.
    pub fn new(id: impl Into<String>, min_load: i64, max_load: i64) -> Self {
        Self {
            id: id.into(),
            areas: BTreeSet::new(),
            min_load,
            max_load,
            institution: None,
        }
    }

    /// Adds expertise areas.
    pub fn with_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.areas.extend(areas.into_iter().map(Into::into));
        self
    }

    /// Sets the institution.
    pub fn with_institution(mut self, institution: impl Into<String>) -> Self {
        self.institution = Some(institution.into());
        self
    }

    /// Whether this reviewer covers `area`.
    pub fn covers(&self, area: &str) -> bool {
        self.areas.contains(area)
    }
}

impl Keyed for Reviewer {
    fn key(&self) -> &str {
        &self.id
    }
}

/// A project needing review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique (anonymized) id.
    pub id: String,
    /// Normalized research area.
    pub area: String,
    /// Number of reviewers required.
    pub needs: i64,
    /// Host institution. Reviewers from the same institution are
    /// excluded unless `exclude_home_institution` is turned off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
}

impl Project {
    /// Creates a project.
    pub fn new(id: impl Into<String>, area: impl Into<String>, needs: i64) -> Self {
        Self {
            id: id.into(),
            area: area.into(),
            needs,
            institution: None,
        }
    }

    /// Sets the institution.
    pub fn with_institution(mut self, institution: impl Into<String>) -> Self {
        self.institution = Some(institution.into());
        self
    }
}

impl Keyed for Project {
    fn key(&self) -> &str {
        &self.id
    }
}

/// A forbidden reviewer–project pairing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConflictEdge {
    /// Reviewer that must not review `project_id`.
    pub reviewer_id: String,
    pub project_id: String,
}

impl ConflictEdge {
    pub fn new(reviewer_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            project_id: project_id.into(),
        }
    }
}

/// A match-quality hint. Pairs without an edge score 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityEdge {
    pub reviewer_id: String,
    pub project_id: String,
    /// Finite match score; higher is better.
    pub score: f64,
}

impl AffinityEdge {
    pub fn new(reviewer_id: impl Into<String>, project_id: impl Into<String>, score: f64) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            project_id: project_id.into(),
            score,
        }
    }
}

/// Immutable snapshot of every input record for one run.
///
/// # Examples
///
/// ```
/// use u_assign::records::{ConflictEdge, Project, RecordSet, Reviewer};
///
/// let records = RecordSet::new(
///     vec![Reviewer::new("R01", 1, 2).with_areas(["ML"])],
///     vec![Project::new("P001", "ML", 1)],
/// )
/// .with_conflicts(vec![ConflictEdge::new("R01", "P404")]);
///
/// assert!(records.validate().is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub reviewers: Vec<Reviewer>,
    pub projects: Vec<Project>,
    /// Declared conflicts of interest.
    #[serde(default)]
    pub conflicts: Vec<ConflictEdge>,
    /// Sparse affinity scores.
    #[serde(default)]
    pub affinities: Vec<AffinityEdge>,
}

impl RecordSet {
    /// Creates a record set without edges.
    pub fn new(reviewers: Vec<Reviewer>, projects: Vec<Project>) -> Self {
        Self {
            reviewers,
            projects,
            conflicts: Vec::new(),
            affinities: Vec::new(),
        }
    }

    /// Sets the conflict edges.
    pub fn with_conflicts(mut self, conflicts: Vec<ConflictEdge>) -> Self {
        self.conflicts = conflicts;
        self
    }

    /// Sets the affinity edges.
    pub fn with_affinities(mut self, affinities: Vec<AffinityEdge>) -> Self {
        self.affinities = affinities;
        self
    }

    /// Looks up a reviewer by id.
    pub fn reviewer(&self, id: &str) -> Option<&Reviewer> {
        self.reviewers.iter().find(|r| r.id == id)
    }

    /// Looks up a project by id.
    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// Sum of all project needs.
    pub fn total_needs(&self) -> i64 {
        self.projects.iter().map(|p| p.needs.max(0)).sum()
    }

    /// Conflicted pairs as `(reviewer_id, project_id)`, deduplicated and sorted.
    pub fn conflict_pairs(&self) -> BTreeSet<(&str, &str)> {
        self.conflicts
            .iter()
            .map(|c| (c.reviewer_id.as_str(), c.project_id.as_str()))
            .collect()
    }

    /// `(reviewer_id, project_id)` pairs whose reviewer belongs to the
    /// project's host institution.
    pub fn home_institution_pairs(&self) -> BTreeSet<(&str, &str)> {
        let mut pairs = BTreeSet::new();
        for p in &self.projects {
            let Some(host) = p.institution.as_deref() else {
                continue;
            };
            for r in &self.reviewers {
                if r.institution.as_deref() == Some(host) {
                    pairs.insert((r.id.as_str(), p.id.as_str()));
                }
            }
        }
        pairs
    }

    /// Affinity scores keyed by `(reviewer_id, project_id)`.
    ///
    /// Call [`validate`](Self::validate) first; later duplicates win here.
    pub fn affinity_map(&self) -> BTreeMap<(&str, &str), f64> {
        self.affinities
            .iter()
            .map(|a| ((a.reviewer_id.as_str(), a.project_id.as_str()), a.score))
            .collect()
    }

    /// Checks every record invariant.
    pub fn validate(&self) -> Result<(), InputError> {
        let mut reviewer_ids = BTreeSet::new();
        for r in &self.reviewers {
            if !reviewer_ids.insert(r.id.as_str()) {
                return Err(InputError::DuplicateReviewer(r.id.clone()));
            }
            if r.min_load < 0 {
                return Err(InputError::NegativeMinLoad {
                    reviewer_id: r.id.clone(),
                    min_load: r.min_load,
                });
            }
            if r.min_load > r.max_load {
                return Err(InputError::InvertedLoadBounds {
                    reviewer_id: r.id.clone(),
                    min_load: r.min_load,
                    max_load: r.max_load,
                });
            }
        }

        let mut project_ids = BTreeSet::new();
        for p in &self.projects {
            if !project_ids.insert(p.id.as_str()) {
                return Err(InputError::DuplicateProject(p.id.clone()));
            }
            if p.needs <= 0 {
                return Err(InputError::NonPositiveNeeds {
                    project_id: p.id.clone(),
                    needs: p.needs,
                });
            }
        }

        let check_refs = |edge: EdgeKind, reviewer_id: &str, project_id: &str| {
            if !reviewer_ids.contains(reviewer_id) {
                return Err(InputError::UnknownReviewer {
                    edge,
                    reviewer_id: reviewer_id.to_string(),
                });
            }
            if !project_ids.contains(project_id) {
                return Err(InputError::UnknownProject {
                    edge,
                    project_id: project_id.to_string(),
                });
            }
            Ok(())
        };

        for c in &self.conflicts {
            check_refs(EdgeKind::Conflict, &c.reviewer_id, &c.project_id)?;
        }

        let mut scored = BTreeSet::new();
        for a in &self.affinities {
            check_refs(EdgeKind::Affinity, &a.reviewer_id, &a.project_id)?;
            if !a.score.is_finite() {
                return Err(InputError::NonFiniteAffinity {
                    reviewer_id: a.reviewer_id.clone(),
                    project_id: a.project_id.clone(),
                    score: a.score,
                });
            }
            if !scored.insert((a.reviewer_id.as_str(), a.project_id.as_str())) {
                return Err(InputError::DuplicateAffinity {
                    reviewer_id: a.reviewer_id.clone(),
                    project_id: a.project_id.clone(),
                });
            }
        }

        Ok(())
    }
}
