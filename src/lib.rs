//! Constrained reviewer-to-project assignment.
//!
//! Assigns reviewers to projects under hard constraints and optimizes
//! a prioritized list of objectives:
//!
//! - **Records**: reviewers, projects, conflict-of-interest edges and
//!   affinity scores.
//! - **Model**: a binary decision per eligible pair with coverage, load
//!   bound, area match, diversity and institution-cap rows.
//! - **Solver**: staged lexicographic optimization over a pluggable
//!   backend, MILP through `good_lp` by default. Each stage's optimum
//!   is frozen before the next stage runs, and ties are broken by a
//!   seeded permutation.
//! - **Diagnosis**: minimal unsatisfiable subsets, interchangeable
//!   constraints and ranked remedies for infeasible models.
//! - **Softening**: bounded, penalized slack on project needs and
//!   reviewer minimum loads.
//! - **Audit**: objective breakdown and per-constraint satisfaction,
//!   recomputed from the final assignment.
//!
//! # Determinism
//!
//! Identical records and configuration (seed included) produce an
//! identical [`AssignmentOutcome`](engine::AssignmentOutcome), whatever
//! the input order of the records and whether or not the `parallel`
//! feature is enabled.
//!
//! # Example
//!
//! ```
//! use u_assign::config::AssignConfig;
//! use u_assign::records::{AffinityEdge, ConflictEdge, Project, RecordSet, Reviewer};
//!
//! let records = RecordSet::new(
//!     vec![
//!         Reviewer::new("R01", 1, 2),
//!         Reviewer::new("R02", 1, 2),
//!         Reviewer::new("R03", 1, 2),
//!     ],
//!     vec![
//!         Project::new("P001", "ML", 2),
//!         Project::new("P002", "ML", 2),
//!         Project::new("P003", "ML", 2),
//!     ],
//! )
//! .with_conflicts(vec![ConflictEdge::new("R01", "P001")])
//! .with_affinities(vec![AffinityEdge::new("R02", "P001", 1.0)]);
//!
//! let outcome = u_assign::assign(&records, &AssignConfig::default()).unwrap();
//! assert!(outcome.assignment.contains("P001", "R02"));
//! assert!(!outcome.assignment.contains("P001", "R01"));
//! ```

pub mod audit;
pub mod config;
pub mod determinism;
pub mod diagnosis;
pub mod engine;
pub mod error;
pub mod model;
pub mod records;
pub mod soften;
pub mod solver;

pub use engine::{assign, AssignmentEngine, AssignmentOutcome};
pub use error::{AssignError, Result};
