//! Infeasibility diagnosis.
//!
//! - [`FeasibilityAnalyzer`]: minimal unsatisfiable subset of the hard
//!   constraints, interchangeable constraints, and remedies.
//! - [`InfeasibilityReport`]: the resulting value.
//!
//! Remedies fall into four categories:
//!
//! | Category | Remedy | Sizing |
//! |----------|--------|--------|
//! | COI density | reduce conflicts on a project or reviewer | eligible count vs. requirement |
//! | load-bound tightness | raise `max_load` / lower `min_load` | binary search over rebuilt models |
//! | area scarcity | recruit reviewers in an area | binary search over rebuilt models |
//! | cap tightness | raise a diversity / institution cap | binary search over rebuilt models |

mod analyzer;
mod remedy;
mod report;

pub use analyzer::FeasibilityAnalyzer;
pub use report::{ConstraintRef, InfeasibilityReport, Remedy, RemedyCategory, RemedySuggestion};
