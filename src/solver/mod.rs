//! Staged solving over a pluggable backend.
//!
//! # Architecture
//!
//! - [`SolverBackend`]: exact feasibility and optimization calls over a
//!   [`Problem`] (variables, rows, fixings).
//! - [`MilpBackend`]: mixed-integer programming through `good_lp`; the
//!   default.
//! - [`BranchAndBound`]: dependency-free depth-first search with a
//!   deterministic node budget.
//! - [`ConfiguredBackend`]: whichever of the two the configuration names.
//! - [`StagedSolver`]: runs the objective stages lexicographically,
//!   freezing each optimum, then applies the seeded tie-break pass.

mod backend;
mod configured;
mod milp;
mod runner;
mod search;

pub use backend::{BackendOutcome, BackendStatus, Problem, SolverBackend};
pub use configured::ConfiguredBackend;
pub use milp::MilpBackend;
pub use runner::{SolveResult, SolveStatus, SolverConfig, SolverState, StageValue, StagedSolver};
pub use search::BranchAndBound;
