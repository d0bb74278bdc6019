//! Assignment configuration.
//!
//! [`AssignConfig`] is an immutable value handed to the model builder,
//! the solver, and the analyzer. It can be built in code with the
//! `with_*` methods or loaded from TOML.
//!
//! ```
//! use u_assign::config::{AssignConfig, ObjectiveMode};
//!
//! let config = AssignConfig::from_toml_str(r#"
//!     objective_mode = "weighted"
//!     enforce_area_match = true
//!     time_limit_s = 30
//!     seed = 7
//! "#).unwrap();
//!
//! assert_eq!(config.objective_mode, ObjectiveMode::Weighted);
//! assert!(config.enforce_area_match);
//! assert_eq!(config.seed, 7);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How objective stages are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveMode {
    /// Stages are optimized in priority order; each optimum is frozen
    /// before the next stage runs.
    #[default]
    Lexicographic,

    /// A single stage sums the stage expressions with their weights.
    Weighted,
}

/// Exact backend used for every solve and feasibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Mixed-integer programming through `good_lp` and `microlp`.
    #[default]
    Milp,

    /// Built-in depth-first branch and bound. Honors `node_limit`.
    BranchAndBound,
}

/// Configuration for one assignment run.
///
/// # Defaults
///
/// ```
/// use u_assign::config::AssignConfig;
///
/// let config = AssignConfig::default();
/// assert_eq!(config.time_limit_s, 60);
/// assert!(!config.enforce_area_match);
/// assert!(!config.softening_enabled());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignConfig {
    /// Lexicographic (canonical) or weighted-sum objective.
    pub objective_mode: ObjectiveMode,

    /// Per-reviewer target load for the balance stage.
    ///
    /// `None` derives the target from `Σ needs / |reviewers|`,
    /// rounded to the nearest `target_step`.
    pub target_load: Option<f64>,

    /// Rounding granularity of the derived target load.
    pub target_step: f64,

    /// Only allow pairs whose reviewer covers the project's area.
    pub enforce_area_match: bool,

    /// Limit how many projects of one area a reviewer may take.
    pub enforce_diversity_caps: bool,

    /// Per-reviewer, per-area assignment cap.
    pub diversity_cap: i64,

    /// Limit how many reviewers of one institution review a project.
    ///
    /// Skipped with a warning unless every reviewer has an institution.
    pub enforce_institution_caps: bool,

    /// Per-project, per-institution reviewer cap.
    pub institution_cap: i64,

    /// Never assign a reviewer to a project hosted by their own
    /// institution.
    pub exclude_home_institution: bool,

    /// Weight of the load-balance stage (weighted mode).
    pub weight_load_balance: f64,

    /// Weight of the affinity stage (weighted mode).
    pub weight_affinity: f64,

    /// Allow coverage (`needs`) to drop when the model is infeasible.
    pub allow_soften_project_needs: bool,

    /// Allow reviewer `min_load` to drop when the model is infeasible.
    pub allow_soften_min_load: bool,

    /// Largest drop allowed on any project's needs.
    pub max_needs_relaxation: i64,

    /// Largest drop allowed on any reviewer's min_load.
    pub max_load_relaxation: i64,

    /// Penalty per unit of dropped coverage.
    pub penalty_needs: f64,

    /// Penalty per unit of dropped min_load.
    pub penalty_min_load: f64,

    /// Wall-clock limit for one solve, in seconds.
    pub time_limit_s: u64,

    /// Seed for the tie-break permutation.
    pub seed: u64,

    /// Tolerance applied when freezing a stage optimum.
    pub freeze_tolerance: f64,

    /// Exact backend.
    pub backend: BackendKind,

    /// Deterministic search-node budget per backend call.
    ///
    /// When exhausted with an incumbent the run reports a feasible,
    /// non-optimal result. `None` disables the budget. Only the
    /// branch-and-bound backend counts nodes.
    pub node_limit: Option<u64>,

    /// Run independent feasibility checks in parallel.
    ///
    /// Only effective with the `parallel` feature.
    pub parallel: bool,
}

impl Default for AssignConfig {
    fn default() -> Self {
        Self {
            objective_mode: ObjectiveMode::Lexicographic,
            target_load: None,
            target_step: 0.5,
            enforce_area_match: false,
            enforce_diversity_caps: false,
            diversity_cap: 2,
            enforce_institution_caps: false,
            institution_cap: 1,
            exclude_home_institution: true,
            weight_load_balance: 1.0,
            weight_affinity: 1.0,
            allow_soften_project_needs: false,
            allow_soften_min_load: false,
            max_needs_relaxation: 1,
            max_load_relaxation: 1,
            penalty_needs: 10.0,
            penalty_min_load: 1.0,
            time_limit_s: 60,
            seed: 0,
            freeze_tolerance: 1e-6,
            backend: BackendKind::Milp,
            node_limit: None,
            parallel: true,
        }
    }
}

impl AssignConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_file(path)
    }

    /// Loads configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string and validates it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the objective mode.
    pub fn with_objective_mode(mut self, mode: ObjectiveMode) -> Self {
        self.objective_mode = mode;
        self
    }

    /// Pins the target load instead of deriving it.
    pub fn with_target_load(mut self, target: f64) -> Self {
        self.target_load = Some(target);
        self
    }

    /// Enables or disables the area-match constraint.
    pub fn with_area_match(mut self, enabled: bool) -> Self {
        self.enforce_area_match = enabled;
        self
    }

    /// Enables diversity caps with the given per-area limit.
    pub fn with_diversity_cap(mut self, cap: i64) -> Self {
        self.enforce_diversity_caps = true;
        self.diversity_cap = cap;
        self
    }

    /// Enables institution caps with the given per-project limit.
    pub fn with_institution_cap(mut self, cap: i64) -> Self {
        self.enforce_institution_caps = true;
        self.institution_cap = cap;
        self
    }

    /// Enables or disables the home-institution exclusion.
    pub fn with_home_institution_exclusion(mut self, enabled: bool) -> Self {
        self.exclude_home_institution = enabled;
        self
    }

    /// Sets the weighted-mode stage weights.
    pub fn with_weights(mut self, load_balance: f64, affinity: f64) -> Self {
        self.weight_load_balance = load_balance;
        self.weight_affinity = affinity;
        self
    }

    /// Allows coverage to drop by at most `max` per project.
    pub fn with_needs_softening(mut self, max: i64) -> Self {
        self.allow_soften_project_needs = true;
        self.max_needs_relaxation = max;
        self
    }

    /// Allows min_load to drop by at most `max` per reviewer.
    pub fn with_min_load_softening(mut self, max: i64) -> Self {
        self.allow_soften_min_load = true;
        self.max_load_relaxation = max;
        self
    }

    /// Sets the time limit in seconds.
    pub fn with_time_limit_s(mut self, seconds: u64) -> Self {
        self.time_limit_s = seconds;
        self
    }

    /// Sets the tie-break seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Selects the exact backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the deterministic node budget.
    pub fn with_node_limit(mut self, nodes: u64) -> Self {
        self.node_limit = Some(nodes);
        self
    }

    /// Enables or disables parallel feasibility checks.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Time limit as a [`Duration`].
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_s)
    }

    /// Whether any constraint family may be softened.
    pub fn softening_enabled(&self) -> bool {
        self.allow_soften_project_needs || self.allow_soften_min_load
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.into()));

        if self.time_limit_s == 0 {
            return invalid("time_limit_s must be positive");
        }
        if !(self.target_step.is_finite() && self.target_step > 0.0) {
            return invalid("target_step must be a positive number");
        }
        if let Some(target) = self.target_load {
            if !(target.is_finite() && target >= 0.0) {
                return invalid("target_load must be a non-negative number");
            }
        }
        for (name, value) in [
            ("weight_load_balance", self.weight_load_balance),
            ("weight_affinity", self.weight_affinity),
            ("penalty_needs", self.penalty_needs),
            ("penalty_min_load", self.penalty_min_load),
            ("freeze_tolerance", self.freeze_tolerance),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number"
                )));
            }
        }
        if self.max_needs_relaxation < 0 || self.max_load_relaxation < 0 {
            return invalid("relaxation maxima must be non-negative");
        }
        if self.enforce_diversity_caps && self.diversity_cap < 1 {
            return invalid("diversity_cap must be at least 1");
        }
        if self.enforce_institution_caps && self.institution_cap < 1 {
            return invalid("institution_cap must be at least 1");
        }
        if self.node_limit == Some(0) {
            return invalid("node_limit must be positive or None");
        }
        Ok(())
    }
}
