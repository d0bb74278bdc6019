//! Decision variables and linear expressions.

use serde::{Deserialize, Serialize};

/// Index of a variable within a [`Model`](super::Model).
pub type VarId = usize;

/// Domain kind of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    /// 0/1 decision.
    Binary,
    /// Integer in `[lower, upper]`.
    Integer,
    /// Real in `[lower, upper]`.
    ///
    /// Continuous variables must be implied by the integral ones
    /// (deviation variables are); the built-in backend never branches
    /// on them.
    Continuous,
}

impl VarKind {
    pub fn is_integral(self) -> bool {
        !matches!(self, VarKind::Continuous)
    }
}

/// A bounded decision variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name (unique within a model).
    pub name: String,
    /// Domain kind.
    pub kind: VarKind,
    /// Inclusive lower bound.
    pub lower: f64,
    /// Inclusive upper bound.
    pub upper: f64,
}

impl Variable {
    /// Creates a 0/1 variable.
    pub fn binary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::Binary,
            lower: 0.0,
            upper: 1.0,
        }
    }

    /// Creates an integer variable with the given bounds.
    pub fn integer(name: impl Into<String>, lower: i64, upper: i64) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::Integer,
            lower: lower as f64,
            upper: upper as f64,
        }
    }

    /// Creates a continuous variable with the given bounds.
    pub fn continuous(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::Continuous,
            lower,
            upper,
        }
    }

    pub fn is_integral(&self) -> bool {
        self.kind.is_integral()
    }
}

/// `Σ coefficient · variable + constant`.
///
/// Terms are kept unique per variable: [`add_term`](Self::add_term)
/// merges coefficients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearExpr {
    /// `(variable, coefficient)` pairs, one per variable.
    pub terms: Vec<(VarId, f64)>,
    /// Constant offset.
    pub constant: f64,
}

impl LinearExpr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of the given variables with coefficient 1.
    pub fn sum<I: IntoIterator<Item = VarId>>(vars: I) -> Self {
        let mut expr = Self::new();
        for var in vars {
            expr.add_term(var, 1.0);
        }
        expr
    }

    /// Builder form of [`add_term`](Self::add_term).
    pub fn with_term(mut self, var: VarId, coefficient: f64) -> Self {
        self.add_term(var, coefficient);
        self
    }

    /// Adds `coefficient · var`, merging with an existing term.
    pub fn add_term(&mut self, var: VarId, coefficient: f64) {
        if coefficient == 0.0 {
            return;
        }
        match self.terms.iter_mut().find(|(v, _)| *v == var) {
            Some((_, c)) => *c += coefficient,
            None => self.terms.push((var, coefficient)),
        }
    }

    /// Adds `scale · other`.
    pub fn add_expr(&mut self, other: &LinearExpr, scale: f64) {
        for &(var, c) in &other.terms {
            self.add_term(var, c * scale);
        }
        self.constant += other.constant * scale;
    }

    /// Returns `scale · self`.
    pub fn scaled(&self, scale: f64) -> Self {
        let mut out = Self::new();
        out.add_expr(self, scale);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Coefficient of `var` (0 if absent).
    pub fn coefficient(&self, var: VarId) -> f64 {
        self.terms
            .iter()
            .find(|(v, _)| *v == var)
            .map_or(0.0, |&(_, c)| c)
    }

    /// Dense coefficient vector of length `n`.
    pub fn to_dense(&self, n: usize) -> Vec<f64> {
        let mut dense = vec![0.0; n];
        for &(var, c) in &self.terms {
            if let Some(slot) = dense.get_mut(var) {
                *slot += c;
            }
        }
        dense
    }

    /// Value at a full variable assignment.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|&(var, c)| c * values.get(var).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }

    /// Smallest value reachable within `domains` (may be `-inf`).
    pub fn lower_bound(&self, domains: &[(f64, f64)]) -> f64 {
        let mut bound = self.constant;
        for &(var, c) in &self.terms {
            let (lo, hi) = domains[var];
            bound += if c > 0.0 { c * lo } else { c * hi };
        }
        bound
    }
}
