//! Penalized relaxation of coverage and min-load rows.
//!
//! The softener adds one bounded integer slack per relaxable row:
//!
//! - coverage `Σ x + s_p = needs_p` with `s_p ∈ [0, min(max_needs_relaxation, needs_p)]`
//! - min-load `Σ x + s_r ≥ min_load_r` with `s_r ∈ [0, min(max_load_relaxation, min_load_r)]`
//!
//! and charges `penalty · s` in a `softening_penalty` stage after the
//! existing ones (or inside the weighted stage).

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{AssignConfig, ObjectiveMode};
use crate::error::{InputError, Result};
use crate::model::{
    stage, ConstraintKind, Direction, LinearExpr, Model, ObjectiveStage, Scope, SlackVariable,
    SoftenKind, Variable,
};

/// One relaxation present in a solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SofteningRecord {
    /// Id of the relaxed constraint.
    pub constraint_id: String,
    /// Requirement that was relaxed.
    pub kind: SoftenKind,
    /// Project or reviewer id.
    pub entity_id: String,
    /// Units of relaxation used.
    pub magnitude: i64,
}

/// Rewrites a model with slack variables.
pub struct Softener;

impl Softener {
    /// Returns a softened copy of `model`.
    ///
    /// A model that already carries slacks is returned unchanged. When
    /// `config` allows no relaxation, or no row is relaxable, the copy
    /// has no slacks and no penalty stage.
    pub fn soften(model: &Model, config: &AssignConfig) -> Result<Model> {
        config.validate().map_err(InputError::from)?;

        let mut out = model.clone();
        if model.is_softened() {
            return Ok(out);
        }
        out.config = config.clone();

        let mut penalty = LinearExpr::new();
        for index in 0..out.constraints.len() {
            let row = &out.constraints[index];
            let (kind, entity_id, max, weight) = match (&row.kind, &row.scope) {
                (ConstraintKind::Coverage, Scope::Project(id))
                    if config.allow_soften_project_needs =>
                {
                    let needs = row.bound.lower() as i64;
                    (
                        SoftenKind::ProjectNeeds,
                        id.clone(),
                        config.max_needs_relaxation.min(needs),
                        config.penalty_needs,
                    )
                }
                (ConstraintKind::LoadBound, Scope::Reviewer(id))
                    if config.allow_soften_min_load && row.bound.has_lower() =>
                {
                    let min_load = row.bound.lower() as i64;
                    (
                        SoftenKind::MinLoad,
                        id.clone(),
                        config.max_load_relaxation.min(min_load),
                        config.penalty_min_load,
                    )
                }
                _ => continue,
            };
            if max <= 0 {
                continue;
            }

            let constraint_id = row.id.clone();
            let var = out.variables.len();
            out.variables
                .push(Variable::integer(format!("slack[{constraint_id}]"), 0, max));
            out.constraints[index].expr.add_term(var, 1.0);
            penalty.add_term(var, weight);

            debug!(constraint = %constraint_id, max, penalty = weight, "slack added");
            out.slacks.push(SlackVariable {
                var,
                constraint_id,
                kind,
                entity_id,
                max,
                penalty: weight,
            });
        }

        if out.slacks.is_empty() {
            info!(event = "model_softened", slacks = 0);
            return Ok(out);
        }

        match config.objective_mode {
            ObjectiveMode::Lexicographic => out.stages.push(ObjectiveStage::new(
                stage::SOFTENING_PENALTY,
                penalty,
                Direction::Minimize,
                1.0,
            )),
            ObjectiveMode::Weighted => {
                if let Some(weighted) = out.stages.iter_mut().find(|s| s.name == stage::WEIGHTED) {
                    weighted.expr.add_expr(&penalty, 1.0);
                } else {
                    out.stages.push(ObjectiveStage::new(
                        stage::WEIGHTED,
                        penalty,
                        Direction::Minimize,
                        1.0,
                    ));
                }
            }
        }

        info!(
            event = "model_softened",
            slacks = out.slacks.len(),
            stages = out.stages.len(),
        );
        Ok(out)
    }
}

/// Nonzero slacks of `values`, in model order.
pub fn softening_records(model: &Model, values: &[f64]) -> Vec<SofteningRecord> {
    model
        .slacks
        .iter()
        .filter_map(|s| {
            let magnitude = values.get(s.var).copied().unwrap_or(0.0).round() as i64;
            (magnitude > 0).then(|| SofteningRecord {
                constraint_id: s.constraint_id.clone(),
                kind: s.kind,
                entity_id: s.entity_id.clone(),
                magnitude,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::records::{Project, RecordSet, Reviewer};

    fn records() -> RecordSet {
        RecordSet::new(
            vec![Reviewer::new("R01", 2, 2), Reviewer::new("R02", 0, 2)],
            vec![
                Project::new("P001", "ML", 2),
                Project::new("P002", "ML", 2),
                Project::new("P003", "ML", 1),
            ],
        )
    }

    #[test]
    fn test_soften_coverage() {
        let config = AssignConfig::default().with_needs_softening(1);
        let model = ModelBuilder::build(&records(), &config).unwrap();
        let softened = Softener::soften(&model, &config).unwrap();

        assert_eq!(softened.slacks.len(), 3);
        assert_eq!(softened.variables.len(), model.variables.len() + 3);

        let slack = &softened.slacks[0];
        assert_eq!(slack.constraint_id, "coverage:P001");
        assert_eq!(slack.kind, SoftenKind::ProjectNeeds);
        assert_eq!(slack.max, 1);
        let row = softened.constraint("coverage:P001").unwrap();
        assert_eq!(row.expr.coefficient(slack.var), 1.0);

        let last = softened.stages.last().unwrap();
        assert_eq!(last.name, stage::SOFTENING_PENALTY);
        assert_eq!(last.expr.coefficient(slack.var), config.penalty_needs);
    }

    #[test]
    fn test_soften_min_load_skips_zero() {
        let config = AssignConfig::default().with_min_load_softening(5);
        let model = ModelBuilder::build(&records(), &config).unwrap();
        let softened = Softener::soften(&model, &config).unwrap();

        assert_eq!(softened.slacks.len(), 1);
        let slack = &softened.slacks[0];
        assert_eq!(slack.constraint_id, "load_min:R01");
        assert_eq!(slack.entity_id, "R01");
        // capped by min_load
        assert_eq!(slack.max, 2);
        assert_eq!(softened.variables[slack.var].name, "slack[load_min:R01]");
    }

    #[test]
    fn test_soften_weighted_mode() {
        let config = AssignConfig::default()
            .with_objective_mode(ObjectiveMode::Weighted)
            .with_needs_softening(1);
        let model = ModelBuilder::build(&records(), &config).unwrap();
        let softened = Softener::soften(&model, &config).unwrap();

        assert_eq!(softened.stages.len(), 1);
        let slack = softened.slacks[0].var;
        assert_eq!(softened.stages[0].expr.coefficient(slack), config.penalty_needs);
    }

    #[test]
    fn test_soften_disabled_is_identity() {
        let config = AssignConfig::default();
        let model = ModelBuilder::build(&records(), &config).unwrap();
        let softened = Softener::soften(&model, &config).unwrap();
        assert!(!softened.is_softened());
        assert_eq!(softened.stages.len(), model.stages.len());
        assert_eq!(softened.constraints, model.constraints);
    }

    #[test]
    fn test_soften_is_idempotent() {
        let config = AssignConfig::default().with_needs_softening(1);
        let model = ModelBuilder::build(&records(), &config).unwrap();
        let once = Softener::soften(&model, &config).unwrap();
        let twice = Softener::soften(&once, &config).unwrap();
        assert_eq!(twice.slacks, once.slacks);
        assert_eq!(twice.variables.len(), once.variables.len());
    }

    #[test]
    fn test_softening_records() {
        let config = AssignConfig::default().with_needs_softening(1);
        let model = ModelBuilder::build(&records(), &config).unwrap();
        let softened = Softener::soften(&model, &config).unwrap();

        let mut values = vec![0.0; softened.variables.len()];
        values[softened.slacks[1].var] = 1.0;
        let records = softening_records(&softened, &values);
        assert_eq!(
            records,
            vec![SofteningRecord {
                constraint_id: "coverage:P002".into(),
                kind: SoftenKind::ProjectNeeds,
                entity_id: "P002".into(),
                magnitude: 1,
            }]
        );
    }
}
