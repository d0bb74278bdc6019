//! Records + configuration → constraint model.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::constraints::{Bound, Constraint, ConstraintKind, Direction, ObjectiveStage, Scope};
use super::variables::{LinearExpr, VarId, Variable};
use super::{stage, AssignmentVariable, DeviationPair, Model, SkippedFamily};
use crate::config::{AssignConfig, ObjectiveMode};
use crate::determinism::order;
use crate::error::{InputError, Result};
use crate::records::{ConflictEdge, RecordSet};

/// Builds a [`Model`] from validated records.
///
/// # Constraint families
///
/// | Id | Kind | Row | Added |
/// |----|------|-----|-------|
/// | `coverage:P` | coverage | `Σ_r x[r,P] = needs` | always |
/// | `load_min:R` | load-bound | `Σ_p x[R,p] ≥ min_load` | always |
/// | `load_max:R` | load-bound | `Σ_p x[R,p] ≤ max_load` | always |
/// | `area_match:P` | area-match | `Σ x over non-covering reviewers = 0` | `enforce_area_match` |
/// | `diversity:R:A` | diversity | `Σ x over projects in A ≤ cap` | `enforce_diversity_caps` |
/// | `institution_cap:P:I` | institution-cap | `Σ x over reviewers of I ≤ cap` | `enforce_institution_caps` |
///
/// Rows that can never bind (a cap over fewer candidates than the cap)
/// are not emitted.
///
/// With `exclude_home_institution`, a reviewer and a project sharing an
/// institution are treated as a declared conflict: the pair gets no
/// variable and appears in [`Model::conflicts`].
///
/// The derived target load averages `Σ needs` over reviewers that have
/// at least one candidate project and a positive `max_load`.
///
/// # Examples
///
/// ```
/// use u_assign::config::AssignConfig;
/// use u_assign::model::ModelBuilder;
/// use u_assign::records::{ConflictEdge, Project, RecordSet, Reviewer};
///
/// let records = RecordSet::new(
///     vec![Reviewer::new("R01", 0, 2), Reviewer::new("R02", 0, 2)],
///     vec![Project::new("P001", "ML", 1)],
/// )
/// .with_conflicts(vec![ConflictEdge::new("R01", "P001")]);
///
/// let model = ModelBuilder::build(&records, &AssignConfig::default()).unwrap();
/// assert_eq!(model.assignments.len(), 1);
/// assert!(model.assignment_var("R01", "P001").is_none());
/// ```
pub struct ModelBuilder;

impl ModelBuilder {
    /// Validates the inputs and builds the model.
    pub fn build(records: &RecordSet, config: &AssignConfig) -> Result<Model> {
        config.validate().map_err(InputError::from)?;
        records.validate()?;

        let reviewers = order(&records.reviewers);
        let projects = order(&records.projects);
        let mut conflicts = records.conflict_pairs();
        if config.exclude_home_institution {
            let home = records.home_institution_pairs();
            if !home.is_empty() {
                debug!(pairs = home.len(), "home-institution pairs excluded");
            }
            conflicts.extend(home);
        }
        let affinity = records.affinity_map();

        let mut variables = Vec::new();
        let mut assignments = Vec::new();
        for p in &projects {
            for r in &reviewers {
                if conflicts.contains(&(r.id.as_str(), p.id.as_str())) {
                    continue;
                }
                let var = variables.len();
                variables.push(Variable::binary(format!("x[{},{}]", r.id, p.id)));
                assignments.push(AssignmentVariable {
                    reviewer_id: r.id.clone(),
                    project_id: p.id.clone(),
                    var,
                });
            }
        }

        let vars_of_project = |pid: &str| {
            assignments
                .iter()
                .filter(|a| a.project_id == pid)
                .collect::<Vec<_>>()
        };
        let vars_of_reviewer = |rid: &str| {
            assignments
                .iter()
                .filter(|a| a.reviewer_id == rid)
                .collect::<Vec<_>>()
        };

        let mut constraints = Vec::new();

        for p in &projects {
            let expr = LinearExpr::sum(vars_of_project(p.id.as_str()).iter().map(|a| a.var));
            constraints.push(Constraint::new(
                format!("coverage:{}", p.id),
                ConstraintKind::Coverage,
                Scope::Project(p.id.clone()),
                expr,
                Bound::Exactly(p.needs as f64),
            ));
        }

        for r in &reviewers {
            let expr = LinearExpr::sum(vars_of_reviewer(r.id.as_str()).iter().map(|a| a.var));
            constraints.push(Constraint::new(
                format!("load_min:{}", r.id),
                ConstraintKind::LoadBound,
                Scope::Reviewer(r.id.clone()),
                expr.clone(),
                Bound::AtLeast(r.min_load as f64),
            ));
            constraints.push(Constraint::new(
                format!("load_max:{}", r.id),
                ConstraintKind::LoadBound,
                Scope::Reviewer(r.id.clone()),
                expr,
                Bound::AtMost(r.max_load as f64),
            ));
        }

        let mut skipped = Vec::new();

        if config.enforce_area_match {
            for p in &projects {
                let mismatched: Vec<VarId> = vars_of_project(p.id.as_str())
                    .iter()
                    .filter(|a| {
                        records
                            .reviewer(&a.reviewer_id)
                            .is_some_and(|r| !r.covers(&p.area))
                    })
                    .map(|a| a.var)
                    .collect();
                if mismatched.is_empty() {
                    continue;
                }
                constraints.push(Constraint::new(
                    format!("area_match:{}", p.id),
                    ConstraintKind::AreaMatch,
                    Scope::Project(p.id.clone()),
                    LinearExpr::sum(mismatched),
                    Bound::Exactly(0.0),
                ));
            }
        } else {
            skipped.push(SkippedFamily {
                kind: ConstraintKind::AreaMatch,
                reason: "disabled by configuration".into(),
            });
        }

        if config.enforce_diversity_caps {
            for r in &reviewers {
                let mut by_area: BTreeMap<&str, Vec<VarId>> = BTreeMap::new();
                for a in vars_of_reviewer(r.id.as_str()) {
                    if let Some(p) = records.project(&a.project_id) {
                        by_area.entry(p.area.as_str()).or_default().push(a.var);
                    }
                }
                for (area, vars) in by_area {
                    if (vars.len() as i64) <= config.diversity_cap {
                        continue;
                    }
                    constraints.push(Constraint::new(
                        format!("diversity:{}:{}", r.id, area),
                        ConstraintKind::Diversity,
                        Scope::ReviewerArea {
                            reviewer_id: r.id.clone(),
                            area: area.to_string(),
                        },
                        LinearExpr::sum(vars),
                        Bound::AtMost(config.diversity_cap as f64),
                    ));
                }
            }
        } else {
            skipped.push(SkippedFamily {
                kind: ConstraintKind::Diversity,
                reason: "disabled by configuration".into(),
            });
        }

        if !config.enforce_institution_caps {
            skipped.push(SkippedFamily {
                kind: ConstraintKind::InstitutionCap,
                reason: "disabled by configuration".into(),
            });
        } else if let Some(missing) = reviewers.iter().find(|r| r.institution.is_none()) {
            warn!(
                reviewer_id = %missing.id,
                "institution caps skipped: reviewer has no institution"
            );
            skipped.push(SkippedFamily {
                kind: ConstraintKind::InstitutionCap,
                reason: format!("reviewer {} has no institution", missing.id),
            });
        } else {
            for p in &projects {
                let mut by_institution: BTreeMap<&str, Vec<VarId>> = BTreeMap::new();
                for a in vars_of_project(p.id.as_str()) {
                    if let Some(inst) = records
                        .reviewer(&a.reviewer_id)
                        .and_then(|r| r.institution.as_deref())
                    {
                        by_institution.entry(inst).or_default().push(a.var);
                    }
                }
                for (inst, vars) in by_institution {
                    if (vars.len() as i64) <= config.institution_cap {
                        continue;
                    }
                    constraints.push(Constraint::new(
                        format!("institution_cap:{}:{}", p.id, inst),
                        ConstraintKind::InstitutionCap,
                        Scope::ProjectInstitution {
                            project_id: p.id.clone(),
                            institution: inst.to_string(),
                        },
                        LinearExpr::sum(vars),
                        Bound::AtMost(config.institution_cap as f64),
                    ));
                }
            }
        }

        // reviewers without capacity carry a fixed deviation either way
        let working = reviewers
            .iter()
            .filter(|r| r.max_load > 0 && !vars_of_reviewer(r.id.as_str()).is_empty())
            .count();
        let target_load = config
            .target_load
            .unwrap_or_else(|| derived_target(records.total_needs(), working, config.target_step));

        let mut deviations = Vec::new();
        let mut linking = Vec::new();
        let mut balance = LinearExpr::new();
        for r in &reviewers {
            let own = vars_of_reviewer(r.id.as_str());
            // must stay valid when load rows are dropped
            let reachable = own.len() as f64;
            let pos = variables.len();
            variables.push(Variable::continuous(
                format!("dev_pos[{}]", r.id),
                0.0,
                (reachable - target_load).max(0.0),
            ));
            let neg = variables.len();
            variables.push(Variable::continuous(
                format!("dev_neg[{}]", r.id),
                0.0,
                target_load,
            ));

            let mut row = LinearExpr::sum(own.iter().map(|a| a.var));
            row.add_term(pos, -1.0);
            row.add_term(neg, 1.0);
            linking.push(Constraint::new(
                format!("deviation:{}", r.id),
                ConstraintKind::Linking,
                Scope::Reviewer(r.id.clone()),
                row,
                Bound::Exactly(target_load),
            ));

            balance.add_term(pos, 1.0);
            balance.add_term(neg, 1.0);
            deviations.push(DeviationPair {
                reviewer_id: r.id.clone(),
                pos,
                neg,
            });
        }

        let mut match_quality = LinearExpr::new();
        for a in &assignments {
            if let Some(&score) = affinity.get(&(a.reviewer_id.as_str(), a.project_id.as_str())) {
                match_quality.add_term(a.var, score);
            }
        }

        let stages = match config.objective_mode {
            ObjectiveMode::Lexicographic => vec![
                ObjectiveStage::new(
                    stage::LOAD_BALANCE,
                    balance,
                    Direction::Minimize,
                    config.weight_load_balance,
                ),
                ObjectiveStage::new(
                    stage::AFFINITY,
                    match_quality,
                    Direction::Maximize,
                    config.weight_affinity,
                ),
            ],
            ObjectiveMode::Weighted => {
                let mut combined = balance.scaled(config.weight_load_balance);
                combined.add_expr(&match_quality, -config.weight_affinity);
                vec![ObjectiveStage::new(
                    stage::WEIGHTED,
                    combined,
                    Direction::Minimize,
                    1.0,
                )]
            }
        };

        for c in &constraints {
            debug!(id = %c.id, kind = %c.kind, terms = c.expr.terms.len(), "constraint added");
        }

        let conflict_edges: Vec<ConflictEdge> = conflicts
            .iter()
            .map(|&(r, p)| ConflictEdge::new(r, p))
            .collect();

        info!(
            event = "model_built",
            reviewers = reviewers.len(),
            projects = projects.len(),
            variables = variables.len(),
            constraints = constraints.len(),
            stages = stages.len(),
            skipped = skipped.len(),
            target_load,
        );

        Ok(Model {
            records: records.clone(),
            config: config.clone(),
            variables,
            assignments,
            deviations,
            constraints,
            linking,
            conflicts: conflict_edges,
            stages,
            slacks: Vec::new(),
            skipped,
            target_load,
        })
    }
}

/// `Σ needs / |reviewers|`, rounded to the nearest `step`.
/// Mean load over the reviewers that can take work, rounded to `step`.
fn derived_target(total_needs: i64, working: usize, step: f64) -> f64 {
    if working == 0 {
        return 0.0;
    }
    let mean = total_needs as f64 / working as f64;
    (mean / step).round() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssignError;
    use crate::records::{AffinityEdge, Project, Reviewer};

    fn records() -> RecordSet {
        RecordSet::new(
            vec![
                Reviewer::new("R02", 0, 3).with_areas(["ML"]),
                Reviewer::new("R01", 1, 2).with_areas(["ML", "NLP"]),
                Reviewer::new("R03", 0, 2).with_areas(["NLP"]),
            ],
            vec![
                Project::new("P002", "NLP", 1),
                Project::new("P001", "ML", 2),
            ],
        )
        .with_conflicts(vec![
            ConflictEdge::new("R01", "P001"),
            ConflictEdge::new("R01", "P001"),
        ])
        .with_affinities(vec![AffinityEdge::new("R02", "P001", 0.75)])
    }

    #[test]
    fn test_variables_skip_conflicts() {
        let model = ModelBuilder::build(&records(), &AssignConfig::default()).unwrap();
        assert_eq!(model.assignments.len(), 5);
        assert!(model.assignment_var("R01", "P001").is_none());
        assert_eq!(model.variables[0].name, "x[R02,P001]");
        assert_eq!(model.conflicts.len(), 1);
    }

    #[test]
    fn test_core_rows_in_id_order() {
        let model = ModelBuilder::build(&records(), &AssignConfig::default()).unwrap();
        let ids: Vec<&str> = model.constraints.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "coverage:P001",
                "coverage:P002",
                "load_min:R01",
                "load_max:R01",
                "load_min:R02",
                "load_max:R02",
                "load_min:R03",
                "load_max:R03",
            ]
        );
        let coverage = model.constraint("coverage:P001").unwrap();
        assert_eq!(coverage.bound, Bound::Exactly(2.0));
        assert_eq!(coverage.expr.terms.len(), 2);
        assert_eq!(model.linking.len(), 3);
    }

    #[test]
    fn test_target_load_rounding() {
        // 3 needs over 3 reviewers
        let model = ModelBuilder::build(&records(), &AssignConfig::default()).unwrap();
        assert_eq!(model.target_load, 1.0);

        let mut recs = records();
        recs.projects[0].needs = 2;
        // 4 / 3 = 1.33 → 1.5
        let model = ModelBuilder::build(&recs, &AssignConfig::default()).unwrap();
        assert_eq!(model.target_load, 1.5);

        let config = AssignConfig::default().with_target_load(2.0);
        let model = ModelBuilder::build(&records(), &config).unwrap();
        assert_eq!(model.target_load, 2.0);
    }

    #[test]
    fn test_target_ignores_reviewers_without_capacity() {
        let records = RecordSet::new(
            vec![
                Reviewer::new("R01", 0, 3),
                Reviewer::new("R02", 0, 3),
                Reviewer::new("R03", 0, 0),
                Reviewer::new("R04", 0, 0),
            ],
            vec![
                Project::new("P001", "ML", 3),
                Project::new("P002", "ML", 2),
                Project::new("P003", "ML", 2),
            ],
        );
        // 7 needs over the two reviewers that can work
        let model = ModelBuilder::build(&records, &AssignConfig::default()).unwrap();
        assert_eq!(model.target_load, 3.5);
    }

    #[test]
    fn test_home_institution_is_excluded() {
        let records = RecordSet::new(
            vec![
                Reviewer::new("R01", 0, 2).with_institution("KAIST"),
                Reviewer::new("R02", 0, 2).with_institution("SNU"),
                Reviewer::new("R03", 0, 2),
            ],
            vec![
                Project::new("P001", "ML", 1).with_institution("KAIST"),
                Project::new("P002", "ML", 1),
            ],
        );
        let model = ModelBuilder::build(&records, &AssignConfig::default()).unwrap();
        assert!(model.assignment_var("R01", "P001").is_none());
        assert!(model.assignment_var("R02", "P001").is_some());
        assert!(model.assignment_var("R01", "P002").is_some());
        assert_eq!(model.conflicts, vec![ConflictEdge::new("R01", "P001")]);

        let config = AssignConfig::default().with_home_institution_exclusion(false);
        let model = ModelBuilder::build(&records, &config).unwrap();
        assert!(model.assignment_var("R01", "P001").is_some());
        assert!(model.conflicts.is_empty());
    }

    #[test]
    fn test_stages() {
        let model = ModelBuilder::build(&records(), &AssignConfig::default()).unwrap();
        let names: Vec<&str> = model.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![stage::LOAD_BALANCE, stage::AFFINITY]);

        let x = model.assignment_var("R02", "P001").unwrap();
        let affinity = model.stage(stage::AFFINITY).unwrap();
        assert_eq!(affinity.direction, Direction::Maximize);
        assert_eq!(affinity.expr.coefficient(x), 0.75);

        let config = AssignConfig::default()
            .with_objective_mode(ObjectiveMode::Weighted)
            .with_weights(2.0, 1.0);
        let model = ModelBuilder::build(&records(), &config).unwrap();
        assert_eq!(model.stages.len(), 1);
        let weighted = &model.stages[0];
        assert_eq!(weighted.expr.coefficient(x), -0.75);
        assert_eq!(weighted.expr.coefficient(model.deviations[0].pos), 2.0);
    }

    #[test]
    fn test_area_match() {
        let config = AssignConfig::default().with_area_match(true);
        let model = ModelBuilder::build(&records(), &config).unwrap();

        let row = model.constraint("area_match:P001").unwrap();
        let x = model.assignment_var("R03", "P001").unwrap();
        assert_eq!(row.expr.terms, vec![(x, 1.0)]);
        assert_eq!(row.bound, Bound::Exactly(0.0));
        assert!(!model.skipped.iter().any(|s| s.kind == ConstraintKind::AreaMatch));
    }

    #[test]
    fn test_diversity_caps_only_when_binding() {
        let mut recs = records();
        recs.projects.push(Project::new("P003", "ML", 1));
        let config = AssignConfig::default().with_diversity_cap(1);
        let model = ModelBuilder::build(&recs, &config).unwrap();

        assert!(model.constraint("diversity:R02:ML").is_some());
        // R01 sees one ML project (P001 is conflicted)
        assert!(model.constraint("diversity:R01:ML").is_none());
    }

    #[test]
    fn test_institution_caps_need_every_institution() {
        let config = AssignConfig::default().with_institution_cap(1);
        let model = ModelBuilder::build(&records(), &config).unwrap();
        let skipped = model
            .skipped
            .iter()
            .find(|s| s.kind == ConstraintKind::InstitutionCap)
            .unwrap();
        assert!(skipped.reason.contains("R01"));

        let mut recs = records();
        for r in &mut recs.reviewers {
            r.institution = Some("KAIST".into());
        }
        let model = ModelBuilder::build(&recs, &config).unwrap();
        assert!(model.constraint("institution_cap:P001:KAIST").is_some());
        // P002 has three candidates from one institution as well
        assert!(model.constraint("institution_cap:P002:KAIST").is_some());
    }

    #[test]
    fn test_invalid_input() {
        let mut recs = records();
        recs.projects[0].needs = 0;
        let err = ModelBuilder::build(&recs, &AssignConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            AssignError::InvalidInput(InputError::NonPositiveNeeds { .. })
        ));

        let config = AssignConfig::default().with_time_limit_s(0);
        let err = ModelBuilder::build(&records(), &config).unwrap_err();
        assert!(matches!(
            err,
            AssignError::InvalidInput(InputError::InvalidConfig(_))
        ));
    }
}
