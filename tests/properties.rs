// Property-based tests over small random instances.
// CI: 48 cases (default). Soak: PROPTEST_CASES=2000 cargo test --release

use proptest::prelude::*;
use u_assign::config::AssignConfig;
use u_assign::engine::AssignmentOutcome;
use u_assign::model::{stage, Constraint, Model, ModelBuilder, SoftenKind};
use u_assign::records::{AffinityEdge, ConflictEdge, Project, RecordSet, Reviewer};
use u_assign::soften::Softener;
use u_assign::solver::{BranchAndBound, Problem, SolverBackend};
use u_assign::{assign, AssignError};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_48() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(48),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

fn assign_config() -> AssignConfig {
    AssignConfig::default().with_parallel(false)
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Two to four reviewers, one to three projects, sparse conflicts and
/// quarter-step affinities.
fn arb_records() -> impl Strategy<Value = RecordSet> {
    (2usize..=4, 1usize..=3).prop_flat_map(|(n_rev, n_proj)| {
        let reviewers = prop::collection::vec((0i64..=1, 1i64..=3), n_rev);
        let needs = prop::collection::vec(1i64..=2, n_proj);
        let pairs = n_rev * n_proj;
        let conflicts = prop::collection::vec(prop::bool::weighted(0.2), pairs);
        let scores = prop::collection::vec(prop::option::of(0u8..=4), pairs);
        (reviewers, needs, conflicts, scores).prop_map(move |(loads, needs, conflicts, scores)| {
            let reviewers = loads
                .iter()
                .enumerate()
                .map(|(i, &(min, extra))| Reviewer::new(format!("R{:02}", i + 1), min, min + extra))
                .collect();
            let projects = needs
                .iter()
                .enumerate()
                .map(|(j, &n)| Project::new(format!("P{:03}", j + 1), "ML", n))
                .collect();

            let mut conflict_edges = Vec::new();
            let mut affinity_edges = Vec::new();
            for i in 0..n_rev {
                for j in 0..n_proj {
                    let (r, p) = (format!("R{:02}", i + 1), format!("P{:03}", j + 1));
                    let k = i * n_proj + j;
                    if conflicts[k] {
                        conflict_edges.push(ConflictEdge::new(r, p));
                    } else if let Some(s) = scores[k] {
                        affinity_edges.push(AffinityEdge::new(r, p, f64::from(s) * 0.25));
                    }
                }
            }
            RecordSet::new(reviewers, projects)
                .with_conflicts(conflict_edges)
                .with_affinities(affinity_edges)
        })
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn feasible(model: &Model, rows: Vec<&Constraint>) -> bool {
    let order = model.branch_order();
    BranchAndBound::new()
        .solve_feasibility(&Problem::new(&model.variables, rows, &order))
        .is_solution_found()
}

fn with_linking<'a>(model: &'a Model, rows: Vec<&'a Constraint>) -> Vec<&'a Constraint> {
    rows.into_iter().chain(model.linking.iter()).collect()
}

fn check_outcome(records: &RecordSet, outcome: &AssignmentOutcome) {
    let a = &outcome.assignment;
    for p in &records.projects {
        assert_eq!(a.reviewers_for(&p.id).len() as i64, p.needs, "coverage of {}", p.id);
    }
    for r in &records.reviewers {
        let load = a.load_of(&r.id) as i64;
        assert!(r.min_load <= load && load <= r.max_load, "load of {}", r.id);
    }
    for c in &records.conflicts {
        assert!(!a.contains(&c.project_id, &c.reviewer_id));
    }
    assert!(outcome.report.is_clean());
}

/// Every shortfall stays within one unit and has a matching record.
fn check_softened_outcome(records: &RecordSet, outcome: &AssignmentOutcome) {
    let a = &outcome.assignment;
    let softenings = &outcome.report.softenings;
    let magnitude_of = |kind: SoftenKind, id: &str| {
        softenings
            .iter()
            .find(|s| s.kind == kind && s.entity_id == id)
            .map_or(0, |s| s.magnitude)
    };

    let mut shortfalls = 0;
    for p in &records.projects {
        let deficit = p.needs - a.reviewers_for(&p.id).len() as i64;
        assert!((0..=1).contains(&deficit), "coverage of {}", p.id);
        assert_eq!(magnitude_of(SoftenKind::ProjectNeeds, &p.id), deficit, "record of {}", p.id);
        shortfalls += usize::from(deficit > 0);
    }
    for r in &records.reviewers {
        let load = a.load_of(&r.id) as i64;
        assert!(load <= r.max_load, "max load of {}", r.id);
        let deficit = (r.min_load - load).max(0);
        assert!(deficit <= 1, "min load of {}", r.id);
        assert_eq!(magnitude_of(SoftenKind::MinLoad, &r.id), deficit, "record of {}", r.id);
        shortfalls += usize::from(deficit > 0);
    }
    assert_eq!(softenings.len(), shortfalls);
    for c in &records.conflicts {
        assert!(!a.contains(&c.project_id, &c.reviewer_id));
    }
    assert!(outcome.report.is_clean());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_48())]

    #[test]
    fn prop_outcome_is_valid_or_explained(records in arb_records()) {
        match assign(&records, &assign_config()) {
            Ok(outcome) => check_outcome(&records, &outcome),
            Err(AssignError::InfeasibleModel { report }) => {
                prop_assert!(!report.mus.is_empty());
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    #[test]
    fn prop_softening_recovers_whenever_relaxation_exists(records in arb_records()) {
        let config = assign_config()
            .with_needs_softening(1)
            .with_min_load_softening(1);
        match assign(&records, &config) {
            Ok(outcome) => check_softened_outcome(&records, &outcome),
            Err(AssignError::SofteningExceeded { report }) => {
                prop_assert!(!report.mus.is_empty());
                let model = ModelBuilder::build(&records, &config).unwrap();
                let relaxed = Softener::soften(&model, &config).unwrap();
                prop_assert!(
                    !feasible(&relaxed, relaxed.rows()),
                    "fully relaxed model is feasible"
                );
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    #[test]
    fn prop_runs_are_deterministic(records in arb_records(), seed in 0u64..16) {
        let config = assign_config().with_seed(seed);
        let first = assign(&records, &config).map(|o| serde_json::to_string(&o).unwrap());
        let second = assign(&records, &config).map(|o| serde_json::to_string(&o).unwrap());
        match (first, second) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
            _ => prop_assert!(false, "runs disagree on feasibility"),
        }
    }

    #[test]
    fn prop_first_stage_is_optimal_alone(records in arb_records()) {
        let config = assign_config();
        let Ok(outcome) = assign(&records, &config) else {
            return Ok(());
        };
        let model = ModelBuilder::build(&records, &config).unwrap();
        let balance = model.stage(stage::LOAD_BALANCE).unwrap();
        let order = model.branch_order();
        let alone = BranchAndBound::new()
            .optimize(
                &Problem::new(&model.variables, model.rows(), &order),
                &balance.minimization_expr(),
            )
            .objective
            .unwrap();

        let staged = outcome
            .report
            .stages
            .iter()
            .find(|s| s.name == stage::LOAD_BALANCE)
            .unwrap()
            .value;
        prop_assert!((staged - alone).abs() < 1e-4, "staged {staged} vs alone {alone}");
    }

    #[test]
    fn prop_mus_is_minimal(records in arb_records()) {
        let config = assign_config();
        let Err(AssignError::InfeasibleModel { report }) = assign(&records, &config) else {
            return Ok(());
        };
        prop_assume!(report.complete);
        let model = ModelBuilder::build(&records, &config).unwrap();
        let core: Vec<&Constraint> = report
            .mus
            .iter()
            .map(|c| model.constraint(&c.id).unwrap())
            .collect();

        prop_assert!(!feasible(&model, with_linking(&model, core.clone())));
        for skip in 0..core.len() {
            let rest: Vec<&Constraint> = core
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != skip)
                .map(|(_, &c)| c)
                .collect();
            prop_assert!(
                feasible(&model, with_linking(&model, rest)),
                "{} is redundant in the core",
                core[skip].id
            );
        }
    }
}
