// Planning tests: dependency layering, cycles, exclusive groups, bin-packing

mod test_utils;

use hookflow::{
    ConflictStrategy, DependencyIssue, ExecutionPhase, HookMetadata, HookPriority,
    OrchestratorConfig, PhaseSettings, PlanRequest,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use test_utils::{names, orchestrator_with};

fn request() -> PlanRequest {
    PlanRequest::new()
        .with_system_load(0.0)
        .with_resource_availability(1.0)
}

#[test]
fn test_fan_out_plan() {
    let hooks = vec![
        HookMetadata::new("A").with_trigger("build"),
        HookMetadata::new("B").with_trigger("build").with_dependencies(["A"]),
        HookMetadata::new("C").with_trigger("build").with_dependencies(["A"]),
    ];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);

    let plan = orchestrator.plan("build", &request()).unwrap();
    assert_eq!(names(&plan.batch_names()), vec![vec!["A"], vec!["B", "C"]]);
    assert!(plan.issues.is_empty());
    assert_eq!(plan.total_estimated_duration_ms, 2000);
}

#[test]
fn test_random_dags_respect_dependencies() {
    let phases = ExecutionPhase::ALL;
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let count = rng.gen_range(1..30);
        let mut hooks = Vec::new();
        for i in 0..count {
            let deps: Vec<String> = (0..i)
                .filter(|_| rng.gen_bool(0.2))
                .map(|j| format!("h{j:02}"))
                .collect();
            let mut hook = HookMetadata::new(format!("h{i:02}"))
                .with_trigger("event")
                .with_dependencies(deps)
                .with_phase(phases[rng.gen_range(0..phases.len())])
                .with_resources(rng.gen_range(1.0..70.0), rng.gen_range(1.0..70.0));
            if rng.gen_bool(0.1) {
                hook = hook.with_isolation(1);
            }
            hooks.push(hook);
        }

        let config = OrchestratorConfig::default().with_max_workers(rng.gen_range(1..6));
        let (orchestrator, _) = orchestrator_with(config, hooks.clone());
        let plan = orchestrator.plan("event", &request()).unwrap();

        assert_eq!(plan.len(), count, "seed {seed}: every hook planned");
        let mut seen = BTreeSet::new();
        for batch in &plan.batches {
            assert!(batch.len() <= orchestrator.config().max_workers);
            assert!(batch.hooks.iter().filter(|h| plan.hooks[*h].is_isolated()).count() <= 1);
            for hook in &batch.hooks {
                assert!(seen.insert(hook.clone()), "seed {seed}: {hook} planned twice");
            }
        }
        for hook in &hooks {
            let position = plan.batch_of(&hook.name).unwrap();
            for dependency in &hook.dependencies {
                assert!(
                    plan.batch_of(dependency).unwrap() < position,
                    "seed {seed}: {dependency} must run before {}",
                    hook.name
                );
            }
        }
    }
}

#[test]
fn test_cycle_is_reported_and_plan_stays_valid() {
    let hooks = vec![
        HookMetadata::new("A").with_trigger("t").with_dependencies(["C"]),
        HookMetadata::new("B").with_trigger("t").with_dependencies(["A"]),
        HookMetadata::new("C").with_trigger("t").with_dependencies(["B"]),
    ];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);
    let plan = orchestrator.plan("t", &request()).unwrap();

    let members = plan
        .issues
        .iter()
        .find_map(|issue| match issue {
            DependencyIssue::Cycle { members, .. } => Some(members.clone()),
            _ => None,
        })
        .expect("cycle reported");
    assert_eq!(members, vec!["A", "B", "C"]);

    assert_eq!(plan.len(), 3);
    for (hook, dependencies) in &plan.dependencies {
        for dependency in dependencies {
            assert!(plan.batch_of(dependency) < plan.batch_of(hook));
        }
    }
}

#[test]
fn test_unresolved_dependency_excludes_dependents() {
    let hooks = vec![
        HookMetadata::new("deploy")
            .with_trigger("release")
            .with_dependencies(["artifacts"]),
        HookMetadata::new("announce")
            .with_trigger("release")
            .with_dependencies(["deploy"]),
        HookMetadata::new("changelog").with_trigger("release"),
    ];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);
    let plan = orchestrator.plan("release", &request()).unwrap();

    assert_eq!(plan.hook_names(), vec!["changelog"]);
    assert!(plan.issues.contains(&DependencyIssue::Unresolved {
        hook: "deploy".to_string(),
        dependency: "artifacts".to_string(),
    }));
    let excluded: BTreeSet<&str> = plan
        .issues
        .iter()
        .filter_map(|issue| match issue {
            DependencyIssue::Excluded { hook, .. } => Some(hook.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(excluded, BTreeSet::from(["announce", "deploy"]));
}

#[test]
fn test_capability_dependency() {
    let hooks = vec![
        HookMetadata::new("commit")
            .with_trigger("save")
            .with_dependencies(["formatted"]),
        HookMetadata::new("rustfmt")
            .with_trigger("save")
            .with_provides(["formatted"]),
    ];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);
    let plan = orchestrator.plan("save", &request()).unwrap();
    assert_eq!(names(&plan.batch_names()), vec![vec!["rustfmt"], vec!["commit"]]);
}

#[test]
fn test_phases_run_in_order() {
    let hooks = vec![
        HookMetadata::new("tidy")
            .with_trigger("t")
            .with_phase(ExecutionPhase::Cleanup),
        HookMetadata::new("check")
            .with_trigger("t")
            .with_phase(ExecutionPhase::PreValidation),
        HookMetadata::new("work").with_trigger("t"),
    ];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);
    let plan = orchestrator.plan("t", &request()).unwrap();

    assert_eq!(
        names(&plan.batch_names()),
        vec![vec!["check"], vec!["work"], vec!["tidy"]]
    );
    let phases: Vec<ExecutionPhase> = plan.batches.iter().map(|b| b.phase).collect();
    assert_eq!(
        phases,
        vec![
            ExecutionPhase::PreValidation,
            ExecutionPhase::CoreProcessing,
            ExecutionPhase::Cleanup
        ]
    );
}

#[test]
fn test_resource_budget_splits_layer() {
    let hooks = ["x", "y", "z"]
        .iter()
        .map(|name| {
            HookMetadata::new(*name)
                .with_trigger("heavy")
                .with_resources(60.0, 10.0)
        })
        .collect();
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);
    let plan = orchestrator.plan("heavy", &request()).unwrap();

    assert_eq!(plan.batches.len(), 3);
    assert!(plan.batches.iter().all(|b| b.estimated_cpu <= 100.0));
}

#[test]
fn test_phase_parallelism_caps_sub_batches() {
    let hooks = (0..4)
        .map(|i| {
            HookMetadata::new(format!("c{i}"))
                .with_trigger("t")
                .with_phase(ExecutionPhase::Cleanup)
                .with_resources(1.0, 1.0)
        })
        .collect();
    let config = OrchestratorConfig::default().with_phase(
        ExecutionPhase::Cleanup,
        PhaseSettings {
            timeout_ms: None,
            max_parallelism: Some(2),
        },
    );
    let (orchestrator, _) = orchestrator_with(config, hooks);
    let plan = orchestrator.plan("t", &request()).unwrap();
    assert_eq!(plan.batches.len(), 2);
    assert!(plan.batches.iter().all(|b| b.len() == 2));
}

#[test]
fn test_exclusive_group_keeps_priority_winner() {
    let hooks = vec![
        HookMetadata::new("save_secondary")
            .with_trigger("save")
            .with_priority(HookPriority::Low)
            .with_exclusive_group("writer"),
        HookMetadata::new("save_primary")
            .with_trigger("save")
            .with_priority(HookPriority::High)
            .with_exclusive_group("writer"),
        HookMetadata::new("audit").with_trigger("save"),
    ];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);

    for _ in 0..3 {
        let plan = orchestrator.plan("save", &request()).unwrap();
        assert_eq!(plan.hook_names(), vec!["save_primary", "audit"]);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].winner, "save_primary");
        assert_eq!(plan.conflicts[0].losers, vec!["save_secondary"]);
        assert_eq!(plan.conflicts[0].strategy, ConflictStrategy::PriorityBased);
    }
}

#[test]
fn test_exclusive_group_round_robin_per_trigger() {
    let hooks = ["X", "Y", "Z"]
        .iter()
        .map(|name| {
            HookMetadata::new(*name)
                .with_trigger("rotate")
                .with_exclusive_group("pool")
        })
        .collect();
    let config = OrchestratorConfig::default()
        .with_trigger_strategy("rotate", ConflictStrategy::RoundRobin);
    let (orchestrator, _) = orchestrator_with(config, hooks);

    let winners: Vec<String> = (0..4)
        .map(|_| {
            let plan = orchestrator.plan("rotate", &request()).unwrap();
            assert_eq!(plan.len(), 1);
            plan.conflicts[0].winner.clone()
        })
        .collect();
    assert_eq!(winners, vec!["X", "Y", "Z", "X"]);
    assert_eq!(orchestrator.conflict_resolver().rotation("rotate/pool"), 4);
}

#[test]
fn test_caller_adjustment_reorders_layer() {
    let hooks = vec![
        HookMetadata::new("first").with_trigger("t"),
        HookMetadata::new("second").with_trigger("t"),
    ];
    let (orchestrator, _) = orchestrator_with(OrchestratorConfig::default(), hooks);

    let plan = orchestrator
        .plan("t", &request().with_adjustment("second", 0.5))
        .unwrap();
    assert_eq!(names(&plan.batch_names()), vec![vec!["second", "first"]]);

    let scores: HashMap<_, _> = plan.scores.iter().map(|(k, v)| (k.clone(), v.priority)).collect();
    assert!(scores["second"] > scores["first"]);
}
