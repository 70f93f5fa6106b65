use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hookflow::{
    ConflictResolver, ConflictStrategy, DependencyGraphResolver, ExecutionOptimizer,
    ExecutionPhase, HookMetadata, PlanningContext, PriorityCalculator, ResourceBudget,
};
use std::sync::Arc;

/// Layered hook set: every hook depends on up to two hooks of the previous
/// layer
fn layered_hooks(count: usize) -> Vec<HookMetadata> {
    let width = 8;
    (0..count)
        .map(|i| {
            let layer = i / width;
            let mut hook = HookMetadata::new(format!("hook_{i:04}"))
                .with_trigger("bench")
                .with_phase(ExecutionPhase::ALL[layer % ExecutionPhase::ALL.len()])
                .with_resources((i % 7) as f64 * 5.0 + 1.0, (i % 5) as f64 * 6.0 + 1.0)
                .with_registration_order(i as u64);
            if layer > 0 {
                let previous = (layer - 1) * width;
                hook = hook.with_dependencies([
                    format!("hook_{:04}", previous + i % width),
                    format!("hook_{:04}", previous + (i + 3) % width),
                ]);
            }
            hook
        })
        .collect()
}

fn benchmark_build_plan(c: &mut Criterion) {
    let calculator = Arc::new(PriorityCalculator::default());
    let resolver = DependencyGraphResolver::new(Arc::clone(&calculator));
    let context = PlanningContext::new().with_system_load(35.0);

    let mut group = c.benchmark_group("build_plan");
    for size in [16, 128, 1024] {
        let hooks = layered_hooks(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &hooks, |b, hooks| {
            b.iter(|| resolver.build_plan(black_box(hooks), &context))
        });
    }
    group.finish();
}

fn benchmark_optimize(c: &mut Criterion) {
    let calculator = Arc::new(PriorityCalculator::default());
    let resolver = DependencyGraphResolver::new(Arc::clone(&calculator));
    let optimizer = ExecutionOptimizer::new(8, ResourceBudget::default());
    let context = PlanningContext::new();

    let mut group = c.benchmark_group("optimize");
    for size in [128, 1024] {
        let plan = resolver.build_plan(&layered_hooks(size), &context);
        group.bench_with_input(BenchmarkId::from_parameter(size), &plan, |b, plan| {
            b.iter(|| optimizer.optimize("bench", black_box(plan.clone()), &context))
        });
    }
    group.finish();
}

fn benchmark_conflict_resolution(c: &mut Criterion) {
    let resolver = ConflictResolver::new(Arc::new(PriorityCalculator::default()));
    let candidates = layered_hooks(16);
    let context = PlanningContext::new();

    let mut group = c.benchmark_group("resolve");
    for strategy in [
        ConflictStrategy::PriorityBased,
        ConflictStrategy::RoundRobin,
        ConflictStrategy::WeightedRandom,
    ] {
        group.bench_function(strategy.as_str(), |b| {
            b.iter(|| resolver.resolve("bench", black_box(&candidates), strategy, &context))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_build_plan,
    benchmark_optimize,
    benchmark_conflict_resolution
);
criterion_main!(benches);
