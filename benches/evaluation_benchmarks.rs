//! Evaluation throughput benchmarks: hot-path latency across rule-set sizes,
//! with and without the base-condition pre-filter.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use helios::{EngineConfig, Event, RuleDefinition, RuleEngine};
use serde_json::json;

fn synthetic_rules(count: usize) -> Vec<RuleDefinition> {
    (0..count)
        .map(|i| {
            RuleDefinition::new(format!("R{i}"))
                .with_priority((i % 10) as i32)
                .with_condition("status", "EQUAL_TO", "ACTIVE")
                .with_condition(format!("field_{}", i % 20), "EQUAL_TO", format!("V{}", i % 50))
                .with_condition("amount", "GREATER_THAN", (i % 100) as i64 * 10)
        })
        .collect()
}

fn matching_event() -> Event {
    Event::new("bench")
        .with_attribute("status", "active")
        .with_attribute("field_3", "V3")
        .with_attribute("amount", 5000)
}

fn non_matching_event() -> Event {
    Event::new("bench")
        .with_attribute("status", "closed")
        .with_attribute("amount", 1)
}

fn bench_evaluate_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_scaling");
    for size in [100usize, 1_000, 10_000] {
        let engine =
            RuleEngine::from_rules(&synthetic_rules(size), EngineConfig::default()).expect("compile");
        let event = matching_event();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(engine.evaluate(black_box(&event))));
        });
    }
    group.finish();
}

fn bench_prefilter_on_off(c: &mut Criterion) {
    let rules = synthetic_rules(5_000);
    let with_filter = RuleEngine::from_rules(&rules, EngineConfig::default()).expect("compile");
    let mut config = EngineConfig::default();
    config.base_conditions.enabled = false;
    let without_filter = RuleEngine::from_rules(&rules, config).expect("compile");
    let event = non_matching_event();

    let mut group = c.benchmark_group("prefilter");
    group.bench_function("enabled_rejecting_event", |b| {
        b.iter(|| black_box(with_filter.evaluate(black_box(&event))));
    });
    group.bench_function("disabled_rejecting_event", |b| {
        b.iter(|| black_box(without_filter.evaluate(black_box(&event))));
    });
    group.finish();
}

fn bench_any_of_fanout(c: &mut Criterion) {
    let countries: Vec<String> = (0..100).map(|i| format!("C{i}")).collect();
    let rules = vec![
        RuleDefinition::new("FAN")
            .with_condition("country", "IS_ANY_OF", json!(countries))
            .with_condition("tier", "IS_ANY_OF", json!(["GOLD", "SILVER", "BRONZE"])),
    ];
    let engine = RuleEngine::from_rules(&rules, EngineConfig::default()).expect("compile");
    let event = Event::new("bench")
        .with_attribute("country", "C42")
        .with_attribute("tier", "gold");

    c.bench_function("any_of_fanout_300_combinations", |b| {
        b.iter(|| black_box(engine.evaluate(black_box(&event))));
    });
}

criterion_group!(
    benches,
    bench_evaluate_scaling,
    bench_prefilter_on_off,
    bench_any_of_fanout
);
criterion_main!(benches);
