//! End-to-end matching scenarios against the public engine API.

use helios::{
    EngineConfig, Event, MatchResult, RuleDefinition, RuleEngine, SelectionStrategy,
};
use serde_json::json;

// ============================================================================
// Test Helpers
// ============================================================================

fn engine(rules: Vec<RuleDefinition>) -> RuleEngine {
    RuleEngine::from_rules(&rules, EngineConfig::default()).expect("rules compile")
}

fn engine_with_strategy(rules: Vec<RuleDefinition>, strategy: SelectionStrategy) -> RuleEngine {
    let config = EngineConfig {
        selection_strategy: strategy,
        ..EngineConfig::default()
    };
    RuleEngine::from_rules(&rules, config).expect("rules compile")
}

fn codes(result: &MatchResult) -> Vec<&str> {
    result.rule_codes()
}

// ============================================================================
// Simple equality and canonicalization
// ============================================================================

#[test]
fn test_simple_equality_canonicalizes_value() {
    let engine = engine(vec![
        RuleDefinition::new("A").with_condition("status", "EQUAL_TO", "ACTIVE")
    ]);

    // Lowercase event value matches the upper-cased rule operand
    let result = engine.evaluate(&Event::new("e1").with_attribute("status", "active"));
    assert_eq!(codes(&result), vec!["A"]);
    assert_eq!(result.rules_matched, 1);
}

#[test]
fn test_field_name_canonicalization_end_to_end() {
    let engine = engine(vec![
        RuleDefinition::new("A").with_condition("User-Status", "EQUAL_TO", "OK")
    ]);
    let result = engine.evaluate(&Event::new("e").with_attribute("user_status", "ok"));
    assert_eq!(codes(&result), vec!["A"]);
}

// ============================================================================
// Priority selection
// ============================================================================

#[test]
fn test_highest_priority_selects_single_winner() {
    let engine = engine_with_strategy(
        vec![
            RuleDefinition::new("LOW")
                .with_priority(10)
                .with_condition("amount", "GREATER_THAN", 100),
            RuleDefinition::new("HIGH")
                .with_priority(200)
                .with_condition("amount", "GREATER_THAN", 5000)
                .with_condition("currency", "EQUAL_TO", "USD"),
        ],
        SelectionStrategy::HighestPriority,
    );

    let result = engine.evaluate(
        &Event::new("e1")
            .with_attribute("amount", 6000)
            .with_attribute("currency", "USD"),
    );
    assert_eq!(codes(&result), vec!["HIGH"]);
    assert_eq!(result.matched_rules[0].priority, 200);
}

#[test]
fn test_all_matches_returns_both() {
    let engine = engine_with_strategy(
        vec![
            RuleDefinition::new("LOW")
                .with_priority(10)
                .with_condition("amount", "GREATER_THAN", 100),
            RuleDefinition::new("HIGH")
                .with_priority(200)
                .with_condition("amount", "GREATER_THAN", 5000)
                .with_condition("currency", "EQUAL_TO", "USD"),
        ],
        SelectionStrategy::AllMatches,
    );

    let result = engine.evaluate(
        &Event::new("e1")
            .with_attribute("amount", 6000)
            .with_attribute("currency", "USD"),
    );
    let mut matched = codes(&result);
    matched.sort_unstable();
    assert_eq!(matched, vec!["HIGH", "LOW"]);
}

// ============================================================================
// IS_ANY_OF expansion and deduplication
// ============================================================================

#[test]
fn test_is_any_of_dedup_across_rules() {
    let engine = engine(vec![
        RuleDefinition::new("X").with_condition("country", "IS_ANY_OF", json!(["US", "CA"])),
        RuleDefinition::new("Y").with_condition("country", "IS_ANY_OF", json!(["CA", "UK"])),
    ]);
    assert_eq!(engine.model().num_combinations(), 3);

    let ca_result = engine.evaluate(&Event::new("e").with_attribute("country", "CA"));
    let mut both = codes(&ca_result);
    both.sort_unstable();
    assert_eq!(both, vec!["X", "Y"]);

    let us = engine.evaluate(&Event::new("e").with_attribute("country", "US"));
    assert_eq!(codes(&us), vec!["X"]);

    let fr = engine.evaluate(&Event::new("e").with_attribute("country", "FR"));
    assert!(!fr.is_match());
}

#[test]
fn test_cross_rule_dedup_reports_both_rules() {
    let make = |code: &str| {
        RuleDefinition::new(code)
            .with_condition("tier", "EQUAL_TO", "GOLD")
            .with_condition("region", "IS_ANY_OF", json!(["US", "CA"]))
    };
    let engine = engine(vec![make("A"), make("B")]);

    let stats = engine.model().stats().clone();
    assert_eq!(stats.total_expanded, 4);
    assert_eq!(stats.unique_combinations, 2);
    assert_eq!(stats.dedup_rate, 0.5);

    let result = engine.evaluate(
        &Event::new("e")
            .with_attribute("tier", "GOLD")
            .with_attribute("region", "US"),
    );
    let mut matched = codes(&result);
    matched.sort_unstable();
    assert_eq!(matched, vec!["A", "B"]);
}

// ============================================================================
// Numeric ranges
// ============================================================================

#[test]
fn test_between_is_inclusive_on_both_ends() {
    let engine = engine(vec![
        RuleDefinition::new("R").with_condition("amount", "BETWEEN", json!([18, 65]))
    ]);

    for (amount, expected) in [(30, true), (70, false), (18, true), (65, true), (17, false)] {
        let result = engine.evaluate(&Event::new("e").with_attribute("amount", amount));
        assert_eq!(result.is_match(), expected, "amount {amount}");
    }
}

#[test]
fn test_float_and_integer_amounts_compare_numerically() {
    let engine = engine(vec![
        RuleDefinition::new("R").with_condition("amount", "EQUAL_TO", 100)
    ]);
    assert!(engine
        .evaluate(&Event::new("e").with_attribute("amount", 100.0))
        .is_match());
    assert!(!engine
        .evaluate(&Event::new("e").with_attribute("amount", 100.5))
        .is_match());
}

// ============================================================================
// String operators
// ============================================================================

#[test]
fn test_contains_on_original_string() {
    let engine = engine(vec![
        RuleDefinition::new("BOT").with_condition("user_agent", "CONTAINS", "bot")
    ]);
    assert!(engine
        .evaluate(&Event::new("e").with_attribute("user_agent", "my-bot/2.1"))
        .is_match());
    // Normalization never leaks into CONTAINS
    assert!(!engine
        .evaluate(&Event::new("e").with_attribute("user_agent", "MY-BOT/2.1"))
        .is_match());
}

#[test]
fn test_regex_full_match_semantics() {
    let engine = engine(vec![
        RuleDefinition::new("SKU").with_condition("sku", "REGEX", "[a-z]{3}-\\d{4}")
    ]);
    assert!(engine
        .evaluate(&Event::new("e").with_attribute("sku", "abc-1234"))
        .is_match());
    assert!(!engine
        .evaluate(&Event::new("e").with_attribute("sku", "abc-1234-extra"))
        .is_match());
}

// ============================================================================
// Nested attributes and event type
// ============================================================================

#[test]
fn test_nested_attributes_flatten_with_dots() {
    let engine = engine(vec![
        RuleDefinition::new("GEO").with_condition("user.geo.country", "EQUAL_TO", "US")
    ]);
    let result = engine.evaluate(
        &Event::new("e").with_attribute("user", json!({"geo": {"country": "us"}})),
    );
    assert_eq!(codes(&result), vec!["GEO"]);
}

#[test]
fn test_event_type_is_matchable() {
    let engine = engine(vec![
        RuleDefinition::new("TXN").with_condition("event_type", "EQUAL_TO", "PAYMENT")
    ]);
    let result = engine.evaluate(&Event::new("e").with_type("payment"));
    assert_eq!(codes(&result), vec!["TXN"]);
}

// ============================================================================
// Base-condition cache semantics
// ============================================================================

#[test]
fn test_repeat_evaluation_hits_cache_with_identical_result() {
    let rules = vec![
        RuleDefinition::new("T1")
            .with_condition("status", "EQUAL_TO", "ACTIVE")
            .with_condition("amount", "GREATER_THAN", 100),
        RuleDefinition::new("T2")
            .with_condition("status", "EQUAL_TO", "ACTIVE")
            .with_condition("amount", "GREATER_THAN", 1000),
        RuleDefinition::new("T3")
            .with_condition("status", "EQUAL_TO", "ACTIVE")
            .with_condition("amount", "LESS_THAN", 50),
    ];
    let engine = engine(rules);
    let event = Event::new("e")
        .with_attribute("status", "active")
        .with_attribute("amount", 1500);

    let first = engine.evaluate(&event);
    let second = engine.evaluate(&event);
    assert_eq!(codes(&first), codes(&second));
    assert!(engine.cache_stats().hits >= 1, "second call must hit");

    // Rebuild with different rules: previously cached answers must not leak
    engine
        .reload_from_rules(&[RuleDefinition::new("T4")
            .with_condition("status", "EQUAL_TO", "ACTIVE")
            .with_condition("amount", "GREATER_THAN", 9000)])
        .expect("reload compiles");
    let after = engine.evaluate(&event);
    assert!(!after.is_match());
}

#[test]
fn test_cache_disabled_gives_same_answers() {
    let rules = vec![
        RuleDefinition::new("A")
            .with_condition("status", "EQUAL_TO", "ACTIVE")
            .with_condition("amount", "GREATER_THAN", 10),
        RuleDefinition::new("B").with_condition("country", "IS_ANY_OF", json!(["US", "CA"])),
    ];
    let cached = engine(rules.clone());
    let mut config = EngineConfig::default();
    config.base_conditions.enabled = false;
    let uncached = RuleEngine::from_rules(&rules, config).expect("compile");

    let events = [
        Event::new("1")
            .with_attribute("status", "active")
            .with_attribute("amount", 20),
        Event::new("2").with_attribute("country", "us"),
        Event::new("3").with_attribute("status", "closed"),
        Event::new("4"),
    ];
    for event in &events {
        assert_eq!(
            codes(&cached.evaluate(event)),
            codes(&uncached.evaluate(event)),
            "event {}",
            event.event_id
        );
    }
}
