//! Counter-matching evaluator: the hot path.
//!
//! One evaluation encodes the event, optionally prunes through the cached
//! base-condition pre-filter, evaluates the per-field predicate lists in
//! selectivity order, tallies hits per combination through the inverted
//! index, and emits every combination whose hit count equals its required
//! predicate count. A combination matches iff every predicate in its
//! canonical list is true; because both sides are sets, counting hits is
//! exactly a subset test, and the inverted index lists each combination at
//! most once per predicate, so nothing is double-counted.
//!
//! Any number of threads may evaluate concurrently against one shared
//! model; there are no locks and no suspension points on this path.

use std::sync::Arc;
use std::time::Instant;

use roaring::RoaringBitmap;
use serde::Serialize;
use tracing::trace_span;

use crate::base_condition::{cache_key, compute_candidates, BaseCacheStats, BaseConditionCache};
use crate::config::EngineConfig;
use crate::context::{with_thread_context, EvaluationContext};
use crate::event::{encode_into, Event};
use crate::interning::NormalizationCache;
use crate::metrics::{EngineMetrics, MetricsSnapshot, StageNanos};
use crate::model::EngineModel;
use crate::selection;

/// One matched `(combination, rule)` association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    pub combination_id: u32,
    pub rule_code: String,
    pub priority: i32,
    pub description: String,
}

/// The outcome of one evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub event_id: String,
    pub matched_rules: Vec<MatchedRule>,
    pub evaluation_time_nanos: u64,
    pub predicates_evaluated: u64,
    pub rules_matched: usize,
}

impl MatchResult {
    /// Whether any rule matched.
    pub fn is_match(&self) -> bool {
        !self.matched_rules.is_empty()
    }

    /// Codes of the matched rules, in emission order.
    pub fn rule_codes(&self) -> Vec<&str> {
        self.matched_rules
            .iter()
            .map(|m| m.rule_code.as_str())
            .collect()
    }
}

/// A matching engine bound to one immutable model.
///
/// Cheap to clone-share via `Arc`; every method takes `&self`.
pub struct Evaluator {
    model: Arc<EngineModel>,
    cache: Arc<BaseConditionCache>,
    interner: Arc<NormalizationCache>,
    metrics: Arc<EngineMetrics>,
    prefilter_enabled: bool,
}

impl Evaluator {
    /// Build an evaluator with its own caches and metrics.
    pub fn new(model: Arc<EngineModel>, config: &EngineConfig) -> Self {
        Evaluator {
            model,
            cache: Arc::new(BaseConditionCache::new(&config.base_conditions)),
            interner: Arc::new(NormalizationCache::new(&config.normalization)),
            metrics: Arc::new(EngineMetrics::new()),
            prefilter_enabled: config.base_conditions.enabled,
        }
    }

    /// Build an evaluator over shared caches and metrics (used by the engine
    /// facade so reloads keep history and warm strings).
    pub(crate) fn with_shared(
        model: Arc<EngineModel>,
        cache: Arc<BaseConditionCache>,
        interner: Arc<NormalizationCache>,
        metrics: Arc<EngineMetrics>,
        prefilter_enabled: bool,
    ) -> Self {
        Evaluator {
            model,
            cache,
            interner,
            metrics,
            prefilter_enabled,
        }
    }

    /// The model this evaluator was built over.
    pub fn model(&self) -> &Arc<EngineModel> {
        &self.model
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Base-condition cache counters.
    pub fn cache_stats(&self) -> BaseCacheStats {
        self.cache.stats()
    }

    /// Evaluate using this thread's pooled context.
    pub fn evaluate(&self, event: &Event) -> MatchResult {
        with_thread_context(|ctx| self.evaluate_with_context(event, ctx))
    }

    /// Evaluate with an explicitly owned context (for callers that manage
    /// their own threads).
    pub fn evaluate_with_context(
        &self,
        event: &Event,
        ctx: &mut EvaluationContext,
    ) -> MatchResult {
        let started = Instant::now();
        let span = trace_span!("evaluate", event_id = %event.event_id);
        let _span = span.enter();
        let model = &*self.model;
        let mut stages = StageNanos::default();
        let mut predicates_evaluated = 0u64;

        ctx.attach(model);
        ctx.reset();

        // Encode
        {
            let _stage = trace_span!("encode").entered();
            let t = Instant::now();
            encode_into(
                event,
                &model.field_dictionary,
                &model.value_dictionary,
                &self.interner,
                &mut ctx.encoded,
            );
            stages.encode = t.elapsed().as_nanos() as u64;
        }

        // Pre-filter
        let candidate: Option<Arc<RoaringBitmap>> =
            if self.prefilter_enabled && !model.base_sets.is_empty() {
                let _stage = trace_span!("prefilter").entered();
                let t = Instant::now();
                let key = cache_key(model, &ctx.encoded);
                let bitmap = match self.cache.get(&key) {
                    Some(bitmap) => {
                        self.metrics.record_cache_hit();
                        bitmap
                    }
                    None => {
                        self.metrics.record_cache_miss();
                        let bitmap = Arc::new(compute_candidates(model, &ctx.encoded));
                        self.cache.put(key, Arc::clone(&bitmap));
                        bitmap
                    }
                };
                stages.prefilter = t.elapsed().as_nanos() as u64;
                Some(bitmap)
            } else {
                None
            };

        let pruned_out = candidate.as_ref().is_some_and(|c| c.is_empty());
        if !pruned_out {
            // Predicate evaluation, rarest field first
            {
                let _stage = trace_span!("predicates").entered();
                let t = Instant::now();
                let eligible = candidate.as_ref().map(|c| model.eligible_predicates(c));

                for (field_id, _) in ctx.encoded.iter() {
                    let weight = model
                        .field_min_weight
                        .get(field_id as usize)
                        .copied()
                        .unwrap_or(f64::INFINITY);
                    if weight.is_finite() {
                        ctx.field_order.push((weight, field_id));
                    }
                }
                ctx.field_order.sort_by(|a, b| a.0.total_cmp(&b.0));

                for i in 0..ctx.field_order.len() {
                    let field_id = ctx.field_order[i].1;
                    let Some(value) = ctx.encoded.get(field_id) else {
                        continue;
                    };
                    for &p in model.field_predicates[field_id as usize].iter() {
                        if let Some(eligible) = &eligible {
                            if !eligible.contains(p) {
                                continue;
                            }
                        }
                        predicates_evaluated += 1;
                        if model.registry.get(p).evaluate(value) {
                            ctx.true_predicates.push(p);
                        }
                    }
                }
                stages.predicates = t.elapsed().as_nanos() as u64;
            }

            // Counter tallying through the inverted index
            {
                let _stage = trace_span!("counters").entered();
                let t = Instant::now();
                for i in 0..ctx.true_predicates.len() {
                    let bucket = &model.inverted_index[ctx.true_predicates[i] as usize];
                    match &candidate {
                        Some(c) => {
                            for id in bucket.iter() {
                                if !c.contains(id) {
                                    continue;
                                }
                                ctx.counters[id as usize] += 1;
                                if ctx.counters[id as usize] == 1 {
                                    ctx.touched.push(id);
                                }
                            }
                        }
                        None => {
                            for id in bucket.iter() {
                                ctx.counters[id as usize] += 1;
                                if ctx.counters[id as usize] == 1 {
                                    ctx.touched.push(id);
                                }
                            }
                        }
                    }
                }
                stages.counters = t.elapsed().as_nanos() as u64;
            }

            // Detection in sorted combination-id order keeps emission
            // deterministic across runs
            {
                let _stage = trace_span!("detect").entered();
                ctx.touched.sort_unstable();
                for i in 0..ctx.touched.len() {
                    let c = ctx.touched[i];
                    if ctx.counters[c as usize] == model.required_count[c as usize] {
                        for info in model.rule_bindings[c as usize].iter() {
                            ctx.matches.push(MatchedRule {
                                combination_id: c,
                                rule_code: info.rule_code.clone(),
                                priority: info.priority,
                                description: info.description.clone(),
                            });
                        }
                    }
                }
            }

            {
                let _stage = trace_span!("select").entered();
                selection::apply(model.strategy, &mut ctx.matches);
            }
        }

        let matched_rules: Vec<MatchedRule> = ctx.matches.drain(..).collect();
        let rules_matched = matched_rules.len();
        stages.total = started.elapsed().as_nanos() as u64;
        self.metrics.record_evaluation(
            stages,
            predicates_evaluated,
            ctx.touched.len() as u64,
            rules_matched as u64,
        );

        MatchResult {
            event_id: event.event_id.clone(),
            matched_rules,
            evaluation_time_nanos: stages.total,
            predicates_evaluated,
            rules_matched,
        }
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("model", &self.model)
            .field("prefilter_enabled", &self.prefilter_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::rules::RuleDefinition;
    use serde_json::json;

    fn evaluator(rules: Vec<RuleDefinition>, config: EngineConfig) -> Evaluator {
        let model = compile(&rules, &config).unwrap();
        Evaluator::new(Arc::new(model), &config)
    }

    #[test]
    fn test_single_equality_match() {
        let ev = evaluator(
            vec![RuleDefinition::new("A").with_condition("status", "EQUAL_TO", "ACTIVE")],
            EngineConfig::default(),
        );
        let result = ev.evaluate(&Event::new("e1").with_attribute("status", "active"));
        assert_eq!(result.rule_codes(), vec!["A"]);
        assert_eq!(result.rules_matched, 1);
        assert!(result.predicates_evaluated > 0);
    }

    #[test]
    fn test_conjunction_requires_all_predicates() {
        let ev = evaluator(
            vec![RuleDefinition::new("A")
                .with_condition("status", "EQUAL_TO", "ACTIVE")
                .with_condition("amount", "GREATER_THAN", 100)],
            EngineConfig::default(),
        );
        let hit = ev.evaluate(
            &Event::new("e1")
                .with_attribute("status", "active")
                .with_attribute("amount", 150),
        );
        assert!(hit.is_match());

        let partial = ev.evaluate(
            &Event::new("e2")
                .with_attribute("status", "active")
                .with_attribute("amount", 50),
        );
        assert!(!partial.is_match());

        let missing = ev.evaluate(&Event::new("e3").with_attribute("amount", 150));
        assert!(!missing.is_match());
    }

    #[test]
    fn test_missing_attributes_are_false_not_errors() {
        let ev = evaluator(
            vec![RuleDefinition::new("A").with_condition("amount", "BETWEEN", json!([1, 10]))],
            EngineConfig::default(),
        );
        let result = ev.evaluate(&Event::new("empty"));
        assert!(!result.is_match());
        assert_eq!(result.event_id, "empty");
    }

    #[test]
    fn test_prefilter_does_not_change_results() {
        let rules = vec![
            RuleDefinition::new("A")
                .with_condition("status", "EQUAL_TO", "ACTIVE")
                .with_condition("amount", "GREATER_THAN", 100),
            RuleDefinition::new("B").with_condition("tier", "IS_ANY_OF", json!(["GOLD", "SILVER"])),
        ];
        let with = evaluator(rules.clone(), EngineConfig::default());
        let mut off = EngineConfig::default();
        off.base_conditions.enabled = false;
        let without = evaluator(rules, off);

        let events = [
            Event::new("1")
                .with_attribute("status", "active")
                .with_attribute("amount", 500),
            Event::new("2").with_attribute("tier", "gold"),
            Event::new("3").with_attribute("status", "closed"),
            Event::new("4"),
        ];
        for event in &events {
            let a = with.evaluate(event);
            let b = without.evaluate(event);
            assert_eq!(a.rule_codes(), b.rule_codes(), "event {}", event.event_id);
        }
    }

    #[test]
    fn test_second_evaluation_hits_prefilter_cache() {
        let ev = evaluator(
            vec![RuleDefinition::new("A").with_condition("status", "EQUAL_TO", "ACTIVE")],
            EngineConfig::default(),
        );
        let event = Event::new("e").with_attribute("status", "active");
        let first = ev.evaluate(&event);
        let second = ev.evaluate(&event);
        assert_eq!(first.rule_codes(), second.rule_codes());
        let stats = ev.cache_stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_explicit_context_reuse_matches_fresh() {
        let ev = evaluator(
            vec![RuleDefinition::new("A").with_condition("x", "EQUAL_TO", 1)],
            EngineConfig::default(),
        );
        let event = Event::new("e").with_attribute("x", 1);
        let mut ctx = EvaluationContext::new();
        let first = ev.evaluate_with_context(&event, &mut ctx);
        let second = ev.evaluate_with_context(&event, &mut ctx);
        assert_eq!(first.rule_codes(), second.rule_codes());

        let fresh = ev.evaluate_with_context(&event, &mut EvaluationContext::new());
        assert_eq!(second.rule_codes(), fresh.rule_codes());
    }

    #[test]
    fn test_match_result_serializes() {
        let ev = evaluator(
            vec![RuleDefinition::new("A").with_condition("x", "EQUAL_TO", 1)],
            EngineConfig::default(),
        );
        let result = ev.evaluate(&Event::new("e").with_attribute("x", 1));
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"event_id\":\"e\""));
        assert!(json.contains("\"rule_code\":\"A\""));
        assert!(json.contains("evaluation_time_nanos"));
    }
}
