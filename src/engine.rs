//! Engine facade: compilation, hot reload, and evaluation behind one handle.
//!
//! `RuleEngine` ties the model manager, the base-condition cache, the
//! normalization cache and the metrics together. Reloading compiles first
//! and publishes only on success - a failed compile leaves the prior model
//! serving - then invalidates the pre-filter cache. Metrics and warm
//! normalized strings survive reloads.

use std::sync::Arc;

use tracing::warn;

use crate::base_condition::{BaseCacheStats, BaseConditionCache};
use crate::compiler;
use crate::config::EngineConfig;
use crate::context::EvaluationContext;
use crate::error::CompileResult;
use crate::evaluator::{Evaluator, MatchResult};
use crate::event::Event;
use crate::interning::{CacheStats, NormalizationCache};
use crate::manager::ModelManager;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::model::{CompileStats, EngineModel};
use crate::rules::RuleDefinition;

/// Thread-safe matching engine with hot model replacement.
pub struct RuleEngine {
    manager: ModelManager,
    cache: Arc<BaseConditionCache>,
    interner: Arc<NormalizationCache>,
    metrics: Arc<EngineMetrics>,
    prefilter_enabled: bool,
    config: EngineConfig,
}

impl RuleEngine {
    /// Wrap an already-compiled model.
    pub fn with_model(model: EngineModel, config: EngineConfig) -> Self {
        RuleEngine {
            manager: ModelManager::new(Arc::new(model)),
            cache: Arc::new(BaseConditionCache::new(&config.base_conditions)),
            interner: Arc::new(NormalizationCache::new(&config.normalization)),
            metrics: Arc::new(EngineMetrics::new()),
            prefilter_enabled: config.base_conditions.enabled,
            config,
        }
    }

    /// Compile `rules` and build an engine over the result.
    pub fn from_rules(rules: &[RuleDefinition], config: EngineConfig) -> CompileResult<Self> {
        let model = compiler::compile(rules, &config)?;
        Ok(Self::with_model(model, config))
    }

    /// Parse and compile the JSON rule list and build an engine.
    pub fn from_json(json: &str, config: EngineConfig) -> CompileResult<Self> {
        let model = compiler::compile_json(json, &config)?;
        Ok(Self::with_model(model, config))
    }

    /// Evaluate one event against the currently-published model.
    pub fn evaluate(&self, event: &Event) -> MatchResult {
        self.evaluator().evaluate(event)
    }

    /// Evaluate with a caller-owned context.
    pub fn evaluate_with_context(
        &self,
        event: &Event,
        ctx: &mut EvaluationContext,
    ) -> MatchResult {
        self.evaluator().evaluate_with_context(event, ctx)
    }

    /// An evaluator pinned to the currently-published model. The returned
    /// value keeps that model alive and is unaffected by later reloads.
    pub fn evaluator(&self) -> Evaluator {
        Evaluator::with_shared(
            self.manager.get_model(),
            Arc::clone(&self.cache),
            Arc::clone(&self.interner),
            Arc::clone(&self.metrics),
            self.prefilter_enabled,
        )
    }

    /// Recompile and atomically publish. On failure the previous model keeps
    /// serving and the error is returned.
    pub fn reload_from_rules(&self, rules: &[RuleDefinition]) -> CompileResult<CompileStats> {
        match compiler::compile(rules, &self.config) {
            Ok(model) => {
                let stats = model.stats().clone();
                self.manager.install(Arc::new(model));
                self.cache.invalidate_all();
                Ok(stats)
            }
            Err(errors) => {
                warn!(%errors, "reload failed, retaining previous model");
                Err(errors)
            }
        }
    }

    /// JSON variant of [`Self::reload_from_rules`].
    pub fn reload_from_json(&self, json: &str) -> CompileResult<CompileStats> {
        match compiler::compile_json(json, &self.config) {
            Ok(model) => {
                let stats = model.stats().clone();
                self.manager.install(Arc::new(model));
                self.cache.invalidate_all();
                Ok(stats)
            }
            Err(errors) => {
                warn!(%errors, "reload failed, retaining previous model");
                Err(errors)
            }
        }
    }

    /// The currently-published model.
    pub fn model(&self) -> Arc<EngineModel> {
        self.manager.get_model()
    }

    /// The underlying model manager.
    pub fn manager(&self) -> &ModelManager {
        &self.manager
    }

    /// Evaluation metrics (cumulative across reloads).
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Base-condition cache counters.
    pub fn cache_stats(&self) -> BaseCacheStats {
        self.cache.stats()
    }

    /// Normalization cache counters.
    pub fn normalization_stats(&self) -> CacheStats {
        self.interner.stats()
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("model", &self.model())
            .field("prefilter_enabled", &self.prefilter_enabled)
            .finish()
    }
}
