//! # Helios Rule-Matching Engine
//!
//! A high-throughput, low-latency rule-matching engine: compile a
//! declarative list of conjunctive rules once, then determine for each
//! incoming event which rules match - millions of events per minute with
//! sub-millisecond tail latency over tens of thousands of rules.
//!
//! ## Pipeline Architecture
//!
//! ### Compile time
//! ```text
//! Rule JSON
//!     |
//! [Schema Validator]        -> typed, canonicalized conditions
//!     |
//! [Selectivity Profiler]    -> per-predicate weights
//!     |
//! [Dictionaries + Registry] -> interned fields, values, predicates
//!     |
//! [Expander & Deduper]      -> canonical combinations (IS_ANY_OF product)
//!     |
//! [Model Builder]           -> EngineModel (SoA + inverted index)
//! ```
//!
//! ### Runtime
//! ```text
//! Event
//!     |
//! [Encoder]                 -> flattened, dictionary-encoded view
//!     |
//! [Base-Condition Filter]   -> candidate combination bitmap (cached)
//!     |
//! [Counter Matcher]         -> per-combination hit counters
//!     |
//! [Selection Strategy]      -> MatchResult
//! ```
//!
//! ## Usage
//!
//! ```
//! use helios::{EngineConfig, Event, RuleEngine};
//!
//! let engine = RuleEngine::from_json(
//!     r#"[{"rule_code": "VIP",
//!          "priority": 100,
//!          "conditions": [
//!            {"field": "tier", "operator": "EQUAL_TO", "value": "GOLD"},
//!            {"field": "amount", "operator": "GREATER_THAN", "value": 1000}
//!          ]}]"#,
//!     EngineConfig::default(),
//! ).expect("rules compile");
//!
//! let event = Event::new("evt-1")
//!     .with_attribute("tier", "gold")
//!     .with_attribute("amount", 5000);
//! let result = engine.evaluate(&event);
//! assert_eq!(result.rule_codes(), vec!["VIP"]);
//! ```
//!
//! Evaluation is lock-free and may run from any number of threads against
//! one shared model; `RuleEngine::reload_from_json` swaps in a recompiled
//! model atomically without stopping evaluators.

// Compile-time pipeline
pub mod dictionary; // String <-> id interning (fields, values)
pub mod predicate; // Typed operator + operand, predicate registry
pub mod rules; // Source schema, validation, condition lowering
pub mod compiler; // Profiling, expansion, dedup, model assembly
pub mod model; // The immutable compiled artifact

// Runtime pipeline
pub mod event; // Event input and the flattening encoder
pub mod interning; // Bounded string-normalization cache
pub mod base_condition; // Pre-filter, candidate bitmaps, adaptive cache
pub mod context; // Per-thread reusable scratch buffers
pub mod evaluator; // Counter matching
pub mod selection; // ALL_MATCHES / HIGHEST_PRIORITY

// Lifecycle and observability
pub mod config; // Engine tuning knobs
pub mod engine; // Facade: compile, evaluate, hot reload
pub mod error; // Compile error taxonomy
pub mod manager; // Atomic model publication
pub mod metrics; // Contention-tolerant counters

// Re-export the primary API surface
pub use compiler::{compile, compile_json};
pub use config::EngineConfig;
pub use context::EvaluationContext;
pub use engine::RuleEngine;
pub use error::{CompileError, CompileErrors, CompileResult};
pub use evaluator::{Evaluator, MatchResult, MatchedRule};
pub use event::Event;
pub use manager::ModelManager;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use model::{CompileStats, EngineModel, RuleInfo};
pub use rules::{ConditionDefinition, RuleDefinition};
pub use selection::SelectionStrategy;
