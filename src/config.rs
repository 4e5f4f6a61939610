//! Engine Configuration
//!
//! Compile- and runtime-tuning knobs for the matching engine. The library
//! reads no files and no environment variables; the struct derives serde so
//! embedding applications can load it from whatever source they use.
//!
//! ## Example
//!
//! ```
//! use helios::config::EngineConfig;
//! use helios::selection::SelectionStrategy;
//!
//! let config = EngineConfig {
//!     selection_strategy: SelectionStrategy::HighestPriority,
//!     ..EngineConfig::default()
//! };
//! assert!(config.base_conditions.enabled);
//! ```

use crate::selection::SelectionStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Post-match filter applied to every evaluation
    #[serde(default)]
    pub selection_strategy: SelectionStrategy,

    /// Ceiling on the Cartesian expansion of a single rule; exceeding it is a
    /// compile error
    #[serde(default = "default_max_expansion")]
    pub max_expansion_per_rule: u64,

    /// Base-condition pre-filter settings
    #[serde(default)]
    pub base_conditions: BaseConditionConfig,

    /// String-normalization cache settings
    #[serde(default)]
    pub normalization: NormalizationConfig,

    /// Bound on the per-model eligible-predicate-set cache (entries)
    #[serde(default = "default_eligible_cache_capacity")]
    pub eligible_cache_capacity: usize,
}

/// Base-condition pre-filter and cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseConditionConfig {
    /// Enable the pre-filter and its result cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fields excluded from base-condition extraction (canonicalized before
    /// matching, so `request-id` and `REQUEST_ID` are equivalent)
    #[serde(default = "default_volatile_fields")]
    pub volatile_fields: Vec<String>,

    /// Initial cache capacity (entries)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Floor for adaptive resizing
    #[serde(default = "default_cache_min_capacity")]
    pub cache_min_capacity: usize,

    /// Cap for adaptive resizing
    #[serde(default = "default_cache_max_capacity")]
    pub cache_max_capacity: usize,

    /// Entry time-to-live in milliseconds
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// How often the adaptive sizer re-examines hit rate, in seconds
    #[serde(default = "default_tuning_interval_secs")]
    pub tuning_interval_secs: u64,

    /// Grow when the windowed hit rate drops below this fraction
    #[serde(default = "default_low_watermark")]
    pub low_watermark: f64,

    /// Shrink when the windowed hit rate exceeds this fraction
    #[serde(default = "default_high_watermark")]
    pub high_watermark: f64,
}

/// String-normalization cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    /// Total capacity across shards (distinct strings)
    #[serde(default = "default_normalization_capacity")]
    pub capacity: usize,

    /// Shard count; rounded up to a power of two
    #[serde(default = "default_normalization_shards")]
    pub shards: usize,
}

// Default value functions
fn default_max_expansion() -> u64 {
    1 << 20
}
fn default_eligible_cache_capacity() -> usize {
    256
}
fn default_true() -> bool {
    true
}
fn default_volatile_fields() -> Vec<String> {
    vec![
        "TIMESTAMP".to_string(),
        "EVENT_TIME".to_string(),
        "REQUEST_ID".to_string(),
        "TRACE_ID".to_string(),
    ]
}
fn default_cache_capacity() -> usize {
    4096
}
fn default_cache_min_capacity() -> usize {
    256
}
fn default_cache_max_capacity() -> usize {
    262_144
}
fn default_cache_ttl_ms() -> u64 {
    60_000
}
fn default_tuning_interval_secs() -> u64 {
    30
}
fn default_low_watermark() -> f64 {
    0.70
}
fn default_high_watermark() -> f64 {
    0.95
}
fn default_normalization_capacity() -> usize {
    65_536
}
fn default_normalization_shards() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            selection_strategy: SelectionStrategy::default(),
            max_expansion_per_rule: default_max_expansion(),
            base_conditions: BaseConditionConfig::default(),
            normalization: NormalizationConfig::default(),
            eligible_cache_capacity: default_eligible_cache_capacity(),
        }
    }
}

impl Default for BaseConditionConfig {
    fn default() -> Self {
        BaseConditionConfig {
            enabled: true,
            volatile_fields: default_volatile_fields(),
            cache_capacity: default_cache_capacity(),
            cache_min_capacity: default_cache_min_capacity(),
            cache_max_capacity: default_cache_max_capacity(),
            cache_ttl_ms: default_cache_ttl_ms(),
            tuning_interval_secs: default_tuning_interval_secs(),
            low_watermark: default_low_watermark(),
            high_watermark: default_high_watermark(),
        }
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        NormalizationConfig {
            capacity: default_normalization_capacity(),
            shards: default_normalization_shards(),
        }
    }
}

impl BaseConditionConfig {
    /// Entry TTL as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Tuning interval as a `Duration`.
    pub fn tuning_interval(&self) -> Duration {
        Duration::from_secs(self.tuning_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.selection_strategy, SelectionStrategy::AllMatches);
        assert_eq!(config.max_expansion_per_rule, 1 << 20);
        assert!(config.base_conditions.enabled);
        assert!(
            config.base_conditions.cache_min_capacity <= config.base_conditions.cache_capacity
        );
    }

    #[test]
    fn test_config_deserializes_with_partial_input() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"selection_strategy":"HIGHEST_PRIORITY"}"#).unwrap();
        assert_eq!(config.selection_strategy, SelectionStrategy::HighestPriority);
        assert_eq!(config.base_conditions.cache_capacity, 4096);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_expansion_per_rule, config.max_expansion_per_rule);
    }
}
