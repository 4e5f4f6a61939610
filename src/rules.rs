//! Rule source schema and validator.
//!
//! Accepts the declarative JSON rule list, rejects malformed input with
//! errors that identify the offending rule (and condition index), and lowers
//! each enabled rule into typed, canonicalized condition specs for the
//! compiler. All errors across the whole input are accumulated; there is no
//! partial-success compilation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::dictionary::{canonicalize_field, normalize_value};
use crate::error::{CompileError, CompileErrors, CompileResult};
use crate::predicate::{compile_full_match, Operator};

/// An author-facing logical rule, as written in the source JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub rule_code: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub conditions: Vec<ConditionDefinition>,
}

/// One raw condition of a logical rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub field: String,
    pub operator: String,
    pub value: JsonValue,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl RuleDefinition {
    /// Create an enabled rule with no conditions (builder style).
    pub fn new(rule_code: impl Into<String>) -> Self {
        RuleDefinition {
            rule_code: rule_code.into(),
            priority: 0,
            description: String::new(),
            enabled: true,
            conditions: Vec::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Disable the rule.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Append a condition.
    pub fn with_condition(
        mut self,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Self {
        self.conditions.push(ConditionDefinition {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
            enabled: true,
        });
        self
    }
}

/// A rule-side scalar: the operand of an equality-shaped condition.
#[derive(Debug, Clone)]
pub(crate) enum ScalarOperand {
    /// Normalized (upper-cased) string
    Text(String),
    Number(f64),
    Flag(bool),
}

impl ScalarOperand {
    /// Hashable identity key; numbers compare by bit pattern.
    pub(crate) fn key(&self) -> ScalarKey {
        match self {
            ScalarOperand::Text(s) => ScalarKey::Text(s.clone()),
            ScalarOperand::Number(n) => ScalarKey::Bits(n.to_bits()),
            ScalarOperand::Flag(b) => ScalarKey::Flag(*b),
        }
    }
}

/// Identity key for a scalar operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ScalarKey {
    Text(String),
    Bits(u64),
    Flag(bool),
}

/// A validated, canonicalized condition ready for predicate interning.
#[derive(Debug, Clone)]
pub(crate) enum ConditionSpec {
    Equal {
        field: String,
        value: ScalarOperand,
    },
    AnyOf {
        field: String,
        values: Vec<ScalarOperand>,
    },
    Greater {
        field: String,
        bound: f64,
    },
    Less {
        field: String,
        bound: f64,
    },
    Between {
        field: String,
        lo: f64,
        hi: f64,
    },
    Contains {
        field: String,
        needle: String,
    },
    Matches {
        field: String,
        pattern: String,
        regex: Arc<Regex>,
    },
}

impl ConditionSpec {
    pub(crate) fn field(&self) -> &str {
        match self {
            ConditionSpec::Equal { field, .. }
            | ConditionSpec::AnyOf { field, .. }
            | ConditionSpec::Greater { field, .. }
            | ConditionSpec::Less { field, .. }
            | ConditionSpec::Between { field, .. }
            | ConditionSpec::Contains { field, .. }
            | ConditionSpec::Matches { field, .. } => field,
        }
    }
}

/// An enabled logical rule after validation.
#[derive(Debug, Clone)]
pub(crate) struct ValidRule {
    pub code: String,
    pub priority: i32,
    pub description: String,
    pub specs: Vec<ConditionSpec>,
}

/// Parse the JSON wire form into rule definitions.
///
/// Syntactic failures map to `MalformedJson`; structural failures (wrong
/// shapes, missing keys, unknown condition keys) map to `InvalidSchema` with
/// the rule identified. Unknown keys on the rule object itself are ignored.
pub fn parse_rules(json: &str) -> CompileResult<Vec<RuleDefinition>> {
    let root: JsonValue = serde_json::from_str(json).map_err(CompileError::MalformedJson)?;
    let JsonValue::Array(items) = root else {
        return Err(CompileError::InvalidSchema {
            message: "top-level value must be an array of rules".to_string(),
        }
        .into());
    };

    let mut rules = Vec::with_capacity(items.len());
    let mut errors = Vec::new();
    for (i, item) in items.iter().enumerate() {
        match parse_rule(item, i) {
            Ok(rule) => rules.push(rule),
            Err(err) => errors.push(err),
        }
    }
    if errors.is_empty() {
        Ok(rules)
    } else {
        Err(CompileErrors(errors))
    }
}

const CONDITION_KEYS: [&str; 4] = ["field", "operator", "value", "enabled"];

fn parse_rule(item: &JsonValue, index: usize) -> Result<RuleDefinition, CompileError> {
    let JsonValue::Object(obj) = item else {
        return Err(CompileError::InvalidSchema {
            message: format!("rule #{index} is not an object"),
        });
    };

    let rule_code = match obj.get("rule_code") {
        Some(JsonValue::String(s)) if !s.is_empty() => s.clone(),
        Some(JsonValue::String(_)) => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule #{index} has an empty rule_code"),
            })
        }
        Some(_) => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule #{index}: rule_code must be a string"),
            })
        }
        None => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule #{index} is missing rule_code"),
            })
        }
    };

    let priority = match obj.get("priority") {
        None | Some(JsonValue::Null) => 0,
        Some(JsonValue::Number(n)) if n.as_i64().is_some() => n.as_i64().unwrap_or(0) as i32,
        Some(_) => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}': priority must be an integer"),
            })
        }
    };

    let description = match obj.get("description") {
        None | Some(JsonValue::Null) => String::new(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(_) => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}': description must be a string"),
            })
        }
    };

    let enabled = match obj.get("enabled") {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::Bool(b)) => *b,
        Some(_) => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}': enabled must be a boolean"),
            })
        }
    };

    let conditions = match obj.get("conditions") {
        Some(JsonValue::Array(items)) => {
            let mut conditions = Vec::with_capacity(items.len());
            for (ci, citem) in items.iter().enumerate() {
                conditions.push(parse_condition(citem, &rule_code, ci)?);
            }
            conditions
        }
        Some(_) => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}': conditions must be an array"),
            })
        }
        None => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}' is missing conditions"),
            })
        }
    };

    Ok(RuleDefinition {
        rule_code,
        priority,
        description,
        enabled,
        conditions,
    })
}

fn parse_condition(
    item: &JsonValue,
    rule_code: &str,
    index: usize,
) -> Result<ConditionDefinition, CompileError> {
    let JsonValue::Object(obj) = item else {
        return Err(CompileError::InvalidSchema {
            message: format!("rule '{rule_code}' condition {index} is not an object"),
        });
    };

    // Unknown keys within a condition are an error (unlike the rule object)
    for key in obj.keys() {
        if !CONDITION_KEYS.contains(&key.as_str()) {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}' condition {index}: unknown key '{key}'"),
            });
        }
    }

    let field = match obj.get("field") {
        Some(JsonValue::String(s)) if !s.is_empty() => s.clone(),
        Some(JsonValue::String(_)) | None => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}' condition {index} is missing field"),
            })
        }
        Some(_) => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}' condition {index}: field must be a string"),
            })
        }
    };

    let operator = match obj.get("operator") {
        Some(JsonValue::String(s)) if !s.is_empty() => s.clone(),
        Some(JsonValue::String(_)) | None => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}' condition {index} is missing operator"),
            })
        }
        Some(_) => {
            return Err(CompileError::InvalidSchema {
                message: format!(
                    "rule '{rule_code}' condition {index}: operator must be a string"
                ),
            })
        }
    };

    let value = match obj.get("value") {
        Some(v) if !v.is_null() => v.clone(),
        _ => {
            return Err(CompileError::InvalidSchema {
                message: format!("rule '{rule_code}' condition {index} is missing value"),
            })
        }
    };

    let enabled = match obj.get("enabled") {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::Bool(b)) => *b,
        Some(_) => {
            return Err(CompileError::InvalidSchema {
                message: format!(
                    "rule '{rule_code}' condition {index}: enabled must be a boolean"
                ),
            })
        }
    };

    Ok(ConditionDefinition {
        field,
        operator,
        value,
        enabled,
    })
}

/// Validate rule definitions and lower the enabled ones to typed specs.
/// Disabled rules only need to parse; they contribute nothing downstream.
pub(crate) fn validate(defs: &[RuleDefinition]) -> CompileResult<Vec<ValidRule>> {
    let mut errors = Vec::new();
    let mut seen_codes = HashSet::new();
    let mut valid = Vec::new();

    for def in defs {
        if !def.enabled {
            continue;
        }
        if !seen_codes.insert(def.rule_code.clone()) {
            errors.push(CompileError::DuplicateRuleCode {
                rule_code: def.rule_code.clone(),
            });
            continue;
        }

        match lower_rule(def) {
            Ok(rule) => valid.push(rule),
            Err(mut errs) => errors.append(&mut errs),
        }
    }

    if errors.is_empty() {
        Ok(valid)
    } else {
        Err(CompileErrors(errors))
    }
}

fn lower_rule(def: &RuleDefinition) -> Result<ValidRule, Vec<CompileError>> {
    let code = &def.rule_code;
    let mut errors = Vec::new();
    let mut specs = Vec::new();

    for (index, cond) in def.conditions.iter().enumerate() {
        if !cond.enabled {
            continue;
        }
        match lower_condition(cond, code, index) {
            Ok(spec) => specs.push(spec),
            Err(err) => errors.push(err),
        }
    }

    if errors.is_empty() && specs.is_empty() {
        errors.push(CompileError::InvalidSchema {
            message: format!("rule '{code}' has no enabled conditions"),
        });
    }

    if errors.is_empty() {
        if let Err(err) = check_contradictions(code, &specs) {
            errors.push(err);
        }
    }

    if errors.is_empty() {
        Ok(ValidRule {
            code: code.clone(),
            priority: def.priority,
            description: def.description.clone(),
            specs,
        })
    } else {
        Err(errors)
    }
}

fn lower_condition(
    cond: &ConditionDefinition,
    rule_code: &str,
    index: usize,
) -> Result<ConditionSpec, CompileError> {
    let Some(operator) = Operator::parse(&cond.operator) else {
        return Err(CompileError::UnknownOperator {
            rule_code: rule_code.to_string(),
            index,
            name: cond.operator.clone(),
        });
    };

    let field = canonicalize_field(&cond.field);
    let mismatch = |message: String| CompileError::TypeMismatch {
        rule_code: rule_code.to_string(),
        index,
        message,
    };

    match operator {
        Operator::EqualTo => {
            let value = scalar_operand(&cond.value)
                .ok_or_else(|| mismatch("EQUAL_TO requires a string, number or boolean".into()))?;
            Ok(ConditionSpec::Equal { field, value })
        }
        Operator::IsAnyOf => {
            let JsonValue::Array(items) = &cond.value else {
                return Err(mismatch("IS_ANY_OF requires a non-empty list".into()));
            };
            if items.is_empty() {
                return Err(mismatch("IS_ANY_OF requires a non-empty list".into()));
            }
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(scalar_operand(item).ok_or_else(|| {
                    mismatch("IS_ANY_OF members must be strings, numbers or booleans".into())
                })?);
            }
            Ok(ConditionSpec::AnyOf { field, values })
        }
        Operator::GreaterThan | Operator::LessThan => {
            let bound = cond.value.as_f64().ok_or_else(|| {
                mismatch(format!("{} requires a numeric operand", operator.name()))
            })?;
            if operator == Operator::GreaterThan {
                Ok(ConditionSpec::Greater { field, bound })
            } else {
                Ok(ConditionSpec::Less { field, bound })
            }
        }
        Operator::Between => {
            let JsonValue::Array(items) = &cond.value else {
                return Err(mismatch("BETWEEN requires a [lo, hi] pair".into()));
            };
            if items.len() != 2 {
                return Err(mismatch(format!(
                    "BETWEEN requires exactly 2 elements, got {}",
                    items.len()
                )));
            }
            let lo = items[0]
                .as_f64()
                .ok_or_else(|| mismatch("BETWEEN bounds must be numeric".into()))?;
            let hi = items[1]
                .as_f64()
                .ok_or_else(|| mismatch("BETWEEN bounds must be numeric".into()))?;
            if lo > hi {
                return Err(mismatch(format!("BETWEEN bounds are inverted: [{lo}, {hi}]")));
            }
            Ok(ConditionSpec::Between { field, lo, hi })
        }
        Operator::Contains => {
            let JsonValue::String(needle) = &cond.value else {
                return Err(mismatch("CONTAINS requires a string operand".into()));
            };
            Ok(ConditionSpec::Contains {
                field,
                needle: needle.clone(),
            })
        }
        Operator::Regex => {
            let JsonValue::String(pattern) = &cond.value else {
                return Err(mismatch("REGEX requires a string operand".into()));
            };
            let regex = compile_full_match(pattern)
                .map_err(|e| mismatch(format!("invalid regex pattern: {e}")))?;
            Ok(ConditionSpec::Matches {
                field,
                pattern: pattern.clone(),
                regex: Arc::new(regex),
            })
        }
    }
}

fn scalar_operand(value: &JsonValue) -> Option<ScalarOperand> {
    match value {
        JsonValue::String(s) => Some(ScalarOperand::Text(normalize_value(s))),
        JsonValue::Number(n) => n.as_f64().map(ScalarOperand::Number),
        JsonValue::Bool(b) => Some(ScalarOperand::Flag(*b)),
        _ => None,
    }
}

/// Detect trivially unsatisfiable conjunctions within one rule. Scope: two
/// distinct EQUAL_TO on one field, an empty (GREATER_THAN, LESS_THAN)
/// interval, and two IS_ANY_OF with empty intersection. Inverted BETWEEN
/// bounds are rejected earlier as a type mismatch.
fn check_contradictions(code: &str, specs: &[ConditionSpec]) -> Result<(), CompileError> {
    let mut equals: HashMap<&str, &ScalarOperand> = HashMap::new();
    let mut any_ofs: HashMap<&str, HashSet<ScalarKey>> = HashMap::new();
    let mut lower_bounds: HashMap<&str, f64> = HashMap::new();
    let mut upper_bounds: HashMap<&str, f64> = HashMap::new();

    let contradiction = |message: String| CompileError::Contradiction {
        rule_code: code.to_string(),
        message,
    };

    for spec in specs {
        match spec {
            ConditionSpec::Equal { field, value } => {
                if let Some(prev) = equals.insert(field.as_str(), value) {
                    if prev.key() != value.key() {
                        return Err(contradiction(format!(
                            "field '{field}' has two EQUAL_TO conditions with distinct values"
                        )));
                    }
                }
            }
            ConditionSpec::AnyOf { field, values } => {
                let keys: HashSet<ScalarKey> = values.iter().map(ScalarOperand::key).collect();
                if let Some(prev) = any_ofs.get(field.as_str()) {
                    if prev.is_disjoint(&keys) {
                        return Err(contradiction(format!(
                            "field '{field}' has two IS_ANY_OF conditions with empty intersection"
                        )));
                    }
                }
                any_ofs
                    .entry(field.as_str())
                    .and_modify(|prev| prev.retain(|k| keys.contains(k)))
                    .or_insert(keys);
            }
            ConditionSpec::Greater { field, bound } => {
                let entry = lower_bounds
                    .entry(field.as_str())
                    .or_insert(f64::NEG_INFINITY);
                *entry = entry.max(*bound);
            }
            ConditionSpec::Less { field, bound } => {
                let entry = upper_bounds.entry(field.as_str()).or_insert(f64::INFINITY);
                *entry = entry.min(*bound);
            }
            _ => {}
        }
    }

    for (field, lo) in &lower_bounds {
        if let Some(hi) = upper_bounds.get(field) {
            if hi <= lo {
                return Err(contradiction(format!(
                    "field '{field}' requires > {lo} and < {hi} simultaneously"
                )));
            }
        }
    }

    Ok(())
}
