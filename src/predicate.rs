//! Predicate model: a typed operator plus operand, evaluated against one
//! attribute value.
//!
//! Predicates are interned into a [`PredicateRegistry`] which assigns dense
//! ids. Identity is structural - field, operator, operand - so two rules
//! using `status = ACTIVE` share a single predicate id and, downstream, a
//! single inverted-index bucket. Weight (selectivity) is a performance hint
//! and does not participate in identity.
//!
//! The operator is a small tagged enum, not a trait object: the hot loop
//! branches on it directly.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dictionary::SymbolId;
use crate::event::EncodedValue;

/// Dense id of an interned predicate.
pub type PredicateId = u32;

/// Dense id of a canonical field name.
pub type FieldId = SymbolId;

/// Dense id of a normalized string value.
pub type ValueId = SymbolId;

/// Condition operator. `IsAnyOf` exists only at compile time; the expander
/// strength-reduces it to `EqualTo` variants before the model is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    EqualTo,
    IsAnyOf,
    GreaterThan,
    LessThan,
    Between,
    Contains,
    Regex,
}

impl Operator {
    /// Parse a case-insensitive operator name.
    pub fn parse(name: &str) -> Option<Operator> {
        match name.to_ascii_uppercase().as_str() {
            "EQUAL_TO" => Some(Operator::EqualTo),
            "IS_ANY_OF" => Some(Operator::IsAnyOf),
            "GREATER_THAN" => Some(Operator::GreaterThan),
            "LESS_THAN" => Some(Operator::LessThan),
            "BETWEEN" => Some(Operator::Between),
            "CONTAINS" => Some(Operator::Contains),
            "REGEX" => Some(Operator::Regex),
            _ => None,
        }
    }

    /// Canonical UPPER_SNAKE_CASE name.
    pub fn name(self) -> &'static str {
        match self {
            Operator::EqualTo => "EQUAL_TO",
            Operator::IsAnyOf => "IS_ANY_OF",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::LessThan => "LESS_THAN",
            Operator::Between => "BETWEEN",
            Operator::Contains => "CONTAINS",
            Operator::Regex => "REGEX",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator-dependent operand.
#[derive(Debug, Clone)]
pub enum Operand {
    /// Interned normalized string value (`EqualTo`)
    Value(ValueId),
    /// Numeric equality (`EqualTo`)
    Number(f64),
    /// Boolean equality (`EqualTo`)
    Flag(bool),
    /// Strict comparison bound (`GreaterThan` / `LessThan`)
    Bound(f64),
    /// Inclusive range (`Between`)
    Range(f64, f64),
    /// Substring needle, original case (`Contains`)
    Needle(Arc<str>),
    /// Compiled full-match pattern (`Regex`); the source string carries
    /// identity, the compiled regex is shared
    Pattern { source: Arc<str>, regex: Arc<Regex> },
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Operand::Value(a), Operand::Value(b)) => a == b,
            (Operand::Number(a), Operand::Number(b)) => a.to_bits() == b.to_bits(),
            (Operand::Flag(a), Operand::Flag(b)) => a == b,
            (Operand::Bound(a), Operand::Bound(b)) => a.to_bits() == b.to_bits(),
            (Operand::Range(a1, a2), Operand::Range(b1, b2)) => {
                a1.to_bits() == b1.to_bits() && a2.to_bits() == b2.to_bits()
            }
            (Operand::Needle(a), Operand::Needle(b)) => a == b,
            (Operand::Pattern { source: a, .. }, Operand::Pattern { source: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for Operand {}

impl Hash for Operand {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Operand::Value(id) => id.hash(state),
            Operand::Number(n) | Operand::Bound(n) => n.to_bits().hash(state),
            Operand::Flag(b) => b.hash(state),
            Operand::Range(lo, hi) => {
                lo.to_bits().hash(state);
                hi.to_bits().hash(state);
            }
            Operand::Needle(s) => s.hash(state),
            Operand::Pattern { source, .. } => source.hash(state),
        }
    }
}

/// An immutable atomic condition on one field.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub field_id: FieldId,
    pub operator: Operator,
    pub operand: Operand,
    /// Selectivity estimate in (0, 1]; lower = rarer = evaluated first
    pub weight: f64,
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        // Weight is a hint, not identity
        self.field_id == other.field_id
            && self.operator == other.operator
            && self.operand == other.operand
    }
}

impl Eq for Predicate {}

impl Hash for Predicate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.field_id.hash(state);
        self.operator.hash(state);
        self.operand.hash(state);
    }
}

impl Predicate {
    /// Evaluate against one encoded attribute value. A missing attribute is
    /// handled by the caller (missing => false); a type-incompatible value
    /// evaluates to false here.
    #[inline]
    pub fn evaluate(&self, value: &EncodedValue) -> bool {
        match (&self.operand, value) {
            (Operand::Value(id), EncodedValue::Text { value_id, .. }) => *value_id == Some(*id),
            (Operand::Number(n), EncodedValue::Number(m)) => m == n,
            (Operand::Flag(b), EncodedValue::Flag(x)) => x == b,
            (Operand::Bound(bound), EncodedValue::Number(m)) => match self.operator {
                Operator::GreaterThan => m > bound,
                Operator::LessThan => m < bound,
                _ => false,
            },
            (Operand::Range(lo, hi), EncodedValue::Number(m)) => *lo <= *m && *m <= *hi,
            (Operand::Needle(needle), EncodedValue::Text { raw, .. }) => {
                raw.contains(needle.as_ref())
            }
            (Operand::Pattern { regex, .. }, EncodedValue::Text { raw, .. }) => {
                regex.is_match(raw)
            }
            _ => false,
        }
    }
}

/// Compile `pattern` for full-string matching: the pattern must consume the
/// entire attribute value, mirroring `Pattern.matches` semantics.
pub(crate) fn compile_full_match(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// Dense predicate storage plus a structural-identity intern table.
#[derive(Debug, Clone, Default)]
pub struct PredicateRegistry {
    predicates: Vec<Predicate>,
    index: HashMap<Predicate, PredicateId>,
}

impl PredicateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        PredicateRegistry {
            predicates: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Intern a predicate, returning its dense id. Structural duplicates
    /// collapse to the first id; the first-seen weight wins.
    pub fn intern(&mut self, predicate: Predicate) -> PredicateId {
        if let Some(&id) = self.index.get(&predicate) {
            return id;
        }
        let id = self.predicates.len() as PredicateId;
        self.index.insert(predicate.clone(), id);
        self.predicates.push(predicate);
        id
    }

    /// Look up a predicate by id.
    ///
    /// Ids handed out by `intern` are always valid; an out-of-range id is an
    /// internal invariant violation and panics.
    #[inline]
    pub fn get(&self, id: PredicateId) -> &Predicate {
        &self.predicates[id as usize]
    }

    /// Number of distinct predicates.
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Iterate over `(id, predicate)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (PredicateId, &Predicate)> {
        self.predicates
            .iter()
            .enumerate()
            .map(|(i, p)| (i as PredicateId, p))
    }
}
