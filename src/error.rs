//! Compile Error Types
//!
//! Compilation either succeeds for the whole rule set or fails with every
//! error found; partial-success compilation is not supported. Evaluation has
//! no recoverable failure modes, so there is no runtime error type.

use thiserror::Error;

/// A single compilation failure, tied to the offending rule (and condition
/// index where applicable).
#[derive(Error, Debug)]
pub enum CompileError {
    /// Rule object or condition does not conform to the schema
    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    /// Same `rule_code` on more than one enabled rule
    #[error("duplicate rule_code '{rule_code}'")]
    DuplicateRuleCode { rule_code: String },

    /// Operator name outside the supported set
    #[error("unknown operator '{name}' in rule '{rule_code}' condition {index}")]
    UnknownOperator {
        rule_code: String,
        index: usize,
        name: String,
    },

    /// Operand incompatible with the operator
    #[error("type mismatch in rule '{rule_code}' condition {index}: {message}")]
    TypeMismatch {
        rule_code: String,
        index: usize,
        message: String,
    },

    /// Input is not syntactically valid JSON
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// Cartesian expansion of one rule exceeds the configured ceiling
    #[error(
        "rule '{rule_code}' would expand into {expansions} combinations, limit is {limit}"
    )]
    ExpansionLimitExceeded {
        rule_code: String,
        expansions: u128,
        limit: u64,
    },

    /// Trivially unsatisfiable conjunction within one rule
    #[error("contradiction in rule '{rule_code}': {message}")]
    Contradiction { rule_code: String, message: String },
}

/// Every failure found across the whole input, accumulated by the compiler.
#[derive(Debug)]
pub struct CompileErrors(pub Vec<CompileError>);

impl std::error::Error for CompileErrors {}

impl CompileErrors {
    /// Number of individual errors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the collection is empty (never true for a returned error).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the individual errors.
    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.0.iter()
    }
}

impl std::fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} compile error(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl From<CompileError> for CompileErrors {
    fn from(err: CompileError) -> Self {
        CompileErrors(vec![err])
    }
}

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileErrors>;
