//! Per-thread reusable evaluation scratch state.
//!
//! The hot path allocates nothing at steady state: counters, the touched
//! set, the true-predicate list, the encoded-event buffers and the result
//! builder all live here and are recycled. `reset` is O(touched), not
//! O(combinations): only the counter slots dirtied by the previous
//! evaluation are zeroed.
//!
//! Contexts are thread-owned and never shared. The default entry point uses
//! an explicit `thread_local`; callers managing their own threads can hold a
//! context directly and pass it to `Evaluator::evaluate_with_context`.

use std::cell::RefCell;

use crate::evaluator::MatchedRule;
use crate::event::EncodedEvent;
use crate::model::EngineModel;
use crate::predicate::{FieldId, PredicateId};

/// Reusable scratch buffers for one evaluating thread.
#[derive(Debug, Default)]
pub struct EvaluationContext {
    /// Per-combination hit counters, sized to the attached model
    pub(crate) counters: Vec<u16>,
    /// Combination ids with a nonzero counter
    pub(crate) touched: Vec<u32>,
    /// Predicate ids that evaluated true for the current event
    pub(crate) true_predicates: Vec<PredicateId>,
    /// Result builder
    pub(crate) matches: Vec<MatchedRule>,
    /// Encoded-event destination buffers
    pub(crate) encoded: EncodedEvent,
    /// `(field_min_weight, field_id)` ordering scratch
    pub(crate) field_order: Vec<(f64, FieldId)>,
    model_version: Option<u64>,
}

impl EvaluationContext {
    /// Create an empty context; buffers grow on first attach.
    pub fn new() -> Self {
        EvaluationContext::default()
    }

    /// Size the counters for `model`. Switching models discards all counter
    /// state; re-attaching the same model is free.
    pub(crate) fn attach(&mut self, model: &EngineModel) {
        let n = model.num_combinations();
        if self.model_version != Some(model.version()) {
            self.counters.clear();
            self.counters.resize(n, 0);
            self.touched.clear();
            self.model_version = Some(model.version());
        } else if self.counters.len() < n {
            self.counters.resize(n, 0);
        }
    }

    /// Clear per-event state in O(touched).
    pub fn reset(&mut self) {
        for &c in &self.touched {
            self.counters[c as usize] = 0;
        }
        self.touched.clear();
        self.true_predicates.clear();
        self.matches.clear();
        self.field_order.clear();
        self.encoded.clear();
    }
}

thread_local! {
    static CONTEXT: RefCell<EvaluationContext> = RefCell::new(EvaluationContext::new());
}

/// Run `f` with this thread's pooled context.
pub(crate) fn with_thread_context<R>(f: impl FnOnce(&mut EvaluationContext) -> R) -> R {
    CONTEXT.with(|cell| f(&mut cell.borrow_mut()))
}
