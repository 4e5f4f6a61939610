//! Rule compiler: declarative rules in, immutable evaluation model out.
//!
//! Pipeline: validate -> profile selectivity -> intern dictionaries and
//! predicates -> expand IS_ANY_OF products and deduplicate combinations ->
//! assemble the structure-of-arrays model and inverted index in one pass.
//! The compiler runs single-threaded; the artifact it returns is read-only
//! and safe to share without locks.

pub(crate) mod expansion;
pub(crate) mod selectivity;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use roaring::RoaringBitmap;
use tracing::{debug, info, trace_span};

use crate::base_condition::build_base_sets;
use crate::config::EngineConfig;
use crate::dictionary::{canonicalize_field, Dictionary};
use crate::error::{CompileError, CompileErrors, CompileResult};
use crate::model::{CompileStats, EngineModel, RuleInfo};
use crate::predicate::{FieldId, Operand, Operator, Predicate, PredicateId, PredicateRegistry};
use crate::rules::{self, ConditionSpec, RuleDefinition, ScalarOperand};

use self::expansion::CombinationAccumulator;
use self::selectivity::{SelectivityProfiler, RANGE_SELECTIVITY, STRING_SELECTIVITY};

/// Parse and compile the JSON rule list.
pub fn compile_json(json: &str, config: &EngineConfig) -> CompileResult<EngineModel> {
    let defs = rules::parse_rules(json)?;
    compile(&defs, config)
}

/// Compile rule definitions into an [`EngineModel`]. Errors across the whole
/// input are accumulated; nothing is partially compiled.
pub fn compile(defs: &[RuleDefinition], config: &EngineConfig) -> CompileResult<EngineModel> {
    let started = Instant::now();
    let span = trace_span!("compile", rules = defs.len());
    let _span = span.enter();

    let valid = rules::validate(defs)?;

    let mut profiler = SelectivityProfiler::new();
    for rule in &valid {
        profiler.record(rule);
    }

    let mut fields = Dictionary::new();
    let mut values = Dictionary::new();
    let mut registry = PredicateRegistry::new();
    let mut accumulator = CombinationAccumulator::new();
    let mut errors = Vec::new();

    let rule_infos: Vec<Arc<RuleInfo>> = valid
        .iter()
        .map(|rule| {
            Arc::new(RuleInfo {
                rule_code: rule.code.clone(),
                priority: rule.priority,
                description: rule.description.clone(),
            })
        })
        .collect();

    for (rule_index, rule) in valid.iter().enumerate() {
        let mut static_ids: Vec<PredicateId> = Vec::new();
        let mut groups: Vec<Vec<PredicateId>> = Vec::new();

        for spec in &rule.specs {
            match spec {
                ConditionSpec::Equal { field, value } => {
                    static_ids.push(intern_equality(
                        field, value, &profiler, &mut fields, &mut values, &mut registry,
                    ));
                }
                ConditionSpec::AnyOf {
                    field,
                    values: members,
                } => {
                    // Single-valued IS_ANY_OF strength-reduces to EQUAL_TO
                    if members.len() == 1 {
                        static_ids.push(intern_equality(
                            field,
                            &members[0],
                            &profiler,
                            &mut fields,
                            &mut values,
                            &mut registry,
                        ));
                    } else {
                        groups.push(
                            members
                                .iter()
                                .map(|member| {
                                    intern_equality(
                                        field,
                                        member,
                                        &profiler,
                                        &mut fields,
                                        &mut values,
                                        &mut registry,
                                    )
                                })
                                .collect(),
                        );
                    }
                }
                ConditionSpec::Greater { field, bound } => {
                    let field_id = fields.encode(field);
                    static_ids.push(registry.intern(Predicate {
                        field_id,
                        operator: Operator::GreaterThan,
                        operand: Operand::Bound(*bound),
                        weight: RANGE_SELECTIVITY,
                    }));
                }
                ConditionSpec::Less { field, bound } => {
                    let field_id = fields.encode(field);
                    static_ids.push(registry.intern(Predicate {
                        field_id,
                        operator: Operator::LessThan,
                        operand: Operand::Bound(*bound),
                        weight: RANGE_SELECTIVITY,
                    }));
                }
                ConditionSpec::Between { field, lo, hi } => {
                    let field_id = fields.encode(field);
                    static_ids.push(registry.intern(Predicate {
                        field_id,
                        operator: Operator::Between,
                        operand: Operand::Range(*lo, *hi),
                        weight: RANGE_SELECTIVITY,
                    }));
                }
                ConditionSpec::Contains { field, needle } => {
                    let field_id = fields.encode(field);
                    static_ids.push(registry.intern(Predicate {
                        field_id,
                        operator: Operator::Contains,
                        operand: Operand::Needle(Arc::from(needle.as_str())),
                        weight: STRING_SELECTIVITY,
                    }));
                }
                ConditionSpec::Matches {
                    field,
                    pattern,
                    regex,
                } => {
                    let field_id = fields.encode(field);
                    static_ids.push(registry.intern(Predicate {
                        field_id,
                        operator: Operator::Regex,
                        operand: Operand::Pattern {
                            source: Arc::from(pattern.as_str()),
                            regex: Arc::clone(regex),
                        },
                        weight: STRING_SELECTIVITY,
                    }));
                }
            }
        }

        let expansions = CombinationAccumulator::expansion_size(&groups);
        if expansions > u128::from(config.max_expansion_per_rule) {
            errors.push(CompileError::ExpansionLimitExceeded {
                rule_code: rule.code.clone(),
                expansions,
                limit: config.max_expansion_per_rule,
            });
            continue;
        }
        if static_ids.len() + groups.len() > usize::from(u16::MAX) {
            errors.push(CompileError::InvalidSchema {
                message: format!("rule '{}' has too many conditions", rule.code),
            });
            continue;
        }

        accumulator.expand_rule(rule_index, &static_ids, &groups);
    }

    if !errors.is_empty() {
        return Err(CompileErrors(errors));
    }

    // SoA assembly and the inverted index, one pass over the combinations
    let n = accumulator.len();
    let mut required_count: Vec<u16> = Vec::with_capacity(n);
    let mut predicate_lists: Vec<Box<[PredicateId]>> = Vec::with_capacity(n);
    let mut rule_bindings: Vec<Box<[Arc<RuleInfo>]>> = Vec::with_capacity(n);
    let mut inverted_index: Vec<RoaringBitmap> = vec![RoaringBitmap::new(); registry.len()];

    for (combination_id, draft) in accumulator.combos.iter().enumerate() {
        required_count.push(draft.predicate_ids.len() as u16);
        for &p in &draft.predicate_ids {
            inverted_index[p as usize].insert(combination_id as u32);
        }
        predicate_lists.push(draft.predicate_ids.clone().into_boxed_slice());
        rule_bindings.push(
            draft
                .rule_indices
                .iter()
                .map(|&ri| Arc::clone(&rule_infos[ri]))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        );
    }

    // Per-field predicate lists in ascending weight order (id tie-break for
    // run-to-run stability), plus the min-weight cache for field ordering
    let mut field_predicate_vecs: Vec<Vec<PredicateId>> = vec![Vec::new(); fields.len()];
    for (pid, pred) in registry.iter() {
        field_predicate_vecs[pred.field_id as usize].push(pid);
    }
    for list in &mut field_predicate_vecs {
        list.sort_by(|&a, &b| {
            registry
                .get(a)
                .weight
                .total_cmp(&registry.get(b).weight)
                .then(a.cmp(&b))
        });
    }
    let field_min_weight: Vec<f64> = field_predicate_vecs
        .iter()
        .map(|list| {
            list.first()
                .map_or(f64::INFINITY, |&p| registry.get(p).weight)
        })
        .collect();
    let field_predicates: Vec<Box<[PredicateId]>> = field_predicate_vecs
        .into_iter()
        .map(Vec::into_boxed_slice)
        .collect();

    let volatile: HashSet<FieldId> = config
        .base_conditions
        .volatile_fields
        .iter()
        .filter_map(|field| fields.get_id(&canonicalize_field(field)))
        .collect();
    let base_sets = build_base_sets(&registry, &predicate_lists, &volatile);

    let stats = CompileStats {
        total_rules: defs.len(),
        enabled_rules: valid.len(),
        total_expanded: accumulator.total_expanded,
        unique_combinations: n,
        dedup_rate: if accumulator.total_expanded == 0 {
            0.0
        } else {
            1.0 - n as f64 / accumulator.total_expanded as f64
        },
        predicates: registry.len(),
        fields: fields.len(),
        values: values.len(),
        base_condition_sets: base_sets.len(),
        compile_time_nanos: started.elapsed().as_nanos() as u64,
    };
    debug!(
        expanded = stats.total_expanded,
        unique = stats.unique_combinations,
        predicates = stats.predicates,
        "expansion complete"
    );
    info!(
        rules = stats.enabled_rules,
        combinations = stats.unique_combinations,
        dedup_rate = stats.dedup_rate,
        "model compiled"
    );

    Ok(EngineModel::new(
        fields,
        values,
        registry,
        inverted_index,
        required_count,
        predicate_lists,
        rule_bindings,
        field_predicates,
        field_min_weight,
        base_sets,
        config.selection_strategy,
        config.eligible_cache_capacity,
        stats,
    ))
}

fn intern_equality(
    field: &str,
    value: &ScalarOperand,
    profiler: &SelectivityProfiler,
    fields: &mut Dictionary,
    values: &mut Dictionary,
    registry: &mut PredicateRegistry,
) -> PredicateId {
    let weight = profiler.equality_weight(field, value);
    let field_id = fields.encode(field);
    let operand = match value {
        ScalarOperand::Text(s) => Operand::Value(values.encode(s)),
        ScalarOperand::Number(n) => Operand::Number(*n),
        ScalarOperand::Flag(b) => Operand::Flag(*b),
    };
    registry.intern(Predicate {
        field_id,
        operator: Operator::EqualTo,
        operand,
        weight,
    })
}
