//! Traverses arbitrary values to collect embedded [`Ref`]s and substitute
//! their resolved results back in.

use std::collections::HashMap;

use crate::error::WalkError;
use crate::refs::{Ref, TupleKey};
use crate::value::Value;

/// Default recursion budget. The system itself never produces cyclic values;
/// this only guards against pathological user-supplied graphs.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Walks `obj` in deterministic left-to-right depth-first order and returns
/// the unique [`Ref`]s embedded in it, deduplicated by ref identity
/// (`tuple_key`), in first-seen order.
pub fn collect_refs(obj: &Value) -> Result<Vec<Ref>, WalkError> {
    let mut seen = HashMap::new();
    let mut ordered = Vec::new();
    collect_inner(obj, DEFAULT_MAX_DEPTH, &mut seen, &mut ordered)?;
    Ok(ordered)
}

fn collect_inner(
    obj: &Value,
    budget: usize,
    seen: &mut HashMap<TupleKey, ()>,
    ordered: &mut Vec<Ref>,
) -> Result<(), WalkError> {
    if budget == 0 {
        return Err(WalkError::TooDeep {
            max_depth: DEFAULT_MAX_DEPTH,
        });
    }
    match obj {
        Value::Ref(r) => {
            if seen.insert(r.tuple_key(), ()).is_none() {
                ordered.push(r.clone());
            }
        }
        Value::Seq(items) => {
            for item in items {
                collect_inner(item, budget - 1, seen, ordered)?;
            }
        }
        Value::Map(pairs) => {
            for (key, value) in pairs {
                collect_inner(key, budget - 1, seen, ordered)?;
                collect_inner(value, budget - 1, seen, ordered)?;
            }
        }
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) | Value::Opaque(_) => {}
    }
    Ok(())
}

/// Returns a structurally identical value with every [`Ref`] replaced by its
/// mapped value. `mapping` must be total over the refs [`collect_refs`]
/// would return for `obj`; a ref missing from `mapping` is a [`WalkError::UnresolvedRef`].
pub fn substitute(obj: &Value, mapping: &HashMap<TupleKey, Value>) -> Result<Value, WalkError> {
    substitute_inner(obj, DEFAULT_MAX_DEPTH, mapping)
}

fn substitute_inner(obj: &Value, budget: usize, mapping: &HashMap<TupleKey, Value>) -> Result<Value, WalkError> {
    if budget == 0 {
        return Err(WalkError::TooDeep {
            max_depth: DEFAULT_MAX_DEPTH,
        });
    }
    let result = match obj {
        Value::Ref(r) => mapping
            .get(&r.tuple_key())
            .cloned()
            .ok_or_else(|| WalkError::UnresolvedRef(r.clone()))?,
        Value::Seq(items) => Value::Seq(
            items
                .iter()
                .map(|item| substitute_inner(item, budget - 1, mapping))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(pairs) => Value::Map(
            pairs
                .iter()
                .map(|(key, value)| {
                    Ok((
                        substitute_inner(key, budget - 1, mapping)?,
                        substitute_inner(value, budget - 1, mapping)?,
                    ))
                })
                .collect::<Result<_, WalkError>>()?,
        ),
        leaf @ (Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) | Value::Opaque(_)) => {
            leaf.clone()
        }
    };
    Ok(result)
}
