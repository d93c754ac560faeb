//! Aliasing analysis for view and in-place nodes.
//!
//! Each node declares an [`AliasKind`]. A `ViewOf` output shares storage with one operand; a
//! `Consumes` node destroys one operand. Values sharing storage form an alias class rooted at
//! the first non-view value. A destroyed class must not be a graph input or output, must be
//! destroyed at most once, and must not be read by any node ordered after its destroyer.

use std::collections::HashMap;

use crate::backend::{
    error::GraphError,
    spec::{AliasKind, Function, Operand, ValueId},
    topology::validate_function_topology,
};

/// Storage root for every value defined in `function`.
pub fn storage_roots(function: &Function) -> HashMap<ValueId, ValueId> {
    let mut roots: HashMap<ValueId, ValueId> = function
        .parameter_ids
        .iter()
        .map(|id| (*id, *id))
        .collect();
    for instruction in &function.body {
        let root = match instruction.op.alias() {
            AliasKind::ViewOf(index) => instruction
                .operands
                .get(index)
                .and_then(Operand::as_value)
                .and_then(|value| roots.get(&value).copied())
                .unwrap_or(instruction.id),
            AliasKind::Owned | AliasKind::Consumes(_) => instruction.id,
        };
        roots.insert(instruction.id, root);
    }
    roots
}

/// Validates the alias contracts of a topologically ordered function.
pub fn validate(function: &Function) -> Result<(), GraphError> {
    validate_function_topology(function)?;
    let roots = storage_roots(function);
    let root_of = |value: ValueId| roots.get(&value).copied().unwrap_or(value);

    let mut destroyed: HashMap<ValueId, (ValueId, usize)> = HashMap::new();
    for (pos, instruction) in function.body.iter().enumerate() {
        let AliasKind::Consumes(index) = instruction.op.alias() else {
            continue;
        };
        let Some(target) = instruction.operands.get(index).and_then(Operand::as_value) else {
            continue;
        };
        let root = root_of(target);
        let boundary = function.parameter_ids.contains(&root)
            || function
                .result_ids
                .iter()
                .any(|result| root_of(*result) == root);
        if boundary {
            return Err(GraphError::DestroysBoundary {
                value: target,
                destroyer: instruction.id,
            });
        }
        if let Some((first, _)) = destroyed.get(&root) {
            return Err(GraphError::DoubleDestroy {
                value: target,
                first: *first,
                second: instruction.id,
            });
        }
        destroyed.insert(root, (instruction.id, pos));
    }

    if destroyed.is_empty() {
        return Ok(());
    }

    for (pos, instruction) in function.body.iter().enumerate() {
        for value in instruction.operands.iter().filter_map(Operand::as_value) {
            if let Some((destroyer, destroyed_at)) = destroyed.get(&root_of(value)) {
                if pos > *destroyed_at {
                    return Err(GraphError::ReadAfterDestroy {
                        value: instruction.id,
                        destroyer: *destroyer,
                    });
                }
            }
        }
    }
    Ok(())
}
