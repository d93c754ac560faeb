use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::backend::{
    error::GraphError,
    spec::{Function, Operand},
};

/// Checks that every operand is a parameter or defined earlier in the body.
pub fn validate_function_topology(function: &Function) -> Result<(), GraphError> {
    let mut available = HashSet::new();
    for id in &function.parameter_ids {
        if !available.insert(*id) {
            return Err(GraphError::Redefined(*id));
        }
    }

    for instruction in &function.body {
        for value in instruction.operands.iter().filter_map(Operand::as_value) {
            if !available.contains(&value) {
                return Err(GraphError::UseBeforeDef { value });
            }
        }
        if !available.insert(instruction.id) {
            return Err(GraphError::Redefined(instruction.id));
        }
    }

    for result in &function.result_ids {
        if !available.contains(result) {
            return Err(GraphError::UnknownValue(*result));
        }
    }
    Ok(())
}

/// Deterministic topological order of body positions.
///
/// Kahn's algorithm; among ready nodes the one earliest in the body goes first, so an
/// already-ordered body maps to the identity permutation.
pub fn toposort(function: &Function) -> Result<Vec<usize>, GraphError> {
    let params: HashSet<_> = function.parameter_ids.iter().copied().collect();
    let pos_of: HashMap<_, _> = function
        .body
        .iter()
        .enumerate()
        .map(|(pos, inst)| (inst.id, pos))
        .collect();

    let mut pending = vec![0usize; function.body.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); function.body.len()];
    for (pos, instruction) in function.body.iter().enumerate() {
        for value in instruction.operands.iter().filter_map(Operand::as_value) {
            if let Some(&producer) = pos_of.get(&value) {
                pending[pos] += 1;
                dependents[producer].push(pos);
            } else if !params.contains(&value) {
                return Err(GraphError::UnknownValue(value));
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(pos, _)| Reverse(pos))
        .collect();
    let mut order = Vec::with_capacity(function.body.len());
    while let Some(Reverse(pos)) = ready.pop() {
        order.push(pos);
        for &dependent in &dependents[pos] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() != function.body.len() {
        let stuck = pending
            .iter()
            .position(|count| *count > 0)
            .map(|pos| function.body[pos].id);
        if let Some(value) = stuck {
            return Err(GraphError::Cyclic(value));
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ir_utils::tensor_type;
    use crate::backend::spec::{
        DType, ElementwiseUnaryOp, Instruction, Operation, ValueId,
    };

    fn neg(id: u32, input: u32) -> Instruction {
        Instruction {
            id: ValueId(id),
            op: Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg),
            operands: vec![Operand::Value(ValueId(input))],
            output: tensor_type(DType::F32, &[Some(2)]),
        }
    }

    fn function(body: Vec<Instruction>, result: u32) -> Function {
        Function {
            name: "f".into(),
            parameters: vec![tensor_type(DType::F32, &[Some(2)])],
            parameter_ids: vec![ValueId(0)],
            results: vec![tensor_type(DType::F32, &[Some(2)])],
            body,
            result_ids: vec![ValueId(result)],
        }
    }

    #[test]
    fn orders_out_of_order_body() {
        let f = function(vec![neg(2, 1), neg(1, 0)], 2);
        assert!(validate_function_topology(&f).is_err());
        assert_eq!(toposort(&f).unwrap(), vec![1, 0]);
    }

    #[test]
    fn detects_cycles() {
        let f = function(vec![neg(1, 2), neg(2, 1)], 2);
        assert!(matches!(toposort(&f), Err(GraphError::Cyclic(_))));
    }
}
