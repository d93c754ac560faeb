use std::collections::HashMap;

use crate::backend::{
    error::{GraphError, TypeError},
    infer::infer_output,
    spec::{Function, Instruction, Operand, Operation, TensorLiteral, ValueId, ValueType},
};

/// Type-checked builder for constructing functions programmatically.
///
/// Every node goes through [`infer_output`], so a finished function always satisfies the
/// operation type contracts.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    next_value_id: u32,
    parameters: Vec<(ValueId, ValueType)>,
    instructions: Vec<Instruction>,
    value_types: HashMap<ValueId, ValueType>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(&mut self, ty: ValueType) -> ValueId {
        let id = self.fresh_id();
        self.value_types.insert(id, ty.clone());
        self.parameters.push((id, ty));
        id
    }

    /// Appends a node after checking its operands against the operation's type contract.
    pub fn add_node(&mut self, op: Operation, operands: &[ValueId]) -> Result<ValueId, TypeError> {
        let operands = operands
            .iter()
            .copied()
            .map(Operand::Value)
            .collect::<Vec<_>>();
        self.add_node_with_operands(op, operands)
    }

    /// Like [`GraphBuilder::add_node`] but accepts inline literal operands.
    pub fn add_node_with_operands(
        &mut self,
        op: Operation,
        operands: Vec<Operand>,
    ) -> Result<ValueId, TypeError> {
        let mut types = Vec::with_capacity(operands.len());
        for (index, operand) in operands.iter().enumerate() {
            let ty = match operand {
                Operand::Value(value) => self.value_types.get(value).cloned().ok_or_else(|| {
                    TypeError::invalid(op.name(), format!("operand {index} ({value}) is undefined"))
                })?,
                Operand::Literal(literal) => ValueType::Tensor(literal.spec.clone()),
            };
            types.push(ty);
        }
        let output = infer_output(&op, &types)?;
        let id = self.fresh_id();
        self.value_types.insert(id, output.clone());
        self.instructions.push(Instruction {
            id,
            op,
            operands,
            output,
        });
        Ok(id)
    }

    pub fn constant(&mut self, literal: TensorLiteral) -> ValueId {
        let id = self.fresh_id();
        let output = ValueType::Tensor(literal.spec.clone());
        self.value_types.insert(id, output.clone());
        self.instructions.push(Instruction {
            id,
            op: Operation::Constant(literal),
            operands: Vec::new(),
            output,
        });
        id
    }

    pub fn value_type(&self, id: ValueId) -> Option<&ValueType> {
        self.value_types.get(&id)
    }

    pub fn finish(
        self,
        name: impl Into<String>,
        result_ids: Vec<ValueId>,
    ) -> Result<Function, GraphError> {
        let mut results = Vec::with_capacity(result_ids.len());
        for id in &result_ids {
            let ty = self
                .value_types
                .get(id)
                .ok_or(GraphError::UnknownValue(*id))?
                .clone();
            results.push(ty);
        }
        let (parameter_ids, parameters): (Vec<_>, Vec<_>) = self.parameters.into_iter().unzip();
        Ok(Function {
            name: name.into(),
            parameters,
            parameter_ids,
            results,
            body: self.instructions,
            result_ids,
        })
    }

    fn fresh_id(&mut self) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        id
    }
}
