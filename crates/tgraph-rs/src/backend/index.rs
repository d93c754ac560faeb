//! Use-def tables kept beside a function body while it is being rewritten.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::backend::{
    error::GraphError,
    spec::{Function, Instruction, Operand, ValueId, ValueType},
};

/// Stable node identifier; survives insertions, erasures and reordering of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct InstId(pub u32);

#[derive(Debug, Clone)]
struct NodeEntry {
    value: ValueId,
    pos: usize,
    /// Bumped whenever the node's operation or operands change.
    version: u32,
}

#[derive(Debug, Clone)]
struct ValueEntry {
    ty: ValueType,
    /// `None` for graph inputs.
    producer: Option<InstId>,
    /// One entry per operand slot, so a node reading the value twice is listed twice.
    readers: SmallVec<[InstId; 4]>,
}

/// Node positions and value producers/readers for one function.
#[derive(Debug, Clone, Default)]
pub struct UseDefIndex {
    nodes: HashMap<InstId, NodeEntry>,
    values: HashMap<ValueId, ValueEntry>,
    next_inst: u32,
    next_value: u32,
}

impl UseDefIndex {
    /// Indexes `function`, rejecting redefined ids and operands or results that name no value.
    ///
    /// Operands may still point forward in the body; ordering is checked by
    /// [`crate::backend::topology`].
    pub fn build(function: &Function) -> Result<Self, GraphError> {
        let mut index = Self::default();
        for (id, ty) in function.parameter_ids.iter().zip(&function.parameters) {
            index.define(*id, ty.clone(), None)?;
        }
        for (pos, instruction) in function.body.iter().enumerate() {
            let inst = InstId(pos as u32);
            index.define(instruction.id, instruction.output.clone(), Some(inst))?;
            index.nodes.insert(
                inst,
                NodeEntry {
                    value: instruction.id,
                    pos,
                    version: 0,
                },
            );
        }
        for (pos, instruction) in function.body.iter().enumerate() {
            index.add_reads(InstId(pos as u32), instruction)?;
        }
        if let Some(missing) = function
            .result_ids
            .iter()
            .find(|id| !index.values.contains_key(id))
        {
            return Err(GraphError::UnknownValue(*missing));
        }
        index.next_inst = function.body.len() as u32;
        index.next_value = index.values.keys().map(|id| id.0 + 1).max().unwrap_or(0);
        Ok(index)
    }

    pub fn position(&self, inst: InstId) -> Option<usize> {
        self.nodes.get(&inst).map(|node| node.pos)
    }

    pub fn type_of(&self, value: ValueId) -> Option<&ValueType> {
        self.values.get(&value).map(|entry| &entry.ty)
    }

    /// Node producing `value`; `None` for graph inputs and unknown ids.
    pub fn inst_of(&self, value: ValueId) -> Option<InstId> {
        self.values.get(&value).and_then(|entry| entry.producer)
    }

    pub fn is_param(&self, value: ValueId) -> bool {
        self.values
            .get(&value)
            .is_some_and(|entry| entry.producer.is_none())
    }

    pub fn users_of(&self, value: ValueId) -> &[InstId] {
        self.values
            .get(&value)
            .map_or(&[], |entry| entry.readers.as_slice())
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.nodes.contains_key(&inst)
    }

    pub fn version(&self, inst: InstId) -> Option<u32> {
        self.nodes.get(&inst).map(|node| node.version)
    }

    /// Live nodes sorted by body position.
    pub fn ordered_inst_ids(&self) -> Vec<InstId> {
        let mut ids: Vec<InstId> = self.nodes.keys().copied().collect();
        ids.sort_by_key(|inst| self.nodes[inst].pos);
        ids
    }

    /// Reserves ids for a node that is about to be inserted.
    pub(crate) fn reserve(&mut self) -> (InstId, ValueId) {
        let ids = (InstId(self.next_inst), ValueId(self.next_value));
        self.next_inst += 1;
        self.next_value += 1;
        ids
    }

    /// Records `instruction` as node `inst` at body position `pos`, shifting later nodes.
    pub(crate) fn insert_instruction(
        &mut self,
        inst: InstId,
        pos: usize,
        instruction: &Instruction,
    ) -> Result<(), GraphError> {
        if let Some(missing) = instruction
            .operands
            .iter()
            .filter_map(Operand::as_value)
            .find(|value| !self.values.contains_key(value))
        {
            return Err(GraphError::UnknownValue(missing));
        }
        self.define(instruction.id, instruction.output.clone(), Some(inst))?;
        for node in self.nodes.values_mut().filter(|node| node.pos >= pos) {
            node.pos += 1;
        }
        self.nodes.insert(
            inst,
            NodeEntry {
                value: instruction.id,
                pos,
                version: 0,
            },
        );
        self.add_reads(inst, instruction)
    }

    /// Forgets node `inst`, whose body entry was `instruction`, and closes the gap it leaves.
    pub(crate) fn remove_instruction(&mut self, inst: InstId, instruction: &Instruction) {
        let Some(node) = self.nodes.remove(&inst) else {
            return;
        };
        for other in self.nodes.values_mut().filter(|other| other.pos > node.pos) {
            other.pos -= 1;
        }
        self.values.remove(&node.value);
        for value in instruction.operands.iter().filter_map(Operand::as_value) {
            self.drop_read(value, inst);
        }
    }

    /// Moves one read of `from` by `inst` over to `to`.
    pub(crate) fn move_read(
        &mut self,
        inst: InstId,
        from: ValueId,
        to: ValueId,
    ) -> Result<(), GraphError> {
        let target = self
            .values
            .get_mut(&to)
            .ok_or(GraphError::UnknownValue(to))?;
        target.readers.push(inst);
        self.drop_read(from, inst);
        Ok(())
    }

    pub(crate) fn set_value_type(&mut self, value: ValueId, ty: ValueType) {
        if let Some(entry) = self.values.get_mut(&value) {
            entry.ty = ty;
        }
    }

    pub(crate) fn set_position(&mut self, inst: InstId, pos: usize) {
        if let Some(node) = self.nodes.get_mut(&inst) {
            node.pos = pos;
        }
    }

    pub(crate) fn bump_version(&mut self, inst: InstId) {
        if let Some(node) = self.nodes.get_mut(&inst) {
            node.version = node.version.wrapping_add(1);
        }
    }

    fn define(
        &mut self,
        value: ValueId,
        ty: ValueType,
        producer: Option<InstId>,
    ) -> Result<(), GraphError> {
        if self.values.contains_key(&value) {
            return Err(GraphError::Redefined(value));
        }
        self.values.insert(
            value,
            ValueEntry {
                ty,
                producer,
                readers: SmallVec::new(),
            },
        );
        Ok(())
    }

    fn add_reads(&mut self, inst: InstId, instruction: &Instruction) -> Result<(), GraphError> {
        for value in instruction.operands.iter().filter_map(Operand::as_value) {
            self.values
                .get_mut(&value)
                .ok_or(GraphError::UnknownValue(value))?
                .readers
                .push(inst);
        }
        Ok(())
    }

    fn drop_read(&mut self, value: ValueId, inst: InstId) {
        if let Some(entry) = self.values.get_mut(&value) {
            if let Some(slot) = entry.readers.iter().position(|reader| *reader == inst) {
                entry.readers.remove(slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        builder::GraphBuilder,
        ir_utils::tensor_type,
        spec::{DType, ElementwiseBinaryOp, Operation},
    };

    #[test]
    fn tracks_repeated_reads_and_positions() {
        let mut builder = GraphBuilder::new();
        let x = builder.add_parameter(tensor_type(DType::F32, &[Some(2)]));
        let add = Operation::ElementwiseBinary(ElementwiseBinaryOp::Add);
        let doubled = builder.add_node(add.clone(), &[x, x]).unwrap();
        let out = builder.add_node(add, &[doubled, x]).unwrap();
        let function = builder.finish("f", vec![out]).unwrap();

        let mut index = UseDefIndex::build(&function).unwrap();
        assert!(index.is_param(x));
        assert_eq!(index.users_of(x), &[InstId(0), InstId(0), InstId(1)]);
        assert_eq!(index.inst_of(out), Some(InstId(1)));
        assert_eq!(index.ordered_inst_ids(), vec![InstId(0), InstId(1)]);
        assert_eq!(index.reserve().1, ValueId(out.0 + 1));
    }

    #[test]
    fn rejects_redefinition() {
        let mut builder = GraphBuilder::new();
        let x = builder.add_parameter(tensor_type(DType::F32, &[Some(2)]));
        let mut function = builder.finish("f", vec![x]).unwrap();
        function.parameter_ids.push(x);
        function.parameters.push(tensor_type(DType::F32, &[Some(2)]));
        assert_eq!(
            UseDefIndex::build(&function).err(),
            Some(GraphError::Redefined(x))
        );
    }
}
