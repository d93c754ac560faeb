use std::collections::HashSet;

use crate::backend::{
    error::GraphError,
    index::{InstId, UseDefIndex},
    infer::infer_output,
    spec::{Function, Instruction, Operand, Operation, TensorLiteral, ValueId, ValueType},
    topology,
};

/// Mutable graph editor with stable instruction identifiers and use-list accounting.
pub struct ProgramRewriter<'a> {
    pub func: &'a mut Function,
    indices: UseDefIndex,
}

impl<'a> ProgramRewriter<'a> {
    /// Creates a rewriter for the function, indexing its body.
    pub fn new(func: &'a mut Function) -> Result<Self, GraphError> {
        let indices = UseDefIndex::build(func)?;
        Ok(Self { func, indices })
    }

    /// Returns the operation referenced by `inst`.
    ///
    /// Panics if `inst` was erased; callers obtain ids from this rewriter.
    pub fn op(&self, inst: InstId) -> &Operation {
        &self.instruction(inst).op
    }

    pub fn operands(&self, inst: InstId) -> &[Operand] {
        &self.instruction(inst).operands
    }

    /// Returns the value operand at `index`, skipping literals.
    pub fn operand_value(&self, inst: InstId, index: usize) -> Option<ValueId> {
        self.operands(inst).get(index).and_then(Operand::as_value)
    }

    pub fn instruction(&self, inst: InstId) -> &Instruction {
        let pos = self
            .indices
            .position(inst)
            .expect("instruction id must be valid");
        &self.func.body[pos]
    }

    pub fn value_of(&self, inst: InstId) -> ValueId {
        self.instruction(inst).id
    }

    pub fn type_of(&self, value: ValueId) -> Option<&ValueType> {
        self.indices.type_of(value)
    }

    /// Returns the type of an operand, including inline literals.
    pub fn operand_type(&self, operand: &Operand) -> Option<ValueType> {
        match operand {
            Operand::Value(value) => self.type_of(*value).cloned(),
            Operand::Literal(literal) => Some(ValueType::Tensor(literal.spec.clone())),
        }
    }

    pub fn inst_of(&self, value: ValueId) -> Option<InstId> {
        self.indices.inst_of(value)
    }

    /// Returns the operation producing `value`, or `None` for parameters.
    pub fn producer_op(&self, value: ValueId) -> Option<&Operation> {
        self.inst_of(value).map(|inst| self.op(inst))
    }

    pub fn users_of(&self, value: ValueId) -> &[InstId] {
        self.indices.users_of(value)
    }

    /// Number of distinct readers of `value`, counting each function result slot as one.
    pub fn use_count(&self, value: ValueId) -> usize {
        let mut users = self.users_of(value).to_vec();
        users.sort_unstable();
        users.dedup();
        users.len() + self.func.result_ids.iter().filter(|id| **id == value).count()
    }

    pub fn is_param(&self, value: ValueId) -> bool {
        self.indices.is_param(value)
    }

    pub fn is_result(&self, value: ValueId) -> bool {
        self.func.result_ids.contains(&value)
    }

    pub fn contains(&self, inst: InstId) -> bool {
        self.indices.contains(inst)
    }

    pub fn version(&self, inst: InstId) -> Option<u32> {
        self.indices.version(inst)
    }

    pub fn insts_in_order(&self) -> Vec<InstId> {
        self.indices.ordered_inst_ids()
    }

    /// Rewires every consumer of `from` (and every result slot) to read `to` instead.
    ///
    /// Fails without modifying the graph if the types cannot describe the same value or if
    /// `to` depends on `from`.
    pub fn replace(&mut self, from: ValueId, to: ValueId) -> Result<(), GraphError> {
        if from == to {
            return Ok(());
        }
        let from_ty = self.type_of(from).ok_or(GraphError::UnknownValue(from))?;
        let to_ty = self.type_of(to).ok_or(GraphError::UnknownValue(to))?;
        if !from_ty.compatible_with(to_ty) {
            return Err(GraphError::IncompatibleReplacement { from, to });
        }
        if self.depends_on(to, from) {
            return Err(GraphError::Cycle { from, to });
        }
        let to_ty = to_ty.clone();

        let mut consumers = self.indices.users_of(from).to_vec();
        consumers.sort_unstable();
        consumers.dedup();
        let to_pos = self.inst_of(to).and_then(|inst| self.indices.position(inst));
        let mut needs_reorder = false;
        for inst in consumers {
            let pos = self
                .indices
                .position(inst)
                .ok_or(GraphError::UnknownValue(from))?;
            let instruction = &mut self.func.body[pos];
            for operand in &mut instruction.operands {
                if matches!(operand, Operand::Value(value) if *value == from) {
                    *operand = Operand::Value(to);
                    self.indices.move_read(inst, from, to)?;
                }
            }
            needs_reorder |= to_pos.is_some_and(|to_pos| to_pos > pos);
            self.bump_version(inst);
        }

        for (slot, result) in self.func.result_ids.iter_mut().enumerate() {
            if *result == from {
                *result = to;
                self.func.results[slot] = to_ty.clone();
            }
        }

        if needs_reorder {
            self.toposort()?;
        }
        Ok(())
    }

    /// Erases the instruction identified by `inst`, which must be unused.
    pub fn erase_inst(&mut self, inst: InstId) -> Result<(), GraphError> {
        let value = self.value_of(inst);
        if !self.indices.users_of(value).is_empty() || self.is_result(value) {
            return Err(GraphError::StillUsed(value));
        }
        let pos = self
            .indices
            .position(inst)
            .ok_or(GraphError::UnknownValue(value))?;
        let instruction = self.func.body.remove(pos);
        self.indices.remove_instruction(inst, &instruction);
        Ok(())
    }

    /// Inserts a node before `at`, inferring its output type from the operands.
    pub fn insert_before(
        &mut self,
        at: InstId,
        op: Operation,
        operands: Vec<Operand>,
    ) -> Result<ValueId, GraphError> {
        let mut types = Vec::with_capacity(operands.len());
        for operand in &operands {
            let ty = match operand {
                Operand::Value(value) => self
                    .type_of(*value)
                    .cloned()
                    .ok_or(GraphError::UnknownValue(*value))?,
                Operand::Literal(literal) => ValueType::Tensor(literal.spec.clone()),
            };
            types.push(ty);
        }
        let output = infer_output(&op, &types)?;
        let pos = self
            .indices
            .position(at)
            .expect("insertion point must exist");
        self.insert_at_pos(pos, op, operands, output)
    }

    /// Materialises a literal as a `Constant` node before `at`.
    pub fn materialize_constant(
        &mut self,
        at: InstId,
        literal: TensorLiteral,
    ) -> Result<ValueId, GraphError> {
        self.insert_before(at, Operation::Constant(literal), Vec::new())
    }

    /// Switches the operation of `inst` in place; the new operation must infer the same type.
    pub fn set_op(&mut self, inst: InstId, op: Operation) -> Result<(), GraphError> {
        let types = self
            .operands(inst)
            .iter()
            .map(|operand| self.operand_type(operand))
            .collect::<Option<Vec<_>>>()
            .ok_or(GraphError::UnknownValue(self.value_of(inst)))?;
        let output = infer_output(&op, &types)?;
        let value = self.value_of(inst);
        if !self.instruction(inst).output.compatible_with(&output) {
            return Err(GraphError::IncompatibleReplacement {
                from: value,
                to: value,
            });
        }
        let pos = self
            .indices
            .position(inst)
            .ok_or(GraphError::UnknownValue(value))?;
        self.func.body[pos].op = op;
        self.func.body[pos].output = output.clone();
        self.indices.set_value_type(value, output);
        self.bump_version(inst);
        Ok(())
    }

    /// Reorders the body topologically, keeping instruction ids stable.
    pub fn toposort(&mut self) -> Result<(), GraphError> {
        let order = topology::toposort(self.func)?;
        if order.iter().enumerate().all(|(new, old)| new == *old) {
            return Ok(());
        }
        let ids = self.insts_in_order();
        let mut body = std::mem::take(&mut self.func.body)
            .into_iter()
            .map(Some)
            .collect::<Vec<_>>();
        let mut reordered = Vec::with_capacity(body.len());
        for (new_pos, old_pos) in order.into_iter().enumerate() {
            if let Some(instruction) = body[old_pos].take() {
                reordered.push(instruction);
            }
            self.indices.set_position(ids[old_pos], new_pos);
        }
        self.func.body = reordered;
        Ok(())
    }

    /// Verifies use-before-def and SSA invariants after mutations.
    pub fn verify(&self) -> bool {
        UseDefIndex::build(self.func).is_ok()
            && topology::validate_function_topology(self.func).is_ok()
    }

    pub fn bump_version(&mut self, inst: InstId) {
        self.indices.bump_version(inst);
    }

    /// True when `value` transitively reads `target`.
    fn depends_on(&self, value: ValueId, target: ValueId) -> bool {
        let mut stack = vec![value];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(inst) = self.inst_of(current) {
                stack.extend(self.operands(inst).iter().filter_map(Operand::as_value));
            }
        }
        false
    }

    fn insert_at_pos(
        &mut self,
        pos: usize,
        op: Operation,
        operands: Vec<Operand>,
        output: ValueType,
    ) -> Result<ValueId, GraphError> {
        let (inst_id, value_id) = self.indices.reserve();
        let instruction = Instruction {
            id: value_id,
            op,
            operands,
            output,
        };
        self.indices.insert_instruction(inst_id, pos, &instruction)?;
        self.func.body.insert(pos, instruction);
        Ok(value_id)
    }
}
