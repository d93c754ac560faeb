use std::collections::{hash_map::Entry, HashMap};

use crate::backend::{
    error::PassError,
    optimizer::OptimizeContext,
    rewriter::ProgramRewriter,
    spec::{Function, Operand, Operation, ValueId, ValueType},
};

use super::{FunctionPass, FunctionPassResult};

/// Everything that determines a node's value.
#[derive(PartialEq, Eq, Hash)]
struct NodeKey {
    op: Operation,
    operands: Vec<Operand>,
    output: ValueType,
}

/// Merges nodes that compute the same value.
///
/// Walks the body in order and redirects every later duplicate of a node to its first
/// occurrence. Nodes that destroy an operand are left alone.
#[derive(Default)]
pub struct CommonSubexpressionEliminationPass;

impl CommonSubexpressionEliminationPass {
    pub const NAME: &'static str = "cse";
}

impl FunctionPass for CommonSubexpressionEliminationPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<FunctionPassResult, PassError> {
        cx.record_pass_run();
        let mut rewriter = ProgramRewriter::new(function)?;
        let mut first_seen: HashMap<NodeKey, ValueId> = HashMap::new();
        let mut result = FunctionPassResult::default();

        for inst in rewriter.insts_in_order() {
            result.iterations += 1;
            let op = rewriter.op(inst);
            if op.is_inplace() {
                continue;
            }
            let value = rewriter.value_of(inst);
            let Some(output) = rewriter.type_of(value).cloned() else {
                continue;
            };
            let key = NodeKey {
                op: op.clone(),
                operands: rewriter.operands(inst).to_vec(),
                output,
            };
            match first_seen.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
                Entry::Occupied(slot) => {
                    rewriter.replace(value, *slot.get())?;
                    rewriter.erase_inst(inst)?;
                    result.changed = true;
                    result.rewrites_applied += 1;
                    result.erased_insts += 1;
                }
            }
        }

        Ok(result)
    }
}
