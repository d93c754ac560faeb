use std::collections::HashSet;

use crate::backend::{
    error::PassError,
    optimizer::{FunctionPass, OptimizeContext, PassResult},
    spec::{Function, Operand, ValueId},
};

/// Removes nodes that do not contribute to any function result.
///
/// The body is topologically ordered, so a single backward sweep sees every reader of a
/// value before the value's producer.
#[derive(Default)]
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    pub const NAME: &'static str = "dce";
}

impl FunctionPass for DeadCodeEliminationPass {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<PassResult, PassError> {
        cx.record_pass_run();
        let mut live: HashSet<ValueId> = function.result_ids.iter().copied().collect();
        let mut keep = vec![false; function.body.len()];
        for (slot, instruction) in function.body.iter().enumerate().rev() {
            if live.contains(&instruction.id) {
                keep[slot] = true;
                live.extend(instruction.operands.iter().filter_map(Operand::as_value));
            }
        }

        let before = function.body.len();
        let mut slots = keep.into_iter();
        function.body.retain(|_| slots.next().unwrap_or(true));
        let erased_insts = before - function.body.len();

        Ok(PassResult {
            changed: erased_insts > 0,
            erased_insts,
            ..PassResult::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        builder::GraphBuilder,
        ir_utils::tensor_type,
        spec::{DType, ElementwiseUnaryOp, Operation},
    };

    #[test]
    fn drops_chains_that_feed_no_result() {
        let mut builder = GraphBuilder::new();
        let x = builder.add_parameter(tensor_type(DType::F32, &[Some(3)]));
        let neg = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);
        let dead = builder.add_node(neg.clone(), &[x]).unwrap();
        builder.add_node(neg.clone(), &[dead]).unwrap();
        let out = builder.add_node(neg, &[x]).unwrap();
        let mut function = builder.finish("f", vec![out]).unwrap();

        let result = DeadCodeEliminationPass
            .run(&mut function, &mut OptimizeContext::default())
            .unwrap();
        assert_eq!(result.erased_insts, 2);
        assert_eq!(function.body.len(), 1);
        assert_eq!(function.body[0].id, out);
    }
}
