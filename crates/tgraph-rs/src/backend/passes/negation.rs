use crate::backend::{
    error::PatternError,
    pattern::{ElementwiseUnaryOpView, OpRewritePattern, ReduceOpView},
    rewriter::ProgramRewriter,
    spec::{ElementwiseUnaryOp, Operand, Operation, ReduceSpec, ValueId},
};

use super::replace_root;

const NEG: Operation = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);

/// Returns `x` when `value` is `neg(x)`.
fn negated_input(rewriter: &ProgramRewriter, value: ValueId) -> Option<ValueId> {
    let inst = rewriter.inst_of(value)?;
    if *rewriter.op(inst) != NEG {
        return None;
    }
    rewriter.operand_value(inst, 0)
}

/// `-(-x) -> x`.
pub struct EliminateDoubleNegation;

impl OpRewritePattern<ElementwiseUnaryOpView> for EliminateDoubleNegation {
    fn match_and_rewrite(
        &self,
        view: ElementwiseUnaryOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        if view.op != ElementwiseUnaryOp::Neg {
            return Ok(false);
        }
        let Some(inner) = view.input(0) else {
            return Ok(false);
        };
        let Some(base) = negated_input(rewriter, inner) else {
            return Ok(false);
        };
        replace_root(rewriter, view.root, view.result, base)
    }
}

/// `max(-x) -> -min(x)` and `min(-x) -> -max(x)` when the negation has no other reader.
pub struct ReduceOfNegation;

impl OpRewritePattern<ReduceOpView> for ReduceOfNegation {
    fn match_and_rewrite(
        &self,
        view: ReduceOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        let Some(dual) = view.spec.kind.negated_dual() else {
            return Ok(false);
        };
        let Some(neg) = view.input(0) else {
            return Ok(false);
        };
        if rewriter.use_count(neg) != 1 {
            return Ok(false);
        }
        let Some(base) = negated_input(rewriter, neg) else {
            return Ok(false);
        };
        let reduced = rewriter.insert_before(
            view.root,
            Operation::Reduce(ReduceSpec {
                kind: dual,
                ..view.spec.clone()
            }),
            vec![Operand::Value(base)],
        )?;
        let negated = rewriter.insert_before(view.root, NEG, vec![Operand::Value(reduced)])?;
        replace_root(rewriter, view.root, view.result, negated)
    }
}

/// `-max(-x) -> min(x)` and `-min(-x) -> max(x)` in a single visit of the outer negation.
pub struct LocalMaxToMin;

impl OpRewritePattern<ElementwiseUnaryOpView> for LocalMaxToMin {
    fn benefit(&self) -> u16 {
        2
    }

    fn match_and_rewrite(
        &self,
        view: ElementwiseUnaryOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        if view.op != ElementwiseUnaryOp::Neg {
            return Ok(false);
        }
        let Some(reduced) = view.input(0) else {
            return Ok(false);
        };
        let Some(reduce_inst) = rewriter.inst_of(reduced) else {
            return Ok(false);
        };
        let Operation::Reduce(spec) = rewriter.op(reduce_inst).clone() else {
            return Ok(false);
        };
        let Some(dual) = spec.kind.negated_dual() else {
            return Ok(false);
        };
        let Some(neg) = rewriter.operand_value(reduce_inst, 0) else {
            return Ok(false);
        };
        let Some(base) = negated_input(rewriter, neg) else {
            return Ok(false);
        };
        let replacement = rewriter.insert_before(
            view.root,
            Operation::Reduce(ReduceSpec { kind: dual, ..spec }),
            vec![Operand::Value(base)],
        )?;
        replace_root(rewriter, view.root, view.result, replacement)
    }
}
