use crate::backend::{
    error::PatternError,
    pattern::{DimShuffleOpView, OpRewritePattern, ReshapeOpView},
    rewriter::ProgramRewriter,
    spec::{DimShuffleSpec, Operand, Operation, ReshapeDim, ReshapeSpec, ShuffleAxis},
};

use super::replace_root;

/// A dimshuffle that never permutes only adds or removes size-1 axes, so it does not change
/// the row-major element order.
fn keeps_element_order(spec: &DimShuffleSpec) -> bool {
    spec.preserves_order()
}

/// `reshape(dimshuffle(x), shape) -> reshape(x, shape)` for order-preserving dimshuffles.
pub struct ReshapeOfDimShuffle;

impl OpRewritePattern<ReshapeOpView> for ReshapeOfDimShuffle {
    fn match_and_rewrite(
        &self,
        view: ReshapeOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        let Some(shuffled) = view.input(0) else {
            return Ok(false);
        };
        let Some(shuffle_inst) = rewriter.inst_of(shuffled) else {
            return Ok(false);
        };
        let Operation::DimShuffle(shuffle) = rewriter.op(shuffle_inst).clone() else {
            return Ok(false);
        };
        if !keeps_element_order(&shuffle) {
            return Ok(false);
        }
        let Some(base) = rewriter.operand_value(shuffle_inst, 0) else {
            return Ok(false);
        };
        let mut operands = view.operands.clone();
        operands[0] = Operand::Value(base);
        let new_value =
            rewriter.insert_before(view.root, Operation::Reshape(view.spec.clone()), operands)?;
        replace_root(rewriter, view.root, view.result, new_value)
    }
}

/// `dimshuffle(reshape(x, shape)) -> reshape(x, shape')` for order-preserving dimshuffles;
/// inserted axes become explicit 1s and dropped axes disappear from the target.
pub struct DimShuffleOfReshape;

impl OpRewritePattern<DimShuffleOpView> for DimShuffleOfReshape {
    fn match_and_rewrite(
        &self,
        view: DimShuffleOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        if !keeps_element_order(&view.spec) {
            return Ok(false);
        }
        let Some(reshaped) = view.input(0) else {
            return Ok(false);
        };
        let Some(reshape_inst) = rewriter.inst_of(reshaped) else {
            return Ok(false);
        };
        let Operation::Reshape(reshape) = rewriter.op(reshape_inst).clone() else {
            return Ok(false);
        };
        let new_shape = view
            .spec
            .new_order
            .iter()
            .map(|entry| match entry {
                ShuffleAxis::Broadcast => ReshapeDim::Explicit(1),
                ShuffleAxis::Axis(axis) => reshape.new_shape[*axis],
            })
            .collect::<Vec<_>>();
        let operands = rewriter.operands(reshape_inst).to_vec();
        let new_value = rewriter.insert_before(
            view.root,
            Operation::Reshape(ReshapeSpec { new_shape }),
            operands,
        )?;
        replace_root(rewriter, view.root, view.result, new_value)
    }
}
