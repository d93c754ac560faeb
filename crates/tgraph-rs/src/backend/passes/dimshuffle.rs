use crate::backend::{
    error::PatternError,
    pattern::{DimShuffleOpView, OpRewritePattern},
    rewriter::ProgramRewriter,
    spec::{DimShuffleSpec, Operand, Operation, ShuffleAxis, ValueId, ValueType},
};

use super::replace_root;

pub(crate) fn tensor_rank(rewriter: &ProgramRewriter, value: ValueId) -> Option<usize> {
    match rewriter.type_of(value)? {
        ValueType::Tensor(spec) => Some(spec.rank()),
        _ => None,
    }
}

/// Applies `outer` to the output of `inner`, yielding one order over `inner`'s input.
fn compose_orders(inner: &DimShuffleSpec, outer: &DimShuffleSpec) -> Option<DimShuffleSpec> {
    let mut order = Vec::with_capacity(outer.new_order.len());
    for entry in &outer.new_order {
        match entry {
            ShuffleAxis::Broadcast => order.push(ShuffleAxis::Broadcast),
            ShuffleAxis::Axis(axis) => order.push(*inner.new_order.get(*axis)?),
        }
    }
    Some(DimShuffleSpec::new(order))
}

/// Removes dimshuffles that keep every axis in place.
pub struct EliminateIdentityDimShuffle;

impl OpRewritePattern<DimShuffleOpView> for EliminateIdentityDimShuffle {
    fn match_and_rewrite(
        &self,
        view: DimShuffleOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        let Some(src) = view.input(0) else {
            return Ok(false);
        };
        let Some(rank) = tensor_rank(rewriter, src) else {
            return Ok(false);
        };
        if !view.spec.is_identity(rank) {
            return Ok(false);
        }
        replace_root(rewriter, view.root, view.result, src)
    }
}

/// Folds `dimshuffle(dimshuffle(x, a), b)` into one dimshuffle of `x`.
pub struct CollapseDimShuffleChain;

impl OpRewritePattern<DimShuffleOpView> for CollapseDimShuffleChain {
    fn match_and_rewrite(
        &self,
        view: DimShuffleOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        let Some(inner_value) = view.input(0) else {
            return Ok(false);
        };
        let Some(inner_inst) = rewriter.inst_of(inner_value) else {
            return Ok(false);
        };
        let Operation::DimShuffle(inner_spec) = rewriter.op(inner_inst).clone() else {
            return Ok(false);
        };
        let Some(base) = rewriter.operand_value(inner_inst, 0) else {
            return Ok(false);
        };
        let Some(composed) = compose_orders(&inner_spec, &view.spec) else {
            return Ok(false);
        };

        let base_rank = tensor_rank(rewriter, base);
        if base_rank.is_some_and(|rank| composed.is_identity(rank)) {
            return replace_root(rewriter, view.root, view.result, base);
        }
        let new_value = rewriter.insert_before(
            view.root,
            Operation::DimShuffle(composed),
            vec![Operand::Value(base)],
        )?;
        replace_root(rewriter, view.root, view.result, new_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition_follows_outer_positions() {
        let inner = DimShuffleSpec::new(vec![
            ShuffleAxis::Axis(1),
            ShuffleAxis::Broadcast,
            ShuffleAxis::Axis(0),
        ]);
        let outer = DimShuffleSpec::new(vec![
            ShuffleAxis::Axis(2),
            ShuffleAxis::Axis(0),
        ]);
        let composed = compose_orders(&inner, &outer).unwrap();
        assert_eq!(
            composed.new_order,
            vec![ShuffleAxis::Axis(0), ShuffleAxis::Axis(1)]
        );
        assert!(compose_orders(&inner, &DimShuffleSpec::new(vec![ShuffleAxis::Axis(3)])).is_none());
    }
}
