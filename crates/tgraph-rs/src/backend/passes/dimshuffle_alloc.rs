use crate::backend::{
    error::PatternError,
    pattern::{AllocOpView, DimShuffleOpView, OpRewritePattern},
    rewriter::ProgramRewriter,
    spec::{AllocSpec, DimShuffleSpec, ExtentSource, Operand, Operation, ShuffleAxis},
};

use super::{dimshuffle::tensor_rank, replace_root};

/// Number of leading broadcast axes when `spec` is `('x', ..., 'x', 0, 1, ..., rank-1)`.
fn left_pad_width(spec: &DimShuffleSpec, rank: usize) -> Option<usize> {
    let pad = spec
        .new_order
        .iter()
        .take_while(|entry| **entry == ShuffleAxis::Broadcast)
        .count();
    let rest = &spec.new_order[pad..];
    let is_pad = rest.len() == rank
        && rest
            .iter()
            .enumerate()
            .all(|(pos, entry)| *entry == ShuffleAxis::Axis(pos));
    is_pad.then_some(pad)
}

/// `dimshuffle(alloc(x, shape))` that only inserts broadcast axes ahead of `x`'s own axes
/// becomes a single alloc with a longer shape.
pub struct DimShuffleOfAlloc;

impl OpRewritePattern<DimShuffleOpView> for DimShuffleOfAlloc {
    fn match_and_rewrite(
        &self,
        view: DimShuffleOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        let Some(alloc_value) = view.input(0) else {
            return Ok(false);
        };
        let Some(alloc_inst) = rewriter.inst_of(alloc_value) else {
            return Ok(false);
        };
        let Operation::Alloc(alloc_spec) = rewriter.op(alloc_inst).clone() else {
            return Ok(false);
        };
        let alloc_operands = rewriter.operands(alloc_inst).to_vec();
        let Some(value_rank) = alloc_operands
            .first()
            .and_then(|operand| rewriter.operand_type(operand))
            .and_then(|ty| ty.as_tensor().map(|spec| spec.rank()))
        else {
            return Ok(false);
        };
        let target_rank = alloc_spec.shape.len();
        if !view.spec.inserts_axes() || view.spec.kept_axes() != (0..target_rank).collect::<Vec<_>>()
        {
            return Ok(false);
        }
        let lead = target_rank - value_rank;
        let first_value_axis = view
            .spec
            .new_order
            .iter()
            .position(|entry| matches!(entry, ShuffleAxis::Axis(axis) if *axis >= lead))
            .unwrap_or(view.spec.new_order.len());
        let inserts_after_value = view
            .spec
            .new_order
            .iter()
            .skip(first_value_axis)
            .any(|entry| *entry == ShuffleAxis::Broadcast);
        if inserts_after_value {
            return Ok(false);
        }

        let shape = view
            .spec
            .new_order
            .iter()
            .map(|entry| match entry {
                ShuffleAxis::Broadcast => ExtentSource::Static(1),
                ShuffleAxis::Axis(axis) => alloc_spec.shape[*axis],
            })
            .collect();
        let new_value = rewriter.insert_before(
            view.root,
            Operation::Alloc(AllocSpec { shape }),
            alloc_operands,
        )?;
        replace_root(rewriter, view.root, view.result, new_value)
    }
}

/// `alloc(dimshuffle(x), shape)` where the dimshuffle only left-pads with broadcast axes
/// becomes `alloc(x, shape)`; alloc right-aligns its value anyway.
pub struct AllocOfDimShuffle;

impl OpRewritePattern<AllocOpView> for AllocOfDimShuffle {
    fn match_and_rewrite(
        &self,
        view: AllocOpView,
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
        let Some(base) = rewriter.operand_value(shuffle_inst, 0) else {
            return Ok(false);
        };
        let Some(rank) = tensor_rank(rewriter, base) else {
            return Ok(false);
        };
        if !left_pad_width(&shuffle, rank).is_some_and(|pad| pad > 0) {
            return Ok(false);
        }

        let mut operands = view.operands.clone();
        operands[0] = Operand::Value(base);
        let new_value =
            rewriter.insert_before(view.root, Operation::Alloc(view.spec.clone()), operands)?;
        replace_root(rewriter, view.root, view.result, new_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_pad_width_requires_leading_broadcasts_only() {
        let padded = DimShuffleSpec::new(vec![
            ShuffleAxis::Broadcast,
            ShuffleAxis::Axis(0),
            ShuffleAxis::Axis(1),
        ]);
        assert_eq!(left_pad_width(&padded, 2), Some(1));
        let interleaved = DimShuffleSpec::new(vec![
            ShuffleAxis::Axis(0),
            ShuffleAxis::Broadcast,
            ShuffleAxis::Axis(1),
        ]);
        assert_eq!(left_pad_width(&interleaved, 2), None);
        let permuted = DimShuffleSpec::new(vec![ShuffleAxis::Axis(1), ShuffleAxis::Axis(0)]);
        assert_eq!(left_pad_width(&permuted, 2), None);
    }
}
