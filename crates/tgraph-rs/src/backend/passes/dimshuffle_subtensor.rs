use crate::backend::{
    error::PatternError,
    pattern::{DimShuffleOpView, OpRewritePattern},
    rewriter::ProgramRewriter,
    shape_helpers::slice_indices,
    spec::{Dimension, IndexEntry, IndexScalar, Operation, SliceSpec, SubtensorSpec},
};

use super::replace_root;

/// Scalar index equivalent to a slice that selects exactly one element of an axis of `dim`.
///
/// Slices with run-time bounds are never folded: their operands still have to be read and
/// validated, e.g. a zero step must keep failing.
fn single_element_index(slice: &SliceSpec, dim: Dimension) -> Option<i64> {
    if slice.operands().next().is_some() {
        return None;
    }
    if slice.is_full() || dim == Dimension::Static(1) {
        return Some(0);
    }
    let len = dim.static_size()?;
    let bound = |value: Option<IndexScalar>| match value {
        Some(IndexScalar::Static(v)) => Some(v),
        _ => None,
    };
    let (start, _, _) = slice_indices(len, bound(slice.start), bound(slice.stop), bound(slice.step));
    Some(start)
}

/// Rewrites `indices` so the subtensor output axes in `dropped` are indexed away.
///
/// Output axis `k` is produced by the `k`-th slice entry, counting the implicit full slices
/// over trailing input axes.
fn fold_dropped_axes(
    spec: &SubtensorSpec,
    input_dims: &[Dimension],
    dropped: &[usize],
) -> Option<SubtensorSpec> {
    let mut indices = spec.indices.clone();
    let mut output_axis = 0usize;
    for (input_axis, dim) in input_dims.iter().enumerate() {
        let entry = indices
            .get(input_axis)
            .copied()
            .unwrap_or(IndexEntry::Slice(SliceSpec::full()));
        let IndexEntry::Slice(slice) = entry else {
            continue;
        };
        if dropped.contains(&output_axis) {
            let index = single_element_index(&slice, *dim)?;
            while indices.len() <= input_axis {
                indices.push(IndexEntry::Slice(SliceSpec::full()));
            }
            indices[input_axis] = IndexEntry::Scalar(IndexScalar::Static(index));
        }
        output_axis += 1;
    }
    Some(SubtensorSpec { indices })
}

/// `dimshuffle(subtensor(x, idx))` that only drops size-1 axes becomes `subtensor(x, idx')`
/// with the dropped slices turned into scalar indices.
pub struct DimShuffleOfSubtensor;

impl OpRewritePattern<DimShuffleOpView> for DimShuffleOfSubtensor {
    fn match_and_rewrite(
        &self,
        view: DimShuffleOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        if view.spec.inserts_axes() || !view.spec.preserves_order() {
            return Ok(false);
        }
        let Some(sliced) = view.input(0) else {
            return Ok(false);
        };
        let Some(sub_inst) = rewriter.inst_of(sliced) else {
            return Ok(false);
        };
        let Operation::Subtensor(sub_spec) = rewriter.op(sub_inst).clone() else {
            return Ok(false);
        };
        let Some(output_rank) = rewriter
            .type_of(sliced)
            .and_then(|ty| ty.as_tensor())
            .map(|spec| spec.rank())
        else {
            return Ok(false);
        };
        let dropped = view.spec.dropped_axes(output_rank);
        if dropped.is_empty() {
            return Ok(false);
        }
        let operands = rewriter.operands(sub_inst).to_vec();
        let Some(input_dims) = operands
            .first()
            .and_then(|operand| rewriter.operand_type(operand))
            .and_then(|ty| ty.as_tensor().map(|spec| spec.shape.dims().to_vec()))
        else {
            return Ok(false);
        };
        let Some(folded) = fold_dropped_axes(&sub_spec, &input_dims, &dropped) else {
            return Ok(false);
        };

        let new_value =
            rewriter.insert_before(view.root, Operation::Subtensor(folded), operands)?;
        replace_root(rewriter, view.root, view.result, new_value)
    }
}
