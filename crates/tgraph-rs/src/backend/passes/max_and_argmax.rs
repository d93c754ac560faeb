use crate::backend::{
    error::PatternError,
    index::InstId,
    pattern::{MaxAndArgmaxOpView, OpRewritePattern},
    rewriter::ProgramRewriter,
    spec::{ArgMaxSpec, Operand, Operation, ReduceKind, ReduceSpec, ValueId},
};

/// Tuple projections reading `value`, provided every reader is a projection of `index`.
fn sole_projections(
    rewriter: &ProgramRewriter,
    value: ValueId,
    index: usize,
) -> Option<Vec<InstId>> {
    if rewriter.is_result(value) {
        return None;
    }
    let mut users = rewriter.users_of(value).to_vec();
    users.sort_unstable();
    users.dedup();
    if users.is_empty() {
        return None;
    }
    users
        .into_iter()
        .map(|user| match rewriter.op(user) {
            Operation::GetTupleElement { index: i } if *i == index => Some(user),
            _ => None,
        })
        .collect()
}

/// Rewires every projection to `replacement`, then drops the projections and the tuple node.
fn retire_tuple(
    rewriter: &mut ProgramRewriter,
    root: InstId,
    projections: Vec<InstId>,
    replacement: ValueId,
) -> Result<bool, PatternError> {
    for projection in projections {
        let value = rewriter.value_of(projection);
        rewriter.replace(value, replacement)?;
        rewriter.erase_inst(projection)?;
    }
    rewriter.erase_inst(root)?;
    Ok(true)
}

/// `max_and_argmax(x)` whose indices are never read becomes `reduce_max(x)`.
pub struct MaxAndArgmaxToReduce;

impl OpRewritePattern<MaxAndArgmaxOpView> for MaxAndArgmaxToReduce {
    fn match_and_rewrite(
        &self,
        view: MaxAndArgmaxOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        let Some(projections) = sole_projections(rewriter, view.result, 0) else {
            return Ok(false);
        };
        let Some(input) = view.input(0) else {
            return Ok(false);
        };
        let reduced = rewriter.insert_before(
            view.root,
            Operation::Reduce(ReduceSpec {
                kind: ReduceKind::Max,
                axes: vec![view.spec.axis],
                keepdims: false,
            }),
            vec![Operand::Value(input)],
        )?;
        retire_tuple(rewriter, view.root, projections, reduced)
    }
}

/// `max_and_argmax(x)` whose values are never read becomes `argmax(x)`.
pub struct MaxAndArgmaxToArgMax;

impl OpRewritePattern<MaxAndArgmaxOpView> for MaxAndArgmaxToArgMax {
    fn match_and_rewrite(
        &self,
        view: MaxAndArgmaxOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        let Some(projections) = sole_projections(rewriter, view.result, 1) else {
            return Ok(false);
        };
        let Some(input) = view.input(0) else {
            return Ok(false);
        };
        let indices = rewriter.insert_before(
            view.root,
            Operation::ArgMax(ArgMaxSpec {
                axis: view.spec.axis,
                keepdims: false,
            }),
            vec![Operand::Value(input)],
        )?;
        retire_tuple(rewriter, view.root, projections, indices)
    }
}
