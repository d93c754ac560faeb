use crate::backend::{
    error::PatternError,
    pattern::{ListMutationOpView, OpRewritePattern},
    rewriter::ProgramRewriter,
    spec::{AliasKind, Operand},
};

/// Turns a copying list mutation into its in-place form when nothing else can observe the
/// input list afterwards.
///
/// The input must be a fresh intermediate: not a graph input or output, read only by this
/// node, and not a view of another value.
pub struct PromoteListMutationInplace;

impl OpRewritePattern<ListMutationOpView> for PromoteListMutationInplace {
    fn match_and_rewrite(
        &self,
        view: ListMutationOpView,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        let Some(list) = view.input(0) else {
            return Ok(false);
        };
        if rewriter.is_param(list) || rewriter.is_result(list) || rewriter.use_count(list) != 1 {
            return Ok(false);
        }
        let read_twice = view.operands[1..]
            .iter()
            .any(|operand| *operand == Operand::Value(list));
        if read_twice {
            return Ok(false);
        }
        let owns_storage = rewriter
            .producer_op(list)
            .is_some_and(|op| matches!(op.alias(), AliasKind::Owned | AliasKind::Consumes(_)));
        if !owns_storage {
            return Ok(false);
        }
        let Some(inplace) = view.op.with_inplace(true) else {
            return Ok(false);
        };
        rewriter.set_op(view.root, inplace)?;
        Ok(true)
    }
}
