//! Rewrite rules plus the CSE and DCE function passes.
//!
//! Rules are only run through the passes of a [`RewriteDatabase`](crate::backend::database::RewriteDatabase).

mod cse;
mod dce;
mod dimshuffle;
mod dimshuffle_alloc;
mod dimshuffle_reshape;
mod dimshuffle_subtensor;
mod list_inplace;
mod max_and_argmax;
mod negation;

pub use cse::CommonSubexpressionEliminationPass;
pub use dce::DeadCodeEliminationPass;
pub use dimshuffle::{CollapseDimShuffleChain, EliminateIdentityDimShuffle};
pub use dimshuffle_alloc::{AllocOfDimShuffle, DimShuffleOfAlloc};
pub use dimshuffle_reshape::{DimShuffleOfReshape, ReshapeOfDimShuffle};
pub use dimshuffle_subtensor::DimShuffleOfSubtensor;
pub use list_inplace::PromoteListMutationInplace;
pub use max_and_argmax::{MaxAndArgmaxToArgMax, MaxAndArgmaxToReduce};
pub use negation::{EliminateDoubleNegation, LocalMaxToMin, ReduceOfNegation};

pub use crate::backend::optimizer::{FunctionPass, PassResult as FunctionPassResult};
use crate::backend::{
    driver::GreedyRewriteStats,
    error::PatternError,
    index::InstId,
    rewriter::ProgramRewriter,
    spec::ValueId,
};

pub(crate) fn stats_to_result(stats: GreedyRewriteStats) -> FunctionPassResult {
    FunctionPassResult {
        changed: stats.applied > 0 || stats.dce_removed > 0,
        iterations: stats.iterations,
        rewrites_applied: stats.applied,
        erased_insts: stats.dce_removed,
    }
}

/// Replaces `old` (the value of `root`) with `new` and erases `root`.
pub(crate) fn replace_root(
    rewriter: &mut ProgramRewriter,
    root: InstId,
    old: ValueId,
    new: ValueId,
) -> Result<bool, PatternError> {
    rewriter.replace(old, new)?;
    rewriter.erase_inst(root)?;
    Ok(true)
}
