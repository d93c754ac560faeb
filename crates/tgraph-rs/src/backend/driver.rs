use std::collections::{HashMap, VecDeque};

use crate::backend::{
    error::{GraphError, PassError, RewriteError},
    index::InstId,
    pattern::{FrozenPatternSet, Pattern},
    rewriter::ProgramRewriter,
    spec::Function,
};

/// Rewrites one pattern pass may apply before it stops, so rules that undo each other cannot
/// loop forever.
pub const DEFAULT_MAX_REWRITES: usize = 10_000;

#[derive(Debug, Clone)]
pub struct GreedyConfig {
    pub max_iterations: usize,
    pub enable_dce: bool,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_REWRITES,
            enable_dce: true,
        }
    }
}

/// How a pattern pass traverses the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// One sweep from outputs toward inputs.
    OutToIn,
    /// Repeat until no pattern applies.
    FixedPoint,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GreedyRewriteStats {
    pub iterations: usize,
    pub applied: usize,
    pub dce_removed: usize,
    /// The pass stopped at `max_iterations` with work left.
    pub capped: bool,
}

pub fn apply_patterns(
    func: &mut Function,
    patterns: &FrozenPatternSet,
    strategy: Strategy,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats, PassError> {
    match strategy {
        Strategy::OutToIn => apply_patterns_out_to_in(func, patterns, cfg),
        Strategy::FixedPoint => apply_patterns_greedily(func, patterns, cfg),
    }
}

/// Applies patterns until none matches (or `max_iterations` rewrites have been applied).
///
/// The worklist is re-seeded from the whole body after every successful rewrite. A pattern
/// that declined a node is not retried on it until the node's version changes.
pub fn apply_patterns_greedily(
    func: &mut Function,
    patterns: &FrozenPatternSet,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats, PassError> {
    let mut rewriter = ProgramRewriter::new(func)?;
    let mut stats = GreedyRewriteStats::default();

    if !patterns.is_empty() {
        let mut worklist = VecDeque::new();
        seed_worklist(&rewriter, &mut worklist);
        let mut failure_cache: HashMap<(usize, InstId), u32> = HashMap::new();

        while let Some(inst) = worklist.pop_front() {
            if stats.iterations >= cfg.max_iterations {
                stats.capped = true;
                break;
            }
            if !rewriter.contains(inst) {
                continue;
            }

            let version = rewriter.version(inst).unwrap_or(0);
            let op_snapshot = rewriter.op(inst).clone();

            for (idx, pattern) in patterns.matching(&op_snapshot) {
                if failure_cache.get(&(idx, inst)).copied() == Some(version) {
                    continue;
                }
                if try_pattern(pattern, inst, &mut rewriter)? {
                    stats.applied += 1;
                    stats.iterations = stats.iterations.saturating_add(1);
                    failure_cache.retain(|(_, cached_inst), _| *cached_inst != inst);
                    seed_worklist(&rewriter, &mut worklist);
                    break;
                }
                failure_cache.insert((idx, inst), version);
            }
        }
    }

    finish(&mut rewriter, stats, cfg)
}

/// Visits every node once, from the outputs toward the inputs, applying the first pattern
/// that matches. Nodes created during the pass are not visited.
pub fn apply_patterns_out_to_in(
    func: &mut Function,
    patterns: &FrozenPatternSet,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats, PassError> {
    let mut rewriter = ProgramRewriter::new(func)?;
    let mut stats = GreedyRewriteStats::default();

    if !patterns.is_empty() {
        let snapshot = rewriter.insts_in_order();
        for inst in snapshot.into_iter().rev() {
            if stats.iterations >= cfg.max_iterations {
                stats.capped = true;
                break;
            }
            if !rewriter.contains(inst) {
                continue;
            }
            let op_snapshot = rewriter.op(inst).clone();
            for (_, pattern) in patterns.matching(&op_snapshot) {
                if try_pattern(pattern, inst, &mut rewriter)? {
                    stats.applied += 1;
                    stats.iterations = stats.iterations.saturating_add(1);
                    break;
                }
            }
        }
    }

    finish(&mut rewriter, stats, cfg)
}

fn finish(
    rewriter: &mut ProgramRewriter,
    mut stats: GreedyRewriteStats,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats, PassError> {
    if stats.capped {
        log::warn!(
            target: "tgraph::rewrite",
            "pattern pass stopped after {} rewrites without converging",
            stats.iterations
        );
    }
    if cfg.enable_dce {
        stats.dce_removed = run_dce(rewriter)?;
    }
    Ok(stats)
}

fn try_pattern(
    pattern: &dyn Pattern,
    inst: InstId,
    rewriter: &mut ProgramRewriter,
) -> Result<bool, RewriteError> {
    let node = rewriter.value_of(inst);
    match pattern.match_and_rewrite(inst, rewriter) {
        Ok(applied) => {
            if applied {
                log::trace!(target: "tgraph::rewrite", "{} rewrote {node}", pattern.name());
            }
            Ok(applied)
        }
        Err(source) => {
            log::debug!(
                target: "tgraph::rewrite",
                "{} failed at {node}: {source}",
                pattern.name()
            );
            Err(RewriteError {
                rule: pattern.name().to_string(),
                node,
                source,
            })
        }
    }
}

fn seed_worklist(rewriter: &ProgramRewriter, worklist: &mut VecDeque<InstId>) {
    worklist.clear();
    worklist.extend(rewriter.insts_in_order());
}

/// Removes nodes whose value is neither read nor a function result.
pub(crate) fn run_dce(rewriter: &mut ProgramRewriter) -> Result<usize, GraphError> {
    let mut removed_total = 0;
    loop {
        let mut removed_in_pass = 0;
        for inst in rewriter.insts_in_order().into_iter().rev() {
            if !rewriter.contains(inst) {
                continue;
            }
            let value = rewriter.value_of(inst);
            if rewriter.is_result(value) {
                continue;
            }
            if rewriter.users_of(value).is_empty() {
                rewriter.erase_inst(inst)?;
                removed_in_pass += 1;
            }
        }
        if removed_in_pass == 0 {
            break;
        }
        removed_total += removed_in_pass;
    }
    Ok(removed_total)
}
