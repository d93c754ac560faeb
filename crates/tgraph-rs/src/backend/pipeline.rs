use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::SystemTime;

use crate::backend::database::RewriteDatabase;
use crate::backend::error::{DatabaseError, PassError};
use crate::backend::optimizer::{FunctionPass, OptimizeConfig, OptimizeContext, Optimizer, PassResult};
use crate::backend::spec::{Function, Program};
use crate::trace::{current_sink, emit_pass_event, OptimizerPassStats, PassEvent, PassEventKind};

/// Database passes run in order, the whole group repeated while any of them changes the
/// function, at most `rounds` times.
struct Stage {
    passes: Vec<Arc<dyn FunctionPass>>,
    rounds: usize,
}

impl Stage {
    fn once(pass: Arc<dyn FunctionPass>) -> Self {
        Self {
            passes: vec![pass],
            rounds: 1,
        }
    }

    fn repeated(passes: Vec<Arc<dyn FunctionPass>>, rounds: usize) -> Self {
        Self {
            passes,
            rounds: rounds.max(1),
        }
    }
}

/// Stages assembled from a [`RewriteDatabase`].
pub struct PipelineOptimizer {
    stages: Vec<Stage>,
    signature: String,
    log_stats: bool,
    run_counter: AtomicUsize,
}

impl PipelineOptimizer {
    /// `canonicalize` to a fixed point, then `uncanonicalize`, `canonicalize` and `fast_run`
    /// together to a fixed point, then `inplace`. Passes missing from `db` are skipped.
    ///
    /// `uncanonicalize` is repeated: removing a double negation under a reduction exposes a
    /// new reduce-of-negation match.
    pub fn new(db: &RewriteDatabase, cfg: OptimizeConfig) -> Self {
        const ORDER: [&str; 4] = ["canonicalize", "uncanonicalize", "fast_run", "inplace"];
        let [canonicalize, uncanonicalize, fast_run, inplace] =
            ORDER.map(|name| match db.build_pass(name) {
                Ok(pass) => Some(pass),
                Err(err) => {
                    log::warn!(target: "tgraph::optimizer", "skipping pipeline stage: {err}");
                    None
                }
            });

        let mut stages = Vec::new();
        if let Some(pass) = &canonicalize {
            stages.push(Stage::repeated(vec![Arc::clone(pass)], cfg.pre_max_iters));
        }
        let cleanup: Vec<_> = uncanonicalize
            .into_iter()
            .chain(canonicalize)
            .chain(fast_run)
            .collect();
        if !cleanup.is_empty() {
            stages.push(Stage::repeated(cleanup, cfg.post_max_iters));
        }
        stages.extend(inplace.map(Stage::once));

        Self::with_stages(stages, format!("default[{}]", ORDER.join(",")))
    }

    /// Runs the named database passes in order, repeated up to `post_max_iters` times.
    pub fn including(
        db: &RewriteDatabase,
        names: &[&str],
        cfg: OptimizeConfig,
    ) -> Result<Self, DatabaseError> {
        let stage = Stage::repeated(db.query(names)?, cfg.post_max_iters);
        Ok(Self::with_stages(
            vec![stage],
            format!("including[{}]", names.join(",")),
        ))
    }

    fn with_stages(stages: Vec<Stage>, signature: String) -> Self {
        Self {
            stages,
            signature,
            log_stats: crate::env::pass_stats_enabled(),
            run_counter: AtomicUsize::new(0),
        }
    }
}

impl Optimizer for PipelineOptimizer {
    fn signature(&self) -> String {
        self.signature.clone()
    }

    fn optimize(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<PassResult, PassError> {
        let run_id = (self.log_stats || current_sink().is_some())
            .then(|| self.run_counter.fetch_add(1, Ordering::Relaxed));

        let mut totals = PassResult::default();
        for stage in &self.stages {
            for _ in 0..stage.rounds {
                let mut round = PassResult::default();
                for pass in &stage.passes {
                    let stats = pass.run(function, cx)?;
                    let emit_ir = current_sink().is_some();
                    if self.log_stats || emit_ir {
                        emit_optimizer_pass_stats(pass.name(), function, run_id, stats, emit_ir);
                    }
                    round = round.merge(stats);
                }
                totals = totals.merge(round);
                if !round.changed {
                    break;
                }
            }
        }
        Ok(totals)
    }
}

fn emit_optimizer_pass_stats(
    name: &str,
    function: &Function,
    run_id: Option<usize>,
    stats: PassResult,
    emit_ir: bool,
) {
    emit_pass_event(PassEvent {
        timestamp: SystemTime::now(),
        kind: PassEventKind::OptimizerPassStats {
            run_id,
            function: function.name.clone(),
            pass: name.to_string(),
            stats: OptimizerPassStats {
                changed: stats.changed,
                iterations: stats.iterations,
                rewrites_applied: stats.rewrites_applied,
                erased_insts: stats.erased_insts,
                body_len: function.body.len(),
            },
        },
    });
    if emit_ir {
        let program_text = Program::new(function.name.clone())
            .with_functions(vec![function.clone()])
            .to_text();
        emit_pass_event(PassEvent {
            timestamp: SystemTime::now(),
            kind: PassEventKind::OptimizerPassIr {
                run_id,
                function: function.name.clone(),
                pass: name.to_string(),
                program_text,
            },
        });
    }
}
