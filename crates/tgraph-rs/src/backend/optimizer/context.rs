use crate::backend::driver::{GreedyConfig, DEFAULT_MAX_REWRITES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeConfig {
    pub pre_max_iters: usize,
    pub post_max_iters: usize,
    /// Upper bound on rewrites per fixed-point pattern pass.
    pub fixed_point_inner_max_iters: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            pre_max_iters: 2,
            post_max_iters: 4,
            fixed_point_inner_max_iters: DEFAULT_MAX_REWRITES,
        }
    }
}

impl OptimizeConfig {
    /// Defaults overridden by `TGRAPH_OPT_PRE_ITERS` / `TGRAPH_OPT_POST_ITERS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pre_max_iters: crate::env::opt_pre_iters().unwrap_or(defaults.pre_max_iters),
            post_max_iters: crate::env::opt_post_iters().unwrap_or(defaults.post_max_iters),
            ..defaults
        }
    }
}

/// State shared by the passes of one optimizer run.
pub struct OptimizeContext {
    cfg: OptimizeConfig,
    pass_runs: usize,
}

impl OptimizeContext {
    pub fn new(cfg: OptimizeConfig) -> Self {
        Self { cfg, pass_runs: 0 }
    }

    pub fn config(&self) -> &OptimizeConfig {
        &self.cfg
    }

    /// Greedy driver limits derived from the config, applied on top of a pass's own.
    pub fn clamp_greedy(&self, base: &GreedyConfig) -> GreedyConfig {
        GreedyConfig {
            max_iterations: base
                .max_iterations
                .min(self.cfg.fixed_point_inner_max_iters),
            enable_dce: base.enable_dce,
        }
    }

    pub fn pass_runs(&self) -> usize {
        self.pass_runs
    }

    pub(crate) fn record_pass_run(&mut self) {
        self.pass_runs += 1;
    }
}

impl Default for OptimizeContext {
    fn default() -> Self {
        Self::new(OptimizeConfig::default())
    }
}
