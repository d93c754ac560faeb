//! Function-level optimisation infrastructure.
//!
//! Passes implement [`FunctionPass`]; a [`crate::backend::pipeline::PipelineOptimizer`]
//! sequences them with bounded fixed points.

mod context;

use std::sync::Arc;

use crate::backend::database::default_database;
use crate::backend::error::PassError;
use crate::backend::pipeline::PipelineOptimizer;
use crate::backend::spec::Function;

pub use context::{OptimizeConfig, OptimizeContext};

/// Result returned by a [`FunctionPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of rewrite iterations executed while applying the pass.
    pub iterations: usize,
    /// Total number of patterns applied by the pass.
    pub rewrites_applied: usize,
    /// Nodes removed by the pass (typically via DCE).
    pub erased_insts: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_insts: self.erased_insts + other.erased_insts,
        }
    }
}

/// Optimisation pass over a single function.
pub trait FunctionPass: Send + Sync {
    fn name(&self) -> &str;
    fn run(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<PassResult, PassError>;
}

/// Optimizer invoked before a program is compiled.
pub trait Optimizer: Send + Sync {
    /// Stable description of the pass layout; part of the compile-cache key.
    fn signature(&self) -> String;
    fn optimize(
        &self,
        function: &mut Function,
        cx: &mut OptimizeContext,
    ) -> Result<PassResult, PassError>;
}

/// Optimizer that leaves graphs untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOptimizer;

impl Optimizer for NoopOptimizer {
    fn signature(&self) -> String {
        "noop".to_string()
    }

    fn optimize(
        &self,
        _function: &mut Function,
        _cx: &mut OptimizeContext,
    ) -> Result<PassResult, PassError> {
        Ok(PassResult::default())
    }
}

/// Builds the default pipeline over [`default_database`].
pub fn default_optimizer() -> Arc<dyn Optimizer> {
    Arc::new(PipelineOptimizer::new(
        &default_database(),
        OptimizeConfig::from_env(),
    ))
}
