//! Compiled-function front end: optimize, validate, cache and execute a program.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use lru::LruCache;
use once_cell::sync::Lazy;

use crate::backend::{
    alias,
    executor::{execute_function, ExecutionOptions},
    hashing::{fingerprint_bytes, op_versions_fingerprint},
    optimizer::{default_optimizer, OptimizeConfig, OptimizeContext, Optimizer},
    spec::{BackendResult, Function, HostValue, PortableBackend, Program},
    topology,
};

const COMPILE_CACHE_CAPACITY: usize = 64;

/// Optimized programs keyed by fingerprint.
static COMPILE_CACHE: Lazy<Mutex<LruCache<CompileKey, Arc<Program>>>> = Lazy::new(|| {
    Mutex::new(LruCache::new(
        NonZeroUsize::new(COMPILE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
    ))
});

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct CompileKey {
    program_hash: u64,
    op_versions_hash: u64,
    backend_hash: u64,
    optimizer_hash: u64,
}

impl CompileKey {
    fn new(program: &Program, backend: &str, optimizer: &str) -> Result<Self> {
        let bytes = bincode::serialize(program).context("failed to fingerprint program")?;
        Ok(Self {
            program_hash: fingerprint_bytes(&bytes),
            op_versions_hash: op_versions_fingerprint(program),
            backend_hash: fingerprint_bytes(backend.as_bytes()),
            optimizer_hash: fingerprint_bytes(optimizer.as_bytes()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub check_finite: bool,
    pub use_cache: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            check_finite: crate::env::check_finite_default(),
            use_cache: crate::env::compile_cache_enabled(),
        }
    }
}

/// Drops every cached program.
pub fn clear_compile_cache() {
    lock_cache().clear();
}

fn lock_cache() -> std::sync::MutexGuard<'static, LruCache<CompileKey, Arc<Program>>> {
    match COMPILE_CACHE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Optimizes the entry function of `program` and prepares it for execution on `backend`.
///
/// `optimizer` defaults to the stock pipeline; pass a
/// [`NoopOptimizer`](crate::backend::optimizer::NoopOptimizer) to run the graph as written.
pub fn compile<B: PortableBackend>(
    backend: Arc<B>,
    program: &Program,
    optimizer: Option<Arc<dyn Optimizer>>,
    options: CompileOptions,
) -> Result<CompiledFunction<B>> {
    let entry = program
        .entry_function()
        .ok_or_else(|| anyhow!("entry function @{} not found", program.entry))?;
    topology::validate_function_topology(entry)
        .with_context(|| format!("@{} is not well formed", entry.name))?;

    let optimizer = optimizer.unwrap_or_else(default_optimizer);
    let key = CompileKey::new(program, backend.backend_name(), &optimizer.signature())?;

    if options.use_cache {
        if let Some(cached) = lock_cache().get(&key).cloned() {
            log::debug!(target: "tgraph::compile", "compile cache hit for @{}", program.entry);
            return Ok(CompiledFunction {
                backend,
                program: cached,
                options,
                from_cache: true,
            });
        }
    }

    let mut optimized = program.clone();
    let function = optimized
        .entry_function_mut()
        .ok_or_else(|| anyhow!("entry function @{} not found", program.entry))?;
    let mut cx = OptimizeContext::new(OptimizeConfig::from_env());
    let stats = optimizer
        .optimize(function, &mut cx)
        .with_context(|| format!("optimizing @{}", program.entry))?;
    log::debug!(
        target: "tgraph::compile",
        "optimized @{}: {} rewrites, {} nodes erased, {} pass runs",
        program.entry,
        stats.rewrites_applied,
        stats.erased_insts,
        cx.pass_runs()
    );
    schedule(function)?;

    let optimized = Arc::new(optimized);
    if options.use_cache {
        lock_cache().put(key, Arc::clone(&optimized));
    }
    Ok(CompiledFunction {
        backend,
        program: optimized,
        options,
        from_cache: false,
    })
}

/// Toposorts the body and checks the alias contracts of the final order.
fn schedule(function: &mut Function) -> Result<()> {
    let order = topology::toposort(function)?;
    let mut body = std::mem::take(&mut function.body)
        .into_iter()
        .map(Some)
        .collect::<Vec<_>>();
    function.body = order
        .into_iter()
        .filter_map(|pos| body.get_mut(pos).and_then(Option::take))
        .collect();
    topology::validate_function_topology(function)?;
    alias::validate(function).with_context(|| format!("@{} violates aliasing", function.name))?;
    Ok(())
}

/// An optimized program bound to a backend.
pub struct CompiledFunction<B: PortableBackend> {
    backend: Arc<B>,
    program: Arc<Program>,
    options: CompileOptions,
    from_cache: bool,
}

impl<B: PortableBackend> CompiledFunction<B> {
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The optimized entry function.
    pub fn function(&self) -> Option<&Function> {
        self.program.entry_function()
    }

    /// True when the optimized program came from the compile cache.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn call(&self, inputs: &[B::TensorHandle]) -> BackendResult<Vec<B::TensorHandle>> {
        let function = self.program.entry_function().ok_or_else(|| {
            crate::backend::spec::BackendError::execution("entry function not found")
        })?;
        let options = ExecutionOptions {
            check_finite: self.options.check_finite,
        };
        execute_function(self.backend.as_ref(), function, inputs, &options)
    }

    /// Materializes host inputs, runs the function and reads every result back.
    pub fn call_host(&self, inputs: Vec<HostValue>) -> BackendResult<Vec<HostValue>> {
        let handles = inputs
            .into_iter()
            .map(|value| self.backend.materialize(value))
            .collect::<BackendResult<Vec<_>>>()?;
        self.call(&handles)?
            .iter()
            .map(|handle| self.backend.to_host(handle))
            .collect()
    }
}
