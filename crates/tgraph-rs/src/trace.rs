//! Optimizer event sink.
//!
//! Install a sink with [`set_pass_sink`] to receive per-pass statistics and the IR after each
//! pass. Without a sink, events are only forwarded to the `log` facade when
//! `TGRAPH_PASS_STATS` is enabled.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use once_cell::sync::Lazy;

/// Counters reported after an optimizer pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerPassStats {
    pub changed: bool,
    pub iterations: usize,
    pub rewrites_applied: usize,
    pub erased_insts: usize,
    pub body_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassEventKind {
    OptimizerPassStats {
        run_id: Option<usize>,
        function: String,
        pass: String,
        stats: OptimizerPassStats,
    },
    OptimizerPassIr {
        run_id: Option<usize>,
        function: String,
        pass: String,
        program_text: String,
    },
}

#[derive(Debug, Clone)]
pub struct PassEvent {
    pub timestamp: SystemTime,
    pub kind: PassEventKind,
}

pub trait PassEventSink: Send + Sync {
    fn on_event(&self, event: &PassEvent);
}

impl<F> PassEventSink for F
where
    F: Fn(&PassEvent) + Send + Sync,
{
    fn on_event(&self, event: &PassEvent) {
        self(event)
    }
}

static SINK: Lazy<RwLock<Option<Arc<dyn PassEventSink>>>> = Lazy::new(|| RwLock::new(None));

/// Installs `sink` as the process-wide receiver, returning the previous one.
pub fn set_pass_sink(sink: Option<Arc<dyn PassEventSink>>) -> Option<Arc<dyn PassEventSink>> {
    match SINK.write() {
        Ok(mut guard) => std::mem::replace(&mut *guard, sink),
        Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), sink),
    }
}

pub fn current_sink() -> Option<Arc<dyn PassEventSink>> {
    match SINK.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn emit_pass_event(event: PassEvent) {
    if let PassEventKind::OptimizerPassStats {
        function,
        pass,
        stats,
        ..
    } = &event.kind
    {
        log::debug!(
            target: "tgraph::optimizer",
            "{function}: {pass} changed={} rewrites={} erased={} body_len={}",
            stats.changed,
            stats.rewrites_applied,
            stats.erased_insts,
            stats.body_len
        );
    }
    if let Some(sink) = current_sink() {
        sink.on_event(&event);
    }
}
