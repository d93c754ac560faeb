use std::sync::{Arc, Mutex};

use tgraph_backend_ref_cpu::CpuPortableBackend;
use tgraph_rs::backend::{
    compile::clear_compile_cache,
    database::{default_database, RewriteDatabase},
    driver::{GreedyConfig, Strategy},
    error::{DatabaseError, PatternError},
    index::InstId,
    ir_utils::tensor_type,
    optimizer::{NoopOptimizer, OptimizeConfig, OptimizeContext, Optimizer},
    pattern::Pattern,
    pipeline::PipelineOptimizer,
    rewriter::ProgramRewriter,
    spec::{ElementwiseUnaryOp, ReduceKind, ReduceSpec},
};
use tgraph_rs::trace::{set_pass_sink, PassEvent, PassEventKind};
use tgraph_rs::{
    compile, CompileOptions, DType, GraphBuilder, HostValue, Operation, Program, TensorLiteral,
};

const NEG: Operation = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);

/// `-max(-x, axis=1)` over a 2x3 input.
fn negated_max_program(name: &str) -> Program {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(3)]));
    let n = builder.add_node(NEG, &[x]).unwrap();
    let m = builder
        .add_node(
            Operation::Reduce(ReduceSpec {
                kind: ReduceKind::Max,
                axes: vec![1],
                keepdims: false,
            }),
            &[n],
        )
        .unwrap();
    let out = builder.add_node(NEG, &[m]).unwrap();
    Program::from_function(builder.finish(name, vec![out]).unwrap())
}

fn input() -> Vec<HostValue> {
    vec![HostValue::Tensor(TensorLiteral::from_f64(
        &[2, 3],
        &[3.0, -1.0, 2.0, 0.5, 4.0, -7.0],
    ))]
}

fn uncached() -> CompileOptions {
    CompileOptions {
        check_finite: false,
        use_cache: false,
    }
}

#[test]
fn compile_cache_is_keyed_by_program_and_optimizer() {
    clear_compile_cache();
    let backend = Arc::new(CpuPortableBackend::new());
    let program = negated_max_program("cached");
    let options = CompileOptions {
        check_finite: false,
        use_cache: true,
    };

    let first = compile(Arc::clone(&backend), &program, None, options).unwrap();
    assert!(!first.from_cache());
    let second = compile(Arc::clone(&backend), &program, None, options).unwrap();
    assert!(second.from_cache());
    assert_eq!(second.program(), first.program());
    assert_eq!(
        second.call_host(input()).unwrap(),
        first.call_host(input()).unwrap()
    );

    let noop: Arc<dyn Optimizer> = Arc::new(NoopOptimizer);
    let unoptimized = compile(Arc::clone(&backend), &program, Some(noop), options).unwrap();
    assert!(!unoptimized.from_cache());
    assert_eq!(
        unoptimized.function().unwrap().op_names(),
        vec!["neg", "reduce_max", "neg"]
    );

    let renamed = compile(
        Arc::clone(&backend),
        &negated_max_program("cached_again"),
        None,
        options,
    )
    .unwrap();
    assert!(!renamed.from_cache());

    clear_compile_cache();
    let after_clear = compile(backend, &program, None, options).unwrap();
    assert!(!after_clear.from_cache());
}

#[test]
fn optimized_program_computes_row_minimum_negation() {
    let compiled = compile(
        Arc::new(CpuPortableBackend::new()),
        &negated_max_program("rows"),
        None,
        uncached(),
    )
    .unwrap();
    assert_eq!(compiled.function().unwrap().op_names(), vec!["reduce_min"]);
    let out = compiled.call_host(input()).unwrap();
    let values = out[0].as_tensor().unwrap().to_f64_vec();
    assert_eq!(values, vec![-1.0, -7.0]);
}

#[test]
fn pass_sink_receives_stats_and_ir() {
    let events: Arc<Mutex<Vec<PassEventKind>>> = Arc::default();
    let captured = Arc::clone(&events);
    let previous = set_pass_sink(Some(Arc::new(move |event: &PassEvent| {
        let own = match &event.kind {
            PassEventKind::OptimizerPassStats { function, .. }
            | PassEventKind::OptimizerPassIr { function, .. } => function == "traced",
        };
        if own {
            if let Ok(mut events) = captured.lock() {
                events.push(event.kind.clone());
            }
        }
    })));

    let result = compile(
        Arc::new(CpuPortableBackend::new()),
        &negated_max_program("traced"),
        None,
        uncached(),
    );
    set_pass_sink(previous);
    result.unwrap();

    let events = events.lock().unwrap();
    let stats_passes: Vec<&str> = events
        .iter()
        .filter_map(|kind| match kind {
            PassEventKind::OptimizerPassStats { pass, .. } => Some(pass.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stats_passes.first(), Some(&"canonicalize"));
    assert!(stats_passes.contains(&"uncanonicalize"));
    assert_eq!(stats_passes.last(), Some(&"inplace"));

    let last_ir = events
        .iter()
        .rev()
        .find_map(|kind| match kind {
            PassEventKind::OptimizerPassIr { program_text, .. } => Some(program_text.as_str()),
            _ => None,
        })
        .expect("ir event");
    assert!(last_ir.contains("@traced"));
    assert!(last_ir.contains("reduce_min"));
    assert!(!last_ir.contains("reduce_max"));
}

#[test]
fn default_database_layout() {
    let db = default_database();
    assert_eq!(
        db.pass_names(),
        vec!["canonicalize", "uncanonicalize", "fast_run", "inplace"]
    );
    let canonical = db.rule_names("canonicalize").unwrap();
    assert!(canonical.iter().any(|name| name == "EliminateDoubleNegation"));
    assert!(canonical.iter().any(|name| name == "CollapseDimShuffleChain"));
    let uncanonical = db.rule_names("uncanonicalize").unwrap();
    assert!(uncanonical.iter().any(|name| name == "LocalMaxToMin"));
    assert!(uncanonical.iter().any(|name| name == "DimShuffleOfSubtensor"));
    assert!(!db.pattern_set("inplace").unwrap().is_empty());

    assert_eq!(
        db.query(&["canonicalize", "missing"]).err(),
        Some(DatabaseError::UnknownPass("missing".to_string()))
    );
    assert_eq!(
        PipelineOptimizer::new(&db, OptimizeConfig::default()).signature(),
        "default[canonicalize,uncanonicalize,fast_run,inplace]"
    );
}

struct Exploding;

impl Pattern for Exploding {
    fn tracks(&self, op: &Operation) -> bool {
        *op == NEG
    }

    fn match_and_rewrite(
        &self,
        _root: InstId,
        _rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        Err(PatternError::message("boom"))
    }
}

#[test]
fn custom_database_rejects_bad_definitions() {
    let mut db = RewriteDatabase::new();
    db.define_pass("explode", Strategy::OutToIn, GreedyConfig::default())
        .unwrap();
    assert_eq!(
        db.define_pass("explode", Strategy::FixedPoint, GreedyConfig::default())
            .err(),
        Some(DatabaseError::DuplicatePass("explode".to_string()))
    );
    assert_eq!(
        db.register(Exploding, &["elsewhere"]).err(),
        Some(DatabaseError::UnknownPass("elsewhere".to_string()))
    );
    db.register(Exploding, &["explode"]).unwrap();
    assert_eq!(db.rule_names("explode").unwrap(), vec!["Exploding"]);
    assert!(PipelineOptimizer::including(&db, &["nope"], OptimizeConfig::default()).is_err());
}

#[test]
fn rewrite_errors_abort_compilation() {
    let mut db = RewriteDatabase::new();
    db.define_pass("explode", Strategy::OutToIn, GreedyConfig::default())
        .unwrap()
        .register(Exploding, &["explode"])
        .unwrap();
    let optimizer =
        PipelineOptimizer::including(&db, &["explode"], OptimizeConfig::default()).unwrap();
    assert_eq!(optimizer.signature(), "including[explode]");

    let err = compile(
        Arc::new(CpuPortableBackend::new()),
        &negated_max_program("exploding"),
        Some(Arc::new(optimizer)),
        uncached(),
    )
    .err()
    .expect("rule failure aborts compile");
    let message = format!("{err:#}");
    assert!(message.contains("optimizing @exploding"), "{message}");
    assert!(message.contains("rewrite `Exploding` failed"), "{message}");
}

#[test]
fn including_runs_only_selected_passes() {
    let db = default_database();
    let optimizer =
        PipelineOptimizer::including(&db, &["canonicalize"], OptimizeConfig::default()).unwrap();
    let mut program = negated_max_program("selected");
    let function = program.entry_function_mut().unwrap();
    let mut cx = OptimizeContext::new(OptimizeConfig::default());
    let stats = optimizer.optimize(function, &mut cx).unwrap();

    // Reduction rewrites live in `uncanonicalize`, so the graph is unchanged.
    assert!(!stats.changed);
    assert_eq!(function.op_names(), vec!["neg", "reduce_max", "neg"]);
    assert_eq!(cx.pass_runs(), 1);
}

#[test]
fn missing_entry_function_is_an_error() {
    let err = compile(
        Arc::new(CpuPortableBackend::new()),
        &Program::new("absent"),
        None,
        uncached(),
    )
    .err()
    .expect("no entry");
    assert!(err.to_string().contains("@absent"));
}
