use tgraph_rs::backend::{
    database::default_database,
    driver::{apply_patterns, GreedyConfig, Strategy, DEFAULT_MAX_REWRITES},
    error::{PassError, PatternError},
    index::InstId,
    ir_utils::tensor_type,
    optimizer::{OptimizeContext, PassResult},
    passes::{
        CommonSubexpressionEliminationPass, DeadCodeEliminationPass, EliminateDoubleNegation,
        FunctionPass, LocalMaxToMin, MaxAndArgmaxToArgMax, MaxAndArgmaxToReduce,
        ReduceOfNegation,
    },
    pattern::{ElementwiseUnaryOpView, MaxAndArgmaxOpView, Pattern, PatternSet, ReduceOpView},
    rewriter::ProgramRewriter,
    spec::{
        DType, ElementwiseUnaryOp, Function, MaxAndArgmaxSpec, Operation, ReduceKind, ReduceSpec,
    },
};
use tgraph_rs::GraphBuilder;

const NEG: Operation = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);
const EXP: Operation = Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp);

fn reduce(kind: ReduceKind) -> Operation {
    Operation::Reduce(ReduceSpec {
        kind,
        axes: vec![1],
        keepdims: false,
    })
}

/// `-max(-x)` over a 3x4 input.
fn negated_max() -> Function {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F32, &[Some(3), Some(4)]));
    let n = builder.add_node(NEG, &[x]).unwrap();
    let m = builder.add_node(reduce(ReduceKind::Max), &[n]).unwrap();
    let out = builder.add_node(NEG, &[m]).unwrap();
    builder.finish("negated_max", vec![out]).unwrap()
}

/// Runs one pass of the stock database over `function`.
fn run_stock_pass(name: &str, function: &mut Function) -> PassResult {
    default_database()
        .build_pass(name)
        .unwrap()
        .run(function, &mut OptimizeContext::default())
        .unwrap()
}

fn negation_rules() -> PatternSet {
    let mut patterns = PatternSet::new();
    patterns.insert_view::<ElementwiseUnaryOpView, _>(EliminateDoubleNegation);
    patterns.insert_view::<ReduceOpView, _>(ReduceOfNegation);
    patterns
}

#[test]
fn double_negation_collapses_to_input() {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[None]));
    let mut value = x;
    for _ in 0..4 {
        value = builder.add_node(NEG, &[value]).unwrap();
    }
    let mut function = builder.finish("negs", vec![value]).unwrap();

    let mut patterns = PatternSet::new();
    patterns.insert_view::<ElementwiseUnaryOpView, _>(EliminateDoubleNegation);
    let stats = apply_patterns(
        &mut function,
        &patterns.freeze(),
        Strategy::FixedPoint,
        &GreedyConfig::default(),
    )
    .unwrap();

    assert!(stats.applied >= 2);
    assert!(function.body.is_empty());
    assert_eq!(function.result_ids, vec![x]);
}

#[test]
fn local_max_to_min_rewrites_in_one_visit() {
    let mut function = negated_max();
    let mut patterns = negation_rules();
    patterns.insert_view::<ElementwiseUnaryOpView, _>(LocalMaxToMin);
    apply_patterns(
        &mut function,
        &patterns.freeze(),
        Strategy::OutToIn,
        &GreedyConfig::default(),
    )
    .unwrap();
    assert_eq!(function.op_names(), vec!["reduce_min"]);
}

#[test]
fn out_to_in_does_not_revisit_new_nodes() {
    let mut out_to_in = negated_max();
    apply_patterns(
        &mut out_to_in,
        &negation_rules().freeze(),
        Strategy::OutToIn,
        &GreedyConfig::default(),
    )
    .unwrap();
    // max(-x) became -min(x) after the outer neg was already visited.
    assert_eq!(out_to_in.op_names(), vec!["reduce_min", "neg", "neg"]);

    let mut fixed_point = negated_max();
    apply_patterns(
        &mut fixed_point,
        &negation_rules().freeze(),
        Strategy::FixedPoint,
        &GreedyConfig::default(),
    )
    .unwrap();
    assert_eq!(fixed_point.op_names(), vec!["reduce_min"]);
}

#[test]
fn reduce_of_shared_negation_is_kept() {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F32, &[Some(3), Some(4)]));
    let n = builder.add_node(NEG, &[x]).unwrap();
    let m = builder.add_node(reduce(ReduceKind::Min), &[n]).unwrap();
    let mut function = builder.finish("shared", vec![m, n]).unwrap();
    let before = function.clone();

    let stats = run_stock_pass("uncanonicalize", &mut function);
    assert!(!stats.changed);
    assert_eq!(function, before);
}

#[test]
fn reduce_sum_of_negation_is_not_rewritten() {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F32, &[Some(3), Some(4)]));
    let n = builder.add_node(NEG, &[x]).unwrap();
    let s = builder.add_node(reduce(ReduceKind::Sum), &[n]).unwrap();
    let mut function = builder.finish("sum", vec![s]).unwrap();

    let stats = run_stock_pass("uncanonicalize", &mut function);
    assert!(!stats.changed);
    assert_eq!(function.op_names(), vec!["neg", "reduce_sum"]);
}

fn max_and_argmax(project: &[usize]) -> Function {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(5)]));
    let pair = builder
        .add_node(Operation::MaxAndArgmax(MaxAndArgmaxSpec { axis: 1 }), &[x])
        .unwrap();
    let results = project
        .iter()
        .map(|&index| {
            builder
                .add_node(Operation::GetTupleElement { index }, &[pair])
                .unwrap()
        })
        .collect();
    builder.finish("maa", results).unwrap()
}

#[test]
fn max_and_argmax_splits_by_used_output() {
    let mut values_only = max_and_argmax(&[0, 0]);
    run_stock_pass("uncanonicalize", &mut values_only);
    assert_eq!(values_only.op_names(), vec!["reduce_max"]);
    assert_eq!(values_only.result_ids[0], values_only.result_ids[1]);
    match &values_only.body[0].op {
        Operation::Reduce(spec) => {
            assert_eq!(spec.axes, vec![1]);
            assert!(!spec.keepdims);
        }
        other => panic!("unexpected {other:?}"),
    }

    let mut indices_only = max_and_argmax(&[1]);
    run_stock_pass("uncanonicalize", &mut indices_only);
    assert_eq!(indices_only.op_names(), vec!["argmax"]);
}

#[test]
fn max_and_argmax_with_both_outputs_is_kept() {
    let mut function = max_and_argmax(&[0, 1]);
    let before = function.clone();
    let mut patterns = PatternSet::new();
    patterns.insert_view::<MaxAndArgmaxOpView, _>(MaxAndArgmaxToReduce);
    patterns.insert_view::<MaxAndArgmaxOpView, _>(MaxAndArgmaxToArgMax);
    let stats = apply_patterns(
        &mut function,
        &patterns.freeze(),
        Strategy::OutToIn,
        &GreedyConfig::default(),
    )
    .unwrap();
    assert_eq!(stats.applied, 0);
    assert_eq!(function, before);
}

#[test]
fn cse_then_dce_removes_duplicates() {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F32, &[Some(4)]));
    let a = builder.add_node(EXP, &[x]).unwrap();
    let b = builder.add_node(EXP, &[x]).unwrap();
    let _dead = builder.add_node(NEG, &[x]).unwrap();
    let mut function = builder.finish("dups", vec![a, b]).unwrap();

    let mut cx = OptimizeContext::default();
    let cse = CommonSubexpressionEliminationPass.run(&mut function, &mut cx).unwrap();
    assert_eq!(cse.rewrites_applied, 1);
    assert_eq!(function.result_ids, vec![a, a]);

    let dce = DeadCodeEliminationPass.run(&mut function, &mut cx).unwrap();
    assert_eq!(dce.erased_insts, 1);
    assert_eq!(function.op_names(), vec!["exp"]);
    assert_eq!(cx.pass_runs(), 2);
}

struct Exploding;

impl Pattern for Exploding {
    fn match_and_rewrite(
        &self,
        _root: InstId,
        _rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        Err(PatternError::message("boom"))
    }
}

#[test]
fn failing_rule_aborts_with_rewrite_error() {
    let mut function = negated_max();
    let mut patterns = PatternSet::new();
    patterns.add(Exploding);
    let err = apply_patterns(
        &mut function,
        &patterns.freeze(),
        Strategy::FixedPoint,
        &GreedyConfig::default(),
    )
    .expect_err("rule error propagates");
    let rewrite = match err {
        PassError::Rewrite(rewrite) => rewrite,
        other => panic!("expected a rewrite error, got {other:?}"),
    };
    assert_eq!(rewrite.rule, "Exploding");
    assert_eq!(rewrite.source, PatternError::message("boom"));
    assert!(rewrite.to_string().contains("rewrite `Exploding` failed"));
}

/// Replaces every `neg` with a fresh copy of itself, so it never runs out of work.
struct Renegate;

impl Pattern for Renegate {
    fn tracks(&self, op: &Operation) -> bool {
        *op == NEG
    }

    fn match_and_rewrite(
        &self,
        root: InstId,
        rewriter: &mut ProgramRewriter,
    ) -> Result<bool, PatternError> {
        let operands = rewriter.operands(root).to_vec();
        let old = rewriter.value_of(root);
        let fresh = rewriter.insert_before(root, NEG, operands)?;
        rewriter.replace(old, fresh)?;
        rewriter.erase_inst(root)?;
        Ok(true)
    }
}

#[test]
fn non_converging_rules_stop_at_the_rewrite_cap() {
    let mut function = negated_max();
    let mut patterns = PatternSet::new();
    patterns.add(Renegate);
    let stats = apply_patterns(
        &mut function,
        &patterns.freeze(),
        Strategy::FixedPoint,
        &GreedyConfig {
            max_iterations: 7,
            ..GreedyConfig::default()
        },
    )
    .unwrap();

    assert!(stats.capped);
    assert_eq!(stats.applied, 7);
    assert_eq!(function.op_names(), vec!["neg", "reduce_max", "neg"]);
}

#[test]
fn converging_rules_are_not_capped() {
    let mut function = negated_max();
    let stats = apply_patterns(
        &mut function,
        &negation_rules().freeze(),
        Strategy::FixedPoint,
        &GreedyConfig::default(),
    )
    .unwrap();
    assert!(!stats.capped);
    assert_eq!(GreedyConfig::default().max_iterations, DEFAULT_MAX_REWRITES);
}
