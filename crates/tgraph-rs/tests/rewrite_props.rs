//! Randomized checks that optimized graphs compute the same values as the graphs as written.

use std::sync::Arc;

use proptest::prelude::*;
use tgraph_backend_ref_cpu::CpuPortableBackend;
use tgraph_rs::backend::{
    database::default_database,
    ir_utils::tensor_type,
    optimizer::{NoopOptimizer, OptimizeConfig, OptimizeContext, Optimizer},
    pipeline::PipelineOptimizer,
    spec::{
        DimShuffleSpec, ElementwiseBinaryOp, ElementwiseUnaryOp, MaxAndArgmaxSpec, ReduceKind,
        ReduceSpec, ShuffleAxis,
    },
};
use tgraph_rs::{
    compile, CompileOptions, DType, Function, GraphBuilder, HostValue, Operation, Program,
    TensorLiteral,
};

const NEG: Operation = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);

fn run(
    function: Function,
    optimizer: Option<Arc<dyn Optimizer>>,
    input: &TensorLiteral,
) -> (Vec<&'static str>, Vec<HostValue>) {
    let compiled = compile(
        Arc::new(CpuPortableBackend::new()),
        &Program::from_function(function),
        optimizer,
        CompileOptions {
            check_finite: false,
            use_cache: false,
        },
    )
    .expect("compile");
    let ops = compiled.function().expect("entry").op_names();
    let out = compiled
        .call_host(vec![HostValue::Tensor(input.clone())])
        .expect("execute");
    (ops, out)
}

type Outcome = (Vec<&'static str>, Vec<HostValue>, Vec<HostValue>);

fn optimized_and_plain(function: Function, input: &TensorLiteral) -> Outcome {
    let (ops, optimized) = run(function.clone(), None, input);
    let (_, plain) = run(function, Some(Arc::new(NoopOptimizer)), input);
    (ops, optimized, plain)
}

/// A rows x cols matrix of finite values.
fn matrix() -> impl Strategy<Value = (usize, usize, Vec<f64>)> {
    (1usize..5, 1usize..6).prop_flat_map(|(rows, cols)| {
        (
            Just(rows),
            Just(cols),
            prop::collection::vec(-100.0f64..100.0, rows * cols),
        )
    })
}

fn permutations() -> Vec<Vec<usize>> {
    vec![
        vec![0, 1, 2],
        vec![0, 2, 1],
        vec![1, 0, 2],
        vec![1, 2, 0],
        vec![2, 0, 1],
        vec![2, 1, 0],
    ]
}

/// One link of a randomly generated rank-2 chain.
#[derive(Debug, Clone)]
enum Link {
    Neg,
    Exp,
    Transpose,
    /// `exp(v) + exp(v)` built from two separate `exp` nodes.
    DoubledExp,
    Reduce(ReduceKind, isize),
}

fn link() -> impl Strategy<Value = Link> {
    prop_oneof![
        Just(Link::Neg),
        Just(Link::Exp),
        Just(Link::Transpose),
        Just(Link::DoubledExp),
        (prop::sample::select(vec![ReduceKind::Max, ReduceKind::Min]), 0isize..2)
            .prop_map(|(kind, axis)| Link::Reduce(kind, axis)),
    ]
}

fn chain(links: &[Link]) -> Function {
    let exp = Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp);
    let mut builder = GraphBuilder::new();
    let mut value = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(3)]));
    for link in links {
        value = match link {
            Link::Neg => builder.add_node(NEG, &[value]),
            Link::Exp => builder.add_node(exp.clone(), &[value]),
            Link::Transpose => builder.add_node(
                Operation::DimShuffle(DimShuffleSpec::new(vec![
                    ShuffleAxis::Axis(1),
                    ShuffleAxis::Axis(0),
                ])),
                &[value],
            ),
            Link::DoubledExp => {
                let a = builder.add_node(exp.clone(), &[value]).unwrap();
                let b = builder.add_node(exp.clone(), &[value]).unwrap();
                builder.add_node(Operation::ElementwiseBinary(ElementwiseBinaryOp::Add), &[a, b])
            }
            Link::Reduce(kind, axis) => builder.add_node(
                Operation::Reduce(ReduceSpec { kind: *kind, axes: vec![*axis], keepdims: true }),
                &[value],
            ),
        }
        .unwrap();
    }
    builder.finish("chain", vec![value]).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn optimizing_twice_changes_nothing(links in prop::collection::vec(link(), 1..6)) {
        let optimizer = PipelineOptimizer::new(&default_database(), OptimizeConfig::default());
        let mut once = chain(&links);
        optimizer.optimize(&mut once, &mut OptimizeContext::default()).unwrap();

        let mut twice = once.clone();
        let second = optimizer.optimize(&mut twice, &mut OptimizeContext::default()).unwrap();
        prop_assert!(!second.changed, "{:?}", links);
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn negated_max_of_negation_is_min(
        (rows, cols, data) in matrix(),
        axis in 0isize..2,
        keepdims in any::<bool>(),
    ) {
        let mut builder = GraphBuilder::new();
        let x = builder.add_parameter(tensor_type(DType::F64, &[Some(rows), Some(cols)]));
        let n = builder.add_node(NEG, &[x]).unwrap();
        let m = builder
            .add_node(
                Operation::Reduce(ReduceSpec { kind: ReduceKind::Max, axes: vec![axis], keepdims }),
                &[n],
            )
            .unwrap();
        let out = builder.add_node(NEG, &[m]).unwrap();
        let function = builder.finish("negated_max", vec![out]).unwrap();

        let input = TensorLiteral::from_f64(&[rows, cols], &data);
        let (ops, optimized, plain) = optimized_and_plain(function, &input);
        prop_assert_eq!(ops, vec!["reduce_min"]);
        prop_assert_eq!(optimized, plain);
    }

    #[test]
    fn split_max_and_argmax_matches_joint_node(
        (rows, cols, data) in matrix(),
        axis in 0isize..2,
        index in 0usize..2,
    ) {
        let mut builder = GraphBuilder::new();
        let x = builder.add_parameter(tensor_type(DType::F64, &[Some(rows), Some(cols)]));
        let pair = builder
            .add_node(Operation::MaxAndArgmax(MaxAndArgmaxSpec { axis }), &[x])
            .unwrap();
        let projected = builder
            .add_node(Operation::GetTupleElement { index }, &[pair])
            .unwrap();
        let function = builder.finish("split", vec![projected]).unwrap();

        let input = TensorLiteral::from_f64(&[rows, cols], &data);
        let (ops, optimized, plain) = optimized_and_plain(function, &input);
        let expected = if index == 0 { "reduce_max" } else { "argmax" };
        prop_assert_eq!(ops, vec![expected]);
        prop_assert_eq!(optimized, plain);
    }

    #[test]
    fn chained_transposes_fold_to_one(
        first in prop::sample::select(permutations()),
        second in prop::sample::select(permutations()),
        data in prop::collection::vec(-10.0f64..10.0, 24),
    ) {
        let order = |perm: &[usize]| {
            Operation::DimShuffle(DimShuffleSpec::new(
                perm.iter().map(|&axis| ShuffleAxis::Axis(axis)).collect::<Vec<_>>(),
            ))
        };
        let mut builder = GraphBuilder::new();
        let x = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(3), Some(4)]));
        let a = builder.add_node(order(&first), &[x]).unwrap();
        let b = builder.add_node(order(&second), &[a]).unwrap();
        let function = builder.finish("transposes", vec![b]).unwrap();

        let input = TensorLiteral::from_f64(&[2, 3, 4], &data);
        let (ops, optimized, plain) = optimized_and_plain(function, &input);
        prop_assert!(ops.len() <= 1, "{:?}", ops);
        prop_assert_eq!(optimized, plain);
    }
}
