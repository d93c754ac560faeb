use std::sync::Arc;

use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tgraph_rs::backend::builder::GraphBuilder;
use tgraph_rs::backend::compile::{compile, CompileOptions, CompiledFunction};
use tgraph_rs::backend::executor::{execute_function, ExecutionOptions};
use tgraph_rs::backend::ir_utils::{list_type, scalar_type, tensor_type};
use tgraph_rs::backend::optimizer::{NoopOptimizer, Optimizer};
use tgraph_rs::backend::spec::{
    AllocSpec, DType, DimShuffleSpec, ElementwiseUnaryOp, ExtentSource, HostValue, IndexEntry,
    IndexScalar, ListIndex, MaxAndArgmaxSpec, Operand, Operation, PortableBackend, Program,
    ReduceKind, ReduceSpec, ShuffleAxis, SliceSpec, SolveTriangularSpec, SubtensorSpec,
    TensorLiteral, TriangularTranspose,
};

const NEG: Operation = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);

fn uncached(check_finite: bool) -> CompileOptions {
    CompileOptions {
        check_finite,
        use_cache: false,
    }
}

fn compile_with<B: PortableBackend + 'static>(
    backend: &Arc<B>,
    program: &Program,
    optimizer: Option<Arc<dyn Optimizer>>,
    check_finite: bool,
) -> CompiledFunction<B> {
    compile(Arc::clone(backend), program, optimizer, uncached(check_finite))
        .expect("program should compile")
}

/// Runs `program` unoptimized and through the default pipeline, asserting equal results.
fn run_both<B: PortableBackend + 'static>(
    backend: &Arc<B>,
    program: &Program,
    inputs: Vec<HostValue>,
) -> (Vec<HostValue>, CompiledFunction<B>) {
    let plain = compile_with(backend, program, Some(Arc::new(NoopOptimizer)), false);
    let optimized = compile_with(backend, program, None, false);
    let expected = plain.call_host(inputs.clone()).expect("unoptimized run");
    let actual = optimized.call_host(inputs).expect("optimized run");
    assert_eq!(expected.len(), actual.len());
    for (lhs, rhs) in expected.iter().zip(&actual) {
        assert_host_close(lhs, rhs);
    }
    (actual, optimized)
}

fn assert_host_close(lhs: &HostValue, rhs: &HostValue) {
    match (lhs, rhs) {
        (HostValue::Tensor(a), HostValue::Tensor(b)) => assert_literal_close(a, b),
        (HostValue::List(a), HostValue::List(b)) => {
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b) {
                assert_literal_close(x, y);
            }
        }
        (HostValue::Tuple(a), HostValue::Tuple(b)) => {
            assert_eq!(a.len(), b.len());
            for (x, y) in a.iter().zip(b) {
                assert_host_close(x, y);
            }
        }
        _ => panic!("value kinds differ: {lhs:?} vs {rhs:?}"),
    }
}

fn assert_literal_close(a: &TensorLiteral, b: &TensorLiteral) {
    assert_eq!(a.spec, b.spec);
    for (x, y) in a.to_f64_vec().iter().zip(b.to_f64_vec()) {
        if x.is_nan() {
            assert!(y.is_nan());
        } else {
            assert_abs_diff_eq!(*x, y, epsilon = 1e-9);
        }
    }
}

fn tensor(value: &HostValue) -> &TensorLiteral {
    value.as_tensor().expect("expected a tensor result")
}

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Vec<f64> {
    (0..rows * cols).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

pub fn dot_matches_expected<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let mut builder = GraphBuilder::new();
    let a = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(2)]));
    let b = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(2)]));
    let out = builder.add_node(Operation::Dot, &[a, b]).unwrap();
    let program = Program::from_function(builder.finish("dot", vec![out]).unwrap());

    let compiled = compile_with(backend, &program, None, false);
    let result = compiled
        .call_host(vec![
            HostValue::Tensor(TensorLiteral::from_f64(&[2, 2], &[1.0, 2.0, 3.0, 4.0])),
            HostValue::Tensor(TensorLiteral::from_f64(&[2, 2], &[5.0, 6.0, 7.0, 8.0])),
        ])
        .unwrap();
    assert_eq!(tensor(&result[0]).to_f64_vec(), vec![19.0, 22.0, 43.0, 50.0]);
}

pub fn block_diag_places_blocks<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let shapes = [(3usize, 4usize), (5, 5), (6, 5)];
    let mut rng = StdRng::seed_from_u64(11);
    let blocks: Vec<Vec<f64>> = shapes
        .iter()
        .map(|&(r, c)| random_matrix(&mut rng, r, c))
        .collect();

    let mut builder = GraphBuilder::new();
    let params: Vec<_> = shapes
        .iter()
        .map(|&(r, c)| builder.add_parameter(tensor_type(DType::F64, &[Some(r), Some(c)])))
        .collect();
    let out = builder.add_node(Operation::BlockDiag, &params).unwrap();
    let program = Program::from_function(builder.finish("block_diag", vec![out]).unwrap());

    let inputs = shapes
        .iter()
        .zip(&blocks)
        .map(|(&(r, c), values)| HostValue::Tensor(TensorLiteral::from_f64(&[r, c], values)))
        .collect();
    let result = compile_with(backend, &program, None, false)
        .call_host(inputs)
        .unwrap();
    let out = tensor(&result[0]);
    assert_eq!(out.dims(), vec![14, 14]);

    let values = out.to_f64_vec();
    let (mut row0, mut col0) = (0, 0);
    let mut expected = vec![0.0; 14 * 14];
    for (&(r, c), block) in shapes.iter().zip(&blocks) {
        for i in 0..r {
            for j in 0..c {
                expected[(row0 + i) * 14 + col0 + j] = block[i * c + j];
            }
        }
        row0 += r;
        col0 += c;
    }
    assert_eq!(values, expected);
}

/// Dense `op(A)` restricted to the triangle the solver reads.
fn effective_operator(a: &[f64], n: usize, spec: &SolveTriangularSpec) -> Vec<f64> {
    let mut tri = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            let kept = if spec.lower { j <= i } else { j >= i };
            if kept {
                tri[i * n + j] = if i == j && spec.unit_diagonal { 1.0 } else { a[i * n + j] };
            }
        }
    }
    if matches!(spec.trans, TriangularTranspose::None) {
        tri
    } else {
        (0..n * n).map(|idx| tri[(idx % n) * n + idx / n]).collect()
    }
}

pub fn solve_triangular_satisfies_system<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let n = 5;
    let mut rng = StdRng::seed_from_u64(3);
    let mut a = random_matrix(&mut rng, n, n);
    for i in 0..n {
        a[i * n + i] = 2.0 + rng.gen_range(0.0..1.0);
    }

    for nrhs in [None, Some(3usize)] {
        let b_dims: Vec<usize> = match nrhs {
            Some(k) => vec![n, k],
            None => vec![n],
        };
        let cols = nrhs.unwrap_or(1);
        let b = random_matrix(&mut rng, n, cols);
        for lower in [true, false] {
            for trans in [TriangularTranspose::None, TriangularTranspose::Transpose] {
                for unit_diagonal in [false, true] {
                    let spec = SolveTriangularSpec {
                        lower,
                        trans,
                        unit_diagonal,
                        check_finite: false,
                    };
                    let mut builder = GraphBuilder::new();
                    let pa = builder.add_parameter(tensor_type(DType::F64, &[Some(n), Some(n)]));
                    let b_shape: Vec<_> = b_dims.iter().map(|d| Some(*d)).collect();
                    let pb = builder.add_parameter(tensor_type(DType::F64, &b_shape));
                    let x = builder
                        .add_node(Operation::SolveTriangular(spec.clone()), &[pa, pb])
                        .unwrap();
                    let program = Program::from_function(builder.finish("solve", vec![x]).unwrap());
                    let result = compile_with(backend, &program, None, false)
                        .call_host(vec![
                            HostValue::Tensor(TensorLiteral::from_f64(&[n, n], &a)),
                            HostValue::Tensor(TensorLiteral::from_f64(&b_dims, &b)),
                        ])
                        .unwrap();
                    let x = tensor(&result[0]);
                    assert_eq!(x.dims(), b_dims);

                    let x = x.to_f64_vec();
                    let op = effective_operator(&a, n, &spec);
                    for i in 0..n {
                        for col in 0..cols {
                            let lhs: f64 = (0..n).map(|j| op[i * n + j] * x[j * cols + col]).sum();
                            assert_abs_diff_eq!(lhs, b[i * cols + col], epsilon = 1e-9);
                        }
                    }
                }
            }
        }
    }
}

pub fn solve_triangular_rejects_non_finite<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let spec = SolveTriangularSpec {
        check_finite: true,
        ..SolveTriangularSpec::default()
    };
    let mut builder = GraphBuilder::new();
    let pa = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(2)]));
    let pb = builder.add_parameter(tensor_type(DType::F64, &[Some(2)]));
    let x = builder
        .add_node(Operation::SolveTriangular(spec), &[pa, pb])
        .unwrap();
    let program = Program::from_function(builder.finish("solve", vec![x]).unwrap());
    let compiled = compile_with(backend, &program, None, false);

    let a = HostValue::Tensor(TensorLiteral::from_f64(&[2, 2], &[1.0, 0.0, 2.0, 1.0]));
    for bad in [f64::NAN, f64::INFINITY] {
        let b = HostValue::Tensor(TensorLiteral::from_f64(&[2], &[1.0, bad]));
        let err = compiled.call_host(vec![a.clone(), b]).unwrap_err();
        let numeric = err
            .as_numeric_validation()
            .expect("non-finite operand should fail numeric validation");
        assert_eq!(numeric.positions, vec![1]);
        assert!(err.to_string().contains("Non-numeric values"));
    }

    let b = HostValue::Tensor(TensorLiteral::from_f64(&[2], &[1.0, 4.0]));
    let result = compiled.call_host(vec![a, b]).unwrap();
    assert_eq!(tensor(&result[0]).to_f64_vec(), vec![1.0, 2.0]);
}

pub fn check_finite_rejects_non_finite_results<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[Some(3)]));
    let y = builder
        .add_node(Operation::ElementwiseUnary(ElementwiseUnaryOp::Log), &[x])
        .unwrap();
    let program = Program::from_function(builder.finish("log", vec![y]).unwrap());
    let input = vec![HostValue::Tensor(TensorLiteral::from_f64(&[3], &[1.0, 0.0, 2.0]))];

    let unchecked = compile_with(backend, &program, None, false);
    let values = unchecked.call_host(input.clone()).unwrap();
    assert!(tensor(&values[0]).to_f64_vec()[1].is_infinite());

    let checked = compile_with(backend, &program, None, true);
    let err = checked.call_host(input).unwrap_err();
    let numeric = err.as_numeric_validation().expect("log(0) must be rejected");
    assert_eq!(numeric.op, "log");
    assert_eq!(numeric.positions, vec![1]);
}

pub fn reduce_of_negation_matches_unoptimized<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[Some(3), Some(4)]));
    let negated = builder.add_node(NEG, &[x]).unwrap();
    let reduced = builder
        .add_node(
            Operation::Reduce(ReduceSpec {
                kind: ReduceKind::Max,
                axes: vec![1],
                keepdims: false,
            }),
            &[negated],
        )
        .unwrap();
    let out = builder.add_node(NEG, &[reduced]).unwrap();
    let program = Program::from_function(builder.finish("neg_max", vec![out]).unwrap());

    let mut rng = StdRng::seed_from_u64(5);
    let input = TensorLiteral::from_f64(&[3, 4], &random_matrix(&mut rng, 3, 4));
    let (result, optimized) = run_both(backend, &program, vec![HostValue::Tensor(input.clone())]);

    let function = optimized.function().expect("entry function");
    assert_eq!(function.op_names(), vec!["reduce_min"]);

    let values = input.to_f64_vec();
    let expected: Vec<f64> = values
        .chunks(4)
        .map(|row| row.iter().copied().fold(f64::INFINITY, f64::min))
        .collect();
    assert_eq!(tensor(&result[0]).to_f64_vec(), expected);
}

pub fn max_and_argmax_split_matches_unoptimized<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let input = TensorLiteral::from_f64(&[2, 3], &[1.0, 7.0, 7.0, -2.0, -5.0, -1.0]);
    for (index, expected_op, expected) in [
        (0usize, "reduce_max", vec![7.0, -1.0]),
        (1usize, "argmax", vec![1.0, 2.0]),
    ] {
        let mut builder = GraphBuilder::new();
        let x = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(3)]));
        let pair = builder
            .add_node(Operation::MaxAndArgmax(MaxAndArgmaxSpec { axis: -1 }), &[x])
            .unwrap();
        let out = builder
            .add_node(Operation::GetTupleElement { index }, &[pair])
            .unwrap();
        let program = Program::from_function(builder.finish("split", vec![out]).unwrap());

        let (result, optimized) =
            run_both(backend, &program, vec![HostValue::Tensor(input.clone())]);
        let names = optimized.function().expect("entry function").op_names();
        assert_eq!(names, vec![expected_op]);
        assert_eq!(tensor(&result[0]).to_f64_vec(), expected);
    }
}

pub fn reduce_max_propagates_nan<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(2)]));
    let out = builder
        .add_node(
            Operation::Reduce(ReduceSpec {
                kind: ReduceKind::Max,
                axes: vec![1],
                keepdims: true,
            }),
            &[x],
        )
        .unwrap();
    let program = Program::from_function(builder.finish("nan_max", vec![out]).unwrap());
    let input = TensorLiteral::from_f64(&[2, 2], &[f64::NAN, 1.0, 2.0, 3.0]);
    let (result, _) = run_both(backend, &program, vec![HostValue::Tensor(input)]);
    let values = tensor(&result[0]);
    assert_eq!(values.dims(), vec![2, 1]);
    let values = values.to_f64_vec();
    assert!(values[0].is_nan());
    assert_eq!(values[1], 3.0);
}

pub fn dimshuffle_of_subtensor_folds_dropped_axis<B: PortableBackend + 'static>(
    backend: &Arc<B>,
) {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[Some(3), Some(1), Some(4)]));
    let sliced = builder
        .add_node(
            Operation::Subtensor(SubtensorSpec {
                indices: vec![IndexEntry::Slice(SliceSpec::range(1, 3))],
            }),
            &[x],
        )
        .unwrap();
    let out = builder
        .add_node(
            Operation::DimShuffle(DimShuffleSpec::new(vec![
                ShuffleAxis::Axis(0),
                ShuffleAxis::Axis(2),
            ])),
            &[sliced],
        )
        .unwrap();
    let program = Program::from_function(builder.finish("squeeze", vec![out]).unwrap());

    let values: Vec<f64> = (0..12).map(f64::from).collect();
    let input = TensorLiteral::from_f64(&[3, 1, 4], &values);
    let (result, optimized) = run_both(backend, &program, vec![HostValue::Tensor(input)]);
    assert_eq!(
        optimized.function().expect("entry function").op_names(),
        vec!["subtensor"]
    );
    let out = tensor(&result[0]);
    assert_eq!(out.dims(), vec![2, 4]);
    assert_eq!(out.to_f64_vec(), values[4..12].to_vec());
}

struct SubtensorCase {
    name: &'static str,
    declared: &'static [Option<usize>],
    indices: Vec<IndexEntry>,
    order: &'static [ShuffleAxis],
    input_dims: &'static [usize],
    /// Value of the run-time index operand, when the indices reference one.
    runtime: Option<i64>,
    folds: bool,
}

fn static_slice(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> IndexEntry {
    IndexEntry::Slice(SliceSpec {
        start: start.map(IndexScalar::Static),
        stop: stop.map(IndexScalar::Static),
        step: step.map(IndexScalar::Static),
    })
}

fn full() -> IndexEntry {
    IndexEntry::Slice(SliceSpec::full())
}

fn step_from_operand() -> IndexEntry {
    IndexEntry::Slice(SliceSpec {
        step: Some(IndexScalar::Operand(1)),
        ..SliceSpec::full()
    })
}

fn subtensor_cases() -> Vec<SubtensorCase> {
    use ShuffleAxis::Axis;
    vec![
        SubtensorCase {
            name: "x[:, :, 10:30, ::i].dimshuffle(0,2,3)",
            declared: &[None, Some(1), None, None],
            indices: vec![full(), full(), static_slice(Some(10), Some(30), None), step_from_operand()],
            order: &[Axis(0), Axis(2), Axis(3)],
            input_dims: &[2, 1, 32, 5],
            runtime: Some(2),
            folds: true,
        },
        SubtensorCase {
            name: "x[i].dimshuffle(1)",
            declared: &[None, Some(1), None],
            indices: vec![IndexEntry::Scalar(IndexScalar::Operand(1))],
            order: &[Axis(1)],
            input_dims: &[3, 1, 4],
            runtime: Some(-1),
            folds: true,
        },
        SubtensorCase {
            name: "x[i].dimshuffle(1) with a trailing unit axis",
            declared: &[None, Some(1), None, Some(1)],
            indices: vec![IndexEntry::Scalar(IndexScalar::Operand(1))],
            order: &[Axis(1)],
            input_dims: &[3, 1, 4, 1],
            runtime: Some(1),
            folds: true,
        },
        SubtensorCase {
            name: "x[2:3, :-2].dimshuffle(1)",
            declared: &[Some(5), Some(4)],
            indices: vec![static_slice(Some(2), Some(3), None), static_slice(None, Some(-2), None)],
            order: &[Axis(1)],
            input_dims: &[5, 4],
            runtime: None,
            folds: true,
        },
        SubtensorCase {
            name: "x[:1, 0:3].dimshuffle(1)",
            declared: &[Some(5), Some(4)],
            indices: vec![static_slice(None, Some(1), None), static_slice(Some(0), Some(3), None)],
            order: &[Axis(1)],
            input_dims: &[5, 4],
            runtime: None,
            folds: true,
        },
        SubtensorCase {
            name: "x[-1:, :].dimshuffle(1)",
            declared: &[Some(5), Some(4)],
            indices: vec![static_slice(Some(-1), None, None), full()],
            order: &[Axis(1)],
            input_dims: &[5, 4],
            runtime: None,
            folds: true,
        },
        SubtensorCase {
            name: "x[4:3:-1, 1:].dimshuffle(1)",
            declared: &[Some(5), Some(4)],
            indices: vec![static_slice(Some(4), Some(3), Some(-1)), static_slice(Some(1), None, None)],
            order: &[Axis(1)],
            input_dims: &[5, 4],
            runtime: None,
            folds: true,
        },
        SubtensorCase {
            name: "x[:, ::i].dimshuffle(0,2)",
            declared: &[None, Some(1), None],
            indices: vec![full(), step_from_operand()],
            order: &[Axis(0), Axis(2)],
            input_dims: &[2, 1, 3],
            runtime: Some(1),
            folds: false,
        },
        SubtensorCase {
            name: "x[2:3, :-2].dimshuffle(1,0)",
            declared: &[Some(5), Some(4)],
            indices: vec![static_slice(Some(2), Some(3), None), static_slice(None, Some(-2), None)],
            order: &[Axis(1), Axis(0)],
            input_dims: &[5, 4],
            runtime: None,
            folds: false,
        },
    ]
}

fn subtensor_program(case: &SubtensorCase) -> Program {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, case.declared));
    let mut operands = vec![Operand::Value(x)];
    if case.runtime.is_some() {
        operands.push(Operand::Value(builder.add_parameter(scalar_type(DType::Si64))));
    }
    let sliced = builder
        .add_node_with_operands(
            Operation::Subtensor(SubtensorSpec {
                indices: case.indices.clone(),
            }),
            operands,
        )
        .unwrap_or_else(|err| panic!("{}: {err}", case.name));
    let out = builder
        .add_node(
            Operation::DimShuffle(DimShuffleSpec::new(case.order.to_vec())),
            &[sliced],
        )
        .unwrap_or_else(|err| panic!("{}: {err}", case.name));
    Program::from_function(builder.finish("sliced", vec![out]).unwrap())
}

fn subtensor_inputs(case: &SubtensorCase, runtime: Option<i64>) -> Vec<HostValue> {
    let count: usize = case.input_dims.iter().product();
    let values: Vec<f64> = (0..count).map(|v| v as f64).collect();
    let mut inputs = vec![HostValue::Tensor(TensorLiteral::from_f64(
        case.input_dims,
        &values,
    ))];
    inputs.extend(runtime.map(|i| HostValue::Tensor(TensorLiteral::scalar_i64(i))));
    inputs
}

pub fn dimshuffle_of_subtensor_matches_unoptimized<B: PortableBackend + 'static>(
    backend: &Arc<B>,
) {
    for case in subtensor_cases() {
        let program = subtensor_program(&case);
        let (_, optimized) = run_both(backend, &program, subtensor_inputs(&case, case.runtime));
        let names = optimized.function().expect("entry function").op_names();
        let expected = if case.folds {
            vec!["subtensor"]
        } else {
            vec!["subtensor", "dimshuffle"]
        };
        assert_eq!(names, expected, "{}", case.name);
    }
}

pub fn zero_runtime_step_fails_with_and_without_rewrites<B: PortableBackend + 'static>(
    backend: &Arc<B>,
) {
    for case in subtensor_cases() {
        if !case.indices.contains(&step_from_operand()) {
            continue;
        }
        let program = subtensor_program(&case);
        let inputs = subtensor_inputs(&case, Some(0));
        let plain = compile_with(backend, &program, Some(Arc::new(NoopOptimizer)), false);
        let optimized = compile_with(backend, &program, None, false);
        assert!(plain.call_host(inputs.clone()).is_err(), "{}", case.name);
        assert!(optimized.call_host(inputs).is_err(), "{}", case.name);
    }
}

pub fn input_not_matching_declared_type_is_rejected<B: PortableBackend + 'static>(
    backend: &Arc<B>,
) {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[None, Some(1), None]));
    let sliced = builder
        .add_node(
            Operation::Subtensor(SubtensorSpec {
                indices: vec![full()],
            }),
            &[x],
        )
        .unwrap();
    let out = builder
        .add_node(
            Operation::DimShuffle(DimShuffleSpec::new(vec![
                ShuffleAxis::Axis(0),
                ShuffleAxis::Axis(2),
            ])),
            &[sliced],
        )
        .unwrap();
    let program = Program::from_function(builder.finish("squeeze", vec![out]).unwrap());

    let wrong_extent = vec![HostValue::Tensor(TensorLiteral::from_f64(&[2, 2, 3], &[0.0; 12]))];
    let plain = compile_with(backend, &program, Some(Arc::new(NoopOptimizer)), false);
    let optimized = compile_with(backend, &program, None, false);
    for compiled in [&plain, &optimized] {
        let err = compiled
            .call_host(wrong_extent.clone())
            .expect_err("extent 2 does not fit the declared unit axis");
        assert!(err.to_string().contains("declared type"), "{err}");
    }
}

pub fn dimshuffle_of_alloc_folds_into_alloc<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[Some(3)]));
    let filled = builder
        .add_node(
            Operation::Alloc(AllocSpec {
                shape: vec![ExtentSource::Static(2), ExtentSource::Static(3)],
            }),
            &[x],
        )
        .unwrap();
    let out = builder
        .add_node(
            Operation::DimShuffle(DimShuffleSpec::new(vec![
                ShuffleAxis::Broadcast,
                ShuffleAxis::Axis(0),
                ShuffleAxis::Axis(1),
            ])),
            &[filled],
        )
        .unwrap();
    let program = Program::from_function(builder.finish("expand", vec![out]).unwrap());

    let input = TensorLiteral::from_f64(&[3], &[1.0, 2.0, 3.0]);
    let (result, optimized) = run_both(backend, &program, vec![HostValue::Tensor(input)]);
    assert_eq!(
        optimized.function().expect("entry function").op_names(),
        vec!["alloc"]
    );
    let out = tensor(&result[0]);
    assert_eq!(out.dims(), vec![1, 2, 3]);
    assert_eq!(out.to_f64_vec(), vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
}

pub fn shape_i_reads_runtime_extent<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[None, Some(2)]));
    let rows = builder.add_node(Operation::ShapeOf { axis: 0 }, &[x]).unwrap();
    let program = Program::from_function(builder.finish("shape", vec![rows]).unwrap());
    let input = TensorLiteral::from_f64(&[5, 2], &[0.0; 10]);
    let result = compile_with(backend, &program, None, false)
        .call_host(vec![HostValue::Tensor(input)])
        .unwrap();
    assert_eq!(tensor(&result[0]).to_i64_vec().unwrap(), vec![5]);
}

pub fn typed_list_operations<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let element = &[Some(2)];
    let mut builder = GraphBuilder::new();
    let params: Vec<_> = (0..4)
        .map(|_| builder.add_parameter(tensor_type(DType::F64, element)))
        .collect();
    let (a, b, c, d) = (params[0], params[1], params[2], params[3]);
    let l0 = builder.add_node(Operation::MakeList, &[a, b]).unwrap();
    let l1 = builder
        .add_node(Operation::ListAppend { inplace: false }, &[l0, c])
        .unwrap();
    let l2 = builder
        .add_node_with_operands(
            Operation::ListInsert { inplace: false },
            vec![
                Operand::Value(l1),
                Operand::Literal(TensorLiteral::scalar_i64(0)),
                Operand::Value(d),
            ],
        )
        .unwrap();
    let l3 = builder
        .add_node(Operation::ListReverse { inplace: false }, &[l2])
        .unwrap();
    let len = builder.add_node(Operation::ListLength, &[l3]).unwrap();
    let pos = builder.add_node(Operation::ListIndexOf, &[l3, a]).unwrap();
    let count = builder.add_node(Operation::ListCount, &[l3, b]).unwrap();
    let last = builder
        .add_node(
            Operation::ListGetItem(ListIndex::Scalar(IndexScalar::Static(-1))),
            &[l3],
        )
        .unwrap();
    let middle = builder
        .add_node(Operation::ListGetItem(ListIndex::Slice(SliceSpec::range(1, 3))), &[l3])
        .unwrap();
    let program = Program::from_function(
        builder
            .finish("lists", vec![l3, len, pos, count, last, middle])
            .unwrap(),
    );
    assert_eq!(
        program.entry_function().unwrap().results[0],
        list_type(DType::F64, element)
    );

    let literals: Vec<_> = (0..4)
        .map(|i| TensorLiteral::from_f64(&[2], &[f64::from(i), f64::from(i) + 0.5]))
        .collect();
    let inputs = literals.iter().cloned().map(HostValue::Tensor).collect();
    let (result, optimized) = run_both(backend, &program, inputs);

    let inplace = optimized
        .function()
        .expect("entry function")
        .body
        .iter()
        .filter(|inst| inst.op.is_inplace())
        .count();
    assert_eq!(inplace, 3, "append, insert and reverse read fresh lists");

    let [a, b, c, d] = [0, 1, 2, 3].map(|i| literals[i].clone());
    assert_eq!(result[0], HostValue::List(vec![c, b.clone(), a.clone(), d.clone()]));
    assert_eq!(tensor(&result[1]).to_i64_vec().unwrap(), vec![4]);
    assert_eq!(tensor(&result[2]).to_i64_vec().unwrap(), vec![2]);
    assert_eq!(tensor(&result[3]).to_i64_vec().unwrap(), vec![1]);
    assert_eq!(result[4], HostValue::Tensor(d));
    assert_eq!(result[5], HostValue::List(vec![b, a]));
}

pub fn list_errors_are_reported<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let mut builder = GraphBuilder::new();
    let items = builder.add_parameter(list_type(DType::F64, &[Some(1)]));
    let needle = builder.add_parameter(tensor_type(DType::F64, &[Some(1)]));
    let pos = builder.add_node(Operation::ListIndexOf, &[items, needle]).unwrap();
    let program = Program::from_function(builder.finish("index", vec![pos]).unwrap());
    let compiled = compile_with(backend, &program, None, false);

    let list = HostValue::List(vec![TensorLiteral::from_f64(&[1], &[1.0])]);
    let missing = HostValue::Tensor(TensorLiteral::from_f64(&[1], &[2.0]));
    let err = compiled.call_host(vec![list.clone(), missing]).unwrap_err();
    assert!(err.to_string().contains("not in list"));

    // NaN never compares equal, even to itself.
    let nan_list = HostValue::List(vec![TensorLiteral::from_f64(&[1], &[f64::NAN])]);
    let nan = HostValue::Tensor(TensorLiteral::from_f64(&[1], &[f64::NAN]));
    assert!(compiled.call_host(vec![nan_list, nan]).is_err());

    let mut builder = GraphBuilder::new();
    let items = builder.add_parameter(list_type(DType::F64, &[Some(1)]));
    let item = builder
        .add_node(
            Operation::ListGetItem(ListIndex::Scalar(IndexScalar::Static(3))),
            &[items],
        )
        .unwrap();
    let program = Program::from_function(builder.finish("getitem", vec![item]).unwrap());
    let err = compile_with(backend, &program, None, false)
        .call_host(vec![list])
        .unwrap_err();
    assert!(err.to_string().contains("out of range"));
}

pub fn consumed_list_is_not_readable<B: PortableBackend + 'static>(backend: &Arc<B>) {
    let mut builder = GraphBuilder::new();
    let a = builder.add_parameter(tensor_type(DType::F64, &[Some(1)]));
    let list = builder.add_node(Operation::MakeList, &[a]).unwrap();
    let grown = builder
        .add_node(Operation::ListAppend { inplace: true }, &[list, a])
        .unwrap();
    let stale = builder.add_node(Operation::ListLength, &[list]).unwrap();
    let function = builder.finish("stale", vec![grown, stale]).unwrap();
    let program = Program::from_function(function.clone());

    // Scheduling rejects the graph outright.
    let err = compile(
        Arc::clone(backend),
        &program,
        Some(Arc::new(NoopOptimizer)),
        uncached(false),
    )
    .err()
    .expect("reading a consumed list must not compile");
    assert!(format!("{err:#}").contains("destroyed"));

    // Executing it directly trips over the consumed handle instead.
    let input = backend
        .materialize(HostValue::Tensor(TensorLiteral::from_f64(&[1], &[1.0])))
        .unwrap();
    let err = execute_function(
        backend.as_ref(),
        &function,
        &[input],
        &ExecutionOptions { check_finite: false },
    )
    .err()
    .expect("executor must refuse to read a consumed list");
    assert!(err.to_string().contains("consumed"));
}
