use tgraph_rs::backend::{
    error::{GraphError, TypeError},
    infer::infer_output,
    ir_utils::{list_type, scalar_type, tensor_spec_static, tensor_type},
    spec::{
        AllocSpec, DType, DimShuffleSpec, Dimension, ExtentSource, IndexEntry, IndexScalar,
        Operand, Operation, Program, ReduceKind, ReduceSpec, ReshapeDim, ReshapeSpec,
        HostValue, ShuffleAxis, SliceSpec, SolveTriangularSpec, SubtensorSpec, TensorLiteral, ValueId,
        ValueType,
    },
};
use tgraph_rs::GraphBuilder;

fn dims_of(ty: &ValueType) -> Vec<Dimension> {
    ty.as_tensor().expect("tensor type").shape.dims().to_vec()
}

#[test]
fn builder_records_inferred_types() {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F32, &[Some(2), None, Some(1)]));
    let reduced = builder
        .add_node(
            Operation::Reduce(ReduceSpec {
                kind: ReduceKind::Sum,
                axes: vec![-1, 0],
                keepdims: false,
            }),
            &[x],
        )
        .expect("reduce is well typed");
    assert_eq!(
        builder.value_type(reduced),
        Some(&tensor_type(DType::F32, &[None]))
    );

    let function = builder.finish("f", vec![reduced]).expect("finish");
    assert_eq!(function.parameter_ids, vec![x]);
    assert_eq!(function.results, vec![tensor_type(DType::F32, &[None])]);
    assert_eq!(function.op_names(), vec!["reduce_sum"]);
}

#[test]
fn builder_rejects_ill_typed_nodes() {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[Some(2), Some(3)]));
    let i = builder.add_parameter(tensor_type(DType::Si64, &[Some(2), Some(3)]));

    let err = builder
        .add_node(Operation::Dot, &[x, i])
        .expect_err("integer dot is rejected");
    assert!(matches!(err, TypeError::DType { op: "dot", .. }));

    let err = builder
        .add_node(Operation::Dot, &[x, ValueId(99)])
        .expect_err("undefined operand");
    assert!(err.to_string().contains("undefined"));

    let before = builder.value_type(x).cloned();
    let err = builder
        .add_node(
            Operation::DimShuffle(DimShuffleSpec::new(vec![ShuffleAxis::Axis(1)])),
            &[x],
        )
        .expect_err("axis 0 has extent 2 and cannot be dropped");
    assert!(err.to_string().contains("cannot drop axis 0"));
    assert_eq!(builder.value_type(x).cloned(), before);

    let err = builder
        .finish("bad", vec![ValueId(42)])
        .expect_err("unknown result");
    assert_eq!(err, GraphError::UnknownValue(ValueId(42)));
}

#[test]
fn subtensor_shapes_follow_slice_rules() {
    let input = tensor_type(DType::F64, &[Some(10), None, Some(1), Some(4)]);
    let spec = SubtensorSpec {
        indices: vec![
            IndexEntry::Slice(SliceSpec {
                start: Some(IndexScalar::Static(-3)),
                stop: None,
                step: Some(IndexScalar::Static(2)),
            }),
            IndexEntry::Slice(SliceSpec::range(0, 2)),
            IndexEntry::Slice(SliceSpec::full()),
            IndexEntry::Scalar(IndexScalar::Static(-1)),
        ],
    };
    let out = infer_output(&Operation::Subtensor(spec), &[input.clone()]).unwrap();
    // 10[-3::2] has 2 elements; an unknown axis stays unknown; a full slice keeps a size-1 axis.
    assert_eq!(
        dims_of(&out),
        vec![Dimension::Static(2), Dimension::Unknown, Dimension::Static(1)]
    );

    let runtime = SubtensorSpec {
        indices: vec![IndexEntry::Slice(SliceSpec {
            start: Some(IndexScalar::Operand(1)),
            stop: None,
            step: None,
        })],
    };
    let out = infer_output(
        &Operation::Subtensor(runtime.clone()),
        &[input.clone(), scalar_type(DType::Si64)],
    )
    .unwrap();
    assert_eq!(dims_of(&out)[0], Dimension::Unknown);

    let err = infer_output(
        &Operation::Subtensor(runtime),
        &[input.clone(), scalar_type(DType::F64)],
    )
    .expect_err("float slice bound");
    assert!(matches!(
        err,
        TypeError::OperandKind {
            index: 1,
            expected: "integer scalar",
            ..
        }
    ));

    let err = infer_output(
        &Operation::Subtensor(SubtensorSpec {
            indices: vec![IndexEntry::Scalar(IndexScalar::Static(10))],
        }),
        &[input],
    )
    .expect_err("index out of bounds");
    assert!(err.to_string().contains("out of bounds"));
}

#[test]
fn alloc_and_reshape_shapes() {
    let value = tensor_type(DType::F32, &[Some(1), Some(3)]);
    let alloc = Operation::Alloc(AllocSpec {
        shape: vec![
            ExtentSource::Static(4),
            ExtentSource::Operand(1),
            ExtentSource::Static(3),
        ],
    });
    let out = infer_output(&alloc, &[value.clone(), scalar_type(DType::Si64)]).unwrap();
    assert_eq!(
        dims_of(&out),
        vec![Dimension::Static(4), Dimension::Unknown, Dimension::Static(3)]
    );

    let too_wide = Operation::Alloc(AllocSpec {
        shape: vec![ExtentSource::Static(2), ExtentSource::Static(5)],
    });
    assert!(infer_output(&too_wide, &[value.clone()]).is_err());

    let reshape = Operation::Reshape(ReshapeSpec {
        new_shape: vec![ReshapeDim::Infer, ReshapeDim::Explicit(1)],
    });
    let out = infer_output(&reshape, &[value.clone()]).unwrap();
    assert_eq!(dims_of(&out), vec![Dimension::Static(3), Dimension::Static(1)]);

    let mismatch = Operation::Reshape(ReshapeSpec {
        new_shape: vec![ReshapeDim::Explicit(2), ReshapeDim::Explicit(2)],
    });
    assert!(infer_output(&mismatch, &[value]).is_err());
}

#[test]
fn linear_algebra_shapes() {
    let a = tensor_type(DType::F64, &[Some(3), Some(3)]);
    let b = tensor_type(DType::F64, &[Some(3), Some(2)]);
    let solve = Operation::SolveTriangular(SolveTriangularSpec::default());
    assert_eq!(infer_output(&solve, &[a.clone(), b.clone()]).unwrap(), b);

    let wide = tensor_type(DType::F64, &[Some(3), Some(4)]);
    assert!(infer_output(&solve, &[wide, b.clone()]).is_err());
    let vector_a = tensor_type(DType::F64, &[Some(3)]);
    assert!(infer_output(&solve, &[vector_a, b.clone()]).is_err());

    let blocks = [
        tensor_type(DType::F64, &[Some(2), Some(3)]),
        tensor_type(DType::F64, &[None, Some(1)]),
    ];
    let out = infer_output(&Operation::BlockDiag, &blocks).unwrap();
    assert_eq!(dims_of(&out), vec![Dimension::Unknown, Dimension::Static(4)]);
    assert!(infer_output(&Operation::BlockDiag, &[]).is_err());

    let out = infer_output(&Operation::Dot, &[a, tensor_type(DType::F64, &[Some(3)])]).unwrap();
    assert_eq!(dims_of(&out), vec![Dimension::Static(3)]);
}

#[test]
fn list_types_join_and_check_elements() {
    let out = infer_output(
        &Operation::MakeList,
        &[
            tensor_type(DType::F32, &[Some(2)]),
            tensor_type(DType::F32, &[Some(3)]),
        ],
    )
    .unwrap();
    assert_eq!(out, list_type(DType::F32, &[None]));

    assert!(infer_output(
        &Operation::MakeList,
        &[
            tensor_type(DType::F32, &[Some(2)]),
            tensor_type(DType::F64, &[Some(2)]),
        ],
    )
    .is_err());

    let list = list_type(DType::F32, &[Some(2)]);
    let insert = Operation::ListInsert { inplace: false };
    let element = tensor_type(DType::F32, &[Some(2)]);
    assert_eq!(
        infer_output(
            &insert,
            &[list.clone(), scalar_type(DType::Si64), element.clone()]
        )
        .unwrap(),
        list
    );
    assert!(infer_output(&insert, &[list.clone(), scalar_type(DType::F32), element]).is_err());
    assert_eq!(
        infer_output(&Operation::ListLength, &[list]).unwrap(),
        scalar_type(DType::Si64)
    );
}

#[test]
fn program_serializes_and_prints() {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F64, &[Some(2)]));
    let offset = TensorLiteral::from_f64(&[2], &[1.0, -1.0]);
    let sum = builder
        .add_node_with_operands(
            Operation::ElementwiseBinary(tgraph_rs::backend::spec::ElementwiseBinaryOp::Add),
            vec![Operand::Value(x), Operand::Literal(offset)],
        )
        .unwrap();
    let program = Program::from_function(builder.finish("shift", vec![sum]).unwrap());

    let json = program.to_json_string().unwrap();
    assert_eq!(Program::from_json_str(&json).unwrap(), program);

    let text = program.to_text();
    assert!(text.contains("program @shift {"));
    assert!(text.contains("= add(%0, literal(dtype=F64, shape=2))"));
    assert_eq!(
        ValueType::Tensor(tensor_spec_static(DType::F64, &[2])),
        program.entry_function().unwrap().results[0]
    );
}

#[test]
fn integer_conversion_rejects_fractional_values() {
    let fractional = TensorLiteral::from_f64(&[2], &[1.0, 2.5]);
    let err = fractional.to_i64_vec().unwrap_err();
    assert!(err.to_string().contains("2.5 is not an integer index"), "{err}");
    assert!(TensorLiteral::from_f64(&[1], &[f64::NAN]).to_i64_vec().is_err());

    let integral = TensorLiteral::from_f64(&[2], &[3.0, -1.0]);
    assert_eq!(integral.to_i64_vec().unwrap(), vec![3, -1]);
    let exact = TensorLiteral::from_i64(&[1], &[(1 << 53) + 1]);
    assert_eq!(exact.to_i64_vec().unwrap(), vec![(1 << 53) + 1]);
}

#[test]
fn host_values_conform_to_declared_extents() {
    let declared = tensor_type(DType::F64, &[None, Some(1)]);
    let fits = HostValue::Tensor(TensorLiteral::from_f64(&[3, 1], &[0.0; 3]));
    let too_wide = HostValue::Tensor(TensorLiteral::from_f64(&[3, 2], &[0.0; 6]));
    assert!(fits.conforms_to(&declared));
    assert!(!too_wide.conforms_to(&declared));
    assert!(!fits.conforms_to(&tensor_type(DType::F32, &[None, Some(1)])));

    let items = list_type(DType::F64, &[Some(1)]);
    let list = HostValue::List(vec![
        TensorLiteral::from_f64(&[1], &[1.0]),
        TensorLiteral::from_f64(&[2], &[1.0, 2.0]),
    ]);
    assert!(!list.conforms_to(&items));
}
