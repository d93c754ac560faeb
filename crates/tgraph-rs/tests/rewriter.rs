use tgraph_rs::backend::{
    error::GraphError,
    index::InstId,
    ir_utils::tensor_type,
    rewriter::ProgramRewriter,
    spec::{
        DType, ElementwiseUnaryOp, Function, Operand, Operation, ReduceKind, ReduceSpec,
        TensorLiteral,
    },
};
use tgraph_rs::GraphBuilder;

const NEG: Operation = Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg);
const ABS: Operation = Operation::ElementwiseUnary(ElementwiseUnaryOp::Abs);

/// `%1 = neg(%0); %2 = abs(%1); return %2`
fn chain_function() -> Function {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F32, &[Some(2)]));
    let n = builder.add_node(NEG, &[x]).unwrap();
    let a = builder.add_node(ABS, &[n]).unwrap();
    builder.finish("chain", vec![a]).unwrap()
}

#[test]
fn rewriter_replace_and_erase_instruction() {
    let mut function = chain_function();
    let param = function.parameter_ids[0];
    let negated = function.body[0].id;
    let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");

    rewriter.replace(negated, param).expect("replace");
    assert!(rewriter.users_of(negated).is_empty());
    assert_eq!(rewriter.users_of(param), &[InstId(0), InstId(1)]);
    assert_eq!(rewriter.version(InstId(1)), Some(1));

    rewriter.erase_inst(InstId(0)).expect("erase should succeed");
    assert_eq!(rewriter.users_of(param), &[InstId(1)]);
    assert_eq!(rewriter.func.body.len(), 1);
    assert_eq!(rewriter.func.body[0].operands, vec![Operand::Value(param)]);
    assert!(rewriter.verify());
}

#[test]
fn rewriter_refuses_unsafe_edits() {
    let mut function = chain_function();
    let param = function.parameter_ids[0];
    let negated = function.body[0].id;
    let result = function.body[1].id;
    let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");

    assert_eq!(
        rewriter.erase_inst(InstId(0)),
        Err(GraphError::StillUsed(negated))
    );
    assert_eq!(
        rewriter.erase_inst(InstId(1)),
        Err(GraphError::StillUsed(result))
    );
    assert_eq!(
        rewriter.replace(negated, result),
        Err(GraphError::Cycle {
            from: negated,
            to: result
        })
    );

    let reduced = rewriter
        .insert_before(
            InstId(1),
            Operation::Reduce(ReduceSpec {
                kind: ReduceKind::Sum,
                axes: vec![],
                keepdims: false,
            }),
            vec![Operand::Value(param)],
        )
        .expect("insert reduce");
    assert_eq!(
        rewriter.replace(negated, reduced),
        Err(GraphError::IncompatibleReplacement {
            from: negated,
            to: reduced
        })
    );
    // Failed edits leave the graph untouched.
    assert_eq!(rewriter.users_of(negated), &[InstId(1)]);
    assert!(rewriter.verify());
}

#[test]
fn replacing_a_result_updates_result_slots() {
    let mut function = chain_function();
    let param = function.parameter_ids[0];
    let result = function.body[1].id;
    {
        let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");
        let literal = TensorLiteral::from_f32(&[2], &[1.0, 2.0]);
        let constant = rewriter
            .materialize_constant(InstId(0), literal.clone())
            .expect("materialize constant");
        assert_eq!(
            rewriter.producer_op(constant),
            Some(&Operation::Constant(literal))
        );
        rewriter.replace(result, constant).expect("replace result");
        assert!(rewriter.is_result(constant));
        assert!(!rewriter.is_result(result));
        rewriter.erase_inst(InstId(1)).expect("abs is dead");
        rewriter.erase_inst(InstId(0)).expect("neg is dead");
        assert!(rewriter.verify());
    }
    assert_eq!(function.body.len(), 1);
    assert_eq!(function.op_names(), vec!["constant"]);
    assert_ne!(function.result_ids[0], param);
}

#[test]
fn set_op_requires_matching_type() {
    let mut function = chain_function();
    let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");

    rewriter.set_op(InstId(1), NEG).expect("neg keeps the type");
    assert_eq!(rewriter.op(InstId(1)), &NEG);
    assert_eq!(rewriter.version(InstId(1)), Some(1));

    let err = rewriter
        .set_op(
            InstId(1),
            Operation::Reduce(ReduceSpec {
                kind: ReduceKind::Max,
                axes: vec![0],
                keepdims: false,
            }),
        )
        .expect_err("rank changes");
    assert!(matches!(err, GraphError::IncompatibleReplacement { .. }));
    assert_eq!(rewriter.op(InstId(1)), &NEG);
}

#[test]
fn replace_with_later_value_reorders_body() {
    let mut builder = GraphBuilder::new();
    let x = builder.add_parameter(tensor_type(DType::F32, &[Some(2)]));
    let first = builder.add_node(NEG, &[x]).unwrap();
    let user = builder.add_node(ABS, &[first]).unwrap();
    let late = builder.add_node(ABS, &[x]).unwrap();
    let mut function = builder.finish("late", vec![user, late]).unwrap();

    let mut rewriter = ProgramRewriter::new(&mut function).expect("build indices");
    rewriter.replace(first, late).expect("replace with later value");
    assert!(rewriter.verify());
    drop(rewriter);

    let order: Vec<_> = function.body.iter().map(|inst| inst.id).collect();
    let late_pos = order.iter().position(|id| *id == late).unwrap();
    let user_pos = order.iter().position(|id| *id == user).unwrap();
    assert!(late_pos < user_pos);
}
