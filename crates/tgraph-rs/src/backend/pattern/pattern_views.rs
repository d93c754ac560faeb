use super::OperationView;
use crate::backend::{
    index::InstId,
    rewriter::ProgramRewriter,
    spec::{
        AllocSpec, DimShuffleSpec, ElementwiseUnaryOp, MaxAndArgmaxSpec, Operand, Operation,
        ReduceSpec, ReshapeSpec, ValueId, ValueType,
    },
};

/// Declares a typed view over one operation kind.
///
/// Every view carries the root instruction, its operands, result id and type, plus the
/// operation's payload under `$field`.
macro_rules! op_view {
    ($(#[$meta:meta])* $view:ident, $field:ident: $ty:ty, $pat:pat => $extract:expr) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $view {
            pub root: InstId,
            pub operands: Vec<Operand>,
            pub result: ValueId,
            pub result_type: ValueType,
            pub $field: $ty,
        }

        impl $view {
            pub fn new(root: InstId, rewriter: &ProgramRewriter) -> Option<Self> {
                let operands = rewriter.operands(root).to_vec();
                let result = rewriter.value_of(root);
                let result_type = rewriter.type_of(result)?.clone();
                match rewriter.op(root) {
                    $pat => Some(Self {
                        root,
                        operands,
                        result,
                        result_type,
                        $field: $extract,
                    }),
                    _ => None,
                }
            }

            /// Value operand at `index`, or `None` for literals and missing operands.
            pub fn input(&self, index: usize) -> Option<ValueId> {
                self.operands.get(index).and_then(Operand::as_value)
            }
        }

        impl OperationView for $view {
            #[allow(unused_variables)]
            fn tracks(op: &Operation) -> bool {
                matches!(op, $pat)
            }

            fn extract(root: InstId, rewriter: &ProgramRewriter) -> Option<Self> {
                Self::new(root, rewriter)
            }
        }
    };
}

op_view!(
    ElementwiseUnaryOpView,
    op: ElementwiseUnaryOp,
    Operation::ElementwiseUnary(op) => *op
);

op_view!(
    ReduceOpView,
    spec: ReduceSpec,
    Operation::Reduce(spec) => spec.clone()
);

op_view!(
    MaxAndArgmaxOpView,
    spec: MaxAndArgmaxSpec,
    Operation::MaxAndArgmax(spec) => spec.clone()
);

op_view!(
    DimShuffleOpView,
    spec: DimShuffleSpec,
    Operation::DimShuffle(spec) => spec.clone()
);

op_view!(
    AllocOpView,
    spec: AllocSpec,
    Operation::Alloc(spec) => spec.clone()
);

op_view!(
    ReshapeOpView,
    spec: ReshapeSpec,
    Operation::Reshape(spec) => spec.clone()
);

op_view!(
    /// Copying list mutation (`append`, `extend`, `insert`, `remove`, `reverse`).
    ListMutationOpView,
    op: Operation,
    op @ (Operation::ListAppend { inplace: false }
        | Operation::ListExtend { inplace: false }
        | Operation::ListInsert { inplace: false }
        | Operation::ListRemove { inplace: false }
        | Operation::ListReverse { inplace: false }) => op.clone()
);
