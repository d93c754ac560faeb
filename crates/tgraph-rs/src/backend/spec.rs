use std::{fmt, sync::Arc};

use serde::{ser::SerializeStruct, Deserialize, Serialize};

use crate::backend::error::{NumericValidationError, TypeError};

/// Enumerates scalar element types understood by the graph and its backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum DType {
    I1,
    Si32,
    Si64,
    F32,
    F64,
}

impl DType {
    /// Returns `true` when the dtype is a signed integer.
    pub fn is_integer(self) -> bool {
        matches!(self, DType::Si32 | DType::Si64)
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Returns the size in bytes of a single element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 => 1,
            DType::Si32 | DType::F32 => 4,
            DType::Si64 | DType::F64 => 8,
        }
    }
}

/// Represents a single axis extent in a tensor shape.
///
/// A static extent of 1 marks the axis as broadcastable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Unknown,
}

impl Dimension {
    pub fn static_size(self) -> Option<usize> {
        match self {
            Dimension::Static(size) => Some(size),
            Dimension::Unknown => None,
        }
    }

    pub fn is_broadcastable(self) -> bool {
        self == Dimension::Static(1)
    }

    /// Returns true when a value of extent `other` may flow where `self` is expected.
    pub fn accepts(self, other: Dimension) -> bool {
        match (self, other) {
            (Dimension::Unknown, _) => true,
            (Dimension::Static(a), Dimension::Static(b)) => a == b,
            (Dimension::Static(_), Dimension::Unknown) => false,
        }
    }

    /// Returns the most specific extent compatible with both, or `None` on conflict.
    pub fn meet(self, other: Dimension) -> Option<Dimension> {
        match (self, other) {
            (Dimension::Unknown, dim) | (dim, Dimension::Unknown) => Some(dim),
            (Dimension::Static(a), Dimension::Static(b)) if a == b => Some(self),
            _ => None,
        }
    }

    /// Returns the least specific extent covering both.
    pub fn join(self, other: Dimension) -> Dimension {
        if self == other {
            self
        } else {
            Dimension::Unknown
        }
    }
}

/// Logical tensor shape as an ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn into_dims(self) -> Vec<Dimension> {
        self.dims
    }

    /// Returns static dimensions when all dims are static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims.iter().map(|dim| dim.static_size()).collect()
    }

    /// Returns element count when all dims are static.
    pub fn element_count(&self) -> Option<usize> {
        let dims = self.static_dims()?;
        let mut count = 1usize;
        for dim in dims {
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }
}

/// Tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Shape::scalar())
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Returns total element count when shape is fully static.
    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }

    /// Returns total byte length when shape is static.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.size_in_bytes())
    }

    /// Returns true when every tensor described by `other` is also described by `self`.
    pub fn accepts(&self, other: &TensorSpec) -> bool {
        self.dtype == other.dtype
            && self.rank() == other.rank()
            && self
                .shape
                .dims()
                .iter()
                .zip(other.shape.dims())
                .all(|(a, b)| a.accepts(*b))
    }

    /// Generalizes two specs of equal dtype/rank, forgetting extents that disagree.
    pub fn join(&self, other: &TensorSpec) -> Option<TensorSpec> {
        if self.dtype != other.dtype || self.rank() != other.rank() {
            return None;
        }
        let dims = self
            .shape
            .dims()
            .iter()
            .zip(other.shape.dims())
            .map(|(a, b)| a.join(*b))
            .collect::<Vec<_>>();
        Some(TensorSpec::new(self.dtype, Shape::new(dims)))
    }
}

/// Dense literal tensor payload stored as little-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorLiteral {
    pub spec: TensorSpec,
    pub bytes: Arc<[u8]>,
}

impl TensorLiteral {
    pub fn new(spec: TensorSpec, bytes: Arc<[u8]>) -> Self {
        Self { spec, bytes }
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn from_f64(dims: &[usize], values: &[f64]) -> Self {
        let spec = crate::backend::ir_utils::tensor_spec_static(DType::F64, dims);
        let bytes = values
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<u8>>();
        Self::new(spec, Arc::from(bytes))
    }

    pub fn from_f32(dims: &[usize], values: &[f32]) -> Self {
        let spec = crate::backend::ir_utils::tensor_spec_static(DType::F32, dims);
        let bytes = values
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<u8>>();
        Self::new(spec, Arc::from(bytes))
    }

    pub fn from_i64(dims: &[usize], values: &[i64]) -> Self {
        let spec = crate::backend::ir_utils::tensor_spec_static(DType::Si64, dims);
        let bytes = values
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<u8>>();
        Self::new(spec, Arc::from(bytes))
    }

    pub fn scalar_i64(value: i64) -> Self {
        Self::from_i64(&[], &[value])
    }

    /// Decodes the payload into `f64` values regardless of the stored dtype.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let size = self.spec.dtype.size_in_bytes();
        self.bytes
            .chunks_exact(size)
            .map(|chunk| match self.spec.dtype {
                DType::I1 => f64::from(u8::from(chunk[0] != 0)),
                DType::Si32 => {
                    f64::from(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                }
                DType::Si64 => i64::from_le_bytes(array8(chunk)) as f64,
                DType::F32 => {
                    f64::from(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                }
                DType::F64 => f64::from_le_bytes(array8(chunk)),
            })
            .collect()
    }

    /// Decodes the payload as integers. Float payloads must hold integral values.
    pub fn to_i64_vec(&self) -> BackendResult<Vec<i64>> {
        if self.spec.dtype == DType::Si64 {
            return Ok(self
                .bytes
                .chunks_exact(8)
                .map(|chunk| i64::from_le_bytes(array8(chunk)))
                .collect());
        }
        self.to_f64_vec()
            .into_iter()
            .map(|value| {
                if value.fract() == 0.0 && value.abs() <= i64::MAX as f64 {
                    Ok(value as i64)
                } else {
                    Err(BackendError::execution(format!(
                        "{value} is not an integer index"
                    )))
                }
            })
            .collect()
    }

    /// Returns the static dims of the literal. Literals always carry fully static shapes.
    pub fn dims(&self) -> Vec<usize> {
        self.spec.shape.static_dims().unwrap_or_default()
    }
}

fn array8(chunk: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&chunk[..8]);
    out
}

impl Serialize for TensorLiteral {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TensorLiteral", 2)?;
        state.serialize_field("spec", &self.spec)?;
        state.serialize_field("bytes", &self.bytes.as_ref())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for TensorLiteral {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorLiteralHelper {
            spec: TensorSpec,
            bytes: Vec<u8>,
        }

        let helper = TensorLiteralHelper::deserialize(deserializer)?;
        Ok(TensorLiteral {
            spec: helper.spec,
            bytes: Arc::<[u8]>::from(helper.bytes),
        })
    }
}

/// Host-side value exchanged with backends when materialising inputs or reading results.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Tensor(TensorLiteral),
    List(Vec<TensorLiteral>),
    Tuple(Vec<HostValue>),
}

impl HostValue {
    pub fn as_tensor(&self) -> Option<&TensorLiteral> {
        match self {
            HostValue::Tensor(literal) => Some(literal),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[TensorLiteral]> {
        match self {
            HostValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns true when this value is described by `ty`.
    pub fn conforms_to(&self, ty: &ValueType) -> bool {
        match (self, ty) {
            (HostValue::Tensor(literal), ValueType::Tensor(spec)) => spec.accepts(&literal.spec),
            (HostValue::List(items), ValueType::List(spec)) => {
                items.iter().all(|item| spec.accepts(&item.spec))
            }
            (HostValue::Tuple(items), ValueType::Tuple(types)) => {
                items.len() == types.len()
                    && items.iter().zip(types).all(|(item, ty)| item.conforms_to(ty))
            }
            _ => false,
        }
    }
}

/// Elementwise unary ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseUnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
}

/// Elementwise binary ops with numpy-style broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Maximum,
    Minimum,
}

/// Reduction families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
}

impl ReduceKind {
    /// Returns the reduction `r'` such that `r(-x) == -r'(x)`.
    pub fn negated_dual(self) -> Option<ReduceKind> {
        match self {
            ReduceKind::Max => Some(ReduceKind::Min),
            ReduceKind::Min => Some(ReduceKind::Max),
            ReduceKind::Sum => None,
        }
    }
}

/// Configuration shared by `reduce_sum`, `reduce_max`, and `reduce_min`.
///
/// Axes may be negative (counted from the end); an empty list reduces every axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReduceSpec {
    pub kind: ReduceKind,
    pub axes: Vec<isize>,
    pub keepdims: bool,
}

/// Describes the `argmax` op. Indices are produced as `si64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgMaxSpec {
    pub axis: isize,
    pub keepdims: bool,
}

/// Joint max/argmax along one axis producing a `(values, indices)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaxAndArgmaxSpec {
    pub axis: isize,
}

/// One entry of a dimshuffle order: an input axis or a new broadcastable axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShuffleAxis {
    Axis(usize),
    Broadcast,
}

/// Permutes axes, inserts broadcastable axes and drops static size-1 axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimShuffleSpec {
    pub new_order: Vec<ShuffleAxis>,
}

impl DimShuffleSpec {
    pub fn new(new_order: impl Into<Vec<ShuffleAxis>>) -> Self {
        Self {
            new_order: new_order.into(),
        }
    }

    /// Input axes referenced by the order, in output position order.
    pub fn kept_axes(&self) -> Vec<usize> {
        self.new_order
            .iter()
            .filter_map(|entry| match entry {
                ShuffleAxis::Axis(axis) => Some(*axis),
                ShuffleAxis::Broadcast => None,
            })
            .collect()
    }

    pub fn inserts_axes(&self) -> bool {
        self.new_order.contains(&ShuffleAxis::Broadcast)
    }

    /// Input axes absent from the order (and therefore dropped).
    pub fn dropped_axes(&self, input_rank: usize) -> Vec<usize> {
        let kept = self.kept_axes();
        (0..input_rank).filter(|axis| !kept.contains(axis)).collect()
    }

    /// True when kept input axes appear in increasing order.
    pub fn preserves_order(&self) -> bool {
        self.kept_axes().windows(2).all(|pair| pair[0] < pair[1])
    }

    pub fn is_identity(&self, input_rank: usize) -> bool {
        self.new_order.len() == input_rank
            && self
                .new_order
                .iter()
                .enumerate()
                .all(|(pos, entry)| *entry == ShuffleAxis::Axis(pos))
    }
}

/// Integer scalar that is either known statically or read from an operand at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexScalar {
    Static(i64),
    /// Position of an integer rank-0 operand of the same instruction.
    Operand(usize),
}

/// Python-style slice; missing bounds take their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SliceSpec {
    pub start: Option<IndexScalar>,
    pub stop: Option<IndexScalar>,
    pub step: Option<IndexScalar>,
}

impl SliceSpec {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn range(start: i64, stop: i64) -> Self {
        Self {
            start: Some(IndexScalar::Static(start)),
            stop: Some(IndexScalar::Static(stop)),
            step: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.start.is_none() && self.stop.is_none() && self.step.is_none()
    }

    pub fn operands(&self) -> impl Iterator<Item = usize> + '_ {
        [self.start, self.stop, self.step]
            .into_iter()
            .flatten()
            .filter_map(|bound| match bound {
                IndexScalar::Operand(pos) => Some(pos),
                IndexScalar::Static(_) => None,
            })
    }
}

/// One indexing entry of a subtensor: scalar indices drop the axis, slices keep it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexEntry {
    Scalar(IndexScalar),
    Slice(SliceSpec),
}

/// Basic indexing over the leading axes; trailing axes are kept whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubtensorSpec {
    pub indices: Vec<IndexEntry>,
}

/// Extent of an `alloc` target axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtentSource {
    Static(usize),
    /// Position of an integer rank-0 operand of the same instruction.
    Operand(usize),
}

/// Broadcasts operand 0 into a freshly allocated tensor of the requested shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocSpec {
    pub shape: Vec<ExtentSource>,
}

/// Entry in the requested output shape for `reshape`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReshapeDim {
    Explicit(usize),
    Infer,
    /// Position of an integer rank-0 operand of the same instruction.
    Operand(usize),
}

/// Attribute payload for `reshape`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReshapeSpec {
    pub new_shape: Vec<ReshapeDim>,
}

/// Which operator `solve_triangular` applies to the left-hand matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriangularTranspose {
    None,
    Transpose,
    ConjugateTranspose,
}

/// Attribute payload for `solve_triangular`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SolveTriangularSpec {
    pub lower: bool,
    pub trans: TriangularTranspose,
    pub unit_diagonal: bool,
    /// Rejects non-finite operands and results with a numeric validation error.
    pub check_finite: bool,
}

impl Default for SolveTriangularSpec {
    fn default() -> Self {
        Self {
            lower: true,
            trans: TriangularTranspose::None,
            unit_diagonal: false,
            check_finite: false,
        }
    }
}

/// Index applied to a typed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListIndex {
    Scalar(IndexScalar),
    Slice(SliceSpec),
}

/// Aliasing relation between a node's output and its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasKind {
    /// Output is a fresh value.
    Owned,
    /// Output may share storage with the operand at the given position.
    ViewOf(usize),
    /// Operand at the given position is destroyed; its value must not be read afterwards.
    Consumes(usize),
}

/// Declarative form of graph operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Constant(TensorLiteral),
    ElementwiseUnary(ElementwiseUnaryOp),
    ElementwiseBinary(ElementwiseBinaryOp),
    Reduce(ReduceSpec),
    ArgMax(ArgMaxSpec),
    MaxAndArgmax(MaxAndArgmaxSpec),
    GetTupleElement { index: usize },
    DimShuffle(DimShuffleSpec),
    Alloc(AllocSpec),
    Subtensor(SubtensorSpec),
    Reshape(ReshapeSpec),
    ShapeOf { axis: usize },
    Dot,
    BlockDiag,
    SolveTriangular(SolveTriangularSpec),
    MakeList,
    ListGetItem(ListIndex),
    ListLength,
    ListAppend { inplace: bool },
    ListExtend { inplace: bool },
    ListInsert { inplace: bool },
    ListRemove { inplace: bool },
    ListReverse { inplace: bool },
    ListIndexOf,
    ListCount,
}

impl Operation {
    /// Stable, human-readable operation label.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Constant(_) => "constant",
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg) => "neg",
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Abs) => "abs",
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp) => "exp",
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Log) => "log",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Add) => "add",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Sub) => "sub",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Mul) => "mul",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Div) => "div",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Maximum) => "maximum",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Minimum) => "minimum",
            Operation::Reduce(spec) => match spec.kind {
                ReduceKind::Sum => "reduce_sum",
                ReduceKind::Max => "reduce_max",
                ReduceKind::Min => "reduce_min",
            },
            Operation::ArgMax(_) => "argmax",
            Operation::MaxAndArgmax(_) => "max_and_argmax",
            Operation::GetTupleElement { .. } => "get_tuple_element",
            Operation::DimShuffle(_) => "dimshuffle",
            Operation::Alloc(_) => "alloc",
            Operation::Subtensor(_) => "subtensor",
            Operation::Reshape(_) => "reshape",
            Operation::ShapeOf { .. } => "shape_i",
            Operation::Dot => "dot",
            Operation::BlockDiag => "block_diag",
            Operation::SolveTriangular(_) => "solve_triangular",
            Operation::MakeList => "make_list",
            Operation::ListGetItem(_) => "list_getitem",
            Operation::ListLength => "list_length",
            Operation::ListAppend { .. } => "list_append",
            Operation::ListExtend { .. } => "list_extend",
            Operation::ListInsert { .. } => "list_insert",
            Operation::ListRemove { .. } => "list_remove",
            Operation::ListReverse { .. } => "list_reverse",
            Operation::ListIndexOf => "list_index",
            Operation::ListCount => "list_count",
        }
    }

    /// Aliasing contract checked by the alias analysis before scheduling.
    pub fn alias(&self) -> AliasKind {
        match self {
            Operation::ListAppend { inplace: true }
            | Operation::ListExtend { inplace: true }
            | Operation::ListInsert { inplace: true }
            | Operation::ListRemove { inplace: true }
            | Operation::ListReverse { inplace: true } => AliasKind::Consumes(0),
            Operation::ListGetItem(_)
            | Operation::GetTupleElement { .. }
            | Operation::DimShuffle(_)
            | Operation::Reshape(_) => AliasKind::ViewOf(0),
            _ => AliasKind::Owned,
        }
    }

    /// Cache-versioning token; bump when an operation's lowering changes meaning.
    pub fn cache_version(&self) -> u32 {
        match self {
            Operation::Subtensor(_) => 2,
            Operation::SolveTriangular(_) => 2,
            _ => 1,
        }
    }

    /// Returns the copying/in-place counterpart of a list mutation, if any.
    pub fn with_inplace(&self, inplace: bool) -> Option<Operation> {
        match self {
            Operation::ListAppend { .. } => Some(Operation::ListAppend { inplace }),
            Operation::ListExtend { .. } => Some(Operation::ListExtend { inplace }),
            Operation::ListInsert { .. } => Some(Operation::ListInsert { inplace }),
            Operation::ListRemove { .. } => Some(Operation::ListRemove { inplace }),
            Operation::ListReverse { .. } => Some(Operation::ListReverse { inplace }),
            _ => None,
        }
    }

    pub fn is_inplace(&self) -> bool {
        matches!(self.alias(), AliasKind::Consumes(_))
    }
}

/// Unique identifier for values in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Typing information for values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Tensor(TensorSpec),
    /// Homogeneous list whose elements are described by the tensor spec.
    List(TensorSpec),
    Tuple(Vec<ValueType>),
}

impl ValueType {
    pub fn as_tensor(&self) -> Option<&TensorSpec> {
        match self {
            ValueType::Tensor(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_list_element(&self) -> Option<&TensorSpec> {
        match self {
            ValueType::List(spec) => Some(spec),
            _ => None,
        }
    }

    /// Returns true when every value of type `other` is also a value of `self`.
    pub fn accepts(&self, other: &ValueType) -> bool {
        match (self, other) {
            (ValueType::Tensor(a), ValueType::Tensor(b)) => a.accepts(b),
            (ValueType::List(a), ValueType::List(b)) => a.accepts(b),
            (ValueType::Tuple(a), ValueType::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.accepts(y))
            }
            _ => false,
        }
    }

    /// Returns true when the two types can describe the same runtime value.
    pub fn compatible_with(&self, other: &ValueType) -> bool {
        match (self, other) {
            (ValueType::Tensor(a), ValueType::Tensor(b))
            | (ValueType::List(a), ValueType::List(b)) => {
                a.dtype == b.dtype
                    && a.rank() == b.rank()
                    && a.shape
                        .dims()
                        .iter()
                        .zip(b.shape.dims())
                        .all(|(x, y)| x.meet(*y).is_some())
            }
            (ValueType::Tuple(a), ValueType::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compatible_with(y))
            }
            _ => false,
        }
    }
}

/// Operand reference in an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Value(ValueId),
    Literal(TensorLiteral),
}

impl Operand {
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(value) => Some(*value),
            Operand::Literal(_) => None,
        }
    }
}

/// Single node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<Operand>,
    pub output: ValueType,
}

/// Graph with ordered inputs (`parameters`) and outputs (`results`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<ValueType>,
    pub parameter_ids: Vec<ValueId>,
    pub results: Vec<ValueType>,
    pub body: Vec<Instruction>,
    pub result_ids: Vec<ValueId>,
}

impl Function {
    pub fn instruction(&self, value: ValueId) -> Option<&Instruction> {
        self.body.iter().find(|inst| inst.id == value)
    }

    /// Operation names in body order; handy when asserting on rewritten graphs.
    pub fn op_names(&self) -> Vec<&'static str> {
        self.body.iter().map(|inst| inst.op.name()).collect()
    }
}

/// Complete module: an entry function plus helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub entry: String,
    pub functions: Vec<Function>,
}

impl Program {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<Function>) -> Self {
        self.functions = functions;
        self
    }

    /// Wraps a single function as the entry of a new program.
    pub fn from_function(function: Function) -> Self {
        Program::new(function.name.clone()).with_functions(vec![function])
    }

    pub fn entry_function(&self) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == self.entry)
    }

    pub fn entry_function_mut(&mut self) -> Option<&mut Function> {
        let entry = self.entry.clone();
        self.functions.iter_mut().find(|f| f.name == entry)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json_str(src: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(src)
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_line(f, 0, &format!("program @{} {{", self.entry))?;
        for function in &self.functions {
            fmt_function(function, 1, f)?;
        }
        write_line(f, 0, "}")
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_function(self, 0, f)
    }
}

fn fmt_function(function: &Function, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_line(f, indent, &format!("func @{} {{", function.name))?;
    if !function.parameter_ids.is_empty() {
        write_line(f, indent + 1, "params:")?;
        for (value_id, value_type) in function
            .parameter_ids
            .iter()
            .zip(function.parameters.iter())
        {
            write_line(
                f,
                indent + 2,
                &format!("{value_id} : {}", format_value_type(value_type)),
            )?;
        }
    }
    if !function.body.is_empty() {
        write_line(f, indent + 1, "body:")?;
        for instruction in &function.body {
            fmt_instruction(instruction, indent + 2, f)?;
        }
    }
    if !function.result_ids.is_empty() {
        write_line(f, indent + 1, "results:")?;
        for (value_id, value_type) in function.result_ids.iter().zip(function.results.iter()) {
            write_line(
                f,
                indent + 2,
                &format!("{value_id} : {}", format_value_type(value_type)),
            )?;
        }
    }
    write_line(f, indent, "}")
}

fn fmt_instruction(
    instruction: &Instruction,
    indent: usize,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    let operands = instruction
        .operands
        .iter()
        .map(format_operand)
        .collect::<Vec<_>>()
        .join(", ");
    let line = format!(
        "{} = {}({}) -> {}",
        instruction.id,
        instruction.op.name(),
        operands,
        format_value_type(&instruction.output)
    );
    write_line(f, indent, &line)
}

pub(crate) fn format_value_type(value_type: &ValueType) -> String {
    match value_type {
        ValueType::Tensor(spec) => {
            format!("tensor<{:?} x {}>", spec.dtype, format_shape(&spec.shape))
        }
        ValueType::List(spec) => {
            format!("list<{:?} x {}>", spec.dtype, format_shape(&spec.shape))
        }
        ValueType::Tuple(elements) => {
            let inner = elements
                .iter()
                .map(format_value_type)
                .collect::<Vec<_>>()
                .join(", ");
            format!("tuple<{inner}>")
        }
    }
}

fn format_shape(shape: &Shape) -> String {
    let dims = shape
        .dims()
        .iter()
        .map(|dim| match dim {
            Dimension::Static(v) => v.to_string(),
            Dimension::Unknown => "?".to_string(),
        })
        .collect::<Vec<_>>();
    if dims.is_empty() {
        "[]".to_string()
    } else {
        dims.join("x")
    }
}

fn format_operand(operand: &Operand) -> String {
    match operand {
        Operand::Value(id) => id.to_string(),
        Operand::Literal(lit) => format!(
            "literal(dtype={:?}, shape={})",
            lit.spec.dtype,
            format_shape(&lit.spec.shape)
        ),
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, indent: usize, line: &str) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    writeln!(f, "{line}")
}

/// Backend error surfaced to higher layers.
#[derive(Debug)]
pub enum BackendError {
    Type(TypeError),
    NumericValidation(NumericValidationError),
    Unimplemented { op: &'static str, reason: String },
    Execution { message: String },
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }

    pub fn as_numeric_validation(&self) -> Option<&NumericValidationError> {
        match self {
            BackendError::NumericValidation(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Type(err) => write!(f, "{err}"),
            BackendError::NumericValidation(err) => write!(f, "{err}"),
            BackendError::Unimplemented { op, reason } => {
                write!(f, "{op} is not implemented: {reason}")
            }
            BackendError::Execution { message } => {
                write!(f, "backend execution failure: {message}")
            }
        }
    }
}

impl std::error::Error for BackendError {}

impl From<TypeError> for BackendError {
    fn from(err: TypeError) -> Self {
        BackendError::Type(err)
    }
}

impl From<NumericValidationError> for BackendError {
    fn from(err: NumericValidationError) -> Self {
        BackendError::NumericValidation(err)
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Portable backend trait that evaluates graph instructions.
pub trait PortableBackend: Send + Sync {
    type TensorHandle: Clone + Send + Sync + 'static;

    /// Returns a human-readable backend identifier (e.g., `"cpu"`, `"faer"`).
    fn backend_name(&self) -> &str;

    /// Returns true when the backend lowers `op` natively rather than through the
    /// reference interpreter.
    fn supports(&self, op: &Operation) -> bool {
        let _ = op;
        true
    }

    /// Materialises a handle from host data.
    fn materialize(&self, value: HostValue) -> BackendResult<Self::TensorHandle>;

    /// Reads a handle back to the host.
    fn to_host(&self, handle: &Self::TensorHandle) -> BackendResult<HostValue>;

    /// Executes a single instruction given already materialised operand handles.
    fn execute_instruction(
        &self,
        instruction: &Instruction,
        inputs: &[Self::TensorHandle],
    ) -> BackendResult<Self::TensorHandle>;

    /// Executes the entry function of a program.
    fn run_program(
        &self,
        program: &Program,
        entry_inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>>
    where
        Self: Sized,
    {
        let function = program
            .entry_function()
            .ok_or_else(|| BackendError::execution("entry function not found"))?;
        crate::backend::executor::execute_function(
            self,
            function,
            entry_inputs,
            &crate::backend::executor::ExecutionOptions::default(),
        )
    }
}
