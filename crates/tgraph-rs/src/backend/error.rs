//! Error taxonomy for graph construction, rewriting, and execution.

use thiserror::Error;

use crate::backend::spec::ValueId;

/// Raised when an operation's operand types cannot be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("{op} expects {expected} operands, found {found}")]
    Arity {
        op: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{op} operand {index}: expected {expected}")]
    OperandKind {
        op: &'static str,
        index: usize,
        expected: &'static str,
    },
    #[error("{op}: dtype mismatch ({detail})")]
    DType { op: &'static str, detail: String },
    #[error("{op}: incompatible shapes ({detail})")]
    Shape { op: &'static str, detail: String },
    #[error("{op}: axis {axis} out of range for rank {rank}")]
    Axis {
        op: &'static str,
        axis: isize,
        rank: usize,
    },
    #[error("{op}: {detail}")]
    Invalid { op: &'static str, detail: String },
}

impl TypeError {
    pub fn invalid(op: &'static str, detail: impl Into<String>) -> Self {
        TypeError::Invalid {
            op,
            detail: detail.into(),
        }
    }

    pub fn shape(op: &'static str, detail: impl Into<String>) -> Self {
        TypeError::Shape {
            op,
            detail: detail.into(),
        }
    }

    pub fn dtype(op: &'static str, detail: impl Into<String>) -> Self {
        TypeError::DType {
            op,
            detail: detail.into(),
        }
    }
}

/// Structural failures while building or editing a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("value {0} is not defined in this function")]
    UnknownValue(ValueId),
    #[error("replacing {from} with {to} would create a cycle")]
    Cycle { from: ValueId, to: ValueId },
    #[error("cannot replace {from} with {to}: types are incompatible")]
    IncompatibleReplacement { from: ValueId, to: ValueId },
    #[error("graph contains a cycle through {0}")]
    Cyclic(ValueId),
    #[error("instruction {0} still has users")]
    StillUsed(ValueId),
    #[error("value {value} is used before it is defined")]
    UseBeforeDef { value: ValueId },
    #[error("value {0} is defined more than once")]
    Redefined(ValueId),
    #[error("{value} reads a list destroyed by {destroyer}")]
    ReadAfterDestroy { value: ValueId, destroyer: ValueId },
    #[error("{value} is destroyed by both {first} and {second}")]
    DoubleDestroy {
        value: ValueId,
        first: ValueId,
        second: ValueId,
    },
    #[error("{destroyer} destroys {value}, which is a graph input or output")]
    DestroysBoundary { value: ValueId, destroyer: ValueId },
}

/// Failures raised from inside a rewrite rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("{0}")]
    Message(String),
}

impl PatternError {
    pub fn message(msg: impl Into<String>) -> Self {
        PatternError::Message(msg.into())
    }
}

/// A rewrite failed while being applied to a specific node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rewrite `{rule}` failed at {node}: {source}")]
pub struct RewriteError {
    pub rule: String,
    pub node: ValueId,
    #[source]
    pub source: PatternError,
}

/// Failure of a whole optimisation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassError {
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Lookup failures against a rewrite database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
    #[error("unknown pass `{0}`")]
    UnknownPass(String),
    #[error("pass `{0}` is already defined")]
    DuplicatePass(String),
}

/// A value produced during execution contained NaN or infinity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Non-numeric values (nan or inf) returned by {op} for {value} at flat positions {positions:?}")]
pub struct NumericValidationError {
    pub op: &'static str,
    pub value: ValueId,
    /// Flat element positions of the first offending entries.
    pub positions: Vec<usize>,
}
