//! Typed tensor-expression graphs with pattern-based rewriting and pluggable execution backends.

pub mod backend;
mod env;
pub mod trace;

pub use backend::builder::GraphBuilder;
pub use backend::compile::{compile, CompileOptions, CompiledFunction};
pub use backend::spec::{
    DType, Dimension, Function, HostValue, Operation, PortableBackend, Program, Shape,
    TensorLiteral, TensorSpec, ValueId, ValueType,
};
