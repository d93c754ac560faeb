//! Reference interpreter backend: evaluates every operation directly on host memory.

pub mod cpu;
pub mod linalg;
mod list;

pub use cpu::{
    execute_operation, CpuKernelInterceptor, CpuPortableBackend, CpuTensor, CpuValue,
    GenericCpuBackend, NoopInterceptor, TensorData,
};
