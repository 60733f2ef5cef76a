//! # shaped-cpu
//!
//! Reference CPU backend for shaped.
//!
//! Arrays are row-major `f64` buffers tagged with their declared dtype.
//! Large element-wise and gather kernels run on the rayon pool.
//! [`CpuArray::tracer`] creates value-less placeholders for exercising
//! code paths that must never read deferred arrays.

mod array;
mod backend;
mod kernels;

pub use array::CpuArray;
pub use backend::CpuBackend;

/// Convenience alias for tensors on the CPU backend.
pub type CpuTensor = shaped_core::Tensor<CpuBackend>;
