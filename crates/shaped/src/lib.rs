//! # shaped
//!
//! Named-dimension tensors with shape-aware broadcasting over pluggable backends.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use shaped::prelude::*;
//!
//! let x: CpuTensor = tensor(vec![1.0, 2.0, 3.0], spatial("x", 3)).unwrap();
//! let y = x.add(&Tensor::from(10.0)).unwrap();
//! assert_eq!(y.to_vec(&["x"]).unwrap(), vec![11.0, 12.0, 13.0]);
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `shaped-core` | Shape, DType, Backend trait, the tensor representations, tree protocol |
//! | `shaped-cpu` | Reference CPU backend with rayon parallelism |
//!
//! ## Modules
//!
//! - [`archive`] - Save/load trees of tensors
//! - [`construct`] - Tensors from host values

/// Re-export core types.
pub use shaped_core::*;

/// Re-export CPU backend.
pub use shaped_cpu::{CpuArray, CpuBackend, CpuTensor};

/// Archive - save and load trees of tensors.
pub mod archive;

/// Constructors for tensors from host values.
pub mod construct;

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::construct::{bools, full, layout, ones, tensor, tensor_from, zeros};
    pub use shaped_core::{
        batch, channel, channel_items, dual, instance, spatial, DType, Dim, DimSize, DimType,
        Error, Layout, NativeTensor, Result, Scalar, Selection, Shape, Tensor, TensorStack, Tree,
    };
    pub use shaped_cpu::{CpuArray, CpuBackend, CpuTensor};
}
