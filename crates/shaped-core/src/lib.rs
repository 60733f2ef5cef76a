//! # shaped-core
//!
//! Named-dimension tensors over a pluggable numeric backend.
//!
//! This crate provides:
//! - [`Shape`] / [`Dim`] - named, typed dimensions with broadcasting by name
//! - [`Tensor`] - one value interface over three representations:
//!   [`NativeTensor`], [`TensorStack`] and [`Layout`]
//! - [`Backend`] trait - the array operations a numeric library must provide
//! - [`Tree`] with [`flatten`] / [`unflatten`] - nested data around tensors
//! - [`TensorSpec`] - serializable structure records
//! - scoped engine configuration and equality modes

pub mod backend;
pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod dtype;
pub mod equality;
pub mod error;
pub mod layout;
pub mod native;
pub mod perm;
pub mod selection;
pub mod shape;
pub mod spec;
pub mod stack;
pub mod tensor;
pub mod tree;

pub use backend::{AxisSel, Backend, BinaryOp, HostArray, UnaryOp};
pub use broadcast::{
    broadcastable_native_arrays, cached, discard_constant_dims, may_vary_along, object_dims,
    variable_shape,
};
pub use config::{with_config, with_precision, EngineConfig};
pub use dispatch::{Handled, Op2};
pub use dtype::{combine_types, DType, Scalar, WithDType};
pub use equality::{
    current_equality_mode, with_equality_by_ref, with_equality_by_shape_and_value, EqualityGuard,
    EqualityMode,
};
pub use error::{Error, Result};
pub use layout::Layout;
pub use native::NativeTensor;
pub use perm::{all_permutations, pick_random, random_permutation, Picks};
pub use selection::{Sel, Selection};
pub use shape::{
    batch, channel, channel_items, dual, instance, merge_shapes, shape_stack, spatial, Dim,
    DimSize, DimType, Shape,
};
pub use spec::{assemble_tensors, disassemble_tensors, from_dict, to_dict, TensorSpec};
pub use stack::TensorStack;
pub use tensor::{Tensor, TensorId, TensorKind};
pub use tree::{flatten, leaf_paths, unflatten, AttrKind, Record, Skeleton, Tree};
