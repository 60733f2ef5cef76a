use std::fmt;
use std::sync::Arc;

use crate::backend::{AxisSel, Backend, HostArray, UnaryOp};
use crate::broadcast::broadcastable_native_arrays;
use crate::config::{self, check_invariant};
use crate::dispatch::{Handled, Op2};
use crate::dtype::{DType, Scalar};
use crate::error::{Error, Result};
use crate::selection::{Sel, Selection};
use crate::shape::{Dim, DimSize, Shape};
use crate::tensor::{Tensor, TensorId};

// NativeTensor - One backend array with a declared shape
//
// The array stores only some of the dimensions the tensor claims to have:
//
//   native_shape  the axes the array physically has, in array order
//   shape         the declared ("expanded") shape
//
// Every dim of `native_shape` is part of `shape` with the same size. The
// remaining dims of `shape` are virtual: the value is constant along them,
// so `x + y` with x=(x=1000) and y=(b=1000) costs 2000 elements of storage,
// not a million. Virtual dims are tiled only when a caller explicitly asks
// for an expanded array (`native_value(.., force_expand=true)` or `cached`).
//
// MEMORY MODEL:
//
//   The inner data lives behind an Arc, so clones are cheap and many
//   tensors can view one backend array. Nothing here ever writes to a
//   native array; every operation asks the backend for a new one.

struct NativeInner<B: Backend> {
    id: TensorId,
    native: B::Native,
    native_shape: Shape,
    shape: Shape,
}

/// A tensor backed by exactly one backend array.
pub struct NativeTensor<B: Backend> {
    inner: Arc<NativeInner<B>>,
}

impl<B: Backend> Clone for NativeTensor<B> {
    fn clone(&self) -> Self {
        NativeTensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> fmt::Debug for NativeTensor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NativeTensor(id={:?}, shape={}, native_shape={}, dtype={})",
            self.inner.id,
            self.inner.shape,
            self.inner.native_shape,
            self.dtype(),
        )
    }
}

impl<B: Backend> NativeTensor<B> {
    // Construction

    /// Wrap `native`, whose axes are `native_shape`, as a tensor of `shape`.
    pub fn new(native: B::Native, native_shape: Shape, shape: Shape) -> Result<Self> {
        let dims = B::staticshape(&native);
        if dims.len() != native_shape.rank() {
            return Err(Error::Construction(format!(
                "array of rank {} cannot have native shape {}",
                dims.len(),
                native_shape
            )));
        }
        for (dim, size) in native_shape.iter().zip(&dims) {
            if dim.fixed_size() != Some(*size) {
                return Err(Error::Construction(format!(
                    "array with dims {dims:?} does not match native shape {native_shape}"
                )));
            }
        }
        if !native_shape.is_subset_of(&shape) {
            return Err(Error::shape_incompatible(
                "native shape must be contained in the declared shape",
                &native_shape,
                &shape,
            ));
        }
        if !shape.is_uniform() || !shape.well_defined() {
            return Err(Error::Construction(format!(
                "a single array cannot back the non-uniform or undefined shape {shape}"
            )));
        }
        Ok(Self::from_parts(native, native_shape, shape))
    }

    /// Internal constructor for results the engine computed itself.
    pub(crate) fn from_parts(native: B::Native, native_shape: Shape, shape: Shape) -> Self {
        check_invariant(
            || native_shape.is_subset_of(&shape),
            || format!("native shape {native_shape} is not contained in {shape}"),
        );
        check_invariant(
            || native_shape.fixed_sizes().ok() == Some(B::staticshape(&native)),
            || {
                format!(
                    "native shape {native_shape} does not describe array dims {:?}",
                    B::staticshape(&native)
                )
            },
        );
        NativeTensor {
            inner: Arc::new(NativeInner {
                id: TensorId::new(),
                native,
                native_shape,
                shape,
            }),
        }
    }

    /// Wrap a raw array with anonymous dims `dim0, dim1, ...`.
    pub fn from_native(native: B::Native) -> Self {
        let shape = Shape::anonymous(&B::staticshape(&native));
        Self::from_parts(native, shape.clone(), shape)
    }

    /// Wrap a fully stored array whose axes are `shape`.
    pub fn dense(native: B::Native, shape: Shape) -> Result<Self> {
        Self::new(native, shape.clone(), shape)
    }

    pub fn scalar(value: Scalar) -> Self {
        Self::from_parts(B::scalar(value), Shape::empty(), Shape::empty())
    }

    /// Upload `host` as the dense tensor `shape`.
    pub fn from_host(host: &HostArray, shape: Shape) -> Result<Self> {
        if shape.fixed_sizes()? != host.dims {
            return Err(Error::Construction(format!(
                "host array with dims {:?} does not match shape {}",
                host.dims, shape
            )));
        }
        Self::dense(B::from_host(host)?, shape)
    }

    // Accessors

    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    pub fn native(&self) -> &B::Native {
        &self.inner.native
    }

    pub fn native_shape(&self) -> &Shape {
        &self.inner.native_shape
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn dtype(&self) -> DType {
        B::dtype(&self.inner.native)
    }

    pub fn is_tracer(&self) -> bool {
        !B::is_available(&self.inner.native)
    }

    /// No dim is virtual.
    pub fn is_contiguous(&self) -> bool {
        self.native_shape().rank() == self.shape().rank()
    }

    /// Dims that are declared but not stored.
    pub fn virtual_shape(&self) -> Shape {
        self.shape().without_shape(self.native_shape())
    }

    // Materialization

    /// The array laid out along `order`. See [`Tensor::native_value`].
    pub fn native_value(&self, order: &[&str], force_expand: bool) -> Result<B::Native> {
        let native_shape = self.native_shape();
        if let Some(missing) = native_shape.iter().find(|d| !order.contains(&d.name.as_str())) {
            return Err(Error::shape_incompatible(
                format!("order {order:?} omits stored dimension '{}'", missing.name),
                native_shape,
                self.shape(),
            ));
        }
        let mut native = self.native().clone();

        let stored: Vec<&str> = order.iter().copied().filter(|n| native_shape.contains(n)).collect();
        let perm: Vec<usize> = stored.iter().filter_map(|n| native_shape.index(n)).collect();
        if perm.iter().enumerate().any(|(i, p)| i != *p) {
            native = B::transpose(&native, &perm)?;
        }

        if order.len() != native_shape.rank() {
            let dims: Vec<usize> = order
                .iter()
                .map(|n| native_shape.size(n).unwrap_or(1))
                .collect();
            native = B::reshape(&native, &dims)?;
        }

        if force_expand {
            let mut multiples = Vec::with_capacity(order.len());
            for name in order {
                let n = match self.shape().dim(name) {
                    Some(dim) if !native_shape.contains(name) => dim.fixed_size().ok_or_else(|| {
                        Error::Unsupported(format!("cannot expand '{name}' of {}, size is not fixed", self.shape()))
                    })?,
                    _ => 1,
                };
                multiples.push(n);
            }
            if multiples.iter().any(|m| *m != 1) {
                tracing::debug!(shape = %self.shape(), ?order, ?multiples, "tiling virtual dimensions");
                native = B::tile(&native, &multiples)?;
            }
        }

        if let Some(bits) = config::current().precision {
            let dtype = B::dtype(&native);
            let target = dtype.with_precision(bits);
            if dtype.is_float() && target != dtype {
                native = B::cast(&native, target)?;
            }
        }
        Ok(native)
    }

    /// The same value with every virtual dim stored.
    pub fn cached(&self) -> Result<Self> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        let names = self.shape().names();
        let native = self.native_value(&names, true)?;
        Ok(Self::from_parts(native, self.shape().clone(), self.shape().clone()))
    }

    // Slicing

    pub(crate) fn getitem(&self, selection: &Selection) -> Result<Tensor<B>> {
        let native_shape = self.native_shape();
        let mut axes = Vec::with_capacity(native_shape.rank());
        for dim in native_shape {
            let axis = match selection.get(&dim.name) {
                None => AxisSel::Full,
                Some(Sel::Index(i)) => {
                    let size = dim.fixed_size().unwrap_or(0);
                    if *i >= size {
                        return Err(Error::IndexOutOfBounds {
                            dim: dim.name.clone(),
                            index: *i,
                            size,
                        });
                    }
                    AxisSel::Index(*i)
                }
                Some(sel) => {
                    let (start, stop, step) = sel.span(dim.fixed_size().unwrap_or(0))?;
                    AxisSel::Range { start, stop, step }
                }
            };
            axes.push(axis);
        }
        let native = if axes.iter().all(|a| *a == AxisSel::Full) {
            self.native().clone()
        } else {
            B::multi_slice(self.native(), &axes)?
        };
        let new_native_shape = native_shape.after_gather(&selection.restricted_to(native_shape))?;
        let new_shape = self.shape().after_gather(selection)?;
        Ok(Tensor::Native(Self::from_parts(native, new_native_shape, new_shape)))
    }

    pub(crate) fn unstack(&self, dim: &str) -> Result<Vec<Tensor<B>>> {
        let shape = self.shape().without(&[dim]);
        match self.native_shape().index(dim) {
            Some(axis) => {
                let native_shape = self.native_shape().without(&[dim]);
                Ok(B::unstack(self.native(), axis)?
                    .into_iter()
                    .map(|n| Tensor::Native(Self::from_parts(n, native_shape.clone(), shape.clone())))
                    .collect())
            }
            None => {
                let size = self.shape().require(dim)?.fixed_size().unwrap_or(0);
                let slice = Tensor::Native(Self::from_parts(
                    self.native().clone(),
                    self.native_shape().clone(),
                    shape,
                ));
                Ok(vec![slice; size])
            }
        }
    }

    // Element-wise operations

    pub(crate) fn op1(&self, op: UnaryOp) -> Result<Tensor<B>> {
        let native = B::unary(op, self.native())?;
        Ok(Tensor::Native(Self::from_parts(
            native,
            self.native_shape().clone(),
            self.shape().clone(),
        )))
    }

    pub(crate) fn cast(&self, dtype: DType) -> Result<Tensor<B>> {
        if dtype == self.dtype() {
            return Ok(Tensor::Native(self.clone()));
        }
        let native = B::cast(self.native(), dtype)?;
        Ok(Tensor::Native(Self::from_parts(
            native,
            self.native_shape().clone(),
            self.shape().clone(),
        )))
    }

    /// Handles other NativeTensors only.
    pub(crate) fn op2(&self, other: &Tensor<B>, f: Op2) -> Result<Handled<Tensor<B>>> {
        if !matches!(other, Tensor::Native(_)) {
            return Ok(Handled::NotHandled);
        }
        let own = Tensor::Native(self.clone());
        let b = broadcastable_native_arrays(&[&own, other])?;
        let native = f.natives::<B>(&b.natives[0], &b.natives[1])?;
        Ok(Handled::Done(Tensor::Native(Self::from_parts(
            native,
            b.native_shape,
            b.shape,
        ))))
    }

    // Shape manipulation

    pub(crate) fn rename_dims(&self, renames: &[(String, Dim)]) -> Result<Tensor<B>> {
        Ok(Tensor::Native(Self::from_parts(
            self.native().clone(),
            self.native_shape().renamed_dims(renames)?,
            self.shape().renamed_dims(renames)?,
        )))
    }

    /// Declare additional constant dims.
    pub(crate) fn with_virtual_dims(&self, shape: Shape) -> Self {
        Self::from_parts(self.native().clone(), self.native_shape().clone(), shape)
    }

    pub(crate) fn pack_dims(&self, dims: &[&str], packed: &Dim) -> Result<Tensor<B>> {
        let shape = self.shape();
        let mut order: Vec<&str> = Vec::with_capacity(shape.rank());
        for name in shape.names() {
            if dims.contains(&name) {
                if !order.contains(&dims[0]) {
                    order.extend_from_slice(dims);
                }
            } else {
                order.push(name);
            }
        }
        let stored: Vec<&str> = order
            .iter()
            .copied()
            .filter(|n| self.native_shape().contains(n) || dims.contains(n))
            .collect();
        let native = self.native_value(&stored, true)?;

        let mut volume = 1;
        for name in dims {
            volume *= shape.require(name)?.fixed_size().ok_or_else(|| {
                Error::Unsupported(format!("packing '{name}' of {shape}, size is not fixed"))
            })?;
        }
        let packed = packed.with_size(DimSize::Fixed(volume));
        let mut native_dims = Vec::with_capacity(stored.len());
        let mut sizes = Vec::with_capacity(stored.len());
        for name in &stored {
            if dims.contains(name) {
                if *name == dims[0] {
                    native_dims.push(packed.clone());
                    sizes.push(volume);
                }
            } else {
                let dim = shape.require(name)?;
                native_dims.push(dim.clone());
                sizes.push(dim.fixed_size().unwrap_or(1));
            }
        }
        let native = B::reshape(&native, &sizes)?;
        let pos = order.iter().position(|n| *n == dims[0]).unwrap_or(0);
        let new_shape = shape.without(dims).insert(pos, packed)?;
        Ok(Tensor::Native(Self::from_parts(native, Shape::new(native_dims)?, new_shape)))
    }

    pub(crate) fn unpack_dim(&self, dim: &str, unpacked: &Shape) -> Result<Tensor<B>> {
        let shape = self.shape().replace(dim, unpacked)?;
        if !self.native_shape().contains(dim) {
            return Ok(Tensor::Native(self.with_virtual_dims(shape)));
        }
        let native_shape = self.native_shape().replace(dim, unpacked)?;
        let native = B::reshape(self.native(), &native_shape.fixed_sizes()?)?;
        Ok(Tensor::Native(Self::from_parts(native, native_shape, shape)))
    }
}

