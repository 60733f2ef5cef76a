use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::backend::{Backend, UnaryOp};
use crate::broadcast::variable_shape;
use crate::config::check_invariant;
use crate::dispatch::{Handled, Op2};
use crate::dtype::{combine_types, DType};
use crate::error::{Error, Result};
use crate::native::NativeTensor;
use crate::selection::{Sel, Selection};
use crate::shape::{merge_shapes, shape_stack, Dim, DimSize, Shape};
use crate::tensor::{Tensor, TensorId};

// TensorStack - Lazy stack of tensors along a new dimension
//
// Stacking does not call the backend. The components are kept as they are
// and the joined array is only built when an operation needs it:
//
//   stack([a (x=2), b (x=2)], b=2)  ->  collapsible, one array (b=2, x=2)
//   stack([a (x=2), b (x=3)], b=2)  ->  ragged, x varies along b
//
// A stack *requires broadcast* when it cannot become one array: component
// shapes differ, a component is a tracer, or a size is still undefined.
// Such stacks apply every operation per component. Collapsible stacks
// delegate to the joined NativeTensor, which is built once and kept.
//
// Dims that every component stores virtually stay virtual in the joined
// array, so stacking constants along a large dim stays cheap.

struct StackInner<B: Backend> {
    id: TensorId,
    components: Vec<Tensor<B>>,
    stack_dim: Dim,
    shape: Shape,
    dtype: DType,
    varying: bool,
    contiguous: OnceLock<NativeTensor<B>>,
}

/// Components stacked along `stack_dim`, joined on demand.
pub struct TensorStack<B: Backend> {
    inner: Arc<StackInner<B>>,
}

impl<B: Backend> Clone for TensorStack<B> {
    fn clone(&self) -> Self {
        TensorStack {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> fmt::Debug for TensorStack<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TensorStack(id={:?}, shape={}, components={}, requires_broadcast={})",
            self.inner.id,
            self.inner.shape,
            self.inner.components.len(),
            self.requires_broadcast(),
        )
    }
}

impl<B: Backend> TensorStack<B> {
    /// Stack `components` along the new dim `stack_dim`.
    ///
    /// An undefined `stack_dim` size is taken from the number of components.
    pub fn new(components: Vec<Tensor<B>>, stack_dim: Dim) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::Construction(format!(
                "cannot stack zero tensors along '{}'",
                stack_dim.name
            )));
        }
        if components.iter().any(|c| matches!(c, Tensor::Layout(_))) {
            return Err(Error::Construction(
                "Layout components must be stacked into a Layout".to_string(),
            ));
        }
        let n = components.len();
        let stack_dim = match &stack_dim.size {
            DimSize::Undefined => stack_dim.with_size(DimSize::Fixed(n)),
            DimSize::Fixed(size) if *size == n => stack_dim,
            size => {
                return Err(Error::Construction(format!(
                    "stack dimension '{}' has size {size} but {n} components were given",
                    stack_dim.name
                )));
            }
        };
        let shapes: Vec<&Shape> = components.iter().map(|c| c.shape()).collect();
        let shape = shape_stack(&stack_dim.to_shape(), &shapes, false)?;
        let varying = merge_shapes(&shapes).is_err();
        let dtypes: Vec<DType> = components.iter().map(|c| c.dtype()).collect();
        let dtype = combine_types(&dtypes)
            .ok_or_else(|| Error::Construction(format!("no components to stack along '{}'", stack_dim.name)))?;
        check_invariant(
            || components.iter().all(|c| !c.shape().contains(&stack_dim.name)),
            || format!("stack dimension '{}' found in a component", stack_dim.name),
        );
        Ok(TensorStack {
            inner: Arc::new(StackInner {
                id: TensorId::new(),
                components,
                stack_dim,
                shape,
                dtype,
                varying,
                contiguous: OnceLock::new(),
            }),
        })
    }

    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    pub fn components(&self) -> &[Tensor<B>] {
        &self.inner.components
    }

    pub fn stack_dim(&self) -> &Dim {
        &self.inner.stack_dim
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    /// Promoted dtype of all components.
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn is_tracer(&self) -> bool {
        self.components().iter().any(|c| c.is_tracer())
    }

    /// Components disagree on their shapes.
    pub fn is_varying(&self) -> bool {
        self.inner.varying
    }

    /// Whether every operation has to run per component.
    pub fn requires_broadcast(&self) -> bool {
        self.inner.varying || !self.shape().is_uniform() || !self.shape().well_defined() || self.is_tracer()
    }

    /// The joined NativeTensor, `None` if the stack cannot be collapsed.
    pub fn contiguous(&self) -> Result<Option<NativeTensor<B>>> {
        if self.requires_broadcast() {
            return Ok(None);
        }
        if let Some(native) = self.inner.contiguous.get() {
            return Ok(Some(native.clone()));
        }
        let native = self.join()?;
        Ok(Some(self.inner.contiguous.get_or_init(|| native).clone()))
    }

    fn join(&self) -> Result<NativeTensor<B>> {
        let stack_name = self.stack_dim().name.as_str();
        let variable: Vec<Shape> = self.components().iter().map(variable_shape).collect();
        let inner = merge_shapes(&variable.iter().collect::<Vec<_>>())?;
        let order = inner.names();
        tracing::debug!(
            stack_dim = stack_name,
            components = self.components().len(),
            shape = %self.shape(),
            "materializing TensorStack"
        );
        let natives = self
            .components()
            .iter()
            .map(|c| c.expand(&inner)?.native_value(&order, true))
            .collect::<Result<Vec<_>>>()?;
        let native = B::stack(&natives, 0)?;
        let native_shape = inner.insert(0, self.stack_dim().clone())?;
        Ok(NativeTensor::from_parts(native, native_shape, self.shape().clone()))
    }

    fn require_contiguous(&self) -> Result<NativeTensor<B>> {
        self.contiguous()?.ok_or_else(|| {
            Error::Unsupported(format!(
                "non-uniform TensorStack {} has no single native array",
                self.shape()
            ))
        })
    }

    pub(crate) fn native_value(&self, order: &[&str], force_expand: bool) -> Result<B::Native> {
        self.require_contiguous()?.native_value(order, force_expand)
    }

    fn rewrap(&self, components: Vec<Tensor<B>>) -> Result<Tensor<B>> {
        Ok(Tensor::Stack(TensorStack::new(components, self.stack_dim().clone())?))
    }

    fn map_components<F>(&self, f: F) -> Result<Tensor<B>>
    where
        F: Fn(&Tensor<B>) -> Result<Tensor<B>>,
    {
        let components = self.components().iter().map(f).collect::<Result<Vec<_>>>()?;
        self.rewrap(components)
    }

    // Slicing

    pub(crate) fn getitem(&self, selection: &Selection) -> Result<Tensor<B>> {
        if !self.requires_broadcast() {
            return Tensor::Native(self.require_contiguous()?).getitem(selection);
        }
        let stack_name = self.stack_dim().name.as_str();
        let rest = selection.without(stack_name);
        let slice_component = |c: &Tensor<B>| -> Result<Tensor<B>> {
            let sel = rest.restricted_to(c.shape());
            if sel.is_empty() {
                Ok(c.clone())
            } else {
                c.getitem(&sel)
            }
        };
        match selection.get(stack_name) {
            None => self.map_components(slice_component),
            Some(Sel::Index(i)) => {
                let component = self.components().get(*i).ok_or_else(|| Error::IndexOutOfBounds {
                    dim: stack_name.to_string(),
                    index: *i,
                    size: self.components().len(),
                })?;
                slice_component(component)
            }
            Some(sel) => {
                let positions = sel.positions(self.components().len())?;
                let components = positions
                    .iter()
                    .map(|p| slice_component(&self.components()[*p]))
                    .collect::<Result<Vec<_>>>()?;
                let stack_dim = self
                    .stack_dim()
                    .to_shape()
                    .after_gather(&Selection::new().with(stack_name, sel.clone()))?;
                Ok(Tensor::Stack(TensorStack::new(components, stack_dim.dims()[0].clone())?))
            }
        }
    }

    pub(crate) fn unstack(&self, dim: &str) -> Result<Vec<Tensor<B>>> {
        if dim == self.stack_dim().name {
            return Ok(self.components().to_vec());
        }
        if !self.requires_broadcast() {
            return self.require_contiguous()?.unstack(dim);
        }
        let size = self.shape().require(dim)?.fixed_size().ok_or_else(|| {
            Error::Unsupported(format!("unstacking non-uniform dimension '{dim}' of {}", self.shape()))
        })?;
        let parts = self
            .components()
            .iter()
            .map(|c| {
                if c.shape().contains(dim) {
                    c.unstack(dim)
                } else {
                    Ok(vec![c.clone(); size])
                }
            })
            .collect::<Result<Vec<_>>>()?;
        (0..size)
            .map(|i| self.rewrap(parts.iter().map(|p| p[i].clone()).collect()))
            .collect()
    }

    // Element-wise operations

    pub(crate) fn op1(&self, op: UnaryOp) -> Result<Tensor<B>> {
        if self.requires_broadcast() {
            self.map_components(|c| c.op1(op))
        } else {
            self.require_contiguous()?.op1(op)
        }
    }

    pub(crate) fn cast(&self, dtype: DType) -> Result<Tensor<B>> {
        if self.requires_broadcast() {
            self.map_components(|c| c.cast(dtype))
        } else {
            self.require_contiguous()?.cast(dtype)
        }
    }

    /// Handles NativeTensors and other stacks.
    pub(crate) fn op2(&self, other: &Tensor<B>, f: Op2) -> Result<Handled<Tensor<B>>> {
        if matches!(other, Tensor::Layout(_)) {
            return Ok(Handled::NotHandled);
        }
        if !self.requires_broadcast() {
            let own = Tensor::Native(self.require_contiguous()?);
            return f.tensors(&own, other).map(Handled::Done);
        }
        let stack_name = self.stack_dim().name.as_str();
        let n = self.components().len();
        let results = if other.shape().contains(stack_name) {
            let others = match other {
                Tensor::Stack(s) if s.stack_dim().name == stack_name => s.components().to_vec(),
                _ => other.unstack(stack_name)?,
            };
            if others.len() != n {
                return Err(Error::shape_incompatible(
                    format!("'{stack_name}' has {n} entries on one side and {} on the other", others.len()),
                    self.shape(),
                    other.shape(),
                ));
            }
            self.components()
                .iter()
                .zip(&others)
                .map(|(c, o)| f.tensors(c, o))
                .collect::<Result<Vec<_>>>()?
        } else {
            self.components()
                .iter()
                .map(|c| f.tensors(c, other))
                .collect::<Result<Vec<_>>>()?
        };
        self.rewrap(results).map(Handled::Done)
    }

    // Shape manipulation

    pub(crate) fn rename_dims(&self, renames: &[(String, Dim)]) -> Result<Tensor<B>> {
        let stack_dim = match renames.iter().find(|(old, _)| *old == self.stack_dim().name) {
            Some((_, new)) => new.with_size(self.stack_dim().size.clone()),
            None => self.stack_dim().clone(),
        };
        let components = self
            .components()
            .iter()
            .map(|c| {
                let own: Vec<(String, Dim)> = renames
                    .iter()
                    .filter(|(old, _)| c.shape().contains(old))
                    .cloned()
                    .collect();
                if own.is_empty() {
                    Ok(c.clone())
                } else {
                    c.rename_dims(&own)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Tensor::Stack(TensorStack::new(components, stack_dim)?))
    }

    pub(crate) fn unpack_dim(&self, dim: &str, unpacked: &Shape) -> Result<Tensor<B>> {
        if dim == self.stack_dim().name {
            return regroup(self.components(), unpacked);
        }
        if !self.requires_broadcast() {
            return self.require_contiguous()?.unpack_dim(dim, unpacked);
        }
        self.map_components(|c| {
            if c.shape().contains(dim) {
                c.unpack_dim(dim, unpacked)
            } else {
                Ok(c.clone())
            }
        })
    }

    pub(crate) fn pack_dims(&self, dims: &[&str], packed: &Dim) -> Result<Tensor<B>> {
        if !self.requires_broadcast() {
            return self.require_contiguous()?.pack_dims(dims, packed);
        }
        let stack_name = self.stack_dim().name.as_str();
        match dims.iter().position(|d| *d == stack_name) {
            Some(0) => {
                // ragged packing: flatten each component, then join along `packed`
                let rest = &dims[1..];
                let flat = self
                    .components()
                    .iter()
                    .map(|c| {
                        self.with_missing_dims(c, rest)?.pack_dims(rest, packed.clone())
                    })
                    .collect::<Result<Vec<_>>>()?;
                Tensor::concat(&flat, &packed.name)
            }
            Some(_) => Err(Error::Unsupported(format!(
                "packing non-uniform {} requires the stack dimension '{stack_name}' to come first",
                self.shape()
            ))),
            None => self.map_components(|c| {
                let c = self.with_missing_dims(c, dims)?;
                c.pack_dims(dims, packed.clone())
            }),
        }
    }

    /// Expand `c` by the dims of `dims` it lacks, taking sizes from the stack shape.
    fn with_missing_dims(&self, c: &Tensor<B>, dims: &[&str]) -> Result<Tensor<B>> {
        let missing: Vec<&str> = dims.iter().copied().filter(|d| !c.shape().contains(d)).collect();
        if missing.is_empty() {
            return Ok(c.clone());
        }
        let missing = self.shape().only(&missing, true);
        if !missing.is_uniform() {
            return Err(Error::Unsupported(format!(
                "component of {} lacks the non-uniform dims {}",
                self.shape(),
                missing
            )));
        }
        c.expand(&missing)
    }

    /// Concatenate values of which at least one is a non-uniform stack along `stack_dim`.
    pub(crate) fn concat_ragged(values: &[Tensor<B>], dim: &str, stack_dim: &Dim) -> Result<Tensor<B>> {
        let stack_name = stack_dim.name.as_str();
        if dim == stack_name {
            let mut components = Vec::new();
            let mut items: Option<Vec<String>> = Some(Vec::new());
            for v in values {
                components.extend(v.unstack(stack_name)?);
                let own = v.shape().require(stack_name)?.item_names.clone();
                items = items.zip(own).map(|(mut a, b)| {
                    a.extend(b);
                    a
                });
            }
            let mut joined = Dim::undefined(stack_name, stack_dim.ty);
            if let Some(items) = items {
                joined = joined.with_item_names(items);
            }
            return Ok(Tensor::Stack(TensorStack::new(components, joined)?));
        }
        let n = stack_dim.fixed_size().unwrap_or(0);
        let parts = values
            .iter()
            .map(|v| {
                if v.shape().contains(stack_name) {
                    v.unstack(stack_name)
                } else {
                    Ok(vec![v.clone(); n])
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let mut components = Vec::with_capacity(n);
        for i in 0..n {
            let slices: Vec<Tensor<B>> = parts
                .iter()
                .map(|p| {
                    p.get(i).cloned().ok_or_else(|| Error::IndexOutOfBounds {
                        dim: stack_name.to_string(),
                        index: i,
                        size: p.len(),
                    })
                })
                .collect::<Result<_>>()?;
            components.push(Tensor::concat(&slices, dim)?);
        }
        Ok(Tensor::Stack(TensorStack::new(components, stack_dim.clone())?))
    }
}

/// Group `components` into nested stacks whose dims are `unpacked`, outermost first.
fn regroup<B: Backend>(components: &[Tensor<B>], unpacked: &Shape) -> Result<Tensor<B>> {
    let Some((outer, inner)) = unpacked.dims().split_first() else {
        return Err(Error::msg("cannot unpack into an empty shape"));
    };
    if inner.is_empty() {
        return Ok(Tensor::Stack(TensorStack::new(components.to_vec(), outer.clone())?));
    }
    let inner = Shape::new(inner.to_vec())?;
    let chunk = inner.volume().unwrap_or(0).max(1);
    let groups = components
        .chunks(chunk)
        .map(|group| regroup(group, &inner))
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::Stack(TensorStack::new(groups, outer.clone())?))
}
