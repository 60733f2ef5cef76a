use std::collections::VecDeque;
use std::fmt;

use crate::backend::{Backend, BinaryOp, HostArray, UnaryOp};
use crate::broadcast;
use crate::dispatch::{self, Handled, Op2};
use crate::dtype::{DType, Scalar};
use crate::equality::{current_equality_mode, EqualityMode};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::native::NativeTensor;
use crate::selection::Selection;
use crate::shape::{merge_shapes, Dim, DimSize, Shape};
use crate::spec::TensorSpec;
use crate::stack::TensorStack;
use crate::tree::Tree;

// Tensor - One interface over three representations
//
// A tensor is an immutable value with a named Shape and a DType. How the
// value is stored depends on how it came to be:
//
//   NativeTensor  one backend array plus a possibly larger declared shape;
//                 dims missing from the array are constant ("virtual")
//   TensorStack   components stacked lazily along a new dim; the only
//                 representation that can hold differently-shaped parts
//   Layout        a nested tree of lists/tuples/maps whose outer levels are
//                 exposed as dims; leaves can be anything
//
// Every operation returns a new tensor in the cheapest representation that
// can express the result. Representations share backend arrays freely and
// never mutate them.

/// Unique identity of a tensor object. Clones share the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(u64);

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorId {
    /// Generate a new unique id (uses a global atomic counter).
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Which representation backs a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorKind {
    Native,
    Stack,
    Layout,
}

impl fmt::Display for TensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TensorKind::Native => "NativeTensor",
            TensorKind::Stack => "TensorStack",
            TensorKind::Layout => "Layout",
        };
        write!(f, "{s}")
    }
}

/// A tensor with named dimensions on backend `B`.
pub enum Tensor<B: Backend> {
    Native(NativeTensor<B>),
    Stack(TensorStack<B>),
    Layout(Layout<B>),
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        match self {
            Tensor::Native(t) => Tensor::Native(t.clone()),
            Tensor::Stack(t) => Tensor::Stack(t.clone()),
            Tensor::Layout(t) => Tensor::Layout(t.clone()),
        }
    }
}

impl<B: Backend> fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tensor::Native(t) => t.fmt(f),
            Tensor::Stack(t) => t.fmt(f),
            Tensor::Layout(t) => t.fmt(f),
        }
    }
}

macro_rules! binary_methods {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(&self, rhs: &Self) -> Result<Self> {
                self.binary(rhs, BinaryOp::$op)
            }
        )*
    };
}

macro_rules! unary_methods {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(&self) -> Result<Self> {
                self.op1(UnaryOp::$op)
            }
        )*
    };
}

impl<B: Backend> Tensor<B> {
    // Introspection

    pub fn kind(&self) -> TensorKind {
        match self {
            Tensor::Native(_) => TensorKind::Native,
            Tensor::Stack(_) => TensorKind::Stack,
            Tensor::Layout(_) => TensorKind::Layout,
        }
    }

    pub fn id(&self) -> TensorId {
        match self {
            Tensor::Native(t) => t.id(),
            Tensor::Stack(t) => t.id(),
            Tensor::Layout(t) => t.id(),
        }
    }

    /// Whether both handles refer to the same tensor object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }

    pub fn shape(&self) -> &Shape {
        match self {
            Tensor::Native(t) => t.shape(),
            Tensor::Stack(t) => t.shape(),
            Tensor::Layout(t) => t.shape(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape().rank()
    }

    pub fn dtype(&self) -> DType {
        match self {
            Tensor::Native(t) => t.dtype(),
            Tensor::Stack(t) => t.dtype(),
            Tensor::Layout(t) => t.dtype(),
        }
    }

    /// Whether any backing array is a placeholder of a deferred computation.
    pub fn is_tracer(&self) -> bool {
        match self {
            Tensor::Native(t) => t.is_tracer(),
            Tensor::Stack(t) => t.is_tracer(),
            Tensor::Layout(_) => false,
        }
    }

    /// Size of a rank-1 tensor.
    pub fn len(&self) -> Result<usize> {
        let shape = self.shape();
        if shape.rank() != 1 {
            crate::bail!("len() requires a rank-1 tensor, got {shape}");
        }
        shape.dims()[0]
            .size
            .fixed()
            .ok_or_else(|| Error::msg(format!("len() of {shape} is not fixed")))
    }

    pub fn is_empty(&self) -> bool {
        self.shape().volume() == Some(0)
    }

    pub fn as_native(&self) -> Option<&NativeTensor<B>> {
        match self {
            Tensor::Native(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_stack(&self) -> Option<&TensorStack<B>> {
        match self {
            Tensor::Stack(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_layout(&self) -> Option<&Layout<B>> {
        match self {
            Tensor::Layout(t) => Some(t),
            _ => None,
        }
    }

    // Native access

    /// The backing array laid out along `order`.
    ///
    /// Every physically stored dim must appear in `order`. Names in `order`
    /// that the tensor does not store become size-1 axes, tiled to their
    /// declared size only with `force_expand`.
    pub fn native_value(&self, order: &[&str], force_expand: bool) -> Result<B::Native> {
        match self {
            Tensor::Native(t) => t.native_value(order, force_expand),
            Tensor::Stack(t) => t.native_value(order, force_expand),
            Tensor::Layout(t) => t.native_value(order),
        }
    }

    /// Fully expanded array along `order`, which must name every dim.
    pub fn native(&self, order: &[&str]) -> Result<B::Native> {
        if let Some(missing) = self.shape().iter().find(|d| !order.contains(&d.name.as_str())) {
            return Err(Error::shape_incompatible(
                format!("order {order:?} does not contain dimension '{}'", missing.name),
                self.shape(),
                &self.shape().only(order, true),
            ));
        }
        self.native_value(order, true)
    }

    /// Row-major host copy along `order`.
    pub fn to_host(&self, order: &[&str]) -> Result<HostArray> {
        B::to_host(&self.native(order)?)
    }

    /// Values as f64, row-major along `order`.
    pub fn to_vec(&self, order: &[&str]) -> Result<Vec<f64>> {
        Ok(self.to_host(order)?.data)
    }

    /// Values in the tensor's own dimension order.
    pub fn to_vec_default(&self) -> Result<Vec<f64>> {
        let names = self.shape().names();
        self.to_vec(&names)
    }

    /// The value of a rank-0 tensor.
    pub fn to_scalar(&self) -> Result<Scalar> {
        if self.rank() != 0 {
            crate::bail!("not a scalar: tensor has shape {}", self.shape());
        }
        match self {
            Tensor::Layout(l) => l
                .native_obj()
                .as_scalar()
                .ok_or_else(|| Error::msg(format!("layout leaf {:?} is not a number", l.native_obj()))),
            _ => {
                let host = self.to_host(&[])?;
                Ok(Scalar::from_f64(host.data[0], host.dtype))
            }
        }
    }

    /// The value as a tree: a Layout's nested object, or the dense array.
    pub fn native_tree(&self) -> Result<Tree<B>> {
        match self {
            Tensor::Layout(l) => Ok(l.native_obj().clone()),
            _ => {
                let names = self.shape().names();
                Ok(Tree::Native(self.native(&names)?))
            }
        }
    }

    // Slicing and splitting

    /// Select by dimension name. Entries for dims this tensor lacks are ignored.
    pub fn slice(&self, selection: &Selection) -> Result<Self> {
        let selection = selection.resolve_items(self.shape())?.restricted_to(self.shape());
        if selection.is_empty() {
            return Ok(self.clone());
        }
        self.getitem(&selection)
    }

    /// Representation-level slicing; `selection` is resolved and restricted to this shape.
    pub(crate) fn getitem(&self, selection: &Selection) -> Result<Self> {
        match self {
            Tensor::Native(t) => t.getitem(selection),
            Tensor::Stack(t) => t.getitem(selection),
            Tensor::Layout(t) => t.getitem(selection),
        }
    }

    /// Split along `dim`, removing it.
    pub fn unstack(&self, dim: &str) -> Result<Vec<Self>> {
        self.shape().require(dim)?;
        match self {
            Tensor::Native(t) => t.unstack(dim),
            Tensor::Stack(t) => t.unstack(dim),
            Tensor::Layout(t) => t.unstack(dim),
        }
    }

    // Element-wise operations

    pub fn op1(&self, op: UnaryOp) -> Result<Self> {
        match self {
            Tensor::Native(t) => t.op1(op),
            Tensor::Stack(t) => t.op1(op),
            Tensor::Layout(t) => t.op1(op),
        }
    }

    /// Ask this tensor to handle `f` with `other`. See [`dispatch`].
    pub fn op2(&self, other: &Self, f: Op2) -> Result<Handled<Self>> {
        match self {
            Tensor::Native(t) => t.op2(other, f),
            Tensor::Stack(t) => t.op2(other, f),
            Tensor::Layout(t) => t.op2(other, f),
        }
    }

    pub fn binary(&self, rhs: &Self, op: BinaryOp) -> Result<Self> {
        dispatch::binary(self, rhs, op)
    }

    binary_methods! {
        add => Add,
        sub => Sub,
        mul => Mul,
        div => Div,
        floor_div => FloorDiv,
        rem => Mod,
        pow => Pow,
        minimum => Minimum,
        maximum => Maximum,
        and => And,
        or => Or,
        xor => Xor,
        shl => Shl,
        shr => Shr,
        lt => Lt,
        le => Le,
        gt => Gt,
        ge => Ge,
    }

    unary_methods! {
        neg => Neg,
        abs => Abs,
        sign => Sign,
        sqrt => Sqrt,
        exp => Exp,
        log => Log,
        sin => Sin,
        cos => Cos,
        tanh => Tanh,
        floor => Floor,
        ceil => Ceil,
        round => Round,
        not => Not,
        is_finite => IsFinite,
    }

    pub fn add_scalar(&self, value: impl Into<Scalar>) -> Result<Self> {
        self.add(&Tensor::from(value.into()))
    }

    pub fn mul_scalar(&self, value: impl Into<Scalar>) -> Result<Self> {
        self.mul(&Tensor::from(value.into()))
    }

    /// `==` under the innermost equality mode.
    pub fn equal(&self, other: &Self) -> Result<Self> {
        match current_equality_mode() {
            EqualityMode::Elementwise => self.binary(other, BinaryOp::Eq),
            EqualityMode::ByRef => Ok(Tensor::from(self.ptr_eq(other))),
            EqualityMode::ShapeAndValue {
                rel_tolerance,
                abs_tolerance,
                equal_nan,
            } => Ok(Tensor::from(self.close(other, rel_tolerance, abs_tolerance, equal_nan)?)),
        }
    }

    /// `!=` under the innermost equality mode.
    pub fn not_equal(&self, other: &Self) -> Result<Self> {
        match current_equality_mode() {
            EqualityMode::Elementwise => self.binary(other, BinaryOp::Ne),
            _ => self.equal(other)?.not(),
        }
    }

    pub fn cast(&self, dtype: DType) -> Result<Self> {
        match self {
            Tensor::Native(t) => t.cast(dtype),
            Tensor::Stack(t) => t.cast(dtype),
            Tensor::Layout(t) => t.cast(dtype),
        }
    }

    // Reductions to host booleans

    pub fn all(&self) -> Result<bool> {
        match self {
            Tensor::Native(t) => Ok(B::to_host(t.native())?.data.iter().all(|v| *v != 0.0)),
            Tensor::Stack(t) => {
                for c in t.components() {
                    if !c.all()? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Tensor::Layout(t) => t.all(),
        }
    }

    pub fn any(&self) -> Result<bool> {
        match self {
            Tensor::Native(t) => Ok(B::to_host(t.native())?.data.iter().any(|v| *v != 0.0)),
            Tensor::Stack(t) => {
                for c in t.components() {
                    if c.any()? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Tensor::Layout(t) => t.any(),
        }
    }

    /// Truth value of a rank-0 tensor.
    pub fn to_bool(&self) -> Result<bool> {
        if self.rank() != 0 {
            return Err(Error::msg(format!(
                "cannot convert tensor with shape {} to bool, use all() or any()",
                self.shape()
            )));
        }
        match self {
            Tensor::Layout(t) => t.native_obj().truthy(),
            _ => self.all(),
        }
    }

    /// Same dims (as a set) and values within `abs + rel * |other|`.
    pub fn close(&self, other: &Self, rel_tolerance: f64, abs_tolerance: f64, equal_nan: bool) -> Result<bool> {
        if !(self.shape().is_subset_of(other.shape()) && other.shape().is_subset_of(self.shape())) {
            return Ok(false);
        }
        if matches!(self, Tensor::Layout(_)) || matches!(other, Tensor::Layout(_)) {
            return self.binary(other, BinaryOp::Eq)?.all();
        }
        let ragged = [self, other]
            .into_iter()
            .find_map(|t| t.as_stack().filter(|s| s.requires_broadcast()).map(|s| s.stack_dim().name.clone()));
        if let Some(dim) = ragged {
            for (a, b) in self.unstack(&dim)?.iter().zip(other.unstack(&dim)?.iter()) {
                if !a.close(b, rel_tolerance, abs_tolerance, equal_nan)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
        let names = self.shape().names();
        let a = self.to_vec(&names)?;
        let b = other.to_vec(&names)?;
        Ok(a.iter().zip(&b).all(|(x, y)| {
            if x.is_nan() || y.is_nan() {
                equal_nan && x.is_nan() && y.is_nan()
            } else {
                x == y || (x - y).abs() <= abs_tolerance + rel_tolerance * y.abs()
            }
        }))
    }

    // Serialization primitives

    /// Backing arrays in the order `spec` refers to them.
    pub fn natives(&self) -> Vec<B::Native> {
        match self {
            Tensor::Native(t) => vec![t.native().clone()],
            Tensor::Stack(t) => t.components().iter().flat_map(|c| c.natives()).collect(),
            Tensor::Layout(_) => Vec::new(),
        }
    }

    /// Structure record that, together with `natives`, rebuilds this tensor.
    pub fn spec(&self) -> Result<TensorSpec> {
        match self {
            Tensor::Native(t) => Ok(TensorSpec::Dense {
                native_shape: t.native_shape().clone(),
                shape: t.shape().clone(),
            }),
            Tensor::Stack(t) => Ok(TensorSpec::Stack {
                stack_dim: t.stack_dim().clone(),
                tensors: t.components().iter().map(|c| c.spec()).collect::<Result<_>>()?,
            }),
            Tensor::Layout(_) => Err(Error::Unsupported(
                "Layout tensors have no spec record; flatten the tree instead".to_string(),
            )),
        }
    }

    /// Rebuild a tensor from `spec`, taking arrays from the front of `natives`.
    pub fn from_spec(spec: &TensorSpec, natives: &mut VecDeque<B::Native>) -> Result<Self> {
        match spec {
            TensorSpec::Dense { native_shape, shape } => {
                let native = natives
                    .pop_front()
                    .ok_or_else(|| Error::Serialization("ran out of native arrays".to_string()))?;
                Ok(Tensor::Native(NativeTensor::new(native, native_shape.clone(), shape.clone())?))
            }
            TensorSpec::Stack { stack_dim, tensors } => {
                let components = tensors
                    .iter()
                    .map(|s| Tensor::from_spec(s, natives))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Tensor::Stack(TensorStack::new(components, stack_dim.clone())?))
            }
        }
    }

    /// Same structure with new backing arrays, consumed front to back.
    pub fn with_natives_replaced(&self, natives: &mut VecDeque<B::Native>) -> Result<Self> {
        match self {
            Tensor::Layout(_) => Ok(self.clone()),
            _ => Tensor::from_spec(&self.spec()?, natives),
        }
    }

    // Shape manipulation

    /// Replace dims positionally by those of `new_shape` (names, types, item names).
    pub fn with_shape_replaced(&self, new_shape: &Shape) -> Result<Self> {
        if new_shape.rank() != self.rank() {
            return Err(Error::shape_incompatible(
                "replacement shape must have the same rank",
                self.shape(),
                new_shape,
            ));
        }
        let renames: Vec<(String, Dim)> = self
            .shape()
            .iter()
            .zip(new_shape.iter())
            .map(|(old, new)| (old.name.clone(), new.clone()))
            .collect();
        self.rename_dims(&renames)
    }

    /// Rename `old` to `new`, keeping the dim's type and size.
    pub fn rename_dim(&self, old: &str, new: &str) -> Result<Self> {
        let dim = self.shape().require(old)?;
        self.rename_dims(&[(old.to_string(), dim.renamed(new))])
    }

    /// Apply name/type/item changes `(old name, new dim)`; sizes stay as they are.
    pub(crate) fn rename_dims(&self, renames: &[(String, Dim)]) -> Result<Self> {
        match self {
            Tensor::Native(t) => t.rename_dims(renames),
            Tensor::Stack(t) => t.rename_dims(renames),
            Tensor::Layout(t) => t.rename_dims(renames),
        }
    }

    /// Add `dims` the tensor does not have as constant dims.
    pub fn expand(&self, dims: &Shape) -> Result<Self> {
        broadcast::expand_tensor(self, dims)
    }

    /// Merge `dims` into the single dim `packed`, row-major in the order given.
    pub fn pack_dims(&self, dims: &[&str], packed: Dim) -> Result<Self> {
        for name in dims {
            self.shape().require(name)?;
        }
        if self.shape().contains(&packed.name) && !dims.contains(&packed.name.as_str()) {
            return Err(Error::Construction(format!(
                "cannot pack into '{}', {} already has that dimension",
                packed.name,
                self.shape()
            )));
        }
        match dims {
            [] => self.expand(&packed.with_size(DimSize::Fixed(1)).to_shape()),
            [single] => {
                let size = self.shape().require(single)?.size.clone();
                self.rename_dims(&[(single.to_string(), packed.with_size(size))])
            }
            _ => match self {
                Tensor::Native(t) => t.pack_dims(dims, &packed),
                Tensor::Stack(t) => t.pack_dims(dims, &packed),
                Tensor::Layout(t) => t.pack_dims(dims, &packed),
            },
        }
    }

    /// Split `dim` into the dims of `unpacked`, whose volume must match.
    pub fn unpack_dim(&self, dim: &str, unpacked: &Shape) -> Result<Self> {
        let size = self.shape().require(dim)?.size.clone();
        if let (Some(n), Some(v)) = (size.fixed(), unpacked.volume()) {
            if n != v {
                return Err(Error::shape_incompatible(
                    format!("cannot unpack '{dim}' of size {n} into volume {v}"),
                    self.shape(),
                    unpacked,
                ));
            }
        }
        if unpacked.rank() == 1 {
            return self.rename_dims(&[(dim.to_string(), unpacked.dims()[0].clone())]);
        }
        match self {
            Tensor::Native(t) => t.unpack_dim(dim, unpacked),
            Tensor::Stack(t) => t.unpack_dim(dim, unpacked),
            Tensor::Layout(_) => Err(Error::Unsupported(format!(
                "unpacking '{dim}' of a Layout {}",
                self.shape()
            ))),
        }
    }

    /// Materialize lazy stacks and virtual dims. See [`broadcast::cached`].
    pub fn cached(&self) -> Result<Self> {
        broadcast::cached(self)
    }

    pub fn variable_shape(&self) -> Shape {
        broadcast::variable_shape(self)
    }

    // Joining

    /// Stack `values` along the new dim `dim` (size taken from `values`).
    ///
    /// Produces a Layout if any value is a Layout, a TensorStack otherwise.
    pub fn stack(values: &[Self], dim: Dim) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::Construction(format!("cannot stack zero tensors along '{}'", dim.name)));
        }
        let dim = match dim.item_names {
            Some(_) => dim,
            None => dim.with_size(DimSize::Fixed(values.len())),
        };
        if values.iter().any(|v| matches!(v, Tensor::Layout(_))) {
            return Ok(Tensor::Layout(Layout::stack(values, dim)?));
        }
        Ok(Tensor::Stack(TensorStack::new(values.to_vec(), dim)?))
    }

    /// Concatenate `values` along their existing dim `dim`.
    pub fn concat(values: &[Self], dim: &str) -> Result<Self> {
        let Some(first) = values.first() else {
            return Err(Error::Construction(format!("cannot concatenate zero tensors along '{dim}'")));
        };
        if values.iter().any(|v| matches!(v, Tensor::Layout(_))) {
            return Layout::concat(values, dim).map(Tensor::Layout);
        }
        let ragged = values.iter().find_map(|v| v.as_stack().filter(|s| s.requires_broadcast()));
        if let Some(stack) = ragged {
            return TensorStack::concat_ragged(values, dim, stack.stack_dim());
        }
        let mut parts: Vec<&Dim> = Vec::with_capacity(values.len());
        for v in values {
            parts.push(v.shape().require(dim)?);
        }
        let mut total = 0;
        for part in &parts {
            total += part.fixed_size().ok_or_else(|| {
                Error::Unsupported(format!("concatenating along non-uniform '{dim}'"))
            })?;
        }
        let rest: Vec<Shape> = values.iter().map(|v| v.shape().without(&[dim])).collect();
        let joint = merge_shapes(&rest.iter().collect::<Vec<_>>())?;
        let pos = first.shape().index(dim).unwrap_or(0).min(joint.rank());
        let mut names = joint.names();
        names.insert(pos, dim);
        let natives = values
            .iter()
            .map(|v| v.expand(&joint)?.native_value(&names, true))
            .collect::<Result<Vec<_>>>()?;
        let native = B::concat(&natives, pos)?;
        let items: Option<Vec<String>> = parts
            .iter()
            .map(|p| p.item_names.clone())
            .collect::<Option<Vec<_>>>()
            .map(|all| all.concat());
        let mut new_dim = parts[0].with_size(DimSize::Fixed(total));
        if let Some(items) = items {
            new_dim = new_dim.with_item_names(items);
        }
        let shape = joint.insert(pos, new_dim)?;
        Ok(Tensor::Native(NativeTensor::new(native, shape.clone(), shape)?))
    }
}

impl<B: Backend> From<NativeTensor<B>> for Tensor<B> {
    fn from(t: NativeTensor<B>) -> Self {
        Tensor::Native(t)
    }
}

impl<B: Backend> From<TensorStack<B>> for Tensor<B> {
    fn from(t: TensorStack<B>) -> Self {
        Tensor::Stack(t)
    }
}

impl<B: Backend> From<Layout<B>> for Tensor<B> {
    fn from(t: Layout<B>) -> Self {
        Tensor::Layout(t)
    }
}

impl<B: Backend> From<Scalar> for Tensor<B> {
    fn from(v: Scalar) -> Self {
        Tensor::Native(NativeTensor::scalar(v))
    }
}

impl<B: Backend> From<f64> for Tensor<B> {
    fn from(v: f64) -> Self {
        Scalar::Float(v).into()
    }
}

impl<B: Backend> From<i64> for Tensor<B> {
    fn from(v: i64) -> Self {
        Scalar::Int(v).into()
    }
}

impl<B: Backend> From<bool> for Tensor<B> {
    fn from(v: bool) -> Self {
        Scalar::Bool(v).into()
    }
}
