use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, BinaryOp, UnaryOp};
use crate::dispatch::{Handled, Op2};
use crate::dtype::{combine_types, DType};
use crate::error::{Error, Result};
use crate::native::NativeTensor;
use crate::selection::{Sel, Selection};
use crate::shape::{channel, merge_shapes, shape_stack, Dim, DimSize, Shape};
use crate::tensor::{Tensor, TensorId};
use crate::tree::Tree;

// Layout - Nested structure exposed as dimensions
//
// A Layout wraps a tree of lists, tuples and maps whose outer levels act as
// tensor dimensions:
//
//   {"a": [1, 2], "b": [3, 4, 5]}  with stack (keyᶜ)
//     shape (keyᶜ=a,b, vectorᶜ=[2,3]@key)
//
// The first `stack.rank()` levels of nesting are the stack dims, outermost
// first. Map keys become item names of their level. Whatever sits below
// the stack dims is a leaf: numbers, strings, tensors, arbitrary objects.
// List leaves contribute a channel dim `vector` of their length.
//
// There is no backend array behind a Layout. Operations walk the nesting
// and apply themselves at the leaves, rebuilding the same kind of
// container at every level.

/// Name of the dim contributed by list leaves.
pub const VECTOR_DIM: &str = "vector";

struct LayoutInner<B: Backend> {
    id: TensorId,
    obj: Tree<B>,
    stack: Shape,
    shape: Shape,
    dtype: DType,
}

/// A tensor view of a nested tree.
pub struct Layout<B: Backend> {
    inner: Arc<LayoutInner<B>>,
}

impl<B: Backend> Clone for Layout<B> {
    fn clone(&self) -> Self {
        Layout {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> fmt::Debug for Layout<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Layout(id={:?}, shape={}, obj={:?})",
            self.inner.id, self.inner.shape, self.inner.obj
        )
    }
}

impl<B: Backend> Layout<B> {
    /// Wrap `obj`, whose outer nesting levels are the dims of `stack`.
    ///
    /// Undefined sizes are taken from the container lengths, missing item
    /// names from map keys.
    pub fn new(obj: Tree<B>, stack: Shape) -> Result<Self> {
        let mut dims: Vec<Dim> = stack.dims().to_vec();
        infer_level(&obj, &mut dims, 0)?;
        let stack = Shape::new(dims)?;
        let mut leaves = Vec::new();
        collect_leaves(&obj, stack.rank(), &mut leaves);
        let leaf_shapes = leaves.iter().map(|l| leaf_shape(l)).collect::<Result<Vec<_>>>()?;
        let shape = shape_stack(&stack, &leaf_shapes.iter().collect::<Vec<_>>(), true)?;
        let scalars: Option<Vec<DType>> = leaves.iter().map(|l| l.as_scalar().map(|s| s.dtype())).collect();
        let dtype = scalars
            .filter(|d| !d.is_empty())
            .and_then(|d| combine_types(&d))
            .unwrap_or(DType::Object);
        Ok(Layout {
            inner: Arc::new(LayoutInner {
                id: TensorId::new(),
                obj,
                stack,
                shape,
                dtype,
            }),
        })
    }

    /// `obj` as a tensor: tensors stay as they are, numbers become scalars,
    /// anything else is wrapped in a Layout.
    pub fn wrap(obj: Tree<B>, stack: Shape) -> Result<Tensor<B>> {
        if stack.is_empty() {
            match &obj {
                Tree::Tensor(t) => return Ok(t.clone()),
                other => {
                    if let Some(value) = other.as_scalar() {
                        return Ok(Tensor::Native(NativeTensor::scalar(value)));
                    }
                }
            }
        }
        Layout::new(obj, stack).map(Tensor::Layout)
    }

    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    /// The wrapped tree, unchanged.
    pub fn native_obj(&self) -> &Tree<B> {
        &self.inner.obj
    }

    /// The dims formed by nesting, outermost first.
    pub fn stack_shape(&self) -> &Shape {
        &self.inner.stack
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub(crate) fn native_value(&self, order: &[&str]) -> Result<B::Native> {
        Err(Error::Unsupported(format!(
            "Layout {} has no native array (requested order {order:?}), use native_tree()",
            self.shape()
        )))
    }

    // Slicing

    pub(crate) fn getitem(&self, selection: &Selection) -> Result<Tensor<B>> {
        let stack = self.stack_shape();
        let leaf_selection = stack
            .names()
            .into_iter()
            .fold(selection.clone(), |sel, name| sel.without(name));
        let obj = select_level(self.native_obj(), stack.dims(), selection, &leaf_selection)?;
        let new_stack = stack.after_gather(&selection.restricted_to(stack))?;
        Layout::wrap(obj, new_stack)
    }

    pub(crate) fn unstack(&self, dim: &str) -> Result<Vec<Tensor<B>>> {
        let stack = self.stack_shape();
        if stack.dims().first().is_some_and(|d| d.name == dim) {
            let rest = stack.without(&[dim]);
            return self
                .native_obj()
                .children()
                .into_iter()
                .map(|c| Layout::wrap(c.clone(), rest.clone()))
                .collect();
        }
        let size = self.shape().require(dim)?.fixed_size().ok_or_else(|| {
            Error::Unsupported(format!("unstacking non-uniform dimension '{dim}' of {}", self.shape()))
        })?;
        (0..size)
            .map(|i| self.getitem(&Selection::new().at(dim, i)))
            .collect()
    }

    // Element-wise operations

    fn map_leaves<F>(&self, f: F) -> Result<Tensor<B>>
    where
        F: Fn(&Tree<B>) -> Result<Tree<B>>,
    {
        let obj = map_level(self.native_obj(), self.stack_shape().rank(), &f)?;
        Layout::wrap(obj, self.stack_shape().clone())
    }

    pub(crate) fn op1(&self, op: UnaryOp) -> Result<Tensor<B>> {
        self.map_leaves(|leaf| leaf_op1(leaf, op))
    }

    pub(crate) fn cast(&self, dtype: DType) -> Result<Tensor<B>> {
        self.map_leaves(|leaf| leaf_cast(leaf, dtype))
    }

    /// Handles every representation.
    pub(crate) fn op2(&self, other: &Tensor<B>, f: Op2) -> Result<Handled<Tensor<B>>> {
        let own = self.stack_shape();
        let new_stack = match other {
            Tensor::Layout(o) => {
                merge_shapes(&[own, o.stack_shape()])?;
                own.concat(&o.stack_shape().without_shape(own))?
            }
            _ => own.clone(),
        };
        let obj = op2_level(self.native_obj(), new_stack.dims(), own.rank(), other, f)?;
        Layout::wrap(obj, new_stack).map(Handled::Done)
    }

    /// All leaves are truthy.
    pub(crate) fn all(&self) -> Result<bool> {
        let mut leaves = Vec::new();
        collect_leaves(self.native_obj(), self.stack_shape().rank(), &mut leaves);
        for leaf in leaves {
            if !leaf_all(leaf)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Any leaf is truthy.
    pub(crate) fn any(&self) -> Result<bool> {
        let mut leaves = Vec::new();
        collect_leaves(self.native_obj(), self.stack_shape().rank(), &mut leaves);
        for leaf in leaves {
            let truthy = match leaf {
                Tree::Tensor(t) => t.any()?,
                Tree::List(items) | Tree::Tuple(items) => {
                    let mut any = false;
                    for item in items {
                        any |= item.truthy()?;
                    }
                    any
                }
                other => other.truthy()?,
            };
            if truthy {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // Shape manipulation

    pub(crate) fn rename_dims(&self, renames: &[(String, Dim)]) -> Result<Tensor<B>> {
        let stack = self.stack_shape();
        let own: Vec<(String, Dim)> = renames.iter().filter(|(old, _)| stack.contains(old)).cloned().collect();
        let leaf: Vec<(String, Dim)> = renames.iter().filter(|(old, _)| !stack.contains(old)).cloned().collect();
        let obj = if leaf.is_empty() {
            self.native_obj().clone()
        } else {
            map_level(self.native_obj(), stack.rank(), &|node: &Tree<B>| match node {
                Tree::Tensor(t) => {
                    let applicable: Vec<(String, Dim)> =
                        leaf.iter().filter(|(old, _)| t.shape().contains(old)).cloned().collect();
                    if applicable.is_empty() {
                        Ok(node.clone())
                    } else {
                        t.rename_dims(&applicable).map(Tree::Tensor)
                    }
                }
                other => Ok(other.clone()),
            })?
        };
        Layout::new(obj, stack.renamed_dims(&own)?).map(Tensor::Layout)
    }

    /// Repeat the structure along the new outer dims `dims`.
    pub(crate) fn expand(&self, dims: &Shape) -> Result<Self> {
        let mut obj = self.native_obj().clone();
        for dim in dims.dims().iter().rev() {
            let n = dim.fixed_size().ok_or_else(|| {
                Error::Unsupported(format!("expanding Layout by non-uniform dimension '{}'", dim.name))
            })?;
            obj = Tree::List(vec![obj; n]);
        }
        Layout::new(obj, dims.concat(self.stack_shape())?)
    }

    /// Merge the leading stack dims `dims` into one level.
    pub(crate) fn pack_dims(&self, dims: &[&str], packed: &Dim) -> Result<Tensor<B>> {
        let stack = self.stack_shape();
        let leading: Vec<&str> = stack.names().into_iter().take(dims.len()).collect();
        if leading != dims {
            return Err(Error::Unsupported(format!(
                "a Layout can only pack its leading stack dims in order, {dims:?} does not lead {stack}"
            )));
        }
        let mut flat = Vec::new();
        flatten_levels(self.native_obj(), dims.len(), &mut flat);
        let volume = flat.len();
        let rest = stack.without(dims);
        let packed = packed.with_size(DimSize::Fixed(volume));
        Layout::new(Tree::List(flat), packed.to_shape().concat(&rest)?).map(Tensor::Layout)
    }

    // Joining

    /// Stack `values` along the new outer dim `dim`.
    pub(crate) fn stack(values: &[Tensor<B>], dim: Dim) -> Result<Self> {
        let first_stack = values
            .first()
            .and_then(|v| v.as_layout())
            .map(|l| l.stack_shape().clone());
        let nested = first_stack.as_ref().filter(|s| {
            values
                .iter()
                .all(|v| v.as_layout().is_some_and(|l| l.stack_shape() == *s))
        });
        let (children, inner_stack): (Vec<Tree<B>>, Shape) = match nested {
            Some(stack) => (
                values.iter().filter_map(|v| v.as_layout()).map(|l| l.native_obj().clone()).collect(),
                stack.clone(),
            ),
            None => (
                values
                    .iter()
                    .map(|v| match v {
                        Tensor::Layout(l) if l.stack_shape().is_empty() => l.native_obj().clone(),
                        other => Tree::Tensor(other.clone()),
                    })
                    .collect(),
                Shape::empty(),
            ),
        };
        let obj = match &dim.item_names {
            Some(items) if items.len() == children.len() => {
                Tree::Map(items.iter().cloned().zip(children).collect())
            }
            _ => Tree::List(children),
        };
        Layout::new(obj, dim.to_shape().concat(&inner_stack)?)
    }

    /// Concatenate Layouts along their common outermost stack dim.
    pub(crate) fn concat(values: &[Tensor<B>], dim: &str) -> Result<Self> {
        let mut layouts = Vec::with_capacity(values.len());
        for v in values {
            match v.as_layout() {
                Some(l) if l.stack_shape().dims().first().is_some_and(|d| d.name == dim) => layouts.push(l),
                _ => {
                    return Err(Error::Unsupported(format!(
                        "concatenating along '{dim}' requires Layouts with '{dim}' as outermost dim, got {} {}",
                        v.kind(),
                        v.shape()
                    )));
                }
            }
        }
        let first = layouts[0];
        let rest = first.stack_shape().without(&[dim]);
        let all_maps = layouts.iter().all(|l| matches!(l.native_obj(), Tree::Map(_)));
        let obj = if all_maps {
            let mut entries = Vec::new();
            for l in &layouts {
                if let Tree::Map(e) = l.native_obj() {
                    entries.extend(e.iter().cloned());
                }
            }
            Tree::Map(entries)
        } else {
            Tree::List(
                layouts
                    .iter()
                    .flat_map(|l| l.native_obj().children().into_iter().cloned())
                    .collect(),
            )
        };
        let outer = Dim::undefined(dim, first.stack_shape().dims()[0].ty);
        Layout::new(obj, outer.to_shape().concat(&rest)?)
    }
}

// Construction helpers

fn infer_level<B: Backend>(obj: &Tree<B>, dims: &mut [Dim], depth: usize) -> Result<()> {
    if depth == dims.len() {
        return Ok(());
    }
    if !obj.is_container() {
        return Err(Error::Construction(format!(
            "expected {} levels of nesting for dims {:?}, found a {} at level {depth}",
            dims.len(),
            dims.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            obj.kind_name()
        )));
    }
    let children = obj.children();
    let dim = &mut dims[depth];
    match dim.size {
        DimSize::Undefined => dim.size = DimSize::Fixed(children.len()),
        DimSize::Fixed(n) if n == children.len() => {}
        _ => {
            return Err(Error::Construction(format!(
                "dimension '{}' has size {} but the {} at level {depth} has {} entries",
                dim.name,
                dim.size,
                obj.kind_name(),
                children.len()
            )));
        }
    }
    if let Tree::Map(entries) = obj {
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        match &dim.item_names {
            None => dim.item_names = Some(keys),
            Some(items) if *items == keys => {}
            Some(items) => {
                return Err(Error::Construction(format!(
                    "map keys {keys:?} do not match item names {items:?} of '{}'",
                    dim.name
                )));
            }
        }
    }
    for child in children {
        infer_level(child, dims, depth + 1)?;
    }
    Ok(())
}

fn collect_leaves<'a, B: Backend>(obj: &'a Tree<B>, depth: usize, leaves: &mut Vec<&'a Tree<B>>) {
    if depth == 0 {
        leaves.push(obj);
    } else {
        for child in obj.children() {
            collect_leaves(child, depth - 1, leaves);
        }
    }
}

fn flatten_levels<B: Backend>(obj: &Tree<B>, depth: usize, out: &mut Vec<Tree<B>>) {
    if depth == 0 {
        out.push(obj.clone());
    } else {
        for child in obj.children() {
            flatten_levels(child, depth - 1, out);
        }
    }
}

fn leaf_shape<B: Backend>(leaf: &Tree<B>) -> Result<Shape> {
    Ok(match leaf {
        Tree::Tensor(t) => t.shape().clone(),
        Tree::List(items) | Tree::Tuple(items) => channel(VECTOR_DIM, items.len()),
        Tree::Native(n) => Shape::anonymous(&B::staticshape(n)),
        _ => Shape::empty(),
    })
}

// Traversal

fn map_level<B, F>(obj: &Tree<B>, depth: usize, f: &F) -> Result<Tree<B>>
where
    B: Backend,
    F: Fn(&Tree<B>) -> Result<Tree<B>>,
{
    if depth == 0 {
        return f(obj);
    }
    let children = obj
        .children()
        .into_iter()
        .map(|c| map_level(c, depth - 1, f))
        .collect::<Result<Vec<_>>>()?;
    Ok(obj.with_children(children))
}

fn select_level<B: Backend>(
    obj: &Tree<B>,
    dims: &[Dim],
    selection: &Selection,
    leaf_selection: &Selection,
) -> Result<Tree<B>> {
    let Some((dim, rest)) = dims.split_first() else {
        return select_leaf(obj, leaf_selection);
    };
    let children = obj.children();
    match selection.get(&dim.name) {
        None => {
            let selected = children
                .into_iter()
                .map(|c| select_level(c, rest, selection, leaf_selection))
                .collect::<Result<Vec<_>>>()?;
            Ok(obj.with_children(selected))
        }
        Some(Sel::Index(i)) => {
            let child = children.get(*i).ok_or_else(|| Error::IndexOutOfBounds {
                dim: dim.name.clone(),
                index: *i,
                size: children.len(),
            })?;
            select_level(child, rest, selection, leaf_selection)
        }
        Some(sel) => {
            let positions = sel.positions(children.len())?;
            let picked = positions
                .iter()
                .map(|p| select_level(children[*p], rest, selection, leaf_selection))
                .collect::<Result<Vec<_>>>()?;
            Ok(match obj {
                Tree::Map(entries) => Tree::Map(
                    positions
                        .iter()
                        .map(|p| entries[*p].0.clone())
                        .zip(picked)
                        .collect(),
                ),
                Tree::Tuple(_) => Tree::Tuple(picked),
                _ => Tree::List(picked),
            })
        }
    }
}

fn select_leaf<B: Backend>(leaf: &Tree<B>, selection: &Selection) -> Result<Tree<B>> {
    if selection.is_empty() {
        return Ok(leaf.clone());
    }
    match leaf {
        Tree::Tensor(t) => t.slice(selection).map(Tree::Tensor),
        Tree::List(items) | Tree::Tuple(items) => match selection.get(VECTOR_DIM) {
            None => Ok(leaf.clone()),
            Some(Sel::Index(i)) => items.get(*i).cloned().ok_or_else(|| Error::IndexOutOfBounds {
                dim: VECTOR_DIM.to_string(),
                index: *i,
                size: items.len(),
            }),
            Some(sel) => {
                let picked = sel.positions(items.len())?.into_iter().map(|p| items[p].clone()).collect();
                Ok(leaf.with_children(picked))
            }
        },
        other => Ok(other.clone()),
    }
}

fn scalar_tree<B: Backend>(t: Tensor<B>) -> Result<Tree<B>> {
    if let Tensor::Layout(l) = &t {
        return Ok(l.native_obj().clone());
    }
    if t.rank() == 0 && !t.is_tracer() {
        return Ok(t.to_scalar()?.into());
    }
    Ok(Tree::Tensor(t))
}

fn leaf_op1<B: Backend>(leaf: &Tree<B>, op: UnaryOp) -> Result<Tree<B>> {
    if let Some(value) = leaf.as_scalar() {
        return Ok(value.unary(op)?.into());
    }
    match leaf {
        Tree::Tensor(t) => t.op1(op).map(Tree::Tensor),
        Tree::Native(n) => B::unary(op, n).map(Tree::Native),
        Tree::List(_) | Tree::Tuple(_) => {
            let items = leaf
                .children()
                .into_iter()
                .map(|c| leaf_op1(c, op))
                .collect::<Result<Vec<_>>>()?;
            Ok(leaf.with_children(items))
        }
        other => Err(Error::Unsupported(format!("{op} is not defined for {} leaves", other.kind_name()))),
    }
}

fn leaf_cast<B: Backend>(leaf: &Tree<B>, dtype: DType) -> Result<Tree<B>> {
    if let Some(value) = leaf.as_scalar() {
        return Ok(value.cast(dtype)?.into());
    }
    match leaf {
        Tree::Tensor(t) => t.cast(dtype).map(Tree::Tensor),
        Tree::Native(n) => B::cast(n, dtype).map(Tree::Native),
        Tree::List(_) | Tree::Tuple(_) => {
            let items = leaf
                .children()
                .into_iter()
                .map(|c| leaf_cast(c, dtype))
                .collect::<Result<Vec<_>>>()?;
            Ok(leaf.with_children(items))
        }
        other => Ok(other.clone()),
    }
}

fn leaf_all<B: Backend>(leaf: &Tree<B>) -> Result<bool> {
    match leaf {
        Tree::Tensor(t) => t.all(),
        Tree::List(items) | Tree::Tuple(items) => {
            for item in items {
                if !item.truthy()? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        other => other.truthy(),
    }
}

/// Walk `dims` (own dims first, then dims only `other` has), slicing `other`
/// along every dim it shares.
fn op2_level<B: Backend>(
    obj: &Tree<B>,
    dims: &[Dim],
    own_rank: usize,
    other: &Tensor<B>,
    f: Op2,
) -> Result<Tree<B>> {
    let Some((dim, rest)) = dims.split_first() else {
        return match other {
            Tensor::Layout(o) if o.stack_shape().is_empty() => leaf_leaf(obj, o.native_obj(), f),
            _ => leaf_tensor(obj, other, f),
        };
    };
    let shared = other.shape().contains(&dim.name);
    let other_at = |i: usize| -> Result<Tensor<B>> {
        if shared {
            other.slice(&Selection::new().at(dim.name.clone(), i))
        } else {
            Ok(other.clone())
        }
    };
    if own_rank > 0 {
        let children = obj
            .children()
            .into_iter()
            .enumerate()
            .map(|(i, c)| op2_level(c, rest, own_rank - 1, &other_at(i)?, f))
            .collect::<Result<Vec<_>>>()?;
        return Ok(obj.with_children(children));
    }
    let n = dim.fixed_size().unwrap_or(0);
    let children = (0..n)
        .map(|i| op2_level(obj, rest, 0, &other_at(i)?, f))
        .collect::<Result<Vec<_>>>()?;
    Ok(match &dim.item_names {
        Some(items) => Tree::Map(items.iter().cloned().zip(children).collect()),
        None => Tree::List(children),
    })
}

fn unsupported<B: Backend>(a: &Tree<B>, b: &str, f: Op2) -> Error {
    let (lhs, rhs) = if f.swapped {
        (b.to_string(), a.kind_name().to_string())
    } else {
        (a.kind_name().to_string(), b.to_string())
    };
    Error::UnsupportedOperation {
        op: f.op.symbol().to_string(),
        lhs,
        rhs,
    }
}

/// `a op b` for two Layout leaves.
fn leaf_leaf<B: Backend>(a: &Tree<B>, b: &Tree<B>, f: Op2) -> Result<Tree<B>> {
    if let (Some(x), Some(y)) = (a.as_scalar(), b.as_scalar()) {
        return Ok(f.scalars(&x, &y)?.into());
    }
    let equality = matches!(f.op, BinaryOp::Eq | BinaryOp::Ne);
    let eq_result = |equal: bool| Tree::Bool(if f.op == BinaryOp::Eq { equal } else { !equal });
    match (a, b) {
        (Tree::Str(x), Tree::Str(y)) if equality => Ok(eq_result(x == y)),
        (Tree::Str(x), Tree::Str(y)) if f.op == BinaryOp::Add => Ok(Tree::Str(if f.swapped {
            format!("{y}{x}")
        } else {
            format!("{x}{y}")
        })),
        (Tree::Tensor(_), _) | (Tree::Native(_), _) => match b {
            Tree::Tensor(t) => leaf_tensor(a, t, f),
            other => match other.as_scalar() {
                Some(s) => leaf_tensor(a, &Tensor::from(s), f),
                None => leaf_tensor(a, &Layout::wrap(other.clone(), Shape::empty())?, f),
            },
        },
        (_, Tree::Tensor(t)) => leaf_tensor(a, t, f),
        (Tree::List(xs), Tree::List(ys)) | (Tree::Tuple(xs), Tree::Tuple(ys)) if !equality => {
            if xs.len() != ys.len() {
                return Err(Error::shape_incompatible(
                    format!("'{VECTOR_DIM}' entries differ in length"),
                    &channel(VECTOR_DIM, xs.len()),
                    &channel(VECTOR_DIM, ys.len()),
                ));
            }
            let items = xs
                .iter()
                .zip(ys)
                .map(|(x, y)| leaf_leaf(x, y, f))
                .collect::<Result<Vec<_>>>()?;
            Ok(a.with_children(items))
        }
        (Tree::List(_) | Tree::Tuple(_), _) if b.as_scalar().is_some() => {
            let items = a
                .children()
                .into_iter()
                .map(|x| leaf_leaf(x, b, f))
                .collect::<Result<Vec<_>>>()?;
            Ok(a.with_children(items))
        }
        (_, Tree::List(_) | Tree::Tuple(_)) if a.as_scalar().is_some() => {
            let items = b
                .children()
                .into_iter()
                .map(|y| leaf_leaf(a, y, f))
                .collect::<Result<Vec<_>>>()?;
            Ok(b.with_children(items))
        }
        (Tree::Object(x), Tree::Object(y)) if equality => Ok(eq_result(Arc::ptr_eq(x, y))),
        _ if equality => Ok(eq_result(a.structurally_eq(b))),
        _ => Err(unsupported(a, b.kind_name(), f)),
    }
}

/// `a op t` for a Layout leaf and a numeric tensor.
fn leaf_tensor<B: Backend>(a: &Tree<B>, t: &Tensor<B>, f: Op2) -> Result<Tree<B>> {
    if let Some(value) = a.as_scalar() {
        return scalar_tree(f.tensors(&Tensor::from(value), t)?);
    }
    match a {
        Tree::Tensor(x) => scalar_tree(f.tensors(x, t)?),
        Tree::Native(n) => scalar_tree(f.tensors(&Tensor::Native(NativeTensor::from_native(n.clone())), t)?),
        Tree::List(items) | Tree::Tuple(items) => {
            let shared = t.shape().contains(VECTOR_DIM);
            let results = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let other = if shared {
                        t.slice(&Selection::new().at(VECTOR_DIM, i))?
                    } else {
                        t.clone()
                    };
                    leaf_tensor(item, &other, f)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(a.with_children(results))
        }
        other => {
            let equality = matches!(f.op, BinaryOp::Eq | BinaryOp::Ne);
            if equality {
                return Ok(Tree::Bool(f.op == BinaryOp::Ne));
            }
            Err(unsupported(other, &t.kind().to_string(), f))
        }
    }
}

