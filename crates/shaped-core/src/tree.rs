use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::backend::Backend;
use crate::broadcast::cached;
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::native::NativeTensor;
use crate::shape::Shape;
use crate::tensor::Tensor;

// Tree - Nested containers of tensors
//
// External machinery (autodiff, jit tracing, vectorization, archives) works
// on flat lists of arrays. `flatten` turns any supported nested value into
// a skeleton plus the ordered list of its tensor leaves, `unflatten` puts
// (possibly new) leaves back:
//
//   [None, t1, {"k": t2}]
//     skeleton: [Missing, NullSlot, {"k": NullSlot}]
//     leaves:   [t1, t2]
//
// Leaves are collected depth-first, left to right. Maps keep their key
// order, records list their variable attributes in declaration order.
// Raw backend arrays become anonymous NativeTensors on the way out and raw
// arrays again on the way back. Everything else (numbers, strings, opaque
// objects) is structure, not data, and stays in the skeleton.

/// A nested value that may contain tensors.
pub enum Tree<B: Backend> {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tensor(Tensor<B>),
    /// A raw backend array without dimension names.
    Native(B::Native),
    List(Vec<Tree<B>>),
    Tuple(Vec<Tree<B>>),
    /// String-keyed map, in insertion order.
    Map(Vec<(String, Tree<B>)>),
    Record(Arc<dyn Record<B>>),
    Object(Arc<dyn Any + Send + Sync>),
}

impl<B: Backend> Clone for Tree<B> {
    fn clone(&self) -> Self {
        match self {
            Tree::None => Tree::None,
            Tree::Bool(v) => Tree::Bool(*v),
            Tree::Int(v) => Tree::Int(*v),
            Tree::Float(v) => Tree::Float(*v),
            Tree::Str(v) => Tree::Str(v.clone()),
            Tree::Tensor(t) => Tree::Tensor(t.clone()),
            Tree::Native(n) => Tree::Native(n.clone()),
            Tree::List(items) => Tree::List(items.clone()),
            Tree::Tuple(items) => Tree::Tuple(items.clone()),
            Tree::Map(entries) => Tree::Map(entries.clone()),
            Tree::Record(r) => Tree::Record(Arc::clone(r)),
            Tree::Object(o) => Tree::Object(Arc::clone(o)),
        }
    }
}

impl<B: Backend> fmt::Debug for Tree<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tree::None => write!(f, "None"),
            Tree::Bool(v) => write!(f, "{v}"),
            Tree::Int(v) => write!(f, "{v}"),
            Tree::Float(v) => write!(f, "{v:?}"),
            Tree::Str(v) => write!(f, "{v:?}"),
            Tree::Tensor(t) => t.fmt(f),
            Tree::Native(n) => write!(f, "Native({n:?})"),
            Tree::List(items) => f.debug_list().entries(items).finish(),
            Tree::Tuple(items) => {
                let mut t = f.debug_tuple("");
                for item in items {
                    t.field(item);
                }
                t.finish()
            }
            Tree::Map(entries) => f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish(),
            Tree::Record(r) => r.fmt(f),
            Tree::Object(_) => write!(f, "<object>"),
        }
    }
}

impl<B: Backend> Tree<B> {
    /// Build a map, requiring every key to be a string.
    pub fn map_from_pairs(pairs: Vec<(Tree<B>, Tree<B>)>) -> Result<Tree<B>> {
        let mut entries = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            match key {
                Tree::Str(k) => entries.push((k, value)),
                other => {
                    return Err(Error::Construction(format!(
                        "map keys must be strings, got {}",
                        other.kind_name()
                    )));
                }
            }
        }
        Ok(Tree::Map(entries))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Tree::None => "none",
            Tree::Bool(_) => "bool",
            Tree::Int(_) => "int",
            Tree::Float(_) => "float",
            Tree::Str(_) => "str",
            Tree::Tensor(_) => "tensor",
            Tree::Native(_) => "native",
            Tree::List(_) => "list",
            Tree::Tuple(_) => "tuple",
            Tree::Map(_) => "map",
            Tree::Record(_) => "record",
            Tree::Object(_) => "object",
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Tree::Bool(v) => Some(Scalar::Bool(*v)),
            Tree::Int(v) => Some(Scalar::Int(*v)),
            Tree::Float(v) => Some(Scalar::Float(*v)),
            _ => None,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Tree::List(_) | Tree::Tuple(_) | Tree::Map(_))
    }

    /// Children of a list, tuple or map, in order.
    pub fn children(&self) -> Vec<&Tree<B>> {
        match self {
            Tree::List(items) | Tree::Tuple(items) => items.iter().collect(),
            Tree::Map(entries) => entries.iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        }
    }

    /// The same container kind (and keys) holding `children`.
    pub(crate) fn with_children(&self, children: Vec<Tree<B>>) -> Tree<B> {
        match self {
            Tree::Tuple(_) => Tree::Tuple(children),
            Tree::Map(entries) => Tree::Map(
                entries
                    .iter()
                    .map(|(k, _)| k.clone())
                    .zip(children)
                    .collect(),
            ),
            _ => Tree::List(children),
        }
    }

    /// Truth value the way containers and scalars are usually tested.
    pub fn truthy(&self) -> Result<bool> {
        Ok(match self {
            Tree::None => false,
            Tree::Bool(v) => *v,
            Tree::Int(v) => *v != 0,
            Tree::Float(v) => *v != 0.0,
            Tree::Str(s) => !s.is_empty(),
            Tree::Tensor(t) => t.to_bool()?,
            Tree::Native(n) => B::staticshape(n).iter().product::<usize>() != 0,
            Tree::List(items) | Tree::Tuple(items) => !items.is_empty(),
            Tree::Map(entries) => !entries.is_empty(),
            Tree::Record(_) | Tree::Object(_) => true,
        })
    }

    /// Deep equality; tensors compare by value, opaque objects by identity.
    pub fn structurally_eq(&self, other: &Tree<B>) -> bool {
        match (self, other) {
            (Tree::None, Tree::None) => true,
            (Tree::Str(a), Tree::Str(b)) => a == b,
            (Tree::Tensor(a), Tree::Tensor(b)) => {
                a.ptr_eq(b) || a.close(b, 0.0, 0.0, true).unwrap_or(false)
            }
            (Tree::Native(a), Tree::Native(b)) => match (B::to_host(a), B::to_host(b)) {
                (Ok(a), Ok(b)) => a.dims == b.dims && a.data == b.data,
                _ => false,
            },
            (Tree::List(a), Tree::List(b)) | (Tree::Tuple(a), Tree::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_eq(y))
            }
            (Tree::Map(a), Tree::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.structurally_eq(vb))
            }
            (Tree::Record(a), Tree::Record(b)) => {
                a.type_name() == b.type_name() && {
                    let names = a.attribute_names(AttrKind::All);
                    names == b.attribute_names(AttrKind::All)
                        && names.iter().all(|n| match (a.attribute(n), b.attribute(n)) {
                            (Some(x), Some(y)) => x.structurally_eq(&y),
                            (None, None) => true,
                            _ => false,
                        })
                }
            }
            (Tree::Object(a), Tree::Object(b)) => Arc::ptr_eq(a, b),
            (a, b) => match (a.as_scalar(), b.as_scalar()) {
                (Some(x), Some(y)) => x.to_f64() == y.to_f64(),
                _ => false,
            },
        }
    }
}

impl<B: Backend> From<Tensor<B>> for Tree<B> {
    fn from(t: Tensor<B>) -> Self {
        Tree::Tensor(t)
    }
}

impl<B: Backend> From<Scalar> for Tree<B> {
    fn from(v: Scalar) -> Self {
        match v {
            Scalar::Bool(b) => Tree::Bool(b),
            Scalar::Int(i) => Tree::Int(i),
            Scalar::Float(f) => Tree::Float(f),
        }
    }
}

impl<B: Backend> From<f64> for Tree<B> {
    fn from(v: f64) -> Self {
        Tree::Float(v)
    }
}

impl<B: Backend> From<i64> for Tree<B> {
    fn from(v: i64) -> Self {
        Tree::Int(v)
    }
}

impl<B: Backend> From<bool> for Tree<B> {
    fn from(v: bool) -> Self {
        Tree::Bool(v)
    }
}

impl<B: Backend> From<&str> for Tree<B> {
    fn from(v: &str) -> Self {
        Tree::Str(v.to_string())
    }
}

impl<B: Backend> From<String> for Tree<B> {
    fn from(v: String) -> Self {
        Tree::Str(v)
    }
}

impl<B: Backend> From<Vec<Tree<B>>> for Tree<B> {
    fn from(v: Vec<Tree<B>>) -> Self {
        Tree::List(v)
    }
}

// Records
//
// Structured user types take part in flattening through the Record trait.
// Their *variable* attributes hold data and are flattened; the remaining
// attributes describe structure and are carried along untouched.

/// Which attributes of a record to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    /// Attributes holding tensor data.
    Variable,
    All,
}

/// A user-defined structured value with named attributes.
pub trait Record<B: Backend>: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    fn attribute_names(&self, kind: AttrKind) -> Vec<String>;

    fn attribute(&self, name: &str) -> Option<Tree<B>>;

    /// A copy with the given attributes replaced.
    fn with_attributes(&self, values: Vec<(String, Tree<B>)>) -> Result<Arc<dyn Record<B>>>;
}

/// Structure of a flattened tree, with tensor leaves cut out.
pub enum Skeleton<B: Backend> {
    /// Was `None`.
    Missing,
    /// A tensor leaf.
    NullSlot,
    /// A raw backend array, restored as a raw array.
    NativeLeaf,
    Layout {
        stack_dim: Shape,
        obj: Box<Skeleton<B>>,
    },
    List(Vec<Skeleton<B>>),
    Tuple(Vec<Skeleton<B>>),
    Map(Vec<(String, Skeleton<B>)>),
    Record {
        record: Arc<dyn Record<B>>,
        attributes: Vec<(String, Skeleton<B>)>,
    },
    /// A value without tensor data, kept as it is.
    Opaque(Tree<B>),
}

impl<B: Backend> Clone for Skeleton<B> {
    fn clone(&self) -> Self {
        match self {
            Skeleton::Missing => Skeleton::Missing,
            Skeleton::NullSlot => Skeleton::NullSlot,
            Skeleton::NativeLeaf => Skeleton::NativeLeaf,
            Skeleton::Layout { stack_dim, obj } => Skeleton::Layout {
                stack_dim: stack_dim.clone(),
                obj: obj.clone(),
            },
            Skeleton::List(items) => Skeleton::List(items.clone()),
            Skeleton::Tuple(items) => Skeleton::Tuple(items.clone()),
            Skeleton::Map(entries) => Skeleton::Map(entries.clone()),
            Skeleton::Record { record, attributes } => Skeleton::Record {
                record: Arc::clone(record),
                attributes: attributes.clone(),
            },
            Skeleton::Opaque(tree) => Skeleton::Opaque(tree.clone()),
        }
    }
}

impl<B: Backend> fmt::Debug for Skeleton<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skeleton::Missing => write!(f, "MISSING"),
            Skeleton::NullSlot => write!(f, "NULL_SLOT"),
            Skeleton::NativeLeaf => write!(f, "NATIVE_LEAF"),
            Skeleton::Layout { stack_dim, obj } => write!(f, "Layout({stack_dim}, {obj:?})"),
            Skeleton::List(items) => f.debug_list().entries(items).finish(),
            Skeleton::Tuple(items) => {
                let mut t = f.debug_tuple("");
                for item in items {
                    t.field(item);
                }
                t.finish()
            }
            Skeleton::Map(entries) => f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish(),
            Skeleton::Record { record, attributes } => {
                let mut s = f.debug_struct(record.type_name());
                for (name, value) in attributes {
                    s.field(name, value);
                }
                s.finish()
            }
            Skeleton::Opaque(tree) => tree.fmt(f),
        }
    }
}

impl<B: Backend> Skeleton<B> {
    /// Number of leaves `unflatten` consumes.
    pub fn leaf_count(&self) -> usize {
        match self {
            Skeleton::NullSlot | Skeleton::NativeLeaf => 1,
            Skeleton::Missing | Skeleton::Opaque(_) => 0,
            Skeleton::Layout { obj, .. } => obj.leaf_count(),
            Skeleton::List(items) | Skeleton::Tuple(items) => items.iter().map(Skeleton::leaf_count).sum(),
            Skeleton::Map(entries) | Skeleton::Record { attributes: entries, .. } => {
                entries.iter().map(|(_, s)| s.leaf_count()).sum()
            }
        }
    }
}

/// Split `tree` into its skeleton and tensor leaves. With `cache`, leaves are [`cached`].
pub fn flatten<B: Backend>(tree: &Tree<B>, cache: bool) -> Result<(Skeleton<B>, Vec<Tensor<B>>)> {
    let mut leaves = Vec::new();
    let skeleton = flatten_into(tree, cache, &mut leaves)?;
    Ok((skeleton, leaves))
}

fn flatten_into<B: Backend>(tree: &Tree<B>, cache: bool, leaves: &mut Vec<Tensor<B>>) -> Result<Skeleton<B>> {
    Ok(match tree {
        Tree::None => Skeleton::Missing,
        Tree::Tensor(Tensor::Layout(layout)) => Skeleton::Layout {
            stack_dim: layout.stack_shape().clone(),
            obj: Box::new(flatten_into(layout.native_obj(), cache, leaves)?),
        },
        Tree::Tensor(t) => {
            leaves.push(if cache { cached(t)? } else { t.clone() });
            Skeleton::NullSlot
        }
        Tree::List(items) => Skeleton::List(
            items
                .iter()
                .map(|i| flatten_into(i, cache, leaves))
                .collect::<Result<_>>()?,
        ),
        Tree::Tuple(items) => Skeleton::Tuple(
            items
                .iter()
                .map(|i| flatten_into(i, cache, leaves))
                .collect::<Result<_>>()?,
        ),
        Tree::Map(entries) => Skeleton::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), flatten_into(v, cache, leaves)?)))
                .collect::<Result<_>>()?,
        ),
        Tree::Record(record) => {
            let mut attributes = Vec::new();
            for name in record.attribute_names(AttrKind::Variable) {
                let value = record.attribute(&name).ok_or_else(|| {
                    Error::msg(format!("{} has no attribute '{name}'", record.type_name()))
                })?;
                attributes.push((name, flatten_into(&value, cache, leaves)?));
            }
            Skeleton::Record {
                record: Arc::clone(record),
                attributes,
            }
        }
        Tree::Native(n) => {
            leaves.push(Tensor::Native(NativeTensor::from_native(n.clone())));
            Skeleton::NativeLeaf
        }
        other => Skeleton::Opaque(other.clone()),
    })
}

/// Rebuild a tree from `skeleton`, consuming `leaves` front to back.
pub fn unflatten<B: Backend>(skeleton: &Skeleton<B>, leaves: Vec<Tensor<B>>) -> Result<Tree<B>> {
    let mut leaves: VecDeque<Tensor<B>> = leaves.into();
    let tree = unflatten_from(skeleton, &mut leaves)?;
    if !leaves.is_empty() {
        return Err(Error::msg(format!(
            "{} leaves left over after unflattening",
            leaves.len()
        )));
    }
    Ok(tree)
}

fn next_leaf<B: Backend>(leaves: &mut VecDeque<Tensor<B>>) -> Result<Tensor<B>> {
    leaves
        .pop_front()
        .ok_or_else(|| Error::msg("not enough leaves to unflatten"))
}

fn unflatten_from<B: Backend>(skeleton: &Skeleton<B>, leaves: &mut VecDeque<Tensor<B>>) -> Result<Tree<B>> {
    Ok(match skeleton {
        Skeleton::Missing => Tree::None,
        Skeleton::NullSlot => Tree::Tensor(next_leaf(leaves)?),
        Skeleton::NativeLeaf => {
            let leaf = next_leaf(leaves)?;
            let names = leaf.shape().names();
            Tree::Native(leaf.native_value(&names, true)?)
        }
        Skeleton::Layout { stack_dim, obj } => {
            let obj = unflatten_from(obj, leaves)?;
            Tree::Tensor(Tensor::Layout(Layout::new(obj, stack_dim.clone())?))
        }
        Skeleton::List(items) => Tree::List(
            items
                .iter()
                .map(|s| unflatten_from(s, leaves))
                .collect::<Result<_>>()?,
        ),
        Skeleton::Tuple(items) => Tree::Tuple(
            items
                .iter()
                .map(|s| unflatten_from(s, leaves))
                .collect::<Result<_>>()?,
        ),
        Skeleton::Map(entries) => Tree::Map(
            entries
                .iter()
                .map(|(k, s)| Ok((k.clone(), unflatten_from(s, leaves)?)))
                .collect::<Result<_>>()?,
        ),
        Skeleton::Record { record, attributes } => {
            let values = attributes
                .iter()
                .map(|(name, s)| Ok((name.clone(), unflatten_from(s, leaves)?)))
                .collect::<Result<Vec<_>>>()?;
            Tree::Record(record.with_attributes(values)?)
        }
        Skeleton::Opaque(tree) => tree.clone(),
    })
}

/// Path of every tensor leaf, in flatten order.
///
/// Map keys and record attributes are joined with `.`, sequence positions
/// are written `[i]`. A bare tensor has the empty path.
pub fn leaf_paths<B: Backend>(tree: &Tree<B>) -> Vec<String> {
    let mut paths = Vec::new();
    collect_paths(tree, String::new(), &mut paths);
    paths
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn collect_paths<B: Backend>(tree: &Tree<B>, prefix: String, paths: &mut Vec<String>) {
    match tree {
        Tree::Tensor(Tensor::Layout(layout)) => collect_paths(layout.native_obj(), prefix, paths),
        Tree::Tensor(_) | Tree::Native(_) => paths.push(prefix),
        Tree::List(items) | Tree::Tuple(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_paths(item, format!("{prefix}[{i}]"), paths);
            }
        }
        Tree::Map(entries) => {
            for (k, v) in entries {
                collect_paths(v, join_key(&prefix, k), paths);
            }
        }
        Tree::Record(record) => {
            for name in record.attribute_names(AttrKind::Variable) {
                if let Some(value) = record.attribute(&name) {
                    collect_paths(&value, join_key(&prefix, &name), paths);
                }
            }
        }
        _ => {}
    }
}
