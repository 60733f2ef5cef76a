use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::selection::{Sel, Selection};

// Shape - Ordered set of named, typed dimensions
//
// Unlike a positional shape `[2, 3]`, every dimension here has a name and a
// type:
//
//   (bᵇ=2, xˢ=3)        batch dim `b` of size 2, spatial dim `x` of size 3
//   (vectorᶜ=x,y,z)     channel dim whose entries are named x, y and z
//
// Operations line dimensions up by name, so a Shape behaves like a set for
// broadcasting and like a sequence when a native array has to be laid out.
//
// A dimension's size is usually fixed. It may be undefined (to be inferred
// by a constructor) or varying: the size then depends on the position along
// another dimension, which is how ragged (non-uniform) stacks are described.

/// Category of a dimension. The declaration order is the order in which
/// merged shapes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimType {
    Batch,
    Dual,
    Instance,
    Spatial,
    Channel,
    /// Anonymous axes of raw native arrays (`dim0`, `dim1`, ...).
    Untyped,
}

impl DimType {
    fn marker(&self) -> &'static str {
        match self {
            DimType::Batch => "ᵇ",
            DimType::Dual => "ᵈ",
            DimType::Instance => "ⁱ",
            DimType::Spatial => "ˢ",
            DimType::Channel => "ᶜ",
            DimType::Untyped => "",
        }
    }
}

/// Size of a single dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimSize {
    Fixed(usize),
    /// Not known yet; constructors infer it.
    Undefined,
    /// One size per entry of the dimension `along`.
    Varying { along: String, sizes: Vec<usize> },
}

impl DimSize {
    pub fn fixed(&self) -> Option<usize> {
        match self {
            DimSize::Fixed(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, DimSize::Undefined)
    }

    pub fn is_varying(&self) -> bool {
        matches!(self, DimSize::Varying { .. })
    }

    /// Largest size this dimension takes anywhere.
    pub fn max(&self) -> Option<usize> {
        match self {
            DimSize::Fixed(n) => Some(*n),
            DimSize::Undefined => None,
            DimSize::Varying { sizes, .. } => sizes.iter().copied().max(),
        }
    }
}

impl fmt::Display for DimSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimSize::Fixed(n) => write!(f, "{n}"),
            DimSize::Undefined => write!(f, "?"),
            DimSize::Varying { along, sizes } => {
                let sizes: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
                write!(f, "[{}]@{}", sizes.join(","), along)
            }
        }
    }
}

/// A single named dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: DimType,
    pub size: DimSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_names: Option<Vec<String>>,
}

impl Dim {
    pub fn new(name: impl Into<String>, ty: DimType, size: usize) -> Self {
        Dim {
            name: name.into(),
            ty,
            size: DimSize::Fixed(size),
            item_names: None,
        }
    }

    pub fn undefined(name: impl Into<String>, ty: DimType) -> Self {
        Dim {
            name: name.into(),
            ty,
            size: DimSize::Undefined,
            item_names: None,
        }
    }

    /// A dimension whose size is the number of item names.
    pub fn with_items<I, S>(name: impl Into<String>, ty: DimType, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<String> = items.into_iter().map(Into::into).collect();
        Dim {
            name: name.into(),
            ty,
            size: DimSize::Fixed(items.len()),
            item_names: Some(items),
        }
    }

    pub fn fixed_size(&self) -> Option<usize> {
        self.size.fixed()
    }

    pub fn item_index(&self, item: &str) -> Option<usize> {
        self.item_names.as_ref()?.iter().position(|n| n == item)
    }

    /// Same dimension with a new size. Item names survive only if they still fit.
    pub fn with_size(&self, size: DimSize) -> Dim {
        let item_names = match (&self.item_names, size.fixed()) {
            (Some(items), Some(n)) if items.len() == n => Some(items.clone()),
            _ => None,
        };
        Dim {
            name: self.name.clone(),
            ty: self.ty,
            size,
            item_names,
        }
    }

    pub fn with_item_names(mut self, items: Vec<String>) -> Dim {
        self.size = DimSize::Fixed(items.len());
        self.item_names = Some(items);
        self
    }

    pub fn renamed(&self, name: impl Into<String>) -> Dim {
        Dim {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn to_shape(&self) -> Shape {
        Shape {
            dims: vec![self.clone()],
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}=", self.name, self.ty.marker())?;
        match &self.item_names {
            Some(items) => write!(f, "{}", items.join(",")),
            None => write!(f, "{}", self.size),
        }
    }
}

/// Ordered set of named dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    dims: Vec<Dim>,
}

impl Shape {
    /// Create a shape, rejecting duplicate dimension names.
    pub fn new(dims: Vec<Dim>) -> Result<Self> {
        for (i, d) in dims.iter().enumerate() {
            if dims[..i].iter().any(|o| o.name == d.name) {
                return Err(Error::Construction(format!(
                    "dimension '{}' appears twice in {}",
                    d.name,
                    Shape { dims: dims.clone() }
                )));
            }
        }
        Ok(Shape { dims })
    }

    /// The shape of a scalar.
    pub fn empty() -> Self {
        Shape::default()
    }

    pub(crate) fn from_dims_unchecked(dims: Vec<Dim>) -> Self {
        Shape { dims }
    }

    /// Untyped dims `dim0, dim1, ...` for a raw native array.
    pub fn anonymous(sizes: &[usize]) -> Self {
        Shape {
            dims: sizes
                .iter()
                .enumerate()
                .map(|(i, s)| Dim::new(format!("dim{i}"), DimType::Untyped, *s))
                .collect(),
        }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Dim> {
        self.dims.iter()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn dim(&self, name: &str) -> Option<&Dim> {
        self.dims.iter().find(|d| d.name == name)
    }

    /// Like [`dim`](Self::dim), failing with `DimNotFound`.
    pub fn require(&self, name: &str) -> Result<&Dim> {
        self.dim(name).ok_or_else(|| Error::DimNotFound {
            name: name.to_string(),
            shape: self.clone(),
        })
    }

    /// Position of `name` in this shape.
    pub fn index(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index(name).is_some()
    }

    /// Whether every dim of `other` is part of this shape.
    pub fn contains_all(&self, other: &Shape) -> bool {
        other.dims.iter().all(|d| self.contains(&d.name))
    }

    /// Fixed size of `name`, `None` if absent or not fixed.
    pub fn size(&self, name: &str) -> Option<usize> {
        self.dim(name)?.fixed_size()
    }

    /// All sizes, requiring them to be fixed. Native arrays are laid out from these.
    pub fn fixed_sizes(&self) -> Result<Vec<usize>> {
        self.dims
            .iter()
            .map(|d| {
                d.fixed_size().ok_or_else(|| {
                    Error::Unsupported(format!(
                        "dimension '{}' of {} has no fixed size",
                        d.name, self
                    ))
                })
            })
            .collect()
    }

    /// Total number of entries, if all sizes are fixed. The empty shape has volume 1.
    pub fn volume(&self) -> Option<usize> {
        self.dims.iter().map(|d| d.fixed_size()).product()
    }

    /// No dimension varies along another.
    pub fn is_uniform(&self) -> bool {
        !self.dims.iter().any(|d| d.size.is_varying())
    }

    /// Every size is known.
    pub fn well_defined(&self) -> bool {
        self.dims.iter().all(|d| d.size.is_defined())
    }

    /// The dimensions along which other dimensions of this shape vary.
    pub fn non_uniform_shape(&self) -> Shape {
        let mut along: Vec<&str> = Vec::new();
        for d in &self.dims {
            if let DimSize::Varying { along: a, .. } = &d.size {
                if !along.contains(&a.as_str()) {
                    along.push(a);
                }
            }
        }
        self.only(&along, false)
    }

    pub fn without(&self, names: &[&str]) -> Shape {
        Shape {
            dims: self
                .dims
                .iter()
                .filter(|d| !names.contains(&d.name.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn without_shape(&self, other: &Shape) -> Shape {
        self.without(&other.names())
    }

    /// Dims named in `names`. With `reorder`, in the order of `names`.
    pub fn only(&self, names: &[&str], reorder: bool) -> Shape {
        let dims = if reorder {
            names.iter().filter_map(|n| self.dim(n)).cloned().collect()
        } else {
            self.dims
                .iter()
                .filter(|d| names.contains(&d.name.as_str()))
                .cloned()
                .collect()
        };
        Shape { dims }
    }

    pub fn intersection(&self, other: &Shape) -> Shape {
        self.only(&other.names(), false)
    }

    pub fn difference(&self, other: &Shape) -> Shape {
        self.without_shape(other)
    }

    /// Append `other`, which must not share names with `self`.
    pub fn concat(&self, other: &Shape) -> Result<Shape> {
        let mut dims = self.dims.clone();
        dims.extend(other.dims.iter().cloned());
        Shape::new(dims)
    }

    /// Every dim of `self` is in `other` with the same size.
    pub fn is_subset_of(&self, other: &Shape) -> bool {
        self.dims
            .iter()
            .all(|d| other.dim(&d.name).is_some_and(|o| o.size == d.size))
    }

    /// Same dims, in the order given by `names`. All names must be present.
    pub fn reordered(&self, names: &[&str]) -> Result<Shape> {
        if names.len() != self.rank() {
            return Err(Error::msg(format!("cannot reorder {} to {:?}", self, names)));
        }
        names
            .iter()
            .map(|n| self.require(n).cloned())
            .collect::<Result<Vec<_>>>()
            .map(|dims| Shape { dims })
    }

    pub fn with_dim_size(&self, name: &str, size: DimSize) -> Shape {
        Shape {
            dims: self
                .dims
                .iter()
                .map(|d| if d.name == name { d.with_size(size.clone()) } else { d.clone() })
                .collect(),
        }
    }

    /// Replace all sizes positionally.
    pub fn with_sizes(&self, sizes: &[usize]) -> Result<Shape> {
        if sizes.len() != self.rank() {
            return Err(Error::msg(format!(
                "cannot apply {} sizes {:?} to {}",
                sizes.len(),
                sizes,
                self
            )));
        }
        Ok(Shape {
            dims: self
                .dims
                .iter()
                .zip(sizes)
                .map(|(d, s)| d.with_size(DimSize::Fixed(*s)))
                .collect(),
        })
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<Shape> {
        self.require(old)?;
        if old != new && self.contains(new) {
            return Err(Error::Construction(format!(
                "cannot rename '{old}' to '{new}': {self} already has '{new}'"
            )));
        }
        Ok(Shape {
            dims: self
                .dims
                .iter()
                .map(|d| if d.name == old { d.renamed(new) } else { d.clone() })
                .collect(),
        })
    }

    /// Apply `(old name, new dim)` pairs, keeping each dim's size.
    ///
    /// Item names of the new dim survive only if they match the kept size.
    /// Sizes varying along a renamed dim follow the rename.
    pub fn renamed_dims(&self, renames: &[(String, Dim)]) -> Result<Shape> {
        let lookup = |name: &str| renames.iter().find(|(old, _)| old == name).map(|(_, new)| new);
        let dims = self
            .dims
            .iter()
            .map(|d| {
                let size = match &d.size {
                    DimSize::Varying { along, sizes } => DimSize::Varying {
                        along: lookup(along).map_or_else(|| along.clone(), |n| n.name.clone()),
                        sizes: sizes.clone(),
                    },
                    s => s.clone(),
                };
                match lookup(&d.name) {
                    Some(new) => new.with_size(size),
                    None => d.with_size(size),
                }
            })
            .collect();
        Shape::new(dims)
    }

    /// Sizes of all dims, in order.
    pub fn sizes(&self) -> Vec<DimSize> {
        self.dims.iter().map(|d| d.size.clone()).collect()
    }

    /// Replace the dim `name` by the dims of `new`, in place.
    pub fn replace(&self, name: &str, new: &Shape) -> Result<Shape> {
        let pos = self.index(name).ok_or_else(|| Error::DimNotFound {
            name: name.to_string(),
            shape: self.clone(),
        })?;
        let mut dims = self.dims[..pos].to_vec();
        dims.extend(new.dims.iter().cloned());
        dims.extend(self.dims[pos + 1..].iter().cloned());
        Shape::new(dims)
    }

    /// Insert `dim` at position `pos`.
    pub fn insert(&self, pos: usize, dim: Dim) -> Result<Shape> {
        let mut dims = self.dims.clone();
        dims.insert(pos.min(dims.len()), dim);
        Shape::new(dims)
    }

    /// The shape left after applying `selection`. Entries for absent dims are ignored.
    pub fn after_gather(&self, selection: &Selection) -> Result<Shape> {
        let selection = selection.resolve_items(self)?;
        let mut dims: Vec<Dim> = Vec::with_capacity(self.rank());
        for dim in &self.dims {
            match selection.get(&dim.name) {
                None => dims.push(dim.clone()),
                Some(sel) => {
                    if dim.size.is_varying() {
                        if sel.is_index() {
                            continue;
                        }
                        return Err(Error::Unsupported(format!(
                            "range selection on non-uniform dimension '{}' of {}",
                            dim.name, self
                        )));
                    }
                    let size = dim.fixed_size().ok_or_else(|| {
                        Error::msg(format!("cannot select on undefined dimension '{}'", dim.name))
                    })?;
                    match sel {
                        Sel::Index(i) => {
                            if *i >= size {
                                return Err(Error::IndexOutOfBounds {
                                    dim: dim.name.clone(),
                                    index: *i,
                                    size,
                                });
                            }
                        }
                        Sel::Range { .. } => {
                            let positions = sel.positions(size)?;
                            let mut new = dim.with_size(DimSize::Fixed(positions.len()));
                            if let Some(items) = &dim.item_names {
                                new.item_names = Some(positions.iter().map(|p| items[*p].clone()).collect());
                            }
                            dims.push(new);
                        }
                        Sel::Item(item) => {
                            return Err(Error::msg(format!("unresolved item '{item}' on '{}'", dim.name)));
                        }
                    }
                }
            }
        }
        // sizes varying along a gathered dim become fixed or shrink
        for dim in dims.iter_mut() {
            if let DimSize::Varying { along, sizes } = &dim.size {
                let Some(sel) = selection.get(along) else { continue };
                let picked: Vec<usize> = match sel {
                    Sel::Index(i) => vec![*sizes.get(*i).ok_or_else(|| Error::IndexOutOfBounds {
                        dim: along.clone(),
                        index: *i,
                        size: sizes.len(),
                    })?],
                    _ => sel.positions(sizes.len())?.into_iter().map(|p| sizes[p]).collect(),
                };
                let new_size = if sel.is_index() || picked.windows(2).all(|w| w[0] == w[1]) {
                    DimSize::Fixed(picked.first().copied().unwrap_or(0))
                } else {
                    DimSize::Varying {
                        along: along.clone(),
                        sizes: picked,
                    }
                };
                *dim = dim.with_size(new_size);
            }
        }
        Ok(Shape { dims })
    }

    /// Serializable form, as used in spec records.
    pub fn to_dict(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_dict(value: &serde_json::Value) -> Result<Shape> {
        let shape: Shape = serde_json::from_value(value.clone())?;
        Shape::new(shape.dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

impl From<Dim> for Shape {
    fn from(d: Dim) -> Self {
        d.to_shape()
    }
}

impl<'a> IntoIterator for &'a Shape {
    type Item = &'a Dim;
    type IntoIter = std::slice::Iter<'a, Dim>;

    fn into_iter(self) -> Self::IntoIter {
        self.dims.iter()
    }
}

// Single-dimension constructors
//
// These mirror how users spell shapes: `batch("b", 4)`, `spatial("x", 64)`,
// `channel_items("vector", ["x", "y"])`. Combine them with `concat` or
// `merge_shapes`.

pub fn batch(name: &str, size: usize) -> Shape {
    Dim::new(name, DimType::Batch, size).into()
}

pub fn dual(name: &str, size: usize) -> Shape {
    Dim::new(name, DimType::Dual, size).into()
}

pub fn instance(name: &str, size: usize) -> Shape {
    Dim::new(name, DimType::Instance, size).into()
}

pub fn spatial(name: &str, size: usize) -> Shape {
    Dim::new(name, DimType::Spatial, size).into()
}

pub fn channel(name: &str, size: usize) -> Shape {
    Dim::new(name, DimType::Channel, size).into()
}

pub fn channel_items<I, S>(name: &str, items: I) -> Shape
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Dim::with_items(name, DimType::Channel, items).into()
}

// Shape merging
//
// Broadcasting two tensors means taking the union of their dimensions. A
// name shared by both must agree on type, and on size and item names where
// both define them. The result is grouped by dimension type (batch first,
// untyped last), keeping first-seen order within each group, so the set of
// names never depends on argument order.

/// Union of `shapes` as used for broadcasting.
pub fn merge_shapes(shapes: &[&Shape]) -> Result<Shape> {
    let mut merged: Vec<Dim> = Vec::new();
    for shape in shapes {
        for dim in &shape.dims {
            match merged.iter().position(|d| d.name == dim.name) {
                None => merged.push(dim.clone()),
                Some(pos) => {
                    let combined = merge_dim(&merged[pos], dim).map_err(|message| {
                        Error::shape_incompatible(message, &Shape::from_dims_unchecked(merged.clone()), shape)
                    })?;
                    merged[pos] = combined;
                }
            }
        }
    }
    merged.sort_by_key(|d| d.ty);
    Ok(Shape { dims: merged })
}

fn merge_dim(a: &Dim, b: &Dim) -> std::result::Result<Dim, String> {
    if a.ty != b.ty {
        return Err(format!(
            "dimension '{}' is {:?} in one shape and {:?} in the other",
            a.name, a.ty, b.ty
        ));
    }
    let size = match (&a.size, &b.size) {
        (DimSize::Undefined, s) | (s, DimSize::Undefined) => s.clone(),
        (x, y) if x == y => x.clone(),
        (x, y) => {
            return Err(format!("dimension '{}' has size {} and {}", a.name, x, y));
        }
    };
    let item_names = match (&a.item_names, &b.item_names) {
        (Some(x), Some(y)) if x != y => {
            return Err(format!(
                "dimension '{}' has item names {:?} and {:?}",
                a.name, x, y
            ));
        }
        (Some(x), _) | (None, Some(x)) => Some(x.clone()),
        (None, None) => None,
    };
    Ok(Dim {
        name: a.name.clone(),
        ty: a.ty,
        size,
        item_names,
    })
}

/// Shape of a stack of components with shapes `shapes` along `stack`.
///
/// `shapes` holds one entry per position of `stack` (row-major). Dimensions
/// whose size differs between components become varying along the one stack
/// dimension the sizes change with; sizes that change along several stack
/// dimensions are unsupported. Components may already be non-uniform as long
/// as they all agree on their varying sizes. Components lacking a dimension
/// are constant along it and do not constrain its size. With `stack_first`,
/// the stack dims lead the result instead of being sorted in by type.
pub fn shape_stack(stack: &Shape, shapes: &[&Shape], stack_first: bool) -> Result<Shape> {
    for shape in shapes {
        if let Some(name) = stack.names().into_iter().find(|n| shape.contains(n)) {
            return Err(Error::shape_incompatible(
                format!("cannot stack along '{name}', which components already have"),
                stack,
                shape,
            ));
        }
    }
    let mut inner: Vec<Dim> = Vec::new();
    for shape in shapes {
        for dim in &shape.dims {
            if inner.iter().any(|d| d.name == dim.name) {
                continue;
            }
            let present: Vec<&Dim> = shapes.iter().filter_map(|s| s.dim(&dim.name)).collect();
            let mut merged = dim.clone();
            let mut sizes_differ = false;
            for other in &present {
                if other.ty != merged.ty {
                    return Err(Error::shape_incompatible(
                        format!("dimension '{}' has different types across components", dim.name),
                        shapes[0],
                        shape,
                    ));
                }
                if other.size != merged.size {
                    sizes_differ = true;
                }
                if merged.item_names.is_none() {
                    merged.item_names = other.item_names.clone();
                }
            }
            if sizes_differ {
                if present.iter().any(|d| d.size.is_varying()) {
                    return Err(Error::Unsupported(format!(
                        "stacking along {} would make '{}' vary along more than one dimension",
                        stack, dim.name
                    )));
                }
                let sizes: Vec<usize> = shapes
                    .iter()
                    .map(|s| s.dim(&dim.name).and_then(Dim::fixed_size).unwrap_or(1))
                    .collect();
                merged = merged.with_size(varying_along_stack(stack, &dim.name, &sizes)?);
            }
            inner.push(merged);
        }
    }
    let mut dims = stack.dims.clone();
    if stack_first {
        inner.sort_by_key(|d| d.ty);
        dims.extend(inner);
    } else {
        dims.extend(inner);
        dims.sort_by_key(|d| d.ty);
    }
    Ok(Shape { dims })
}

/// The varying size of `name` given its size in every component of `stack`.
///
/// With several stack dims the components form a row-major grid. The sizes
/// must change along exactly one of its axes.
fn varying_along_stack(stack: &Shape, name: &str, sizes: &[usize]) -> Result<DimSize> {
    if stack.rank() == 1 {
        return Ok(DimSize::Varying {
            along: stack.dims[0].name.clone(),
            sizes: sizes.to_vec(),
        });
    }
    let extents = stack.fixed_sizes()?;
    if extents.iter().product::<usize>() != sizes.len() {
        return Err(Error::Construction(format!(
            "{} components do not fill the stack dims {}",
            sizes.len(),
            stack
        )));
    }
    let mut strides = vec![1; extents.len()];
    for k in (0..extents.len().saturating_sub(1)).rev() {
        strides[k] = strides[k + 1] * extents[k + 1];
    }
    // axes along which two neighbouring components disagree
    let changes_along: Vec<usize> = (0..extents.len())
        .filter(|&k| {
            (0..sizes.len()).any(|flat| flat / strides[k] % extents[k] > 0 && sizes[flat] != sizes[flat - strides[k]])
        })
        .collect();
    match changes_along.as_slice() {
        [k] => Ok(DimSize::Varying {
            along: stack.dims[*k].name.clone(),
            sizes: (0..extents[*k]).map(|i| sizes[i * strides[*k]]).collect(),
        }),
        _ => Err(Error::Unsupported(format!(
            "dimension '{name}' varies along several dims of {stack}, non-uniform sizes may depend on one dimension only"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xy() -> Shape {
        spatial("x", 3).concat(&batch("y", 2)).unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        assert!(spatial("x", 3).concat(&channel("x", 2)).is_err());
    }

    #[test]
    fn test_volume_and_queries() {
        let s = xy();
        assert_eq!(s.rank(), 2);
        assert_eq!(s.volume(), Some(6));
        assert_eq!(Shape::empty().volume(), Some(1));
        assert_eq!(s.index("y"), Some(1));
        assert_eq!(s.size("x"), Some(3));
        assert!(s.require("z").is_err());
    }

    #[test]
    fn test_merge_orders_batch_first() {
        let a = xy();
        let b = spatial("x", 3).concat(&channel("z", 4)).unwrap();
        let merged = merge_shapes(&[&a, &b]).unwrap();
        assert_eq!(merged.names(), vec!["y", "x", "z"]);
        let reversed = merge_shapes(&[&b, &a]).unwrap();
        assert_eq!(reversed.names(), vec!["y", "x", "z"]);
    }

    #[test]
    fn test_merge_conflicts() {
        let err = merge_shapes(&[&spatial("x", 3), &spatial("x", 4)]).unwrap_err();
        assert!(matches!(err, Error::ShapeIncompatible { .. }));
        assert!(merge_shapes(&[&spatial("x", 3), &channel("x", 3)]).is_err());
        let undefined: Shape = Dim::undefined("x", DimType::Spatial).into();
        assert_eq!(merge_shapes(&[&undefined, &spatial("x", 5)]).unwrap().size("x"), Some(5));
    }

    #[test]
    fn test_merge_item_names() {
        let named = channel_items("v", ["a", "b"]);
        let plain = channel("v", 2);
        let merged = merge_shapes(&[&plain, &named]).unwrap();
        assert_eq!(merged.dim("v").unwrap().item_names, Some(vec!["a".into(), "b".into()]));
        assert!(merge_shapes(&[&named, &channel_items("v", ["a", "c"])]).is_err());
    }

    #[test]
    fn test_shape_stack_varying() {
        let s = shape_stack(&batch("b", 2), &[&spatial("x", 2), &spatial("x", 3)], false).unwrap();
        assert_eq!(s.names(), vec!["b", "x"]);
        assert!(!s.is_uniform());
        assert_eq!(s.non_uniform_shape().names(), vec!["b"]);
        let first = s.after_gather(&Selection::new().at("b", 1)).unwrap();
        assert_eq!(first, spatial("x", 3));
    }

    #[test]
    fn test_shape_stack_rejects_existing_name() {
        let err = shape_stack(&spatial("x", 1), &[&spatial("x", 2)], false).unwrap_err();
        assert!(matches!(err, Error::ShapeIncompatible { .. }));
    }

    #[test]
    fn test_shape_stack_grid_varies_along_one_dim() {
        let grid = instance("i", 2).concat(&instance("j", 2)).unwrap();
        let (one, two) = (channel("v", 1), channel("v", 2));
        let s = shape_stack(&grid, &[&one, &two, &one, &two], true).unwrap();
        assert_eq!(s.names(), vec!["i", "j", "v"]);
        assert_eq!(
            s.dim("v").unwrap().size,
            DimSize::Varying {
                along: "j".to_string(),
                sizes: vec![1, 2]
            }
        );
        let s = shape_stack(&grid, &[&one, &one, &two, &two], true).unwrap();
        assert_eq!(s.dim("v").unwrap().size.to_string(), "[1,2]@i");
        let three = channel("v", 3);
        let err = shape_stack(&grid, &[&one, &two, &two, &three], true).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_shape_stack_of_non_uniform_components() {
        let ragged = shape_stack(&batch("b", 2), &[&spatial("x", 2), &spatial("x", 3)], false).unwrap();
        let nested = shape_stack(&instance("y", 2), &[&ragged, &ragged], false).unwrap();
        assert_eq!(nested.names(), vec!["b", "y", "x"]);
        assert_eq!(nested.dim("x").unwrap().size.to_string(), "[2,3]@b");

        let other = shape_stack(&batch("b", 2), &[&spatial("x", 4), &spatial("x", 5)], false).unwrap();
        let err = shape_stack(&instance("y", 2), &[&ragged, &other], false).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_after_gather() {
        let s = channel_items("v", ["a", "b", "c"]).concat(&spatial("x", 5)).unwrap();
        let g = s
            .after_gather(&Selection::new().range("v", 1..3).step_range("x", 0, None, 2))
            .unwrap();
        assert_eq!(g.dim("v").unwrap().item_names, Some(vec!["b".into(), "c".into()]));
        assert_eq!(g.size("x"), Some(3));
        let picked = s.after_gather(&Selection::new().item("v", "c")).unwrap();
        assert_eq!(picked.names(), vec!["x"]);
        assert!(s.after_gather(&Selection::new().at("x", 5)).is_err());
    }

    #[test]
    fn test_rename_replace() {
        let s = xy();
        assert_eq!(s.rename("x", "u").unwrap().names(), vec!["u", "y"]);
        assert!(s.rename("x", "y").is_err());
        let r = s.replace("x", &spatial("a", 1).concat(&spatial("b", 3)).unwrap()).unwrap();
        assert_eq!(r.names(), vec!["a", "b", "y"]);
    }

    #[test]
    fn test_dict_roundtrip() {
        let s = channel_items("v", ["a", "b"]).concat(&batch("b", 3)).unwrap();
        let restored = Shape::from_dict(&s.to_dict().unwrap()).unwrap();
        assert_eq!(restored, s);
    }

    #[test]
    fn test_display() {
        let s = batch("b", 2).concat(&channel_items("v", ["x", "y"])).unwrap();
        assert_eq!(format!("{s}"), "(bᵇ=2, vᶜ=x,y)");
    }
}
