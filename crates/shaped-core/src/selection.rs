use std::fmt;
use std::ops::Range;

use crate::error::{Error, Result};
use crate::shape::{Dim, Shape};

// Selection - Indexing by dimension name
//
// Tensors are sliced with a map from dimension name to a selection on that
// dimension, never with positional indices:
//
//   let sel = Selection::new().at("b", 0).range("x", 1..3).item("vector", "y");
//
// `Index` removes the dimension, `Range` narrows it, `Item` picks an entry
// by its item name and behaves like `Index` after resolution.

/// Selection along a single named dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sel {
    Index(usize),
    Range {
        start: usize,
        stop: Option<usize>,
        step: usize,
    },
    Item(String),
}

impl Sel {
    pub fn is_index(&self) -> bool {
        matches!(self, Sel::Index(_) | Sel::Item(_))
    }

    /// Clamped `(start, stop, step)` of a range selection on a dim of `size`.
    pub fn span(&self, size: usize) -> Result<(usize, usize, usize)> {
        match self {
            Sel::Range { start, stop, step } => {
                if *step == 0 {
                    return Err(Error::msg("slice step must be at least 1"));
                }
                let stop = stop.unwrap_or(size).min(size);
                Ok(((*start).min(stop), stop, *step))
            }
            Sel::Index(i) => Ok((*i, i + 1, 1)),
            Sel::Item(name) => Err(Error::msg(format!("item selection '{name}' has not been resolved"))),
        }
    }

    /// Number of entries a range selection keeps on a dim of `size`.
    pub fn range_len(&self, size: usize) -> Result<usize> {
        let (start, stop, step) = self.span(size)?;
        Ok((stop - start).div_ceil(step))
    }

    /// Positions on a dim of `size` selected by this entry.
    pub fn positions(&self, size: usize) -> Result<Vec<usize>> {
        let (start, stop, step) = self.span(size)?;
        Ok((start..stop).step_by(step).collect())
    }
}

impl fmt::Display for Sel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sel::Index(i) => write!(f, "{i}"),
            Sel::Range { start, stop, step } => {
                write!(f, "{start}:")?;
                if let Some(stop) = stop {
                    write!(f, "{stop}")?;
                }
                if *step != 1 {
                    write!(f, ":{step}")?;
                }
                Ok(())
            }
            Sel::Item(name) => write!(f, "'{name}'"),
        }
    }
}

/// Ordered map from dimension name to [`Sel`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    entries: Vec<(String, Sel)>,
}

impl Selection {
    pub fn new() -> Self {
        Selection::default()
    }

    pub fn at(self, dim: impl Into<String>, index: usize) -> Self {
        self.with(dim, Sel::Index(index))
    }

    pub fn range(self, dim: impl Into<String>, range: Range<usize>) -> Self {
        self.with(
            dim,
            Sel::Range {
                start: range.start,
                stop: Some(range.end),
                step: 1,
            },
        )
    }

    pub fn step_range(self, dim: impl Into<String>, start: usize, stop: Option<usize>, step: usize) -> Self {
        self.with(dim, Sel::Range { start, stop, step })
    }

    pub fn item(self, dim: impl Into<String>, name: impl Into<String>) -> Self {
        self.with(dim, Sel::Item(name.into()))
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, dim: impl Into<String>, sel: Sel) -> Self {
        self.insert(dim, sel);
        self
    }

    /// Set the selection for `dim`, replacing an earlier one.
    pub fn insert(&mut self, dim: impl Into<String>, sel: Sel) {
        let dim = dim.into();
        match self.entries.iter_mut().find(|(n, _)| *n == dim) {
            Some(entry) => entry.1 = sel,
            None => self.entries.push((dim, sel)),
        }
    }

    pub fn get(&self, dim: &str) -> Option<&Sel> {
        self.entries.iter().find(|(n, _)| n == dim).map(|(_, s)| s)
    }

    pub fn contains(&self, dim: &str) -> bool {
        self.get(dim).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Sel)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn without(&self, dim: &str) -> Selection {
        Selection {
            entries: self.entries.iter().filter(|(n, _)| n != dim).cloned().collect(),
        }
    }

    /// Drop entries for dimensions that `shape` does not have.
    pub fn restricted_to(&self, shape: &Shape) -> Selection {
        Selection {
            entries: self
                .entries
                .iter()
                .filter(|(n, _)| shape.contains(n))
                .cloned()
                .collect(),
        }
    }

    /// Replace item selections by indices, looking names up in `shape`.
    ///
    /// Entries for dimensions missing from `shape` are kept as they are.
    pub fn resolve_items(&self, shape: &Shape) -> Result<Selection> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for (name, sel) in &self.entries {
            let sel = match (sel, shape.dim(name)) {
                (Sel::Item(item), Some(dim)) => Sel::Index(resolve_item(dim, item, shape)?),
                _ => sel.clone(),
            };
            entries.push((name.clone(), sel));
        }
        Ok(Selection { entries })
    }
}

fn resolve_item(dim: &Dim, item: &str, shape: &Shape) -> Result<usize> {
    dim.item_index(item).ok_or_else(|| {
        Error::msg(format!(
            "dimension '{}' of {} has no item named '{}'",
            dim.name, shape, item
        ))
    })
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (name, sel)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={sel}")?;
        }
        write!(f, "]")
    }
}
