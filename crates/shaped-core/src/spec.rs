use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, HostArray};
use crate::error::{Error, Result};
use crate::shape::{Dim, Shape};
use crate::tensor::Tensor;

// Spec records - Tensor structure without the data
//
// A tensor is persisted as a pair: a spec record describing which
// representation produced it and how, plus the flat list of its backend
// arrays. Rebuilding replays the record, taking arrays from the front:
//
//   stack(b=2)[dense(x=2), dense(x=3)]   +   [array(2), array(3)]
//
// Non-uniform sizes are stored as sizes along their stack dim, never as
// tensors of their own. Layouts are not numeric and have no record.

/// Serializable description of a tensor's representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TensorSpec {
    /// A NativeTensor. `native_shape` lists the stored axes in array order.
    Dense { native_shape: Shape, shape: Shape },
    /// A TensorStack of the nested specs along `stack_dim`.
    Stack { stack_dim: Dim, tensors: Vec<TensorSpec> },
}

impl TensorSpec {
    /// Number of native arrays this record consumes.
    pub fn native_count(&self) -> usize {
        match self {
            TensorSpec::Dense { .. } => 1,
            TensorSpec::Stack { tensors, .. } => tensors.iter().map(TensorSpec::native_count).sum(),
        }
    }
}

/// Split `tensors` into one flat array list and one record per tensor.
pub fn disassemble_tensors<B: Backend>(tensors: &[Tensor<B>]) -> Result<(Vec<B::Native>, Vec<TensorSpec>)> {
    let mut natives = Vec::new();
    let mut specs = Vec::with_capacity(tensors.len());
    for t in tensors {
        specs.push(t.spec()?);
        natives.extend(t.natives());
    }
    Ok((natives, specs))
}

/// Inverse of [`disassemble_tensors`]. Every array must be consumed.
pub fn assemble_tensors<B: Backend>(specs: &[TensorSpec], natives: Vec<B::Native>) -> Result<Vec<Tensor<B>>> {
    let mut natives: VecDeque<B::Native> = natives.into();
    let tensors = specs
        .iter()
        .map(|s| Tensor::from_spec(s, &mut natives))
        .collect::<Result<Vec<_>>>()?;
    if !natives.is_empty() {
        return Err(Error::Serialization(format!(
            "{} native arrays left after assembling {} tensors",
            natives.len(),
            specs.len()
        )));
    }
    Ok(tensors)
}

#[derive(Serialize, Deserialize)]
struct TensorDict {
    spec: TensorSpec,
    arrays: Vec<HostArray>,
}

/// A self-contained JSON value holding the record and host copies of the arrays.
pub fn to_dict<B: Backend>(t: &Tensor<B>) -> Result<serde_json::Value> {
    let arrays = t.natives().iter().map(B::to_host).collect::<Result<Vec<_>>>()?;
    let dict = TensorDict { spec: t.spec()?, arrays };
    Ok(serde_json::to_value(dict)?)
}

pub fn from_dict<B: Backend>(value: &serde_json::Value) -> Result<Tensor<B>> {
    let dict: TensorDict = serde_json::from_value(value.clone())?;
    let natives = dict.arrays.iter().map(B::from_host).collect::<Result<Vec<_>>>()?;
    let mut tensors = assemble_tensors::<B>(std::slice::from_ref(&dict.spec), natives)?;
    tensors
        .pop()
        .ok_or_else(|| Error::Serialization("empty tensor dict".to_string()))
}
