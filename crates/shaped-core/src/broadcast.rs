use crate::backend::Backend;
use crate::error::Result;
use crate::shape::Shape;
use crate::stack::TensorStack;
use crate::tensor::Tensor;

pub use crate::shape::merge_shapes;

// Broadcast & cache
//
// Binary operations line operands up by dimension name. The joint shape is
// the merge of both shapes; the arrays handed to the backend are laid out
// along the merge of the operands' *variable* shapes only, with size-1 axes
// where an operand is constant. The backend then broadcasts those axes, so
// virtual dims are never tiled just to add two tensors:
//
//   a: shape (x=3),      stored (x=3)        -> array [3, 1]
//   b: shape (x=3, y=4), stored (y=4)        -> array [1, 4]
//   a + b: shape (x=3, y=4), stored (x=3, y=4)
//
// `cached` is the opposite direction: it stores everything a tensor
// declares, collapsing lazy stacks where possible.

/// Arrays of several tensors laid out along one shared order.
pub struct BroadcastNatives<B: Backend> {
    /// Axes of every array in `natives`.
    pub native_shape: Shape,
    /// Declared shape of the broadcast result.
    pub shape: Shape,
    pub natives: Vec<B::Native>,
}

/// Lay out the arrays of `tensors` for one element-wise kernel call.
pub fn broadcastable_native_arrays<B: Backend>(tensors: &[&Tensor<B>]) -> Result<BroadcastNatives<B>> {
    let shapes: Vec<&Shape> = tensors.iter().map(|t| t.shape()).collect();
    let shape = merge_shapes(&shapes)?;
    let variable: Vec<Shape> = tensors.iter().map(|t| variable_shape(t)).collect();
    let native_shape = merge_shapes(&variable.iter().collect::<Vec<_>>())?;
    let order = native_shape.names();
    let natives = tensors
        .iter()
        .map(|t| t.native_value(&order, false))
        .collect::<Result<Vec<_>>>()?;
    Ok(BroadcastNatives {
        native_shape,
        shape,
        natives,
    })
}

/// Store every declared dim. Calling this on a cached tensor returns an equal value.
///
/// NativeTensors become contiguous, collapsible stacks become one
/// NativeTensor, non-uniform stacks cache their components. Layouts have no
/// numeric backing and are returned as they are.
pub fn cached<B: Backend>(t: &Tensor<B>) -> Result<Tensor<B>> {
    match t {
        Tensor::Native(n) => Ok(Tensor::Native(n.cached()?)),
        Tensor::Stack(s) => match s.contiguous()? {
            Some(native) => Ok(Tensor::Native(native.cached()?)),
            None => {
                let components = s.components().iter().map(cached).collect::<Result<Vec<_>>>()?;
                Ok(Tensor::Stack(TensorStack::new(components, s.stack_dim().clone())?))
            }
        },
        Tensor::Layout(_) => Ok(t.clone()),
    }
}

/// Add the dims of `dims` that `t` lacks. Shared dims must be compatible.
pub fn expand_tensor<B: Backend>(t: &Tensor<B>, dims: &Shape) -> Result<Tensor<B>> {
    let merged = merge_shapes(&[t.shape(), dims])?;
    let new_dims = dims.without_shape(t.shape());
    if new_dims.is_empty() {
        return Ok(t.clone());
    }
    match t {
        Tensor::Native(n) => Ok(Tensor::Native(n.with_virtual_dims(merged))),
        Tensor::Stack(s) => {
            let components = s
                .components()
                .iter()
                .map(|c| expand_tensor(c, &new_dims))
                .collect::<Result<Vec<_>>>()?;
            Ok(Tensor::Stack(TensorStack::new(components, s.stack_dim().clone())?))
        }
        Tensor::Layout(l) => Ok(Tensor::Layout(l.expand(&new_dims)?)),
    }
}

/// Dims along which the value of `t` may change.
pub fn variable_shape<B: Backend>(t: &Tensor<B>) -> Shape {
    match t {
        Tensor::Native(n) => n.native_shape().clone(),
        Tensor::Stack(s) => {
            let mut names: Vec<String> = vec![s.stack_dim().name.clone()];
            for c in s.components() {
                for dim in &variable_shape(c) {
                    if !names.contains(&dim.name) {
                        names.push(dim.name.clone());
                    }
                }
            }
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            s.shape().only(&names, false)
        }
        Tensor::Layout(l) => l.shape().clone(),
    }
}

/// Whether `t` may change along any dim of `dims`.
pub fn may_vary_along<B: Backend>(t: &Tensor<B>, dims: &Shape) -> bool {
    !variable_shape(t).intersection(dims).is_empty()
}

/// Drop dims along which `t` is known to be constant.
pub fn discard_constant_dims<B: Backend>(t: &Tensor<B>) -> Result<Tensor<B>> {
    match t {
        Tensor::Native(n) => {
            let names = n.native_shape().names();
            Ok(Tensor::Native(n.with_virtual_dims(n.shape().only(&names, false))))
        }
        Tensor::Stack(s) => {
            let first = &s.components()[0];
            if s.components().iter().all(|c| c.ptr_eq(first)) {
                return discard_constant_dims(first);
            }
            let components = s
                .components()
                .iter()
                .map(discard_constant_dims)
                .collect::<Result<Vec<_>>>()?;
            Ok(Tensor::Stack(TensorStack::new(components, s.stack_dim().clone())?))
        }
        Tensor::Layout(_) => Ok(t.clone()),
    }
}

/// Dims that index into a Layout's nested structure. Empty for numeric tensors.
pub fn object_dims<B: Backend>(t: &Tensor<B>) -> Shape {
    match t {
        Tensor::Layout(l) => l.stack_shape().clone(),
        _ => Shape::empty(),
    }
}

