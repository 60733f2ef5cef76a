use shaped_core::{Backend, DType, Dim, HostArray, Layout, NativeTensor, Result, Scalar, Shape, Tensor, Tree, WithDType};

// Constructors - Building tensors from host values
//
// Values are laid out row-major in the order of `shape`. Constant tensors
// (`zeros`, `ones`, `full`) store a single element and declare every dim of
// `shape` as virtual.

/// A float64 tensor holding `values` laid out as `shape`.
pub fn tensor<B: Backend>(values: Vec<f64>, shape: Shape) -> Result<Tensor<B>> {
    from_host(values, DType::F64, shape)
}

/// A tensor whose dtype follows the element type.
pub fn tensor_from<B: Backend, T: WithDType>(values: &[T], shape: Shape) -> Result<Tensor<B>> {
    from_host(values.iter().map(|v| WithDType::to_f64(*v)).collect(), T::DTYPE, shape)
}

pub fn bools<B: Backend>(values: &[bool], shape: Shape) -> Result<Tensor<B>> {
    let data = values.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect();
    from_host(data, DType::Bool, shape)
}

fn from_host<B: Backend>(data: Vec<f64>, dtype: DType, shape: Shape) -> Result<Tensor<B>> {
    let host = HostArray::new(shape.fixed_sizes()?, dtype, data)?;
    Ok(Tensor::Native(NativeTensor::from_host(&host, shape)?))
}

/// A tensor equal to `value` everywhere in `shape`, without storing the dims.
pub fn full<B: Backend>(value: impl Into<Scalar>, shape: &Shape) -> Result<Tensor<B>> {
    Tensor::Native(NativeTensor::scalar(value.into())).expand(shape)
}

pub fn zeros<B: Backend>(shape: &Shape) -> Result<Tensor<B>> {
    full(0.0, shape)
}

pub fn ones<B: Backend>(shape: &Shape) -> Result<Tensor<B>> {
    full(1.0, shape)
}

/// Wrap a nested value, exposing its outer nesting levels as the dims of `stack`.
pub fn layout<B: Backend>(obj: Tree<B>, stack: Shape) -> Result<Tensor<B>> {
    Layout::wrap(obj, stack)
}

/// Lazily stack `values` along a new dim.
pub fn stack<B: Backend>(values: &[Tensor<B>], dim: Dim) -> Result<Tensor<B>> {
    Tensor::stack(values, dim)
}

pub fn concat<B: Backend>(values: &[Tensor<B>], dim: &str) -> Result<Tensor<B>> {
    Tensor::concat(values, dim)
}
