use std::fmt;
use std::sync::Arc;

use shaped_core::dtype::round_to_dtype;
use shaped_core::{DType, Error, HostArray, Result, WithDType};

// CpuArray - Row-major array on the host
//
// Every element is held as f64 and rounded to the declared dtype after each
// kernel, so integer and half-precision arrays behave like their dtype while
// the kernels stay generic. The buffer is shared between clones. I64 arrays
// are therefore exact only for magnitudes up to 2^53.
//
// An array without a buffer is a tracer: a placeholder that knows its dims
// and dtype but has no values. Structural kernels on tracers produce tracers
// of the resulting shape; nothing ever reads from them.

#[derive(Clone, PartialEq)]
pub struct CpuArray {
    pub(crate) dims: Vec<usize>,
    pub(crate) dtype: DType,
    pub(crate) data: Option<Arc<Vec<f64>>>,
}

impl CpuArray {
    /// Wrap values already rounded to `dtype`.
    pub(crate) fn from_parts(dims: Vec<usize>, dtype: DType, data: Vec<f64>) -> Self {
        CpuArray {
            dims,
            dtype,
            data: Some(Arc::new(data)),
        }
    }

    pub fn new(dims: Vec<usize>, dtype: DType, data: Vec<f64>) -> Result<Self> {
        if dtype == DType::Object {
            return Err(Error::Unsupported("object arrays on the CPU backend".to_string()));
        }
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(Error::Construction(format!(
                "array with dims {:?} needs {} elements, got {}",
                dims,
                expected,
                data.len()
            )));
        }
        let data = data.into_iter().map(|v| round_to_dtype(v, dtype)).collect();
        Ok(Self::from_parts(dims, dtype, data))
    }

    /// Typed constructor, the dtype follows `T`.
    pub fn from_vec<T: WithDType>(data: Vec<T>, dims: &[usize]) -> Result<Self> {
        Self::new(dims.to_vec(), T::DTYPE, data.into_iter().map(WithDType::to_f64).collect())
    }

    pub fn from_slice<T: WithDType>(data: &[T], dims: &[usize]) -> Result<Self> {
        Self::from_vec(data.to_vec(), dims)
    }

    pub fn from_bools(data: &[bool], dims: &[usize]) -> Result<Self> {
        let data = data.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect();
        Self::new(dims.to_vec(), DType::Bool, data)
    }

    /// A placeholder without values.
    pub fn tracer(dims: &[usize], dtype: DType) -> Self {
        CpuArray {
            dims: dims.to_vec(),
            dtype,
            data: None,
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_tracer(&self) -> bool {
        self.data.is_none()
    }

    pub fn elem_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// The values in row-major order. Fails for tracers.
    pub fn values(&self) -> Result<&[f64]> {
        self.data
            .as_deref()
            .map(Vec::as_slice)
            .ok_or_else(|| Error::backend(format!("tracer array with dims {:?} has no values", self.dims)))
    }

    pub fn to_host(&self) -> Result<HostArray> {
        HostArray::new(self.dims.clone(), self.dtype, self.values()?.to_vec())
    }

    /// Whether both arrays hold the same buffer.
    pub fn shares_buffer(&self, other: &CpuArray) -> bool {
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for CpuArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            None => write!(f, "CpuArray(tracer, dims={:?}, dtype={})", self.dims, self.dtype),
            Some(data) if data.len() <= 8 => {
                write!(f, "CpuArray(dims={:?}, dtype={}, {:?})", self.dims, self.dtype, data)
            }
            Some(_) => write!(f, "CpuArray(dims={:?}, dtype={})", self.dims, self.dtype),
        }
    }
}
