use shaped_core::dtype::round_to_dtype;
use shaped_core::{AxisSel, Backend, BinaryOp, DType, Error, HostArray, Result, Scalar, UnaryOp};

use crate::array::CpuArray;
use crate::kernels;

// CpuBackend - Reference implementation of the Backend contract
//
// Element-wise kernels broadcast right-aligned like NumPy. Every kernel
// checks its inputs and computes the output dims first, so tracers flow
// through the same validation as real arrays and only skip the arithmetic.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuBackend;

fn any_tracer(xs: &[&CpuArray]) -> bool {
    xs.iter().any(|x| x.is_tracer())
}

impl Backend for CpuBackend {
    type Native = CpuArray;

    fn name() -> &'static str {
        "cpu"
    }

    fn staticshape(x: &CpuArray) -> Vec<usize> {
        x.dims.clone()
    }

    fn dtype(x: &CpuArray) -> DType {
        x.dtype
    }

    fn is_available(x: &CpuArray) -> bool {
        !x.is_tracer()
    }

    fn scalar(value: Scalar) -> CpuArray {
        CpuArray::from_parts(vec![], value.dtype(), vec![value.to_f64()])
    }

    fn from_host(host: &HostArray) -> Result<CpuArray> {
        CpuArray::new(host.dims.clone(), host.dtype, host.data.clone())
    }

    fn to_host(x: &CpuArray) -> Result<HostArray> {
        x.to_host()
    }

    fn binary(op: BinaryOp, a: &CpuArray, b: &CpuArray) -> Result<CpuArray> {
        let dtype = op.result_dtype(a.dtype, b.dtype)?;
        let dims = kernels::broadcast_dims(&a.dims, &b.dims)?;
        if any_tracer(&[a, b]) {
            return Ok(CpuArray::tracer(&dims, dtype));
        }
        let (va, vb) = (a.values()?, b.values()?);
        let out = kernels::strides(&dims);
        let sa = kernels::broadcast_strides(&a.dims, &dims);
        let sb = kernels::broadcast_strides(&b.dims, &dims);
        let n = dims.iter().product();
        tracing::trace!(%op, ?dims, "cpu binary");
        let data = kernels::map_positions(n, |i| {
            let x = va[kernels::source_offset(i, &out, &sa)];
            let y = vb[kernels::source_offset(i, &out, &sb)];
            round_to_dtype(op.eval(x, y), dtype)
        });
        Ok(CpuArray::from_parts(dims, dtype, data))
    }

    fn unary(op: UnaryOp, x: &CpuArray) -> Result<CpuArray> {
        let dtype = op.result_dtype(x.dtype)?;
        if x.is_tracer() {
            return Ok(CpuArray::tracer(&x.dims, dtype));
        }
        let values = x.values()?;
        let data = kernels::map_positions(values.len(), |i| round_to_dtype(op.eval(values[i], x.dtype), dtype));
        Ok(CpuArray::from_parts(x.dims.clone(), dtype, data))
    }

    fn cast(x: &CpuArray, dtype: DType) -> Result<CpuArray> {
        if dtype == DType::Object {
            return Err(Error::Unsupported("cast to object dtype".to_string()));
        }
        if dtype == x.dtype {
            return Ok(x.clone());
        }
        if x.is_tracer() {
            return Ok(CpuArray::tracer(&x.dims, dtype));
        }
        let data = x.values()?.iter().map(|v| round_to_dtype(*v, dtype)).collect();
        Ok(CpuArray::from_parts(x.dims.clone(), dtype, data))
    }

    fn transpose(x: &CpuArray, perm: &[usize]) -> Result<CpuArray> {
        let dims = kernels::transposed_dims(&x.dims, perm)?;
        if perm.iter().enumerate().all(|(i, p)| i == *p) {
            return Ok(x.clone());
        }
        if x.is_tracer() {
            return Ok(CpuArray::tracer(&dims, x.dtype));
        }
        let data = kernels::transpose(x.values()?, &x.dims, perm);
        Ok(CpuArray::from_parts(dims, x.dtype, data))
    }

    fn reshape(x: &CpuArray, dims: &[usize]) -> Result<CpuArray> {
        if dims.iter().product::<usize>() != x.elem_count() {
            return Err(Error::backend(format!("cannot reshape dims {:?} to {:?}", x.dims, dims)));
        }
        Ok(CpuArray {
            dims: dims.to_vec(),
            dtype: x.dtype,
            data: x.data.clone(),
        })
    }

    fn tile(x: &CpuArray, multiples: &[usize]) -> Result<CpuArray> {
        let dims = kernels::tiled_dims(&x.dims, multiples)?;
        if multiples.iter().all(|m| *m == 1) {
            return Ok(x.clone());
        }
        if x.is_tracer() {
            return Ok(CpuArray::tracer(&dims, x.dtype));
        }
        let data = kernels::tile(x.values()?, &x.dims, &dims);
        Ok(CpuArray::from_parts(dims, x.dtype, data))
    }

    fn stack(xs: &[CpuArray], axis: usize) -> Result<CpuArray> {
        let first = xs.first().ok_or_else(|| Error::backend("cannot stack zero arrays"))?;
        if axis > first.dims.len() {
            return Err(Error::backend(format!("stack axis {axis} out of range for rank {}", first.dims.len())));
        }
        if let Some(other) = xs.iter().find(|x| x.dims != first.dims) {
            return Err(Error::backend(format!(
                "cannot stack arrays with dims {:?} and {:?}",
                first.dims, other.dims
            )));
        }
        let expanded = xs
            .iter()
            .map(|x| {
                let mut dims = x.dims.clone();
                dims.insert(axis, 1);
                Self::reshape(x, &dims)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::concat(&expanded, axis)
    }

    fn concat(xs: &[CpuArray], axis: usize) -> Result<CpuArray> {
        let all_dims: Vec<&[usize]> = xs.iter().map(|x| x.dims.as_slice()).collect();
        let dims = kernels::concat_dims(&all_dims, axis)?;
        let dtype = xs
            .iter()
            .map(|x| x.dtype)
            .reduce(DType::promote)
            .unwrap_or(DType::F64);
        if any_tracer(&xs.iter().collect::<Vec<_>>()) {
            return Ok(CpuArray::tracer(&dims, dtype));
        }
        let cast = xs
            .iter()
            .map(|x| Self::cast(x, dtype))
            .collect::<Result<Vec<_>>>()?;
        let parts = cast
            .iter()
            .map(|x| Ok((x.values()?, x.dims.as_slice())))
            .collect::<Result<Vec<_>>>()?;
        let data = kernels::concat(&parts, axis, &dims);
        Ok(CpuArray::from_parts(dims, dtype, data))
    }

    fn multi_slice(x: &CpuArray, sel: &[AxisSel]) -> Result<CpuArray> {
        if sel.len() != x.dims.len() {
            return Err(Error::backend(format!(
                "selection of {} axes on array of rank {}",
                sel.len(),
                x.dims.len()
            )));
        }
        let mut positions = Vec::with_capacity(sel.len());
        let mut dims = Vec::new();
        for (s, size) in sel.iter().zip(&x.dims) {
            let (pos, keep) = kernels::axis_positions(s, *size)?;
            if keep {
                dims.push(pos.len());
            }
            positions.push(pos);
        }
        if x.is_tracer() {
            return Ok(CpuArray::tracer(&dims, x.dtype));
        }
        let data = kernels::gather(x.values()?, &x.dims, &positions);
        Ok(CpuArray::from_parts(dims, x.dtype, data))
    }
}
