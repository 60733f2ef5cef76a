use rayon::prelude::*;

use shaped_core::{AxisSel, Error, Result};

// Kernels - Index arithmetic over row-major buffers
//
// All kernels compute output element `i` independently from the flat input
// buffers, so each one is a map over output positions. Above
// PAR_THRESHOLD elements the map runs on the rayon pool.

/// Output size from which kernels run in parallel.
pub(crate) const PAR_THRESHOLD: usize = 1 << 14;

pub(crate) fn strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Evaluate `f` for every output position `0..n`.
pub(crate) fn map_positions<F>(n: usize, f: F) -> Vec<f64>
where
    F: Fn(usize) -> f64 + Sync + Send,
{
    if n >= PAR_THRESHOLD {
        (0..n).into_par_iter().map(f).collect()
    } else {
        (0..n).map(f).collect()
    }
}

/// Right-aligned broadcast of two dim lists. Size-1 axes stretch.
pub(crate) fn broadcast_dims(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
        let db = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(Error::backend(format!(
                    "cannot broadcast arrays with dims {a:?} and {b:?}"
                )))
            }
        };
    }
    Ok(out)
}

/// Strides of `dims` seen through the broadcast `out` dims; stretched axes get stride 0.
pub(crate) fn broadcast_strides(dims: &[usize], out: &[usize]) -> Vec<usize> {
    let own = strides(dims);
    let offset = out.len() - dims.len();
    (0..out.len())
        .map(|i| {
            if i < offset || dims[i - offset] == 1 {
                0
            } else {
                own[i - offset]
            }
        })
        .collect()
}

/// Flat input offset of flat output position `pos`.
#[inline]
pub(crate) fn source_offset(mut pos: usize, out_strides: &[usize], src_strides: &[usize]) -> usize {
    let mut offset = 0;
    for (o, s) in out_strides.iter().zip(src_strides) {
        let idx = pos / o;
        pos %= o;
        offset += idx * s;
    }
    offset
}

pub(crate) fn transposed_dims(dims: &[usize], perm: &[usize]) -> Result<Vec<usize>> {
    let mut seen = vec![false; dims.len()];
    if perm.len() != dims.len() {
        return Err(Error::backend(format!("permutation {perm:?} does not match rank {}", dims.len())));
    }
    for p in perm {
        if *p >= dims.len() || seen[*p] {
            return Err(Error::backend(format!("invalid permutation {perm:?}")));
        }
        seen[*p] = true;
    }
    Ok(perm.iter().map(|p| dims[*p]).collect())
}

pub(crate) fn transpose(data: &[f64], dims: &[usize], perm: &[usize]) -> Vec<f64> {
    let out_dims: Vec<usize> = perm.iter().map(|p| dims[*p]).collect();
    let src = strides(dims);
    let permuted: Vec<usize> = perm.iter().map(|p| src[*p]).collect();
    let out = strides(&out_dims);
    map_positions(data.len(), |i| data[source_offset(i, &out, &permuted)])
}

pub(crate) fn tiled_dims(dims: &[usize], multiples: &[usize]) -> Result<Vec<usize>> {
    if multiples.len() != dims.len() {
        return Err(Error::backend(format!(
            "tile multiples {multiples:?} do not match rank {}",
            dims.len()
        )));
    }
    Ok(dims.iter().zip(multiples).map(|(d, m)| d * m).collect())
}

pub(crate) fn tile(data: &[f64], dims: &[usize], out_dims: &[usize]) -> Vec<f64> {
    let src = strides(dims);
    let out = strides(out_dims);
    let n = out_dims.iter().product();
    map_positions(n, |mut pos| {
        let mut offset = 0;
        for k in 0..dims.len() {
            let idx = pos / out[k];
            pos %= out[k];
            offset += (idx % dims[k]) * src[k];
        }
        data[offset]
    })
}

/// Dims of concatenating arrays of `dims` along `axis`.
pub(crate) fn concat_dims(dims: &[&[usize]], axis: usize) -> Result<Vec<usize>> {
    let first = dims
        .first()
        .ok_or_else(|| Error::backend("cannot concatenate zero arrays"))?;
    if axis >= first.len() {
        return Err(Error::backend(format!("concat axis {axis} out of range for rank {}", first.len())));
    }
    let mut out = first.to_vec();
    out[axis] = 0;
    for d in dims {
        let matches = d.len() == first.len()
            && d.iter().zip(first.iter()).enumerate().all(|(i, (a, b))| i == axis || a == b);
        if !matches {
            return Err(Error::backend(format!(
                "cannot concatenate dims {d:?} and {first:?} along axis {axis}"
            )));
        }
        out[axis] += d[axis];
    }
    Ok(out)
}

pub(crate) fn concat(parts: &[(&[f64], &[usize])], axis: usize, out_dims: &[usize]) -> Vec<f64> {
    let outer: usize = out_dims[..axis].iter().product();
    let inner: usize = out_dims[axis + 1..].iter().product();
    let mut out = Vec::with_capacity(out_dims.iter().product());
    for o in 0..outer {
        for (data, dims) in parts {
            let block = dims[axis] * inner;
            out.extend_from_slice(&data[o * block..(o + 1) * block]);
        }
    }
    out
}

/// Positions kept along one axis and whether the axis survives.
pub(crate) fn axis_positions(sel: &AxisSel, size: usize) -> Result<(Vec<usize>, bool)> {
    match *sel {
        AxisSel::Full => Ok(((0..size).collect(), true)),
        AxisSel::Index(i) => {
            if i >= size {
                return Err(Error::backend(format!("index {i} out of range for axis of size {size}")));
            }
            Ok((vec![i], false))
        }
        AxisSel::Range { start, stop, step } => {
            if step == 0 {
                return Err(Error::backend("slice step must be positive"));
            }
            let stop = stop.min(size);
            Ok(((start.min(stop)..stop).step_by(step).collect(), true))
        }
    }
}

pub(crate) fn gather(data: &[f64], dims: &[usize], positions: &[Vec<usize>]) -> Vec<f64> {
    let src = strides(dims);
    let counts: Vec<usize> = positions.iter().map(Vec::len).collect();
    let out = strides(&counts);
    let n = counts.iter().product();
    map_positions(n, |mut pos| {
        let mut offset = 0;
        for k in 0..dims.len() {
            let idx = pos / out[k];
            pos %= out[k];
            offset += positions[k][idx] * src[k];
        }
        data[offset]
    })
}
