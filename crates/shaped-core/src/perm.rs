use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{thread_rng, Rng, SeedableRng};

use crate::backend::{Backend, HostArray};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::native::NativeTensor;
use crate::shape::{merge_shapes, Dim, DimSize, DimType, Shape};
use crate::tensor::Tensor;
use crate::tree::{flatten, unflatten, Tree};

// Permutations - Integer index tensors
//
// `random_permutation` shuffles the positions of `dims` independently for
// every entry of the remaining (batch) dims. `all_permutations` lists every
// ordering of `dims` along a new dim.
//
// `pick_random` draws entries along a dim once and applies the same picks to
// every tensor of a tree that has the dim.
//
// A permutation of one dim is a tensor of positions. Permutations of
// several dims are multi-indices: the result gets a channel dim `index`
// whose items are the permuted dim names, one coordinate per entry.

/// Name of the multi-index dim of multi-dim permutations.
pub const INDEX_DIM: &str = "index";

/// Random permutations of `dims` within `shape`, batched over the other dims of `shape`.
///
/// With a `seed` the result is reproducible.
pub fn random_permutation<B: Backend>(shape: &Shape, dims: &[&str], seed: Option<u64>) -> Result<Tensor<B>> {
    for name in dims {
        shape.require(name)?;
    }
    if !shape.is_uniform() {
        return Err(Error::Unsupported(format!("random permutations over non-uniform {shape}")));
    }
    let perm_dims = shape.only(dims, true);
    let batches = shape.without(dims);
    let n = perm_dims.volume().unwrap_or(0);
    let count = batches.volume().unwrap_or(0);
    let mut flat: Vec<usize> = Vec::with_capacity(n * count);
    match seed {
        Some(seed) => fill_shuffled(&mut StdRng::seed_from_u64(seed), n, count, &mut flat),
        None => fill_shuffled(&mut thread_rng(), n, count, &mut flat),
    }
    index_tensor(&flat, &batches.concat(&perm_dims)?, &perm_dims)
}

fn fill_shuffled<R: Rng>(rng: &mut R, n: usize, count: usize, out: &mut Vec<usize>) {
    for _ in 0..count {
        let mut perm: Vec<usize> = (0..n).collect();
        perm.shuffle(rng);
        out.extend(perm);
    }
}

/// How many entries `pick_random` draws, and along which dim they are listed.
#[derive(Debug, Clone, PartialEq)]
pub enum Picks {
    /// As many as the dim has, a shuffle when unweighted.
    All,
    /// `n` entries, listed along the picked dim.
    Count(usize),
    /// One entry per position of the given dim, listed along it instead of the picked dim.
    Along(Dim),
}

/// Pick random entries along `dim` from every tensor of `value` that has it.
///
/// Entries are drawn without replacement while the dim has enough of them
/// and cycled otherwise. `weight` is a tensor along `dim` with the relative
/// probability of each entry.
pub fn pick_random<B: Backend>(
    value: &Tree<B>,
    dim: &str,
    picks: Picks,
    weight: Option<&Tensor<B>>,
    seed: Option<u64>,
) -> Result<Tree<B>> {
    let (skeleton, leaves) = flatten(value, false)?;
    let shape = merge_shapes(&leaves.iter().map(|l| l.shape()).collect::<Vec<_>>())?;
    let picked_dim = shape.require(dim)?;
    let size = picked_dim.fixed_size().ok_or_else(|| {
        Error::Unsupported(format!("picking along non-uniform dimension '{dim}' of {shape}"))
    })?;
    let n = match &picks {
        Picks::All => size,
        Picks::Count(n) => *n,
        Picks::Along(along) => along.fixed_size().ok_or_else(|| {
            Error::Construction(format!("picks listed along '{}' need a fixed size", along.name))
        })?,
    };
    let weights = weight.map(|w| w.to_vec(&[dim])).transpose()?;
    if weights.as_ref().is_some_and(|w| w.len() != size) {
        return Err(Error::Construction(format!(
            "pick weights need {size} entries along '{dim}'"
        )));
    }
    let positions = match seed {
        Some(seed) => pick_positions(&mut StdRng::seed_from_u64(seed), size, n, weights.as_deref())?,
        None => pick_positions(&mut thread_rng(), size, n, weights.as_deref())?,
    };
    let list_dim = match picks {
        Picks::Along(along) => along,
        _ => {
            let mut list_dim = picked_dim.with_size(DimSize::Fixed(n));
            if let Some(items) = &picked_dim.item_names {
                list_dim.item_names = Some(positions.iter().map(|p| items[*p].clone()).collect());
            }
            list_dim
        }
    };
    tracing::debug!(dim, size, picks = n, "picking random entries");
    let leaves = leaves
        .into_iter()
        .map(|leaf| {
            if !leaf.shape().contains(dim) {
                return Ok(leaf);
            }
            let parts = leaf.unstack(dim)?;
            let chosen: Vec<Tensor<B>> = positions.iter().map(|p| parts[*p].clone()).collect();
            Tensor::stack(&chosen, list_dim.clone())
        })
        .collect::<Result<Vec<_>>>()?;
    unflatten(&skeleton, leaves)
}

fn pick_positions<R: Rng>(rng: &mut R, size: usize, n: usize, weights: Option<&[f64]>) -> Result<Vec<usize>> {
    if size == 0 {
        return Err(Error::Construction("cannot pick from an empty dimension".to_string()));
    }
    if n > size {
        return Ok((0..n).map(|i| i % size).collect());
    }
    match weights {
        None if n == size => {
            let mut perm: Vec<usize> = (0..size).collect();
            perm.shuffle(rng);
            Ok(perm)
        }
        None => Ok(index::sample(rng, size, n).into_vec()),
        Some(weights) => {
            let positions: Vec<usize> = (0..size).collect();
            let chosen = positions
                .choose_multiple_weighted(rng, n, |p| weights[*p])
                .map_err(|e| Error::Construction(format!("invalid pick weights: {e}")))?;
            Ok(chosen.copied().collect())
        }
    }
}

/// Every permutation of `dims`, listed along `list_dim` in lexicographic order.
pub fn all_permutations<B: Backend>(dims: &Shape, list_dim: Dim) -> Result<Tensor<B>> {
    let n = dims.volume().ok_or_else(|| {
        Error::Unsupported(format!("permutations of non-uniform {dims}"))
    })?;
    let mut flat = Vec::new();
    let mut count = 0;
    let mut perm: Vec<usize> = (0..n).collect();
    loop {
        flat.extend_from_slice(&perm);
        count += 1;
        if !next_permutation(&mut perm) {
            break;
        }
    }
    let list_dim = list_dim.with_size(DimSize::Fixed(count));
    index_tensor(&flat, &list_dim.to_shape().concat(dims)?, dims)
}

/// Advance `perm` to the next lexicographic permutation, `false` after the last.
fn next_permutation(perm: &mut [usize]) -> bool {
    let Some(i) = perm.windows(2).rposition(|w| w[0] < w[1]) else {
        return false;
    };
    let j = perm.iter().rposition(|v| *v > perm[i]).unwrap_or(i);
    perm.swap(i, j);
    perm[i + 1..].reverse();
    true
}

/// Wrap flat positions laid out as `shape`, splitting them into per-dim
/// coordinates of `perm_dims` when there is more than one.
fn index_tensor<B: Backend>(flat: &[usize], shape: &Shape, perm_dims: &Shape) -> Result<Tensor<B>> {
    if perm_dims.rank() <= 1 {
        let host = HostArray::new(
            shape.fixed_sizes()?,
            DType::I64,
            flat.iter().map(|v| *v as f64).collect(),
        )?;
        return Ok(Tensor::Native(NativeTensor::from_host(&host, shape.clone())?));
    }
    let sizes = perm_dims.fixed_sizes()?;
    let mut data = Vec::with_capacity(flat.len() * sizes.len());
    for v in flat {
        let mut rest = *v;
        let mut coords = vec![0.0; sizes.len()];
        for (k, size) in sizes.iter().enumerate().rev() {
            coords[k] = (rest % size) as f64;
            rest /= size;
        }
        data.extend(coords);
    }
    let index = Dim::with_items(INDEX_DIM, DimType::Channel, perm_dims.names());
    let shape = shape.concat(&index.to_shape())?;
    let host = HostArray::new(shape.fixed_sizes()?, DType::I64, data)?;
    Ok(Tensor::Native(NativeTensor::from_host(&host, shape)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_permutation_lexicographic() {
        let mut p = vec![0, 1, 2];
        let mut seen = vec![p.clone()];
        while next_permutation(&mut p) {
            seen.push(p.clone());
        }
        assert_eq!(
            seen,
            vec![
                vec![0, 1, 2],
                vec![0, 2, 1],
                vec![1, 0, 2],
                vec![1, 2, 0],
                vec![2, 0, 1],
                vec![2, 1, 0],
            ]
        );
    }

    #[test]
    fn test_pick_positions() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_positions(&mut rng, 3, 7, None).unwrap(), vec![0, 1, 2, 0, 1, 2, 0]);
        let mut drawn = pick_positions(&mut rng, 10, 4, None).unwrap();
        drawn.sort();
        drawn.dedup();
        assert_eq!(drawn.len(), 4);
        let weights = [0.0, 1.0, 0.0, 1.0];
        let mut weighted = pick_positions(&mut rng, 4, 2, Some(&weights)).unwrap();
        weighted.sort();
        assert_eq!(weighted, vec![1, 3]);
        assert!(pick_positions(&mut rng, 0, 1, None).is_err());
    }

    #[test]
    fn test_seeded_shuffles_repeat() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        fill_shuffled(&mut StdRng::seed_from_u64(7), 10, 3, &mut a);
        fill_shuffled(&mut StdRng::seed_from_u64(7), 10, 3, &mut b);
        assert_eq!(a, b);
        for chunk in a.chunks(10) {
            let mut sorted = chunk.to_vec();
            sorted.sort();
            assert_eq!(sorted, (0..10).collect::<Vec<_>>());
        }
    }
}
