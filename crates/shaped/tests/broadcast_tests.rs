// Integration tests for shape merging and broadcasting
//
// Merge rules, argument-order independence, caching and the constant-dim
// helpers shared by all representations.

use shaped::construct::stack;
use shaped::prelude::*;
use shaped::{
    broadcastable_native_arrays, cached, discard_constant_dims, may_vary_along, merge_shapes, object_dims,
    shape_stack, variable_shape,
};

fn t(values: &[f64], shape: Shape) -> CpuTensor {
    tensor(values.to_vec(), shape).unwrap()
}

// Merging shapes

#[test]
fn test_merge_groups_by_type() -> shaped::Result<()> {
    let a = spatial("x", 3).concat(&batch("y", 2))?;
    let b = spatial("x", 3).concat(&channel("z", 4))?;
    let merged = merge_shapes(&[&a, &b])?;
    assert_eq!(merged.names(), vec!["y", "x", "z"]);
    Ok(())
}

#[test]
fn test_merge_conflicting_sizes() {
    let err = merge_shapes(&[&spatial("x", 3), &spatial("x", 4)]).unwrap_err();
    assert!(matches!(err, Error::ShapeIncompatible { .. }));
    // same name, different type
    assert!(merge_shapes(&[&spatial("x", 3), &batch("x", 3)]).is_err());
    // item names have to agree where both define them
    assert!(merge_shapes(&[&channel_items("c", ["a", "b"]), &channel_items("c", ["a", "c"])]).is_err());
}

#[test]
fn test_merge_is_order_independent_as_a_set() -> shaped::Result<()> {
    let a = spatial("x", 3).concat(&instance("i", 2))?;
    let b = spatial("y", 4).concat(&batch("b", 5))?;
    let ab = merge_shapes(&[&a, &b])?;
    let ba = merge_shapes(&[&b, &a])?;
    assert!(ab.is_subset_of(&ba) && ba.is_subset_of(&ab));
    assert_eq!(ab.names()[0], "b");
    Ok(())
}

#[test]
fn test_undefined_sizes_merge() -> shaped::Result<()> {
    let open = Dim::undefined("x", DimType::Spatial).to_shape();
    let merged = merge_shapes(&[&open, &spatial("x", 7)])?;
    assert_eq!(merged.size("x"), Some(7));
    Ok(())
}

#[test]
fn test_shape_stack_varying() -> shaped::Result<()> {
    let stacked = shape_stack(&batch("b", 2), &[&spatial("x", 2), &spatial("x", 3)], false)?;
    assert_eq!(stacked.names(), vec!["b", "x"]);
    assert!(!stacked.is_uniform());
    assert_eq!(stacked.non_uniform_shape(), batch("b", 2));
    // with two stack dims the sizes follow the one they change along
    let two = batch("b", 1).concat(&batch("c", 2))?;
    let grid = shape_stack(&two, &[&spatial("x", 2), &spatial("x", 3)], false)?;
    assert_eq!(grid.dim("x").unwrap().size.to_string(), "[2,3]@c");
    let square = batch("b", 2).concat(&batch("c", 2))?;
    assert!(shape_stack(&square, &[&spatial("x", 2), &spatial("x", 3)], false).is_err());
    Ok(())
}

// Broadcasting operations

#[test]
fn test_scalar_and_vector() -> shaped::Result<()> {
    let x = t(&[1.0, 2.0, 3.0], spatial("x", 3));
    let y = t(&[10.0, 20.0], batch("y", 2));
    let r = x.add(&y)?;
    assert_eq!(r.shape().names(), vec!["y", "x"]);
    assert_eq!(r.to_vec(&["y", "x"])?, vec![11.0, 12.0, 13.0, 21.0, 22.0, 23.0]);
    Ok(())
}

#[test]
fn test_binary_ops_commute_on_dims() -> shaped::Result<()> {
    let x = t(&[1.0, 2.0, 3.0], spatial("x", 3));
    let y = t(&[10.0, 20.0], spatial("y", 2));
    let xy = x.add(&y)?;
    let yx = y.add(&x)?;
    assert_eq!(xy.shape().names(), vec!["x", "y"]);
    assert_eq!(yx.shape().names(), vec!["y", "x"]);
    assert!(xy.close(&yx, 0.0, 0.0, false)?);
    assert_eq!(xy.to_vec(&["y", "x"])?, yx.to_vec(&["y", "x"])?);
    Ok(())
}

#[test]
fn test_broadcastable_natives() -> shaped::Result<()> {
    let x = t(&[1.0, 2.0, 3.0], spatial("x", 3));
    let c: CpuTensor = full(4.0, &batch("b", 10))?;
    let b = broadcastable_native_arrays(&[&x, &c])?;
    assert_eq!(b.shape.names(), vec!["b", "x"]);
    assert_eq!(b.native_shape, spatial("x", 3));
    assert_eq!(b.natives[0].dims(), &[3]);
    assert_eq!(b.natives[1].dims(), &[1]);
    Ok(())
}

#[test]
fn test_expand_is_virtual() -> shaped::Result<()> {
    let x = t(&[1.0, 2.0], spatial("x", 2));
    let e = x.expand(&batch("b", 1000).concat(&spatial("x", 2))?)?;
    assert_eq!(e.shape().names(), vec!["b", "x"]);
    assert_eq!(e.as_native().unwrap().native_shape(), &spatial("x", 2));
    assert!(x.expand(&spatial("x", 3)).is_err());
    Ok(())
}

// Caching and constant dims

#[test]
fn test_cached_is_idempotent() -> shaped::Result<()> {
    let lazy = t(&[1.0, 2.0], spatial("x", 2)).expand(&batch("b", 2))?;
    let ragged = stack(
        &[t(&[1.0], spatial("x", 1)), t(&[2.0, 3.0], spatial("x", 2))],
        Dim::undefined("b", DimType::Batch),
    )?;
    let uniform = stack(
        &[t(&[1.0], Shape::empty()), t(&[2.0], Shape::empty())],
        Dim::undefined("b", DimType::Batch),
    )?;
    let words = layout(Tree::List(vec!["a".into(), "b".into()]), instance("i", 2))?;
    for v in [lazy, ragged, uniform, words] {
        let once = cached(&v)?;
        let twice = cached(&once)?;
        assert_eq!(once.kind(), twice.kind());
        assert_eq!(once.shape(), twice.shape());
        assert!(once.close(&twice, 0.0, 0.0, false)?);
        assert!(once.close(&v, 0.0, 0.0, false)?);
    }
    Ok(())
}

#[test]
fn test_cached_collapses_uniform_stack() -> shaped::Result<()> {
    let uniform = stack(
        &[t(&[1.0, 2.0], spatial("x", 2)), t(&[3.0, 4.0], spatial("x", 2))],
        Dim::undefined("b", DimType::Batch),
    )?;
    let c = uniform.cached()?;
    assert_eq!(c.kind(), shaped::TensorKind::Native);
    assert_eq!(c.to_vec(&["b", "x"])?, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn test_variable_shape() -> shaped::Result<()> {
    let lazy = t(&[1.0, 2.0], spatial("x", 2)).expand(&batch("b", 4))?;
    assert_eq!(variable_shape(&lazy), spatial("x", 2));
    assert!(may_vary_along(&lazy, &spatial("x", 2)));
    assert!(!may_vary_along(&lazy, &batch("b", 4)));

    let s = stack(&[lazy.clone(), lazy], Dim::undefined("k", DimType::Instance))?;
    assert_eq!(variable_shape(&s).names(), vec!["k", "x"]);
    Ok(())
}

#[test]
fn test_discard_constant_dims() -> shaped::Result<()> {
    let lazy = t(&[1.0, 2.0], spatial("x", 2)).expand(&batch("b", 4))?;
    let d = discard_constant_dims(&lazy)?;
    assert_eq!(d.shape(), &spatial("x", 2));

    let x = t(&[1.0, 2.0], spatial("x", 2));
    let repeated = stack(&[x.clone(), x.clone(), x], Dim::undefined("k", DimType::Instance))?;
    assert_eq!(discard_constant_dims(&repeated)?.shape(), &spatial("x", 2));
    Ok(())
}

#[test]
fn test_object_dims() -> shaped::Result<()> {
    let words: CpuTensor = layout(Tree::List(vec!["a".into(), "b".into()]), instance("i", 2))?;
    assert_eq!(object_dims(&words), instance("i", 2));
    let x = t(&[1.0], spatial("x", 1));
    assert!(object_dims(&x).is_empty());
    Ok(())
}
