// Integration tests for NativeTensor
//
// Construction, virtual dims, slicing, shape edits and materialization of
// single-array tensors on the CPU backend.

use shaped::prelude::*;
use shaped::{with_precision, Backend, Sel};

fn t(values: &[f64], shape: Shape) -> CpuTensor {
    tensor(values.to_vec(), shape).unwrap()
}

fn bx() -> Shape {
    batch("b", 2).concat(&spatial("x", 3)).unwrap()
}

fn assert_contained(t: &CpuTensor) {
    let n = t.as_native().expect("expected a NativeTensor");
    assert!(
        n.native_shape().is_subset_of(n.shape()),
        "native shape {} not contained in {}",
        n.native_shape(),
        n.shape()
    );
    assert_eq!(
        CpuBackend::staticshape(n.native()),
        n.native_shape().fixed_sizes().unwrap()
    );
}

// Construction

#[test]
fn test_add_scalar_tensor() -> shaped::Result<()> {
    let a = t(&[1.0, 2.0, 3.0], spatial("x", 3));
    let b = t(&[10.0], Shape::empty());
    let c = a.add(&b)?;
    assert_eq!(c.shape(), &spatial("x", 3));
    assert_eq!(c.to_vec(&["x"])?, vec![11.0, 12.0, 13.0]);
    assert_contained(&c);
    Ok(())
}

#[test]
fn test_construction_validates_native_shape() {
    let arr = CpuArray::from_slice(&[1.0, 2.0, 3.0], &[3]).unwrap();
    // wrong size
    assert!(NativeTensor::<CpuBackend>::dense(arr.clone(), spatial("x", 4)).is_err());
    // stored dim missing from the declared shape
    assert!(NativeTensor::<CpuBackend>::new(arr.clone(), spatial("x", 3), batch("b", 2)).is_err());
    // stored dim present with another size
    let err = NativeTensor::<CpuBackend>::new(arr.clone(), spatial("x", 3), spatial("x", 5));
    assert!(err.is_err());
    // virtual dims are fine
    let ok = NativeTensor::<CpuBackend>::new(arr, spatial("x", 3), bx()).unwrap();
    assert!(!ok.is_contiguous());
    assert_eq!(ok.virtual_shape(), batch("b", 2));
}

#[test]
fn test_from_native_uses_anonymous_dims() {
    let arr = CpuArray::from_slice(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
    let n = NativeTensor::<CpuBackend>::from_native(arr);
    assert_eq!(n.shape().names(), vec!["dim0", "dim1"]);
    assert_eq!(n.shape().dims()[0].ty, DimType::Untyped);
}

#[test]
fn test_typed_constructors() -> shaped::Result<()> {
    let i: CpuTensor = shaped::construct::tensor_from(&[1i64, 2, 3], spatial("x", 3))?;
    assert_eq!(i.dtype(), DType::I64);
    assert_eq!(i.to_vec(&["x"])?, vec![1.0, 2.0, 3.0]);
    let raw = CpuArray::from_vec(vec![0.5f32, 1.5], &[2])?;
    assert_eq!(raw.dtype(), DType::F32);
    assert_eq!(raw.values()?, &[0.5, 1.5]);
    let m: CpuTensor = bools(&[true, false], instance("i", 2))?;
    assert_eq!(m.dtype(), DType::Bool);
    assert!(m.any()?);
    assert!(!m.all()?);
    Ok(())
}

// Virtual dims

#[test]
fn test_constants_store_one_element() -> shaped::Result<()> {
    let z: CpuTensor = zeros(&bx())?;
    let n = z.as_native().unwrap();
    assert_eq!(n.native_shape().rank(), 0);
    assert_eq!(z.shape(), &bx());
    assert_eq!(z.to_vec(&["b", "x"])?, vec![0.0; 6]);
    Ok(())
}

#[test]
fn test_broadcast_keeps_only_variable_dims() -> shaped::Result<()> {
    let x = t(&(0..1000).map(|v| v as f64).collect::<Vec<_>>(), spatial("x", 1000));
    let big: CpuTensor = ones(&batch("b", 1000))?;
    let sum = x.add(&big)?;
    assert_eq!(sum.shape().names(), vec!["b", "x"]);
    let n = sum.as_native().unwrap();
    assert_eq!(n.native_shape(), &spatial("x", 1000));
    assert_eq!(CpuBackend::staticshape(n.native()), vec![1000]);
    assert_contained(&sum);
    Ok(())
}

#[test]
fn test_native_value_expands_on_request() -> shaped::Result<()> {
    let x = t(&[1.0, 2.0, 3.0], spatial("x", 3)).expand(&batch("b", 2))?;
    let lazy = x.native_value(&["b", "x"], false)?;
    assert_eq!(CpuBackend::staticshape(&lazy), vec![1, 3]);
    let full = x.native_value(&["b", "x"], true)?;
    assert_eq!(CpuBackend::staticshape(&full), vec![2, 3]);
    assert_eq!(full.values()?, &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    // stored dims must be part of the order
    assert!(x.native_value(&["b"], false).is_err());
    // `native` needs every declared dim
    assert!(x.native(&["x"]).is_err());
    Ok(())
}

#[test]
fn test_cached_stores_virtual_dims() -> shaped::Result<()> {
    let x = t(&[1.0, 2.0, 3.0], spatial("x", 3)).expand(&batch("b", 2))?;
    let c = x.cached()?;
    let n = c.as_native().unwrap();
    assert!(n.is_contiguous());
    assert_eq!(n.native_shape(), c.shape());
    assert_eq!(c.to_vec(&["b", "x"])?, x.to_vec(&["b", "x"])?);
    Ok(())
}

#[test]
fn test_transposed_order() -> shaped::Result<()> {
    let a = t(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], bx());
    assert_eq!(a.to_vec(&["x", "b"])?, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    Ok(())
}

// Slicing

#[test]
fn test_slice_index_and_range() -> shaped::Result<()> {
    let a = t(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], bx());
    let col = a.slice(&Selection::new().at("x", 1))?;
    assert_eq!(col.shape(), &batch("b", 2));
    assert_eq!(col.to_vec(&["b"])?, vec![1.0, 4.0]);

    let part = a.slice(&Selection::new().range("x", 1..3))?;
    assert_eq!(part.shape().size("x"), Some(2));
    assert_eq!(part.to_vec(&["b", "x"])?, vec![1.0, 2.0, 4.0, 5.0]);

    let strided = a.slice(&Selection::new().step_range("x", 0, None, 2))?;
    assert_eq!(strided.to_vec(&["b", "x"])?, vec![0.0, 2.0, 3.0, 5.0]);
    assert_contained(&strided);
    Ok(())
}

#[test]
fn test_slice_by_item_name() -> shaped::Result<()> {
    let rgb = t(&[0.1, 0.2, 0.3], channel_items("c", ["r", "g", "b"]));
    let g = rgb.slice(&Selection::new().item("c", "g"))?;
    assert_eq!(g.rank(), 0);
    assert_eq!(g.to_scalar()?, Scalar::Float(0.2));

    let gb = rgb.slice(&Selection::new().range("c", 1..3))?;
    assert_eq!(
        gb.shape().dims()[0].item_names,
        Some(vec!["g".to_string(), "b".to_string()])
    );
    assert!(rgb.slice(&Selection::new().item("c", "alpha")).is_err());
    Ok(())
}

#[test]
fn test_slice_ignores_absent_dims() -> shaped::Result<()> {
    let a = t(&[1.0, 2.0], spatial("x", 2));
    let same = a.slice(&Selection::new().at("y", 7))?;
    assert!(same.ptr_eq(&a));
    Ok(())
}

#[test]
fn test_slice_virtual_dim_narrows_shape() -> shaped::Result<()> {
    let z: CpuTensor = zeros(&bx())?;
    let narrowed = z.slice(&Selection::new().range("b", 0..1))?;
    assert_eq!(narrowed.shape().size("b"), Some(1));
    assert_contained(&narrowed);
    let dropped = z.slice(&Selection::new().with("b", Sel::Index(1)))?;
    assert_eq!(dropped.shape(), &spatial("x", 3));
    Ok(())
}

#[test]
fn test_slice_out_of_bounds() {
    let a = t(&[1.0, 2.0], spatial("x", 2));
    let err = a.slice(&Selection::new().at("x", 2)).unwrap_err();
    assert!(matches!(err, Error::IndexOutOfBounds { index: 2, size: 2, .. }));
}

#[test]
fn test_unstack_physical_and_virtual() -> shaped::Result<()> {
    let a = t(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], bx());
    let cols = a.unstack("x")?;
    assert_eq!(cols.len(), 3);
    assert_eq!(cols[2].to_vec(&["b"])?, vec![2.0, 5.0]);

    let v = t(&[1.0, 2.0, 3.0], spatial("x", 3)).expand(&batch("b", 2))?;
    let rows = v.unstack("b")?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].to_vec(&["x"])?, vec![1.0, 2.0, 3.0]);
    assert!(v.unstack("nope").is_err());
    Ok(())
}

// Shape edits

#[test]
fn test_rename_and_replace_shape() -> shaped::Result<()> {
    let a = t(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], bx());
    let r = a.rename_dim("x", "y")?;
    assert_eq!(r.shape().names(), vec!["b", "y"]);
    assert_eq!(r.shape().dim("y").unwrap().ty, DimType::Spatial);
    assert_contained(&r);

    let replaced = a.with_shape_replaced(&instance("i", 2).concat(&channel("c", 3))?)?;
    assert_eq!(replaced.shape().names(), vec!["i", "c"]);
    assert_eq!(replaced.to_vec(&["i", "c"])?, a.to_vec(&["b", "x"])?);
    assert!(a.with_shape_replaced(&spatial("x", 3)).is_err());
    Ok(())
}

#[test]
fn test_pack_and_unpack() -> shaped::Result<()> {
    let a = t(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], bx());
    let packed = a.pack_dims(&["b", "x"], Dim::undefined("p", DimType::Instance))?;
    assert_eq!(packed.shape(), &instance("p", 6));
    assert_eq!(packed.to_vec(&["p"])?, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

    let reversed = a.pack_dims(&["x", "b"], Dim::undefined("p", DimType::Instance))?;
    assert_eq!(reversed.to_vec(&["p"])?, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);

    let unpacked = packed.unpack_dim("p", &bx())?;
    assert_eq!(unpacked.shape(), &bx());
    assert_eq!(unpacked.to_vec(&["b", "x"])?, a.to_vec(&["b", "x"])?);
    assert!(packed.unpack_dim("p", &spatial("x", 5)).is_err());
    Ok(())
}

#[test]
fn test_pack_virtual_dims() -> shaped::Result<()> {
    let v = t(&[1.0, 2.0, 3.0], spatial("x", 3)).expand(&batch("b", 2))?;
    let packed = v.pack_dims(&["b", "x"], Dim::undefined("p", DimType::Instance))?;
    assert_eq!(packed.to_vec(&["p"])?, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    assert_contained(&packed);
    Ok(())
}

#[test]
fn test_pack_single_or_no_dims() -> shaped::Result<()> {
    let a = t(&[1.0, 2.0], spatial("x", 2));
    let renamed = a.pack_dims(&["x"], Dim::undefined("p", DimType::Instance))?;
    assert_eq!(renamed.shape(), &instance("p", 2));
    let expanded = a.pack_dims(&[], Dim::undefined("p", DimType::Instance))?;
    assert_eq!(expanded.shape().size("p"), Some(1));
    Ok(())
}

// Element-wise

#[test]
fn test_dtype_promotion_and_comparison() -> shaped::Result<()> {
    let i: CpuTensor = shaped::construct::tensor_from(&[1i64, 2, 3], spatial("x", 3))?;
    let half = i.div(&Tensor::from(2i64))?;
    assert_eq!(half.dtype(), DType::F64);
    assert_eq!(half.to_vec(&["x"])?, vec![0.5, 1.0, 1.5]);
    let fl = i.floor_div(&Tensor::from(2i64))?;
    assert_eq!(fl.dtype(), DType::I64);
    assert_eq!(fl.to_vec(&["x"])?, vec![0.0, 1.0, 1.0]);
    let gt = i.gt(&Tensor::from(1i64))?;
    assert_eq!(gt.dtype(), DType::Bool);
    assert_eq!(gt.to_vec(&["x"])?, vec![0.0, 1.0, 1.0]);
    Ok(())
}

#[test]
fn test_unary_ops_keep_virtual_dims() -> shaped::Result<()> {
    let v = t(&[-1.0, 4.0], spatial("x", 2)).expand(&batch("b", 3))?;
    let a = v.abs()?;
    assert_eq!(a.shape(), v.shape());
    assert_eq!(a.as_native().unwrap().native_shape(), &spatial("x", 2));
    assert_eq!(v.neg()?.to_vec(&["x", "b"])?, vec![1.0, 1.0, 1.0, -4.0, -4.0, -4.0]);
    assert_eq!(t(&[4.0, 9.0], spatial("x", 2)).sqrt()?.to_vec(&["x"])?, vec![2.0, 3.0]);
    Ok(())
}

#[test]
fn test_incompatible_sizes_fail() {
    let a = t(&[1.0, 2.0, 3.0], spatial("x", 3));
    let b = t(&[1.0, 2.0, 3.0, 4.0], spatial("x", 4));
    let err = a.add(&b).unwrap_err();
    assert!(matches!(err, Error::ShapeIncompatible { .. }));
    assert!(err.to_string().contains("'x'"));
}

#[test]
fn test_to_bool_requires_rank_zero() -> shaped::Result<()> {
    assert!(Tensor::<CpuBackend>::from(true).to_bool()?);
    assert!(!Tensor::<CpuBackend>::from(0.0).to_bool()?);
    assert!(t(&[1.0, 2.0], spatial("x", 2)).to_bool().is_err());
    Ok(())
}

#[test]
fn test_len() -> shaped::Result<()> {
    assert_eq!(t(&[1.0, 2.0, 3.0], spatial("x", 3)).len()?, 3);
    assert!(t(&[0.0; 6], bx()).len().is_err());
    Ok(())
}

// Configuration and tracers

#[test]
fn test_precision_applies_on_output() -> shaped::Result<()> {
    let a = t(&[1.0, 2.0], spatial("x", 2));
    let native = with_precision(32, || a.native(&["x"]))?;
    assert_eq!(CpuBackend::dtype(&native), DType::F32);
    assert_eq!(CpuBackend::dtype(&a.native(&["x"])?), DType::F64);
    Ok(())
}

#[test]
fn test_tracers_flow_through_ops() -> shaped::Result<()> {
    let tr = CpuArray::tracer(&[3], DType::F32);
    let x = Tensor::Native(NativeTensor::<CpuBackend>::dense(tr, spatial("x", 3))?);
    assert!(x.is_tracer());
    let y = x.add(&t(&[1.0, 2.0], batch("b", 2)))?;
    assert!(y.is_tracer());
    assert_eq!(y.shape().names(), vec!["b", "x"]);
    assert!(y.to_vec(&["b", "x"]).is_err());
    Ok(())
}
