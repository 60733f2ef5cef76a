// Integration tests for equality modes
//
// `equal` / `not_equal` under the element-wise default and inside
// by-reference and shape-and-value regions.

use shaped::prelude::*;
use shaped::{
    current_equality_mode, with_equality_by_ref, with_equality_by_shape_and_value, EqualityGuard, EqualityMode,
};

fn t(values: &[f64], shape: Shape) -> CpuTensor {
    tensor(values.to_vec(), shape).unwrap()
}

#[test]
fn test_elementwise_by_default() -> shaped::Result<()> {
    let a = t(&[1.0, 2.0, 3.0], spatial("x", 3));
    let b = t(&[1.0, 0.0, 3.0], spatial("x", 3));
    let eq = a.equal(&b)?;
    assert_eq!(eq.dtype(), DType::Bool);
    assert_eq!(eq.to_vec(&["x"])?, vec![1.0, 0.0, 1.0]);
    assert_eq!(a.not_equal(&b)?.to_vec(&["x"])?, vec![0.0, 1.0, 0.0]);
    Ok(())
}

#[test]
fn test_by_ref_compares_identity() -> shaped::Result<()> {
    let a = t(&[1.0, 2.0], spatial("x", 2));
    let same_values = t(&[1.0, 2.0], spatial("x", 2));
    let alias = a.clone();
    with_equality_by_ref(|| -> shaped::Result<()> {
        assert!(a.equal(&alias)?.to_bool()?);
        assert!(!a.equal(&same_values)?.to_bool()?);
        assert!(a.not_equal(&same_values)?.to_bool()?);
        Ok(())
    })?;
    // back to element-wise afterwards
    assert_eq!(a.equal(&same_values)?.rank(), 1);
    Ok(())
}

#[test]
fn test_shape_and_value_tolerances() -> shaped::Result<()> {
    let a = t(&[1.0, 2.0], spatial("x", 2));
    let near = t(&[1.0, 2.000001], spatial("x", 2));
    let other_shape = t(&[1.0, 2.0], spatial("y", 2));
    with_equality_by_shape_and_value(1e-5, 0.0, false, || -> shaped::Result<()> {
        assert!(a.equal(&near)?.to_bool()?);
        assert!(!a.equal(&other_shape)?.to_bool()?);
        Ok(())
    })?;
    with_equality_by_shape_and_value(0.0, 0.0, false, || -> shaped::Result<()> {
        assert!(!a.equal(&near)?.to_bool()?);
        Ok(())
    })?;
    Ok(())
}

#[test]
fn test_nan_handling() -> shaped::Result<()> {
    let a = t(&[f64::NAN, 1.0], spatial("x", 2));
    let b = t(&[f64::NAN, 1.0], spatial("x", 2));
    assert!(!a.close(&b, 0.0, 0.0, false)?);
    assert!(a.close(&b, 0.0, 0.0, true)?);
    let eq = with_equality_by_shape_and_value(0.0, 0.0, true, || a.equal(&b))?;
    assert!(eq.to_bool()?);
    Ok(())
}

#[test]
fn test_nested_regions() {
    assert_eq!(current_equality_mode(), EqualityMode::Elementwise);
    with_equality_by_ref(|| {
        assert_eq!(current_equality_mode(), EqualityMode::ByRef);
        with_equality_by_shape_and_value(0.1, 0.0, false, || {
            assert!(matches!(current_equality_mode(), EqualityMode::ShapeAndValue { .. }));
        });
        assert_eq!(current_equality_mode(), EqualityMode::ByRef);
    });
    assert_eq!(current_equality_mode(), EqualityMode::Elementwise);
}

#[test]
fn test_guard_keeps_mode_until_dropped() -> shaped::Result<()> {
    let a = t(&[1.0], spatial("x", 1));
    let guard = EqualityGuard::enter(EqualityMode::ByRef);
    assert_eq!(guard.mode(), EqualityMode::ByRef);
    assert!(a.equal(&a)?.to_bool()?);
    drop(guard);
    assert_eq!(current_equality_mode(), EqualityMode::Elementwise);
    Ok(())
}

#[test]
fn test_modes_do_not_cross_threads() {
    with_equality_by_ref(|| {
        let seen = std::thread::spawn(current_equality_mode).join().unwrap();
        assert_eq!(seen, EqualityMode::Elementwise);
    });
}

#[test]
#[should_panic(expected = "reverse order")]
fn test_leaving_out_of_order_panics() {
    let outer = EqualityGuard::enter(EqualityMode::ByRef);
    let _inner = EqualityGuard::enter(EqualityMode::Elementwise);
    drop(outer);
}
