// Integration tests for Layout
//
// Arbitrary nested values exposed as tensors: inferred dims, slicing through
// the nesting, leaf-wise operations and stacking.

use std::sync::Arc;

use shaped::prelude::*;

fn ints(values: &[i64]) -> Tree<CpuBackend> {
    Tree::List(values.iter().map(|v| Tree::Int(*v)).collect())
}

/// `{"a": [1, 2], "b": [3, 4, 5]}` along channel dim `key`.
fn keyed() -> (Tree<CpuBackend>, CpuTensor) {
    let obj = Tree::Map(vec![("a".to_string(), ints(&[1, 2])), ("b".to_string(), ints(&[3, 4, 5]))]);
    let l = layout(obj.clone(), Dim::undefined("key", DimType::Channel).to_shape()).unwrap();
    (obj, l)
}

// Construction

#[test]
fn test_map_of_lists() -> shaped::Result<()> {
    let (obj, l) = keyed();
    assert_eq!(l.kind(), shaped::TensorKind::Layout);
    assert_eq!(l.dtype(), DType::Object);
    assert_eq!(l.shape().names(), vec!["key", "vector"]);
    let key = l.shape().dim("key").unwrap();
    assert_eq!(key.size, DimSize::Fixed(2));
    assert_eq!(key.item_names, Some(vec!["a".to_string(), "b".to_string()]));
    assert!(l.shape().dim("vector").unwrap().size.is_varying());
    assert!(l.native_tree()?.structurally_eq(&obj));
    Ok(())
}

#[test]
fn test_select_item_of_map() -> shaped::Result<()> {
    let (_, l) = keyed();
    let a = l.slice(&Selection::new().item("key", "a"))?;
    assert_eq!(a.len()?, 2);
    assert!(a.native_tree()?.structurally_eq(&ints(&[1, 2])));
    let b = l.slice(&Selection::new().at("key", 1))?;
    assert_eq!(b.len()?, 3);
    Ok(())
}

#[test]
fn test_select_inside_leaves() -> shaped::Result<()> {
    let (_, l) = keyed();
    let firsts = l.slice(&Selection::new().at("vector", 0))?;
    assert_eq!(firsts.shape().names(), vec!["key"]);
    assert_eq!(firsts.dtype(), DType::I64);
    let expected = Tree::Map(vec![("a".to_string(), Tree::Int(1)), ("b".to_string(), Tree::Int(3))]);
    assert!(firsts.native_tree()?.structurally_eq(&expected));
    Ok(())
}

#[test]
fn test_scalar_obj_becomes_native() -> shaped::Result<()> {
    let t: CpuTensor = layout(Tree::Float(2.5), Shape::empty())?;
    assert_eq!(t.kind(), shaped::TensorKind::Native);
    assert_eq!(t.to_scalar()?, Scalar::Float(2.5));
    Ok(())
}

#[test]
fn test_nesting_must_match_dims() {
    let obj: Tree<CpuBackend> = ints(&[1, 2]);
    let stack = instance("i", 2).concat(&instance("j", 2)).unwrap();
    let err = layout(obj.clone(), stack).unwrap_err();
    assert!(matches!(err, Error::Construction(_)));
    assert!(layout(obj, instance("i", 3)).is_err());
}

#[test]
fn test_map_keys_must_match_item_names() {
    let obj: Tree<CpuBackend> = Tree::Map(vec![("x".to_string(), Tree::Int(1))]);
    let err = layout(obj, channel_items("key", ["y"])).unwrap_err();
    assert!(matches!(err, Error::Construction(_)));
}

#[test]
fn test_numeric_layout_has_no_native() {
    let l: CpuTensor = layout(ints(&[1, 2, 3]), Dim::undefined("i", DimType::Instance).to_shape()).unwrap();
    assert_eq!(l.dtype(), DType::I64);
    assert!(matches!(l.to_vec(&["i"]).unwrap_err(), Error::Unsupported(_)));
}

// Operations

#[test]
fn test_add_number_to_every_leaf() -> shaped::Result<()> {
    let (_, l) = keyed();
    let r = l.add(&Tensor::from(1i64))?;
    assert_eq!(r.kind(), shaped::TensorKind::Layout);
    let expected = Tree::Map(vec![("a".to_string(), ints(&[2, 3])), ("b".to_string(), ints(&[4, 5, 6]))]);
    assert!(r.native_tree()?.structurally_eq(&expected));

    // same result with the number on the left
    let swapped = Tensor::from(1i64).add(&l)?;
    assert!(swapped.native_tree()?.structurally_eq(&expected));
    Ok(())
}

#[test]
fn test_leaf_order_is_kept() -> shaped::Result<()> {
    let l: CpuTensor = layout(ints(&[10, 20]), Dim::undefined("i", DimType::Instance).to_shape())?;
    let r = Tensor::from(100i64).sub(&l)?;
    assert!(r.native_tree()?.structurally_eq(&ints(&[90, 80])));
    Ok(())
}

#[test]
fn test_string_leaves() -> shaped::Result<()> {
    let words: Tree<CpuBackend> = Tree::List(vec!["x".into(), "y".into()]);
    let l = layout(words, Dim::undefined("i", DimType::Instance).to_shape())?;
    let suffix = layout(Tree::Str("!".to_string()), Shape::empty())?;
    let r = l.add(&suffix)?;
    assert!(r.native_tree()?.structurally_eq(&Tree::List(vec!["x!".into(), "y!".into()])));
    let prefixed = suffix.add(&l)?;
    assert!(prefixed.native_tree()?.structurally_eq(&Tree::List(vec!["!x".into(), "!y".into()])));
    Ok(())
}

#[test]
fn test_layout_with_numeric_tensor_along_stack_dim() -> shaped::Result<()> {
    let l: CpuTensor = layout(ints(&[1, 2, 3]), Dim::undefined("i", DimType::Instance).to_shape())?;
    let offsets = tensor(vec![10.0, 20.0, 30.0], instance("i", 3))?;
    let r = l.add(&offsets)?;
    let expected: Tree<CpuBackend> = Tree::List(vec![11.0.into(), 22.0.into(), 33.0.into()]);
    assert!(r.native_tree()?.structurally_eq(&expected));
    Ok(())
}

#[test]
fn test_elementwise_equality() -> shaped::Result<()> {
    let (_, l) = keyed();
    let (_, other) = keyed();
    assert!(l.equal(&other)?.all()?);
    let shifted = other.add(&Tensor::from(1i64))?;
    assert!(!l.equal(&shifted)?.any()?);
    assert!(l.close(&other, 0.0, 0.0, false)?);
    Ok(())
}

#[test]
fn test_objects_reject_arithmetic() {
    let obj: Tree<CpuBackend> = Tree::List(vec![Tree::Object(Arc::new("opaque"))]);
    let l = layout(obj, Dim::undefined("i", DimType::Instance).to_shape()).unwrap();
    let err = l.add(&Tensor::from(1.0)).unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation { .. }));
    // equality against a number is simply false
    assert!(!l.equal(&Tensor::from(1.0)).unwrap().any().unwrap());
}

#[test]
fn test_unary_on_leaves() -> shaped::Result<()> {
    let l: CpuTensor = layout(ints(&[-1, 2]), Dim::undefined("i", DimType::Instance).to_shape())?;
    let r = l.abs()?;
    assert!(r.native_tree()?.structurally_eq(&ints(&[1, 2])));
    Ok(())
}

// Shape manipulation

#[test]
fn test_unstack_outer_dim() -> shaped::Result<()> {
    let (_, l) = keyed();
    let parts = l.unstack("key")?;
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[1].len()?, 3);
    Ok(())
}

#[test]
fn test_expand_repeats_structure() -> shaped::Result<()> {
    let (_, l) = keyed();
    let e = l.expand(&batch("b", 2))?;
    assert_eq!(e.shape().names(), vec!["b", "key", "vector"]);
    let second = e.slice(&Selection::new().at("b", 1))?;
    assert!(second.native_tree()?.structurally_eq(&l.native_tree()?));
    Ok(())
}

#[test]
fn test_ragged_grid_varies_along_inner_dim() -> shaped::Result<()> {
    let row = || Tree::List(vec![ints(&[1]), ints(&[1, 2])]);
    let stack = Dim::undefined("i", DimType::Instance)
        .to_shape()
        .concat(&Dim::undefined("j", DimType::Instance).to_shape())?;
    let l = layout(Tree::List(vec![row(), row()]), stack.clone())?;
    assert_eq!(l.shape().names(), vec!["i", "j", "vector"]);
    assert_eq!(
        l.shape().dim("vector").unwrap().size,
        DimSize::Varying {
            along: "j".to_string(),
            sizes: vec![1, 2]
        }
    );

    let cell = l.slice(&Selection::new().at("i", 1).at("j", 1))?;
    assert!(cell.native_tree()?.structurally_eq(&ints(&[1, 2])));
    let columns = l.unstack("j")?;
    assert_eq!(columns[0].shape().size("vector"), Some(1));
    assert_eq!(columns[1].shape().size("vector"), Some(2));

    // lengths changing along both nesting dims have no single varying dim
    let skewed = Tree::List(vec![row(), Tree::List(vec![ints(&[1, 2]), ints(&[1, 2, 3])])]);
    assert!(matches!(layout(skewed, stack).unwrap_err(), Error::Unsupported(_)));
    Ok(())
}

#[test]
fn test_pack_leading_dims() -> shaped::Result<()> {
    let grid: Tree<CpuBackend> = Tree::List(vec![ints(&[1, 2]), ints(&[3, 4])]);
    let stack = Dim::undefined("i", DimType::Instance)
        .to_shape()
        .concat(&Dim::undefined("j", DimType::Instance).to_shape())?;
    let l = layout(grid, stack)?;
    let flat = l.pack_dims(&["i", "j"], Dim::undefined("p", DimType::Instance))?;
    assert_eq!(flat.shape(), &instance("p", 4));
    assert!(flat.native_tree()?.structurally_eq(&ints(&[1, 2, 3, 4])));
    assert!(l.pack_dims(&["j", "i"], Dim::undefined("p", DimType::Instance)).is_err());
    Ok(())
}

#[test]
fn test_rename_stack_dim() -> shaped::Result<()> {
    let (_, l) = keyed();
    let r = l.rename_dim("key", "name")?;
    assert_eq!(r.as_layout().unwrap().stack_shape().names(), vec!["name"]);
    Ok(())
}

// Joining

#[test]
fn test_stack_layouts_nests() -> shaped::Result<()> {
    let (_, l) = keyed();
    let (_, m) = keyed();
    let s = Tensor::stack(&[l, m], Dim::undefined("s", DimType::Batch))?;
    assert_eq!(s.kind(), shaped::TensorKind::Layout);
    assert_eq!(s.as_layout().unwrap().stack_shape().names(), vec!["s", "key"]);
    let b = s.slice(&Selection::new().at("s", 1).item("key", "b"))?;
    assert!(b.native_tree()?.structurally_eq(&ints(&[3, 4, 5])));
    Ok(())
}

#[test]
fn test_stack_mixed_with_numeric() -> shaped::Result<()> {
    let words: CpuTensor = layout(Tree::Str("w".to_string()), Shape::empty())?;
    let number = tensor(vec![1.0, 2.0], spatial("x", 2))?;
    let s = Tensor::stack(&[words, number.clone()], Dim::undefined("s", DimType::Instance))?;
    assert_eq!(s.kind(), shaped::TensorKind::Layout);
    let back = s.slice(&Selection::new().at("s", 1))?;
    assert!(back.ptr_eq(&number));
    Ok(())
}

#[test]
fn test_concat_layouts() -> shaped::Result<()> {
    let i = Dim::undefined("i", DimType::Instance).to_shape();
    let a: CpuTensor = layout(ints(&[1, 2]), i.clone())?;
    let b: CpuTensor = layout(ints(&[3]), i)?;
    let joined = Tensor::concat(&[a, b], "i")?;
    assert_eq!(joined.shape().size("i"), Some(3));
    assert!(joined.native_tree()?.structurally_eq(&ints(&[1, 2, 3])));
    Ok(())
}
