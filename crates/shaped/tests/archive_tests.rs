// Integration tests for spec records and archives
//
// Disassembling tensors into records plus flat arrays, JSON dicts, and the
// binary archive round trip for whole trees.

use std::collections::VecDeque;
use std::sync::Arc;

use half::f16;
use shaped::archive;
use shaped::construct::stack;
use shaped::prelude::*;
use shaped::{assemble_tensors, disassemble_tensors, from_dict, to_dict, TensorSpec};

fn t(values: &[f64], shape: Shape) -> CpuTensor {
    tensor(values.to_vec(), shape).unwrap()
}

fn ragged() -> CpuTensor {
    stack(
        &[t(&[1.0, 2.0], spatial("x", 2)), t(&[3.0, 4.0, 5.0], spatial("x", 3))],
        Dim::undefined("b", DimType::Batch),
    )
    .unwrap()
}

fn sample_tree() -> Tree<CpuBackend> {
    let lazy = t(&[1.0, 2.0, 3.0], spatial("x", 3)).expand(&batch("b", 4)).unwrap();
    let words = layout(
        Tree::Map(vec![("lr".to_string(), Tree::Float(0.5)), ("w".to_string(), Tree::Tensor(lazy.clone()))]),
        Dim::undefined("key", DimType::Channel).to_shape(),
    )
    .unwrap();
    Tree::Map(vec![
        ("lazy".to_string(), Tree::Tensor(lazy)),
        ("ragged".to_string(), Tree::Tensor(ragged())),
        ("config".to_string(), Tree::Tensor(words)),
        ("name".to_string(), Tree::Str("run-1".to_string())),
        ("step".to_string(), Tree::Int(12)),
        ("flag".to_string(), Tree::Bool(true)),
        ("none".to_string(), Tree::None),
        ("pair".to_string(), Tree::Tuple(vec![Tree::Float(1.5), Tree::Tensor(t(&[7.0], Shape::empty()))])),
        (
            "raw".to_string(),
            Tree::Native(CpuArray::from_slice(&[1i32, 2, 3, 4], &[2, 2]).unwrap()),
        ),
    ])
}

// Spec records

#[test]
fn test_dense_spec_keeps_virtual_dims() -> shaped::Result<()> {
    let lazy = t(&[1.0, 2.0], spatial("x", 2)).expand(&batch("b", 3))?;
    let spec = lazy.spec()?;
    assert_eq!(
        spec,
        TensorSpec::Dense {
            native_shape: spatial("x", 2),
            shape: lazy.shape().clone(),
        }
    );
    assert_eq!(spec.native_count(), 1);
    Ok(())
}

#[test]
fn test_disassemble_assemble() -> shaped::Result<()> {
    let tensors = vec![t(&[1.0, 2.0], spatial("x", 2)), ragged()];
    let (natives, specs) = disassemble_tensors(&tensors)?;
    assert_eq!(natives.len(), 3);
    assert_eq!(specs[1].native_count(), 2);
    let rebuilt = assemble_tensors::<CpuBackend>(&specs, natives)?;
    assert_eq!(rebuilt.len(), 2);
    assert_eq!(rebuilt[1].kind(), shaped::TensorKind::Stack);
    for (a, b) in rebuilt.iter().zip(&tensors) {
        assert_eq!(a.shape(), b.shape());
        assert!(a.close(b, 0.0, 0.0, false)?);
    }
    Ok(())
}

#[test]
fn test_assemble_checks_array_count() -> shaped::Result<()> {
    let tensors = vec![ragged()];
    let (mut natives, specs) = disassemble_tensors(&tensors)?;
    let extra = natives[0].clone();
    natives.push(extra);
    assert!(matches!(
        assemble_tensors::<CpuBackend>(&specs, natives.clone()).unwrap_err(),
        Error::Serialization(_)
    ));
    natives.truncate(1);
    assert!(assemble_tensors::<CpuBackend>(&specs, natives).is_err());
    Ok(())
}

#[test]
fn test_with_natives_replaced() -> shaped::Result<()> {
    let s = ragged();
    let mut doubled: VecDeque<CpuArray> = s
        .natives()
        .iter()
        .map(|n| {
            let values: Vec<f64> = n.values().unwrap().iter().map(|v| v * 2.0).collect();
            CpuArray::from_vec(values, n.dims()).unwrap()
        })
        .collect();
    let replaced = s.with_natives_replaced(&mut doubled)?;
    assert!(doubled.is_empty());
    assert_eq!(replaced.shape(), s.shape());
    assert_eq!(replaced.unstack("b")?[1].to_vec(&["x"])?, vec![6.0, 8.0, 10.0]);
    Ok(())
}

#[test]
fn test_layout_has_no_spec() {
    let l: CpuTensor = layout(Tree::List(vec!["a".into()]), instance("i", 1)).unwrap();
    assert!(matches!(l.spec().unwrap_err(), Error::Unsupported(_)));
    assert!(l.natives().is_empty());
}

#[test]
fn test_dict_roundtrip() -> shaped::Result<()> {
    let s = ragged();
    let dict = to_dict(&s)?;
    assert_eq!(dict["spec"]["type"], "stack");
    let json = serde_json::to_string(&dict)?;
    let parsed: serde_json::Value = serde_json::from_str(&json)?;
    let back: CpuTensor = from_dict(&parsed)?;
    assert_eq!(back.shape(), s.shape());
    assert!(back.close(&s, 0.0, 0.0, false)?);
    Ok(())
}

// Archives

#[test]
fn test_archive_bytes_roundtrip() -> shaped::Result<()> {
    let tree = sample_tree();
    let bytes = archive::to_bytes(&tree)?;
    assert_eq!(&bytes[..4], b"SHPD");
    let back: Tree<CpuBackend> = archive::from_bytes(&bytes)?;
    assert!(back.structurally_eq(&tree));

    let Tree::Map(entries) = &back else {
        panic!("expected a map");
    };
    let Tree::Tensor(lazy) = &entries[0].1 else {
        panic!("expected a tensor");
    };
    // virtual dims survive the round trip
    assert_eq!(lazy.as_native().unwrap().native_shape(), &spatial("x", 3));
    let Tree::Tensor(config) = &entries[2].1 else {
        panic!("expected a layout");
    };
    assert_eq!(config.kind(), shaped::TensorKind::Layout);
    let Tree::Native(raw) = &entries[8].1 else {
        panic!("expected a raw array");
    };
    assert_eq!(raw.dtype(), DType::I32);
    Ok(())
}

#[test]
fn test_archive_keeps_half_precision() -> shaped::Result<()> {
    let values = [f16::from_f32(0.5), f16::from_f32(-1.25)];
    let h: CpuTensor = shaped::construct::tensor_from(&values, spatial("x", 2))?;
    let tree = Tree::Tensor(h);
    let back: Tree<CpuBackend> = archive::from_bytes(&archive::to_bytes(&tree)?)?;
    let Tree::Tensor(h) = back else {
        panic!("expected a tensor");
    };
    assert_eq!(h.dtype(), DType::F16);
    assert_eq!(h.to_vec(&["x"])?, vec![0.5, -1.25]);
    Ok(())
}

#[test]
fn test_archive_keeps_exact_integer_range() -> shaped::Result<()> {
    let limit = 1i64 << 53;
    let ids: CpuTensor = shaped::construct::tensor_from(&[limit, -limit, 7], instance("i", 3))?;
    let back: Tree<CpuBackend> = archive::from_bytes(&archive::to_bytes(&Tree::Tensor(ids))?)?;
    let Tree::Tensor(ids) = back else {
        panic!("expected a tensor");
    };
    assert_eq!(ids.dtype(), DType::I64);
    let values: Vec<i64> = ids.to_vec(&["i"])?.into_iter().map(|v| v as i64).collect();
    assert_eq!(values, vec![limit, -limit, 7]);
    Ok(())
}

#[test]
fn test_archive_rejects_bad_input() {
    let tree: Tree<CpuBackend> = Tree::Tensor(t(&[1.0, 2.0], spatial("x", 2)));
    let bytes = archive::to_bytes(&tree).unwrap();

    let mut wrong_magic = bytes.clone();
    wrong_magic[0] = b'X';
    assert!(matches!(
        archive::from_bytes::<CpuBackend>(&wrong_magic).unwrap_err(),
        Error::Serialization(_)
    ));

    let mut wrong_version = bytes.clone();
    wrong_version[4] = 99;
    assert!(archive::from_bytes::<CpuBackend>(&wrong_version).is_err());

    let truncated = &bytes[..bytes.len() - 3];
    assert!(archive::from_bytes::<CpuBackend>(truncated).is_err());
}

#[test]
fn test_archive_rejects_unserializable_leaves() {
    let object: Tree<CpuBackend> = Tree::List(vec![Tree::Object(Arc::new(3u8))]);
    assert!(matches!(archive::to_bytes(&object).unwrap_err(), Error::Serialization(_)));
}

#[test]
fn test_save_load_and_list() -> shaped::Result<()> {
    let path = std::env::temp_dir().join(format!("shaped_archive_test_{}.shpd", std::process::id()));
    let tree = sample_tree();
    archive::save(&path, &tree)?;

    let paths = archive::list(&path)?;
    assert_eq!(paths, vec!["lazy", "ragged", "config.w", "pair[1]", "raw"]);

    let back: Tree<CpuBackend> = archive::load(&path)?;
    assert!(back.structurally_eq(&tree));
    std::fs::remove_file(&path)?;

    assert!(archive::load::<CpuBackend>(&path).is_err());
    Ok(())
}
