// Archive - Save and load trees of tensors
//
// Binary archive format (.shpd):
//
//   magic:       [u8; 4]  = b"SHPD"
//   version:     u32 LE   = 1
//   header_len:  u64 LE
//   header:      [u8; header_len]  JSON, see `Header`
//   data:        raw little-endian array bytes, one array after another
//
// The header holds the tree skeleton with tensor slots, one spec record per
// tensor and dims/dtype/byte length per native array. Arrays are stored in
// the order `disassemble_tensors` lists them, so loading replays the specs
// against the same flat list.
//
// Usage:
//   archive::save("state.shpd", &tree)?;
//   let tree = archive::load::<CpuBackend>("state.shpd")?;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use shaped_core::{
    assemble_tensors, disassemble_tensors, flatten, leaf_paths, unflatten, Backend, DType, Error,
    HostArray, Result, Shape, Skeleton, TensorSpec, Tree,
};

// Constants

const MAGIC: &[u8; 4] = b"SHPD";
const VERSION: u32 = 1;

// Header

/// Serializable skeleton node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Missing,
    Slot,
    NativeLeaf,
    Bool { value: bool },
    Int { value: i64 },
    Float { value: f64 },
    Str { value: String },
    Layout { stack_dim: Shape, obj: Box<Node> },
    List { items: Vec<Node> },
    Tuple { items: Vec<Node> },
    Map { entries: Vec<(String, Node)> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ArrayEntry {
    dims: Vec<usize>,
    dtype: DType,
    byte_len: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Header {
    tree: Node,
    /// Path of every tensor slot, for inspection.
    paths: Vec<String>,
    specs: Vec<TensorSpec>,
    arrays: Vec<ArrayEntry>,
}

fn to_node<B: Backend>(skeleton: &Skeleton<B>) -> Result<Node> {
    Ok(match skeleton {
        Skeleton::Missing => Node::Missing,
        Skeleton::NullSlot => Node::Slot,
        Skeleton::NativeLeaf => Node::NativeLeaf,
        Skeleton::Layout { stack_dim, obj } => Node::Layout {
            stack_dim: stack_dim.clone(),
            obj: Box::new(to_node(obj)?),
        },
        Skeleton::List(items) => Node::List {
            items: items.iter().map(to_node).collect::<Result<_>>()?,
        },
        Skeleton::Tuple(items) => Node::Tuple {
            items: items.iter().map(to_node).collect::<Result<_>>()?,
        },
        Skeleton::Map(entries) => Node::Map {
            entries: entries
                .iter()
                .map(|(k, s)| Ok((k.clone(), to_node(s)?)))
                .collect::<Result<_>>()?,
        },
        Skeleton::Record { record, .. } => {
            return Err(Error::Serialization(format!(
                "record {} cannot be archived",
                record.type_name()
            )))
        }
        Skeleton::Opaque(tree) => match tree {
            Tree::Bool(v) => Node::Bool { value: *v },
            Tree::Int(v) => Node::Int { value: *v },
            Tree::Float(v) => Node::Float { value: *v },
            Tree::Str(v) => Node::Str { value: v.clone() },
            other => {
                return Err(Error::Serialization(format!(
                    "{} values cannot be archived",
                    other.kind_name()
                )))
            }
        },
    })
}

fn from_node<B: Backend>(node: &Node) -> Skeleton<B> {
    match node {
        Node::Missing => Skeleton::Missing,
        Node::Slot => Skeleton::NullSlot,
        Node::NativeLeaf => Skeleton::NativeLeaf,
        Node::Bool { value } => Skeleton::Opaque(Tree::Bool(*value)),
        Node::Int { value } => Skeleton::Opaque(Tree::Int(*value)),
        Node::Float { value } => Skeleton::Opaque(Tree::Float(*value)),
        Node::Str { value } => Skeleton::Opaque(Tree::Str(value.clone())),
        Node::Layout { stack_dim, obj } => Skeleton::Layout {
            stack_dim: stack_dim.clone(),
            obj: Box::new(from_node(obj)),
        },
        Node::List { items } => Skeleton::List(items.iter().map(from_node).collect()),
        Node::Tuple { items } => Skeleton::Tuple(items.iter().map(from_node).collect()),
        Node::Map { entries } => {
            Skeleton::Map(entries.iter().map(|(k, n)| (k.clone(), from_node(n))).collect())
        }
    }
}

// Array bytes

fn array_to_bytes(host: &HostArray) -> Result<Vec<u8>> {
    let data = &host.data;
    Ok(match host.dtype {
        DType::F16 => data
            .iter()
            .flat_map(|&v| half::f16::from_f64(v).to_le_bytes())
            .collect(),
        DType::BF16 => data
            .iter()
            .flat_map(|&v| half::bf16::from_f64(v).to_le_bytes())
            .collect(),
        DType::F32 => data.iter().flat_map(|&v| (v as f32).to_le_bytes()).collect(),
        DType::F64 => data.iter().flat_map(|&v| v.to_le_bytes()).collect(),
        DType::Bool | DType::U8 => data.iter().map(|&v| v as u8).collect(),
        DType::U32 => data.iter().flat_map(|&v| (v as u32).to_le_bytes()).collect(),
        DType::I32 => data.iter().flat_map(|&v| (v as i32).to_le_bytes()).collect(),
        DType::I64 => data.iter().flat_map(|&v| (v as i64).to_le_bytes()).collect(),
        DType::Object => {
            return Err(Error::Serialization("object arrays cannot be archived".to_string()))
        }
    })
}

fn array_from_bytes(bytes: &[u8], entry: &ArrayEntry) -> Result<HostArray> {
    let data: Vec<f64> = match entry.dtype {
        DType::F16 => bytes
            .chunks_exact(2)
            .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f64())
            .collect(),
        DType::BF16 => bytes
            .chunks_exact(2)
            .map(|c| half::bf16::from_le_bytes([c[0], c[1]]).to_f64())
            .collect(),
        DType::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        DType::F64 => bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
        DType::Bool | DType::U8 => bytes.iter().map(|&b| b as f64).collect(),
        DType::U32 => bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        DType::I32 => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
        DType::I64 => bytes
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64)
            .collect(),
        DType::Object => {
            return Err(Error::Serialization("object arrays cannot be archived".to_string()))
        }
    };
    HostArray::new(entry.dims.clone(), entry.dtype, data)
        .map_err(|e| Error::Serialization(format!("corrupt array data: {e}")))
}

// Low-level IO helpers

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_bytes(r: &mut impl Read, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

// Write archive

/// Write `tree` to `writer` in the archive format.
pub fn write_archive<B: Backend>(writer: &mut impl Write, tree: &Tree<B>) -> Result<()> {
    let (skeleton, leaves) = flatten(tree, false)?;
    let node = to_node(&skeleton)?;
    let (natives, specs) = disassemble_tensors(&leaves)?;

    let mut arrays = Vec::with_capacity(natives.len());
    let mut blobs = Vec::with_capacity(natives.len());
    for native in &natives {
        let host = B::to_host(native)?;
        let bytes = array_to_bytes(&host)?;
        arrays.push(ArrayEntry {
            dims: host.dims.clone(),
            dtype: host.dtype,
            byte_len: bytes.len() as u64,
        });
        blobs.push(bytes);
    }
    let header = Header {
        tree: node,
        paths: leaf_paths(tree),
        specs,
        arrays,
    };
    let header = serde_json::to_vec(&header)?;

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&(header.len() as u64).to_le_bytes())?;
    writer.write_all(&header)?;
    for blob in &blobs {
        writer.write_all(blob)?;
    }
    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::Serialization(format!(
            "not an archive: expected magic {:?}, got {:?}",
            MAGIC, magic
        )));
    }
    let version = read_u32(reader)?;
    if version != VERSION {
        return Err(Error::Serialization(format!(
            "unsupported archive version {version} (expected {VERSION})"
        )));
    }
    let len = read_u64(reader)? as usize;
    let header = read_bytes(reader, len)?;
    Ok(serde_json::from_slice(&header)?)
}

// Read archive

/// Read a tree previously written by [`write_archive`].
pub fn read_archive<B: Backend>(reader: &mut impl Read) -> Result<Tree<B>> {
    let header = read_header(reader)?;
    let natives = header
        .arrays
        .iter()
        .map(|entry| {
            let bytes = read_bytes(reader, entry.byte_len as usize)?;
            B::from_host(&array_from_bytes(&bytes, entry)?)
        })
        .collect::<Result<Vec<_>>>()?;
    let leaves = assemble_tensors::<B>(&header.specs, natives)?;
    unflatten(&from_node::<B>(&header.tree), leaves)
}

// Convenience

pub fn to_bytes<B: Backend>(tree: &Tree<B>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_archive(&mut buf, tree)?;
    Ok(buf)
}

pub fn from_bytes<B: Backend>(bytes: &[u8]) -> Result<Tree<B>> {
    let mut cursor = std::io::Cursor::new(bytes);
    read_archive(&mut cursor)
}

/// Save `tree` to a file.
pub fn save<B: Backend>(path: impl AsRef<Path>, tree: &Tree<B>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_archive(&mut writer, tree)?;
    writer.flush()?;
    tracing::info!(path = %path.display(), leaves = leaf_paths(tree).len(), "saved archive");
    Ok(())
}

/// Load a tree from a file written by [`save`].
pub fn load<B: Backend>(path: impl AsRef<Path>) -> Result<Tree<B>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let tree = read_archive(&mut reader)?;
    tracing::info!(path = %path.display(), leaves = leaf_paths(&tree).len(), "loaded archive");
    Ok(tree)
}

/// Paths of the tensor slots stored in an archive file, without reading the arrays.
pub fn list(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);
    Ok(read_header(&mut reader)?.paths)
}
