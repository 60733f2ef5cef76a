use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::{BinaryOp, UnaryOp};
use crate::error::{Error, Result};

// DType - Element types of native arrays and tensors
//
// Every tensor reports a DType. Numeric kinds are ordered
//
//   Bool < Int < Float
//
// and binary operations promote to the higher kind. `Object` is the dtype
// of a Layout: its leaves are arbitrary values, not numbers.

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    U8,
    U32,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
    Object,
}

/// Coarse classification used for promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DTypeKind {
    Bool,
    Int,
    Float,
    Object,
}

impl DType {
    /// Size of one element in bytes. Object arrays have no fixed element size.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::Bool | DType::U8 => 1,
            DType::F16 | DType::BF16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
            DType::Object => 0,
        }
    }

    pub fn kind(&self) -> DTypeKind {
        match self {
            DType::Bool => DTypeKind::Bool,
            DType::U8 | DType::U32 | DType::I32 | DType::I64 => DTypeKind::Int,
            DType::F16 | DType::BF16 | DType::F32 | DType::F64 => DTypeKind::Float,
            DType::Object => DTypeKind::Object,
        }
    }

    pub fn is_float(&self) -> bool {
        self.kind() == DTypeKind::Float
    }

    pub fn is_int(&self) -> bool {
        self.kind() == DTypeKind::Int
    }

    pub fn is_bool(&self) -> bool {
        *self == DType::Bool
    }

    /// Whether this is a half-precision type (F16 or BF16).
    pub fn is_half(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, DType::U8 | DType::U32)
    }

    /// The float type with the given bit width, leaving non-float types unchanged.
    pub fn with_precision(self, bits: u8) -> DType {
        if !self.is_float() {
            return self;
        }
        match bits {
            16 => DType::F16,
            32 => DType::F32,
            _ => DType::F64,
        }
    }

    /// The smallest dtype both operands can be represented in.
    pub fn promote(self, other: DType) -> DType {
        use DTypeKind::*;
        if self == other {
            return self;
        }
        match (self.kind(), other.kind()) {
            (Object, _) | (_, Object) => DType::Object,
            (Float, Float) => {
                if self.size_in_bytes() == other.size_in_bytes() {
                    // f16 and bf16 only meet in f32
                    DType::F32
                } else if self.size_in_bytes() > other.size_in_bytes() {
                    self
                } else {
                    other
                }
            }
            (Float, _) => self,
            (_, Float) => other,
            (Int, Int) => {
                if self.is_unsigned() == other.is_unsigned() {
                    if self.size_in_bytes() >= other.size_in_bytes() {
                        self
                    } else {
                        other
                    }
                } else {
                    let (signed, unsigned) = if self.is_unsigned() { (other, self) } else { (self, other) };
                    if signed.size_in_bytes() > unsigned.size_in_bytes() {
                        signed
                    } else {
                        DType::I64
                    }
                }
            }
            (Int, _) => self,
            (_, Int) => other,
            (Bool, Bool) => DType::Bool,
        }
    }
}

/// Promote a list of dtypes. Returns `None` for an empty list.
pub fn combine_types(dtypes: &[DType]) -> Option<DType> {
    let (first, rest) = dtypes.split_first()?;
    Some(rest.iter().fold(*first, |acc, d| acc.promote(*d)))
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::Bool => "bool",
            DType::U8 => "u8",
            DType::U32 => "u32",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Object => "object",
        };
        write!(f, "{}", s)
    }
}

// WithDType - Trait that connects Rust types to the DType enum
//
// Lets backends offer typed constructors such as `from_slice::<f32>(..)`
// with the DType determined from the element type.

/// Trait implemented by Rust types that can be stored in a native array.
pub trait WithDType: Copy + Send + Sync + 'static + num_traits::NumCast + fmt::Debug {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64 (for generic numeric code).
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;
}

macro_rules! with_dtype_primitive {
    ($t:ty, $dtype:expr) => {
        impl WithDType for $t {
            const DTYPE: DType = $dtype;
            fn to_f64(self) -> f64 {
                self as f64
            }
            fn from_f64(v: f64) -> Self {
                v as $t
            }
        }
    };
}

with_dtype_primitive!(f32, DType::F32);
with_dtype_primitive!(f64, DType::F64);
with_dtype_primitive!(u8, DType::U8);
with_dtype_primitive!(u32, DType::U32);
with_dtype_primitive!(i32, DType::I32);
with_dtype_primitive!(i64, DType::I64);

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
}

/// Round a value to what `dtype` can represent.
///
/// Backends that keep every element as `f64` use this after each kernel so
/// integer and low-precision results behave like their declared dtype.
pub fn round_to_dtype(v: f64, dtype: DType) -> f64 {
    match dtype {
        DType::Bool => {
            if v != 0.0 {
                1.0
            } else {
                0.0
            }
        }
        DType::U8 => (v as u8) as f64,
        DType::U32 => (v as u32) as f64,
        DType::I32 => (v as i32) as f64,
        DType::I64 => (v as i64) as f64,
        DType::F16 => half::f16::from_f64(v).to_f64(),
        DType::BF16 => half::bf16::from_f64(v).to_f64(),
        DType::F32 => (v as f32) as f64,
        DType::F64 | DType::Object => v,
    }
}

// Scalar - A single primitive value
//
// Scalars appear as Layout leaves and as the plain-number operand of binary
// operations (`tensor + 1.0`). Arithmetic on them follows the same
// promotion rules as arrays, with exact integer arithmetic.

/// A primitive number or boolean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::Int(_) => DType::I64,
            Scalar::Float(_) => DType::F64,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match *self {
            Scalar::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Scalar::Int(i) => i as f64,
            Scalar::Float(f) => f,
        }
    }

    fn to_i64(&self) -> i64 {
        match *self {
            Scalar::Bool(b) => b as i64,
            Scalar::Int(i) => i,
            Scalar::Float(f) => f as i64,
        }
    }

    /// Build a scalar of the kind of `dtype` from an f64 value.
    pub fn from_f64(v: f64, dtype: DType) -> Scalar {
        match dtype.kind() {
            DTypeKind::Bool => Scalar::Bool(v != 0.0),
            DTypeKind::Int => Scalar::Int(v as i64),
            DTypeKind::Float | DTypeKind::Object => Scalar::Float(round_to_dtype(v, dtype)),
        }
    }

    pub fn truthy(&self) -> bool {
        self.to_f64() != 0.0
    }

    pub fn cast(&self, dtype: DType) -> Result<Scalar> {
        if dtype == DType::Object {
            return Err(Error::Unsupported(format!("cannot cast scalar {self} to object")));
        }
        Ok(Scalar::from_f64(self.to_f64(), dtype))
    }

    pub fn binary(&self, op: BinaryOp, rhs: &Scalar) -> Result<Scalar> {
        let dtype = op.result_dtype(self.dtype(), rhs.dtype())?;
        if op.is_comparison() {
            return Ok(Scalar::Bool(op.eval(self.to_f64(), rhs.to_f64()) != 0.0));
        }
        match dtype.kind() {
            DTypeKind::Bool => Ok(Scalar::Bool(op.eval(self.to_f64(), rhs.to_f64()) != 0.0)),
            DTypeKind::Int => int_binary(op, self.to_i64(), rhs.to_i64()).map(Scalar::Int),
            _ => Ok(Scalar::Float(op.eval(self.to_f64(), rhs.to_f64()))),
        }
    }

    pub fn unary(&self, op: UnaryOp) -> Result<Scalar> {
        let dtype = op.result_dtype(self.dtype())?;
        Ok(Scalar::from_f64(op.eval(self.to_f64(), self.dtype()), dtype))
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> Result<i64> {
    let zero_div = || Error::msg(format!("integer division by zero: {a} {} {b}", op.symbol()));
    Ok(match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(zero_div());
            }
            floor_div_i64(a, b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(zero_div());
            }
            a - b * floor_div_i64(a, b)
        }
        BinaryOp::Pow => a.wrapping_pow(b.clamp(0, u32::MAX as i64) as u32),
        BinaryOp::Minimum => a.min(b),
        BinaryOp::Maximum => a.max(b),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Shl => a.wrapping_shl(b.clamp(0, 63) as u32),
        BinaryOp::Shr => a.wrapping_shr(b.clamp(0, 63) as u32),
        _ => op.eval(a as f64, b as f64) as i64,
    })
}

fn floor_div_i64(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v as f64)
    }
}
