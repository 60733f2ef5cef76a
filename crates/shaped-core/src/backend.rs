use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dtype::{DType, DTypeKind, Scalar};
use crate::error::{Error, Result};

// Backend - Abstraction over the library that executes kernels
//
// The engine never touches array memory itself. Every concrete computation
// (add, transpose, stack, ...) is delegated to a Backend, which owns an opaque
// `Native` array type. Backends are plain types with associated functions,
// so `Tensor<B>` is monomorphized per backend and natives from different
// backends can never be mixed by accident.
//
// Native arrays are positional: dimension names live in the engine's Shape
// bookkeeping, the backend only ever sees axes.
//
// Availability: a backend may hand out arrays that are placeholders for a
// deferred computation (tracers). The engine must never try to read or
// collapse such arrays, so `is_available` is consulted before doing so.

/// Element-wise binary operations, including comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Minimum,
    Maximum,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Minimum => "minimum",
            BinaryOp::Maximum => "maximum",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    /// The dtype of `a op b`.
    pub fn result_dtype(&self, a: DType, b: DType) -> Result<DType> {
        if a == DType::Object || b == DType::Object {
            return Err(Error::UnsupportedOperation {
                op: self.symbol().to_string(),
                lhs: a.to_string(),
                rhs: b.to_string(),
            });
        }
        if self.is_comparison() {
            return Ok(DType::Bool);
        }
        let promoted = a.promote(b);
        if self.is_bitwise() {
            if promoted.is_float() {
                return Err(Error::UnsupportedOperation {
                    op: self.symbol().to_string(),
                    lhs: a.to_string(),
                    rhs: b.to_string(),
                });
            }
            let shift = matches!(self, BinaryOp::Shl | BinaryOp::Shr);
            return Ok(if shift && promoted.is_bool() { DType::I64 } else { promoted });
        }
        Ok(match (self, promoted.kind()) {
            (BinaryOp::Div, DTypeKind::Bool | DTypeKind::Int) => DType::F64,
            (BinaryOp::Minimum | BinaryOp::Maximum, _) => promoted,
            (_, DTypeKind::Bool) => DType::I64,
            _ => promoted,
        })
    }

    /// Evaluate the operation on two f64 values. Comparisons yield 0 or 1.
    pub fn eval(&self, a: f64, b: f64) -> f64 {
        let flag = |c: bool| if c { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::FloorDiv => (a / b).floor(),
            BinaryOp::Mod => a - b * (a / b).floor(),
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Minimum => a.min(b),
            BinaryOp::Maximum => a.max(b),
            BinaryOp::And => ((a as i64) & (b as i64)) as f64,
            BinaryOp::Or => ((a as i64) | (b as i64)) as f64,
            BinaryOp::Xor => ((a as i64) ^ (b as i64)) as f64,
            BinaryOp::Shl => (a as i64).wrapping_shl((b as i64).clamp(0, 63) as u32) as f64,
            BinaryOp::Shr => (a as i64).wrapping_shr((b as i64).clamp(0, 63) as u32) as f64,
            BinaryOp::Eq => flag(a == b),
            BinaryOp::Ne => flag(a != b),
            BinaryOp::Lt => flag(a < b),
            BinaryOp::Le => flag(a <= b),
            BinaryOp::Gt => flag(a > b),
            BinaryOp::Ge => flag(a >= b),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sign,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tanh,
    Floor,
    Ceil,
    Round,
    Not,
    IsFinite,
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Sign => "sign",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Round => "round",
            UnaryOp::Not => "not",
            UnaryOp::IsFinite => "is_finite",
        }
    }

    pub fn result_dtype(&self, dtype: DType) -> Result<DType> {
        let unsupported = || {
            Err(Error::Unsupported(format!("{} is not defined for dtype {}", self.name(), dtype)))
        };
        match (self, dtype.kind()) {
            (_, DTypeKind::Object) => unsupported(),
            (UnaryOp::IsFinite, _) => Ok(DType::Bool),
            (UnaryOp::Not, DTypeKind::Float) => unsupported(),
            (UnaryOp::Not, _) => Ok(dtype),
            (
                UnaryOp::Sqrt | UnaryOp::Exp | UnaryOp::Log | UnaryOp::Sin | UnaryOp::Cos | UnaryOp::Tanh,
                DTypeKind::Bool | DTypeKind::Int,
            ) => Ok(DType::F64),
            (UnaryOp::Neg | UnaryOp::Abs | UnaryOp::Sign, DTypeKind::Bool) => Ok(DType::I64),
            _ => Ok(dtype),
        }
    }

    /// Evaluate on one value whose dtype is `dtype`.
    pub fn eval(&self, x: f64, dtype: DType) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Floor => x.floor(),
            UnaryOp::Ceil => x.ceil(),
            UnaryOp::Round => x.round(),
            UnaryOp::Not => {
                if dtype.is_bool() {
                    if x == 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    !(x as i64) as f64
                }
            }
            UnaryOp::IsFinite => {
                if x.is_finite() {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Selection along one positional axis, used by `Backend::multi_slice`.
///
/// `Index` removes the axis, `Range` keeps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSel {
    Full,
    Index(usize),
    Range { start: usize, stop: usize, step: usize },
}

/// A dense, row-major copy of a native array on the host.
///
/// Values are widened to f64 regardless of `dtype`; `dtype` records what the
/// backend array held. 64-bit integers are exact up to 2^53 in magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostArray {
    pub dims: Vec<usize>,
    pub dtype: DType,
    pub data: Vec<f64>,
}

impl HostArray {
    pub fn new(dims: Vec<usize>, dtype: DType, data: Vec<f64>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(Error::Construction(format!(
                "host array with dims {:?} needs {} elements, got {}",
                dims,
                expected,
                data.len()
            )));
        }
        Ok(HostArray { dims, dtype, data })
    }

    pub fn scalar(value: Scalar) -> Self {
        HostArray {
            dims: vec![],
            dtype: value.dtype(),
            data: vec![value.to_f64()],
        }
    }

    pub fn elem_count(&self) -> usize {
        self.data.len()
    }
}

/// The contract every numeric backend fulfils.
///
/// All functions are associated (no `self`): a backend is a type-level
/// choice, the arrays carry all runtime state.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// Opaque array handle. Cloning must be cheap (shared buffers).
    type Native: Clone + fmt::Debug + Send + Sync + 'static;

    /// Human-readable backend name, used in error messages.
    fn name() -> &'static str;

    // ---- Introspection ----

    /// Axis sizes of the array.
    fn staticshape(x: &Self::Native) -> Vec<usize>;

    fn dtype(x: &Self::Native) -> DType;

    /// `false` for placeholders of deferred computations.
    fn is_available(x: &Self::Native) -> bool;

    // ---- Host transfer ----

    /// A rank-0 array holding `value`.
    fn scalar(value: Scalar) -> Self::Native;

    fn from_host(host: &HostArray) -> Result<Self::Native>;

    /// Copy the array to the host. Fails for unavailable arrays.
    fn to_host(x: &Self::Native) -> Result<HostArray>;

    // ---- Element-wise kernels ----

    /// `a op b` with right-aligned broadcasting of size-1 axes.
    fn binary(op: BinaryOp, a: &Self::Native, b: &Self::Native) -> Result<Self::Native>;

    fn unary(op: UnaryOp, x: &Self::Native) -> Result<Self::Native>;

    fn cast(x: &Self::Native, dtype: DType) -> Result<Self::Native>;

    // ---- Structural kernels ----

    fn transpose(x: &Self::Native, perm: &[usize]) -> Result<Self::Native>;

    fn reshape(x: &Self::Native, dims: &[usize]) -> Result<Self::Native>;

    /// Repeat the array `multiples[i]` times along axis `i`.
    fn tile(x: &Self::Native, multiples: &[usize]) -> Result<Self::Native>;

    /// Join equally-shaped arrays along a new axis.
    fn stack(xs: &[Self::Native], axis: usize) -> Result<Self::Native>;

    /// Join arrays along an existing axis.
    fn concat(xs: &[Self::Native], axis: usize) -> Result<Self::Native>;

    fn multi_slice(x: &Self::Native, sel: &[AxisSel]) -> Result<Self::Native>;

    /// Split along `axis`, removing it.
    fn unstack(x: &Self::Native, axis: usize) -> Result<Vec<Self::Native>> {
        let dims = Self::staticshape(x);
        let size = *dims.get(axis).ok_or_else(|| {
            Error::backend(format!("cannot unstack axis {axis} of array with dims {dims:?}"))
        })?;
        (0..size)
            .map(|i| {
                let mut sel = vec![AxisSel::Full; dims.len()];
                sel[axis] = AxisSel::Index(i);
                Self::multi_slice(x, &sel)
            })
            .collect()
    }

    fn ndim(x: &Self::Native) -> usize {
        Self::staticshape(x).len()
    }
}
