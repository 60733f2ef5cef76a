use crate::backend::{Backend, BinaryOp};
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

// Dispatch - Binary operations across representations
//
// Each representation only knows how to combine itself with some others:
//
//   NativeTensor  handles  NativeTensor
//   TensorStack   handles  NativeTensor, TensorStack
//   Layout        handles  everything
//
// `binary(a, b, op)` first asks `a` to handle `b`. If `a` answers
// `NotHandled`, `b` is asked to handle `a` with the operation mirrored, so
// the operand order of the backend kernel stays `a op b`. Only if both
// decline is the operation undefined for the pair.

/// Result of asking one operand to handle a binary operation.
#[derive(Debug)]
pub enum Handled<T> {
    Done(T),
    NotHandled,
}

/// A binary operation as seen from the operand handling it.
///
/// `swapped` means the handling operand is the right-hand side, so every
/// application puts the handler's value second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Op2 {
    pub op: BinaryOp,
    pub swapped: bool,
}

impl Op2 {
    pub fn new(op: BinaryOp) -> Self {
        Op2 { op, swapped: false }
    }

    pub fn mirrored(self) -> Self {
        Op2 {
            op: self.op,
            swapped: !self.swapped,
        }
    }

    /// Apply to natives, `own` being the handling operand's array.
    pub fn natives<B: Backend>(&self, own: &B::Native, other: &B::Native) -> Result<B::Native> {
        if self.swapped {
            B::binary(self.op, other, own)
        } else {
            B::binary(self.op, own, other)
        }
    }

    /// Apply to tensors through full dispatch.
    pub fn tensors<B: Backend>(&self, own: &Tensor<B>, other: &Tensor<B>) -> Result<Tensor<B>> {
        if self.swapped {
            binary(other, own, self.op)
        } else {
            binary(own, other, self.op)
        }
    }

    pub fn scalars(&self, own: &Scalar, other: &Scalar) -> Result<Scalar> {
        if self.swapped {
            other.binary(self.op, own)
        } else {
            own.binary(self.op, other)
        }
    }
}

/// Evaluate `lhs op rhs` by double dispatch.
pub fn binary<B: Backend>(lhs: &Tensor<B>, rhs: &Tensor<B>, op: BinaryOp) -> Result<Tensor<B>> {
    let f = Op2::new(op);
    if let Handled::Done(result) = lhs.op2(rhs, f)? {
        return Ok(result);
    }
    tracing::debug!(
        op = %op,
        lhs = %lhs.kind(),
        rhs = %rhs.kind(),
        "left operand declined, dispatching to right operand"
    );
    if let Handled::Done(result) = rhs.op2(lhs, f.mirrored())? {
        return Ok(result);
    }
    Err(Error::UnsupportedOperation {
        op: op.symbol().to_string(),
        lhs: format!("{} {}", lhs.kind(), lhs.shape()),
        rhs: format!("{} {}", rhs.kind(), rhs.shape()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirrored_scalars_keep_operand_order() {
        let f = Op2::new(BinaryOp::Sub);
        let own = Scalar::Int(10);
        let other = Scalar::Int(3);
        assert_eq!(f.scalars(&own, &other).unwrap(), Scalar::Int(7));
        assert_eq!(f.mirrored().scalars(&own, &other).unwrap(), Scalar::Int(-7));
        assert_eq!(f.mirrored().mirrored(), f);
    }
}
