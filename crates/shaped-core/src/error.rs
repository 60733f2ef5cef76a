use crate::shape::Shape;

/// All errors that can occur within shaped.
///
/// Shape conflicts, dispatch failures between representations, malformed
/// constructor input and backend failures all surface through this one type,
/// so `?` works across the whole workspace.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two shapes could not be merged, or an operation needs a dimension
    /// neither operand has.
    #[error("incompatible shapes {first} and {second}: {message}")]
    ShapeIncompatible {
        message: String,
        first: Shape,
        second: Shape,
    },

    /// Neither operand of a binary operation knows how to handle the other.
    #[error("unsupported operation '{op}' between {lhs} and {rhs}")]
    UnsupportedOperation {
        op: String,
        lhs: String,
        rhs: String,
    },

    /// An internal consistency check failed. Only produced when debug checks
    /// are enabled and always raised as a panic.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Malformed input to a constructor.
    #[error("cannot construct tensor: {0}")]
    Construction(String),

    /// A configuration the engine does not support, such as sizes that vary
    /// along more than one dimension.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A named dimension was required but is not part of the shape.
    #[error("dimension '{name}' not found in {shape}")]
    DimNotFound { name: String, shape: Shape },

    /// Index selection outside of a dimension's size.
    #[error("index {index} out of bounds for dimension '{dim}' of size {size}")]
    IndexOutOfBounds {
        dim: String,
        index: usize,
        size: usize,
    },

    /// Failure reported by a backend kernel.
    #[error("backend error: {0}")]
    Backend(String),

    /// Spec records or archives that cannot be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn shape_incompatible(message: impl Into<String>, first: &Shape, second: &Shape) -> Self {
        Error::ShapeIncompatible {
            message: message.into(),
            first: first.clone(),
            second: second.clone(),
        }
    }

    pub fn backend(s: impl Into<String>) -> Self {
        Error::Backend(s.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Convenience Result type used throughout shaped.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
