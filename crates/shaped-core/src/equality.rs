use std::cell::RefCell;
use std::marker::PhantomData;

// Equality modes
//
// `a.equal(&b)` normally compares element-wise and returns a boolean tensor.
// Code that treats tensors as plain values (caches keyed by tensors, tree
// comparisons) needs a different meaning for a while:
//
//   ByRef          - the same tensor object, nothing else
//   ShapeAndValue  - same dimensions and values within tolerances
//
// Modes live on a per-thread stack. Entering pushes a frame, the guard pops
// it and asserts it pops the frame it pushed, so regions must nest strictly.
// The guard is `!Send`, a mode can never leak into another thread.

/// Meaning of `==` / `!=` on tensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EqualityMode {
    Elementwise,
    ByRef,
    ShapeAndValue {
        rel_tolerance: f64,
        abs_tolerance: f64,
        equal_nan: bool,
    },
}

thread_local! {
    static EQUALITY_STACK: RefCell<Vec<EqualityMode>> = const { RefCell::new(Vec::new()) };
}

/// The innermost active mode, `Elementwise` outside of any region.
pub fn current_equality_mode() -> EqualityMode {
    EQUALITY_STACK.with(|s| s.borrow().last().copied().unwrap_or(EqualityMode::Elementwise))
}

/// Keeps a mode active until dropped.
#[must_use = "the equality mode is popped as soon as the guard is dropped"]
pub struct EqualityGuard {
    depth: usize,
    mode: EqualityMode,
    _not_send: PhantomData<*const ()>,
}

impl EqualityGuard {
    pub fn enter(mode: EqualityMode) -> Self {
        let depth = EQUALITY_STACK.with(|s| {
            let mut stack = s.borrow_mut();
            stack.push(mode);
            stack.len()
        });
        tracing::trace!(?mode, depth, "enter equality mode");
        EqualityGuard {
            depth,
            mode,
            _not_send: PhantomData,
        }
    }

    pub fn mode(&self) -> EqualityMode {
        self.mode
    }
}

impl Drop for EqualityGuard {
    fn drop(&mut self) {
        let popped = EQUALITY_STACK.with(|s| {
            let mut stack = s.borrow_mut();
            let depth = stack.len();
            (depth, stack.pop())
        });
        tracing::trace!(mode = ?self.mode, depth = self.depth, "leave equality mode");
        if std::thread::panicking() {
            return;
        }
        assert!(
            popped.0 == self.depth && popped.1 == Some(self.mode),
            "equality modes must be left in reverse order of entering"
        );
    }
}

/// Run `f` with `==` comparing tensor identity.
pub fn with_equality_by_ref<F, T>(f: F) -> T
where
    F: FnOnce() -> T,
{
    let _guard = EqualityGuard::enter(EqualityMode::ByRef);
    f()
}

/// Run `f` with `==` comparing shapes and values within tolerances.
pub fn with_equality_by_shape_and_value<F, T>(
    rel_tolerance: f64,
    abs_tolerance: f64,
    equal_nan: bool,
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    let _guard = EqualityGuard::enter(EqualityMode::ShapeAndValue {
        rel_tolerance,
        abs_tolerance,
        equal_nan,
    });
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_elementwise() {
        assert_eq!(current_equality_mode(), EqualityMode::Elementwise);
    }

    #[test]
    fn test_nested_modes() {
        with_equality_by_ref(|| {
            assert_eq!(current_equality_mode(), EqualityMode::ByRef);
            with_equality_by_shape_and_value(1e-5, 0.0, true, || {
                assert!(matches!(
                    current_equality_mode(),
                    EqualityMode::ShapeAndValue { equal_nan: true, .. }
                ));
            });
            assert_eq!(current_equality_mode(), EqualityMode::ByRef);
        });
        assert_eq!(current_equality_mode(), EqualityMode::Elementwise);
    }

    #[test]
    #[should_panic(expected = "reverse order")]
    fn test_out_of_order_exit_panics() {
        let outer = EqualityGuard::enter(EqualityMode::ByRef);
        let inner = EqualityGuard::enter(EqualityMode::Elementwise);
        drop(outer);
        drop(inner);
    }

    #[test]
    fn test_modes_are_per_thread() {
        let _guard = EqualityGuard::enter(EqualityMode::ByRef);
        let other = std::thread::spawn(current_equality_mode).join().unwrap();
        assert_eq!(other, EqualityMode::Elementwise);
    }
}
