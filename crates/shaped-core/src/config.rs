use std::cell::RefCell;

use crate::error::Error;

// EngineConfig - Runtime settings of the engine
//
// Settings are scoped, not global: `with_config(cfg, || ...)` installs a
// configuration for the current thread while the closure runs and restores
// the previous one afterwards, also when the closure panics.
//
// Invariant checks come in two layers. The `checks` cargo feature compiles
// them in at all; without it `check_invariant` is a no-op the optimizer
// removes. With the feature, `debug_checks` switches them on at runtime and
// defaults to on in debug builds.

/// Settings that influence how tensors are materialized and verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Verify internal consistency of every tensor that is constructed.
    pub debug_checks: bool,
    /// Float width (16, 32 or 64) native arrays are cast to on output.
    pub precision: Option<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug_checks: cfg!(debug_assertions),
            precision: None,
        }
    }
}

impl EngineConfig {
    pub fn with_debug_checks(mut self, enabled: bool) -> Self {
        self.debug_checks = enabled;
        self
    }

    pub fn with_precision(mut self, bits: u8) -> Self {
        self.precision = Some(bits);
        self
    }
}

thread_local! {
    static CONFIG: RefCell<Option<EngineConfig>> = const { RefCell::new(None) };
}

/// The configuration in effect on this thread.
pub fn current() -> EngineConfig {
    CONFIG.with(|c| c.borrow().unwrap_or_default())
}

struct Restore(Option<EngineConfig>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CONFIG.with(|c| *c.borrow_mut() = previous);
    }
}

/// Run `f` with `config` installed for the current thread.
pub fn with_config<F, T>(config: EngineConfig, f: F) -> T
where
    F: FnOnce() -> T,
{
    let previous = CONFIG.with(|c| c.borrow_mut().replace(config));
    let _restore = Restore(previous);
    f()
}

/// Run `f` with float outputs cast to `bits` precision.
pub fn with_precision<F, T>(bits: u8, f: F) -> T
where
    F: FnOnce() -> T,
{
    with_config(current().with_precision(bits), f)
}

/// Whether invariant checks run right now.
pub fn debug_checks_enabled() -> bool {
    cfg!(feature = "checks") && current().debug_checks
}

/// Panic with an `InvariantViolation` if checks are on and `ok` is false.
#[inline]
pub(crate) fn check_invariant(ok: impl FnOnce() -> bool, message: impl FnOnce() -> String) {
    if debug_checks_enabled() && !ok() {
        panic!("{}", Error::InvariantViolation(message()));
    }
}
