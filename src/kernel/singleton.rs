//! Kernel Singleton & Lifecycle (C11, §4.9) — process-wide lazy init with
//! double-checked locking: an atomic flag gates the common case, and a
//! `parking_lot::Mutex` (which never poisons, even if the wrapped
//! initializer panics or returns `Err`) guards the actual construction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::kernel::Kernel;

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static SLOT: Mutex<Option<Arc<Kernel>>> = Mutex::new(None);

/// Return the process-wide Kernel, constructing it on first call via
/// `init`. Concurrent first callers race safely: only one executes `init`;
/// the rest block on the mutex and receive the same `Arc`. If `init` fails,
/// nothing is stored and the next caller gets to try again.
pub fn get_or_init(init: impl FnOnce() -> Result<Kernel>) -> Result<Arc<Kernel>> {
    if INITIALIZED.load(Ordering::Acquire) {
        if let Some(kernel) = SLOT.lock().as_ref() {
            return Ok(kernel.clone());
        }
    }

    let mut guard = SLOT.lock();
    if let Some(kernel) = guard.as_ref() {
        return Ok(kernel.clone());
    }

    let kernel = Arc::new(init()?);
    *guard = Some(kernel.clone());
    INITIALIZED.store(true, Ordering::Release);
    Ok(kernel)
}

/// Test-only reset: drops the held `Arc`, so the next `get_or_init` call
/// constructs a fresh Kernel. Existing clones of the old `Arc` held by
/// callers remain valid and keep working against the old instance until
/// they are dropped — this only affects future lookups.
#[cfg(test)]
pub fn reset_for_test() {
    let mut guard = SLOT.lock();
    *guard = None;
    INITIALIZED.store(false, Ordering::Release);
}
