//! One-shot completion signal between the two execution units.
//!
//! The secondary unit owns a [`LatchHolder`] for its whole lifetime and
//! gives it up exactly once, when it exits (or unwinds). The primary's
//! [`LatchWaiter::wait`] blocks until that happens. Neither half can be
//! reused.

use crossbeam_utils::sync::WaitGroup;
use tracing::debug;

/// Create a connected holder/waiter pair.
#[must_use]
pub fn termination_latch() -> (LatchHolder, LatchWaiter) {
    let waiter = WaitGroup::new();
    let holder = waiter.clone();
    (LatchHolder { inner: holder }, LatchWaiter { inner: waiter })
}

/// Held by the secondary unit while it may still touch shared hardware.
#[derive(Debug)]
#[must_use = "dropping the holder releases the latch immediately"]
pub struct LatchHolder {
    inner: WaitGroup,
}

impl LatchHolder {
    /// Release the latch.
    pub fn release(self) {
        debug!("Termination latch released");
        drop(self.inner);
    }
}

/// Used by the primary unit to wait for the secondary's exit.
#[derive(Debug)]
pub struct LatchWaiter {
    inner: WaitGroup,
}

impl LatchWaiter {
    /// Block until the holder has been released or dropped.
    pub fn wait(self) {
        self.inner.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_blocks_until_release() {
        let (holder, waiter) = termination_latch();
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::Release);
            holder.release();
        });

        waiter.wait();
        assert!(released.load(Ordering::Acquire));
        handle.join().unwrap();
    }

    #[test]
    fn test_released_on_unwind() {
        let (holder, waiter) = termination_latch();

        let handle = thread::spawn(move || {
            let _holder = holder;
            panic!("unit failed");
        });

        waiter.wait();
        assert!(handle.join().is_err());
    }

    #[test]
    fn test_already_released() {
        let (holder, waiter) = termination_latch();
        holder.release();
        waiter.wait();
    }
}
