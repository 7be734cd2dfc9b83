//! Drop guard over a boolean in-flight flag. The flag is released in `Drop`,
//! so a future cancelled mid-await cannot leave it set.

use std::sync::atomic::{AtomicBool, Ordering};

pub struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    /// Claim the flag. Returns `None` when another flight already holds it.
    pub fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
