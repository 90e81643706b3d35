//! Deadline-bounded register polling.
//!
//! The ASMI core raises no interrupt, so every wait is a spin on the register
//! against a wall-clock deadline. Cycle time across the bridge varies, so the
//! deadline is measured, never derived from an iteration count.

use std::time::{Duration, Instant};

/// The deadline passed before the condition held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

/// Sample until `done` accepts a value or more than `timeout` has passed.
///
/// A value sampled after the deadline is not accepted, so an `Err` always
/// carries an elapsed time strictly greater than `timeout`.
pub fn poll_until<T>(
    timeout: Duration,
    mut sample: impl FnMut() -> T,
    mut done: impl FnMut(&T) -> bool,
) -> Result<T, Elapsed> {
    let start = Instant::now();
    loop {
        let value = sample();
        let elapsed = start.elapsed();
        if elapsed > timeout {
            return Err(Elapsed(elapsed));
        }
        if done(&value) {
            return Ok(value);
        }
    }
}
