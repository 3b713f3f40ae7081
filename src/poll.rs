// Bounded convergence polling: re-observe kernel state until a predicate
// holds or the attempt budget runs out. Hitting the cap is reported, not
// raised, so callers can run their own final consistency check.

use std::thread;
use std::time::Duration;

/// Outcome of a bounded wait. Both variants carry the last observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Converged(T),
    TimedOut(T),
}

impl<T> Poll<T> {
    pub fn converged(&self) -> bool {
        matches!(self, Poll::Converged(_))
    }

    pub fn value(&self) -> &T {
        match self {
            Poll::Converged(value) | Poll::TimedOut(value) => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Poll::Converged(value) | Poll::TimedOut(value) => value,
        }
    }
}

/// Observe up to `max_attempts` times, sleeping `interval` between
/// attempts, until `is_done` accepts an observation. Observation errors
/// propagate immediately.
pub fn wait_for<T, E, O, P>(
    interval: Duration,
    max_attempts: u32,
    mut observe: O,
    mut is_done: P,
) -> Result<Poll<T>, E>
where
    O: FnMut() -> Result<T, E>,
    P: FnMut(&T) -> bool,
{
    let attempts = max_attempts.max(1);
    let mut last = None;

    for attempt in 0..attempts {
        let observed = observe()?;
        if is_done(&observed) {
            return Ok(Poll::Converged(observed));
        }
        last = Some(observed);
        if attempt + 1 < attempts {
            thread::sleep(interval);
        }
    }

    Ok(Poll::TimedOut(last.expect("at least one observation was made")))
}
