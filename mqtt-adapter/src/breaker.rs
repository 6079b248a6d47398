//! Circuit breaker guarding outbound calls to the things service (spec §4.2,
//! §5). Trips when, over a sliding window of at least 3 requests, the
//! failure ratio is >= 0.6; while tripped calls fail fast. Process-local
//! state only — never shared through Redis. Small enough that a dedicated
//! crate would be one dependency for three counters; no example in the
//! retrieved pack reaches for one, so this is hand-rolled.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: usize = 20;
const MIN_REQUESTS: usize = 3;
const FAILURE_RATIO: f64 = 0.6;
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    opened_at: Option<Instant>,
    outcomes: VecDeque<bool>,
    window: usize,
    cooldown: Duration,
}

/// Thing reported back to the caller when the breaker refuses a call
/// without even attempting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOpen;

pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(window: usize, cooldown: Duration) -> Self {
        CircuitBreaker {
            inner: Mutex::new(Inner {
                state: State::Closed,
                opened_at: None,
                outcomes: VecDeque::with_capacity(window),
                window,
                cooldown,
            }),
        }
    }

    /// Check whether a call is currently permitted. `Open` state admits
    /// exactly one trial call once the cooldown has elapsed (transitioning
    /// to `HalfOpen`); `record` then decides whether the breaker closes
    /// again or reopens.
    pub fn allow(&self) -> Result<(), BreakerOpen> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            State::Closed => Ok(()),
            State::HalfOpen => Err(BreakerOpen),
            State::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= inner.cooldown {
                    inner.state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(BreakerOpen)
                }
            }
        }
    }

    /// Record the outcome of a call that was allowed through.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();

        if inner.state == State::HalfOpen {
            inner.state = if success { State::Closed } else { State::Open };
            inner.opened_at = if inner.state == State::Open {
                Some(Instant::now())
            } else {
                None
            };
            inner.outcomes.clear();
            return;
        }

        if inner.outcomes.len() == inner.window {
            inner.outcomes.pop_front();
        }
        inner.outcomes.push_back(success);

        if inner.outcomes.len() >= MIN_REQUESTS {
            let failures = inner.outcomes.iter().filter(|ok| !**ok).count();
            let ratio = failures as f64 / inner.outcomes.len() as f64;
            if ratio >= FAILURE_RATIO {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_below_the_window_minimum() {
        let cb = CircuitBreaker::default();
        cb.allow().unwrap();
        cb.record(false);
        cb.allow().unwrap();
        cb.record(false);
        assert!(cb.allow().is_ok());
    }

    #[test]
    fn trips_at_sixty_percent_failures() {
        let cb = CircuitBreaker::default();
        for ok in [false, false, true] {
            cb.allow().unwrap();
            cb.record(ok);
        }
        assert_eq!(cb.allow(), Err(BreakerOpen));
    }

    #[test]
    fn half_open_trial_closes_on_success() {
        let cb = CircuitBreaker::new(20, Duration::from_millis(1));
        for ok in [false, false, false] {
            cb.allow().unwrap();
            cb.record(ok);
        }
        assert_eq!(cb.allow(), Err(BreakerOpen));
        std::thread::sleep(Duration::from_millis(5));
        cb.allow().unwrap();
        cb.record(true);
        assert!(cb.allow().is_ok());
    }
}
