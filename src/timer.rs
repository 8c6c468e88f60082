//! Per-element timer scheduling.
//!
//! One [`TimerController`] lives inside each `ElementActor` and drives
//! every timer that element started. Grounded on the teacher's
//! `stream/cadence.rs`, which runs a `tokio::time::interval` loop per
//! stream to emit periodic cadence ticks; generalized here to an
//! arbitrary number of named, independently-started/stopped timers by
//! switching the single interval for a `tokio_util::time::DelayQueue`
//! keyed by timer id, and clock-ratio-scaled per spec.md §4.8.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::time::{delay_queue, DelayQueue};

use crate::clock::ClockHandle;
use crate::error::{Error, Result, TimerErrorKind};

/// A single named, recurring or one-shot timer.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    /// Nominal interval before clock scaling.
    pub interval: Duration,
    /// Re-arms itself after firing when `true`; fires once otherwise.
    pub repeating: bool,
}

/// Owns every timer started by one element and the `DelayQueue` backing
/// their wakeups. Not `Send`-shared: lives entirely inside the owning
/// `ElementActor`'s task, consulted only from its own message loop
/// (spec.md §5 task-exclusive ownership, same shape as `PullBuffer`).
pub struct TimerController {
    queue: DelayQueue<String>,
    keys: HashMap<String, (delay_queue::Key, Timer)>,
    clock: ClockHandle,
}

impl TimerController {
    /// Builds a controller reading ratio updates from `clock`.
    #[must_use]
    pub fn new(clock: ClockHandle) -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
            clock,
        }
    }

    /// Starts a new timer under `id`. Errors if `id` is already in use
    /// (spec.md §4.8 "start_timer errors on a duplicate id").
    pub fn start_timer(&mut self, id: impl Into<String>, timer: Timer) -> Result<()> {
        let id = id.into();
        if self.keys.contains_key(&id) {
            return Err(Error::TimerError {
                kind: TimerErrorKind::DuplicateId,
                id,
            });
        }
        let scaled = self.clock.current().scale(timer.interval);
        let key = self.queue.insert(id.clone(), scaled);
        self.keys.insert(id, (key, timer));
        Ok(())
    }

    /// Cancels a timer. Errors if `id` is unknown.
    pub fn stop_timer(&mut self, id: &str) -> Result<()> {
        let (key, _) = self.keys.remove(id).ok_or_else(|| Error::TimerError {
            kind: TimerErrorKind::UnknownId,
            id: id.to_string(),
        })?;
        self.queue.remove(&key);
        Ok(())
    }

    /// Suspends until the next timer in this controller fires, then
    /// re-arms it if repeating. Returns the fired timer's id. Callers
    /// select on this alongside mailbox receives in the element's main
    /// loop (spec.md §4.1).
    ///
    /// # Panics
    ///
    /// Panics if called while this controller has no timers running;
    /// callers are expected to only poll this future when `is_empty()`
    /// is `false`, matching how `futures::select!`-style loops guard an
    /// empty stream branch rather than awaiting it unconditionally.
    pub async fn next_expired(&mut self) -> String {
        let expired = std::future::poll_fn(|cx| self.queue.poll_expired(cx))
            .await
            .expect("next_expired called with no running timers")
            .expect("delay queue timer error");
        let id = expired.into_inner();
        self.rearm_if_repeating(&id);
        id
    }

    fn rearm_if_repeating(&mut self, id: &str) {
        if let Some((key, timer)) = self.keys.get_mut(id) {
            if timer.repeating {
                let scaled = self.clock.current().scale(timer.interval);
                *key = self.queue.insert(id.to_string(), scaled);
            } else {
                self.keys.remove(id);
            }
        }
    }

    /// `true` when no timers are currently scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, Ratio};

    #[test]
    fn start_timer_rejects_duplicate_id() {
        let mut controller = TimerController::new(ClockHandle::unit());
        controller
            .start_timer(
                "tick",
                Timer {
                    interval: Duration::from_millis(10),
                    repeating: false,
                },
            )
            .unwrap();
        let err = controller
            .start_timer(
                "tick",
                Timer {
                    interval: Duration::from_millis(10),
                    repeating: false,
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TimerError {
                kind: TimerErrorKind::DuplicateId,
                ..
            }
        ));
    }

    #[test]
    fn stop_timer_rejects_unknown_id() {
        let mut controller = TimerController::new(ClockHandle::unit());
        let err = controller.stop_timer("nope").unwrap_err();
        assert!(matches!(
            err,
            Error::TimerError {
                kind: TimerErrorKind::UnknownId,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_timer_fires_once() {
        let mut controller = TimerController::new(ClockHandle::unit());
        controller
            .start_timer(
                "once",
                Timer {
                    interval: Duration::from_millis(50),
                    repeating: false,
                },
            )
            .unwrap();

        let fired = controller.next_expired().await;
        assert_eq!(fired, "once");
        assert!(controller.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_timer_rearms_after_firing() {
        let mut controller = TimerController::new(ClockHandle::unit());
        controller
            .start_timer(
                "tick",
                Timer {
                    interval: Duration::from_millis(20),
                    repeating: true,
                },
            )
            .unwrap();

        controller.next_expired().await;
        assert!(!controller.is_empty(), "a repeating timer re-arms itself");
        controller.next_expired().await;
    }

    #[tokio::test(start_paused = true)]
    async fn faster_clock_ratio_shortens_wait() {
        let clock = Clock::new(Ratio::new(4.0));
        let mut controller = TimerController::new(clock.handle());
        controller
            .start_timer(
                "fast",
                Timer {
                    interval: Duration::from_secs(4),
                    repeating: false,
                },
            )
            .unwrap();

        tokio::time::advance(Duration::from_secs(1) + Duration::from_millis(10)).await;
        let fired = controller.next_expired().await;
        assert_eq!(fired, "fast");
    }
}
