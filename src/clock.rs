//! Clock ratio publication.
//!
//! A pipeline-wide clock publishes a single scaling ratio (actual
//! playback speed relative to wall-clock time) that every element's
//! timers read to convert a nominal tick interval into a real sleep
//! duration. Grounded on the teacher's `NetworkContext` pattern of a
//! small piece of shared, frequently-read, rarely-written state
//! (`packages/thaumic-core/src/context.rs`), but broadcast via
//! `tokio::sync::watch` rather than a lock-guarded cell since many
//! timer tasks each read the ratio independently and a watch channel
//! lets them await changes instead of polling a lock.

use tokio::sync::watch;

/// A clock ratio: `1.0` is real-time, `>1.0` plays faster than
/// wall-clock, `<1.0` slower. Always positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ratio(f64);

impl Ratio {
    /// Real-time playback.
    pub const UNIT: Ratio = Ratio(1.0);

    /// Builds a ratio, clamping non-positive or non-finite values to
    /// `UNIT` rather than propagating a nonsensical scaling factor into
    /// every timer in the pipeline.
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            Ratio(value)
        } else {
            Ratio::UNIT
        }
    }

    /// The raw scaling factor.
    #[must_use]
    pub fn get(self) -> f64 {
        self.0
    }

    /// Scales a nominal duration by this ratio's inverse: a ratio above
    /// 1.0 (faster playback) shortens the real sleep needed to reach a
    /// given nominal deadline.
    #[must_use]
    pub fn scale(self, nominal: std::time::Duration) -> std::time::Duration {
        nominal.div_f64(self.0)
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Ratio::UNIT
    }
}

/// The publishing half of the clock, held by whatever owns pipeline
/// timing (a pipeline supervisor, out of this crate's scope — callers
/// construct one and hand out [`ClockHandle`]s to elements).
#[derive(Debug)]
pub struct Clock {
    tx: watch::Sender<Ratio>,
}

impl Clock {
    /// Starts a clock at `initial` ratio.
    #[must_use]
    pub fn new(initial: Ratio) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publishes a new ratio to every subscribed [`ClockHandle`].
    pub fn set_ratio(&self, ratio: Ratio) {
        // A send error here means every receiver has been dropped,
        // which is a normal shutdown race, not a failure to report.
        let _ = self.tx.send(ratio);
    }

    /// Hands out a read-only handle subscribed to this clock's ratio.
    #[must_use]
    pub fn handle(&self) -> ClockHandle {
        ClockHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// A per-element read-only view onto the pipeline clock.
#[derive(Debug, Clone)]
pub struct ClockHandle {
    rx: watch::Receiver<Ratio>,
}

impl ClockHandle {
    /// The most recently published ratio.
    #[must_use]
    pub fn current(&self) -> Ratio {
        *self.rx.borrow()
    }

    /// Builds a handle backed by no real clock: its ratio is always
    /// `UNIT` and `changed()` never resolves, for elements and tests
    /// that don't care about clock scaling. Leaks the paired sender
    /// rather than dropping it immediately — a dropped sender makes
    /// `watch::Receiver::changed()` return an error *instantly* instead
    /// of pending, which would turn `ElementActor::run`'s `select!`
    /// branch on `clock.changed()` into a busy-spin.
    #[must_use]
    pub fn unit() -> Self {
        let (tx, rx) = watch::channel(Ratio::UNIT);
        std::mem::forget(tx);
        Self { rx }
    }

    /// Suspends until the ratio changes from its value at the time of
    /// the call, returning the new ratio. Used by timers that need to
    /// recompute their next deadline after a ratio change rather than
    /// firing against a stale one.
    pub async fn changed(&mut self) -> Ratio {
        if self.rx.changed().await.is_err() {
            // Sender dropped; nothing further will ever change, so this
            // future should not be polled again in practice. Returning
            // the last known ratio is the least surprising behavior.
            return self.current();
        }
        self.current()
    }
}
