//! Element runtime: lifecycle, addressing, and the playback state
//! machine (spec.md §4.1).
//!
//! Grounded on the teacher's per-stream task model: one `tokio::task`
//! owns a `StreamState`/`BroadcastEventBridge` pair and is reached only
//! through a channel handle, never an `Arc` (`stream/manager.rs`,
//! `events/bridge.rs`). `ElementActor` generalizes that into a single
//! task type hosting an arbitrary [`crate::behavior::ElementBehavior`].

mod actor;

pub use actor::{start, ElementActor, ElementOptions};

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::ElementMessage;

/// Default bound on an element's mailbox, matching the teacher's
/// default broadcast channel capacity (`runtime.rs`'s channel sizing
/// for `StreamState::tx`).
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// A cheap, cloneable reference to an element's mailbox. The only way
/// another concurrency unit reaches an element, per spec.md §5 ("the
/// only interactions are asynchronous messages").
#[derive(Debug, Clone)]
pub struct ElementAddress {
    sender: mpsc::Sender<ElementMessage>,
}

impl ElementAddress {
    fn new(sender: mpsc::Sender<ElementMessage>) -> Self {
        Self { sender }
    }

    /// Enqueues a message, awaiting mailbox space if the bounded
    /// channel is full.
    pub async fn send(&self, message: ElementMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| Error::LinkError {
                reason: "peer mailbox closed".into(),
            })
    }

    /// Builds an address with no live receiver behind it, for tests
    /// that need a [`ElementAddress`] value but never actually
    /// deliver to it (e.g. constructing a [`crate::pad::PeerHandle`]).
    #[must_use]
    pub fn for_test() -> Self {
        let (sender, _receiver) = mpsc::channel(1);
        Self { sender }
    }
}

/// The outward-facing handle a supervisor holds for a spawned element.
#[derive(Clone)]
pub struct ElementHandle {
    pub address: ElementAddress,
}

impl ElementHandle {
    /// Requests a playback transition.
    pub async fn change_playback_state(&self, target: crate::message::PlaybackTarget) -> Result<()> {
        self.address
            .send(ElementMessage::ChangePlaybackState(target))
            .await
    }

    /// Initiates graceful shutdown: requests the `stopped` transition
    /// and waits up to `timeout` for the element's task to drain its
    /// mailbox and exit. The core does not force-kill on timeout —
    /// spec.md §5 places that at the supervisor level, outside this
    /// crate.
    pub async fn shutdown(&self, timeout: std::time::Duration) -> Result<()> {
        self.change_playback_state(crate::message::PlaybackTarget::Stopped)
            .await?;
        tokio::time::sleep(timeout).await;
        Ok(())
    }
}

/// Coarse playback lifecycle phase (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Prepared,
    Playing,
}

impl PlaybackState {
    /// `true` iff `target` is reachable from `self` in one step
    /// (spec.md §3 "Transitions are adjacent only").
    #[must_use]
    pub fn can_reach(self, target: PlaybackState) -> bool {
        matches!(
            (self, target),
            (PlaybackState::Stopped, PlaybackState::Prepared)
                | (PlaybackState::Prepared, PlaybackState::Stopped)
                | (PlaybackState::Prepared, PlaybackState::Playing)
                | (PlaybackState::Playing, PlaybackState::Prepared)
        )
    }

    fn from_target(target: crate::message::PlaybackTarget) -> Self {
        match target {
            crate::message::PlaybackTarget::Stopped => PlaybackState::Stopped,
            crate::message::PlaybackTarget::Prepared => PlaybackState::Prepared,
            crate::message::PlaybackTarget::Playing => PlaybackState::Playing,
        }
    }
}

pub(crate) fn mailbox(capacity: usize) -> (mpsc::Sender<ElementMessage>, mpsc::Receiver<ElementMessage>) {
    mpsc::channel(capacity)
}

pub(crate) fn address_from_sender(sender: mpsc::Sender<ElementMessage>) -> ElementAddress {
    ElementAddress::new(sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_transitions_are_adjacent_only() {
        assert!(PlaybackState::Stopped.can_reach(PlaybackState::Prepared));
        assert!(!PlaybackState::Stopped.can_reach(PlaybackState::Playing));
        assert!(PlaybackState::Prepared.can_reach(PlaybackState::Playing));
        assert!(PlaybackState::Playing.can_reach(PlaybackState::Prepared));
        assert!(!PlaybackState::Playing.can_reach(PlaybackState::Stopped));
    }
}
