//! The element mailbox message type and the deferred-message queue.
//!
//! Grounded on the teacher's `events/mod.rs` `BroadcastEvent` (a single
//! tagged enum carrying every kind of cross-task notification) and
//! `events/bridge.rs` (which defers delivery of some event kinds until
//! a subscriber is ready) — generalized here to the full message set an
//! element mailbox accepts, plus an explicit FIFO for the subset that
//! must wait for `playing` (spec.md §4.6).

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Ratio;
use crate::event_caps::Event;
use crate::pad::{Caps, PadRef, PeerHandle};
use crate::pull_buffer::BufferBatch;

/// An opaque, arbitrary payload for `forward`/`notify` actions and
/// `handle_other` dispatch.
#[derive(Clone)]
pub struct UserMessage(pub Arc<dyn Any + Send + Sync>);

impl UserMessage {
    /// Wraps an arbitrary value as a user message payload.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Attempts to view the payload as `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for UserMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UserMessage(..)")
    }
}

/// Reason an element observed its parent or a monitored peer going away.
#[derive(Debug, Clone)]
pub enum DownReason {
    Crashed(String),
    Normal,
}

/// The playback transition requested of an element (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackTarget {
    Stopped,
    Prepared,
    Playing,
}

/// Every message an `ElementActor`'s mailbox accepts (spec.md §4.1
/// "Message entry points").
#[derive(Debug, Clone)]
pub enum ElementMessage {
    /// A batch of buffers arriving on an input pad.
    Buffer { pad: PadRef, batch: BufferBatch },
    /// Caps negotiated on a pad.
    Caps { pad: PadRef, caps: Caps },
    /// An in-band control event on a pad.
    Event { pad: PadRef, event: Event, sync: bool },
    /// Demand issued on an output pad.
    Demand { pad: PadRef, amount: u64 },
    /// A request to transition playback state.
    ChangePlaybackState(PlaybackTarget),
    /// A peer requesting to link one of our pads.
    HandleLink {
        pad_name: &'static str,
        peer: PeerHandle,
        peer_mode: crate::pad::Mode,
        peer_demand_unit: crate::pad::DemandUnit,
        offered_caps: Option<Caps>,
    },
    /// A peer (or supervisor) requesting to unlink a pad.
    HandleUnlink(PadRef),
    /// Signals the end of a batch of link operations.
    LinkingFinished,
    /// A peer announcing it only ever pushes (never honors demand).
    PushModeAnnouncement(PadRef),
    /// A timer owned by this element fired.
    TimerTick(String),
    /// The pipeline clock published a new ratio.
    ClockRatioUpdate(Ratio),
    /// Supervisor assigning a controlling identity (host/platform
    /// concern; opaque here).
    SetControllingPid(UserMessage),
    /// Supervisor attaching this element to a sync cohort.
    SetStreamSync(UserMessage),
    /// A generic notification from a peer or supervisor.
    Notification(UserMessage),
    /// A monitored peer or the parent died.
    Down(DownReason),
    /// Anything not recognized above, routed to `handle_other`.
    Other(UserMessage),
}

impl ElementMessage {
    /// `true` for the "data" classification of spec.md §4.1: `buffer`,
    /// `caps`, `event`, `demand`. Everything else is "control" and
    /// bypasses the deferred queue.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            ElementMessage::Buffer { .. }
                | ElementMessage::Caps { .. }
                | ElementMessage::Event { .. }
                | ElementMessage::Demand { .. }
        )
    }

    /// A short tag for logging, independent of payload contents.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ElementMessage::Buffer { .. } => "buffer",
            ElementMessage::Caps { .. } => "caps",
            ElementMessage::Event { .. } => "event",
            ElementMessage::Demand { .. } => "demand",
            ElementMessage::ChangePlaybackState(_) => "change_playback_state",
            ElementMessage::HandleLink { .. } => "handle_link",
            ElementMessage::HandleUnlink(_) => "handle_unlink",
            ElementMessage::LinkingFinished => "linking_finished",
            ElementMessage::PushModeAnnouncement(_) => "push_mode_announcement",
            ElementMessage::TimerTick(_) => "timer_tick",
            ElementMessage::ClockRatioUpdate(_) => "clock_ratio_update",
            ElementMessage::SetControllingPid(_) => "set_controlling_pid",
            ElementMessage::SetStreamSync(_) => "set_stream_sync",
            ElementMessage::Notification(_) => "notification",
            ElementMessage::Down(_) => "down",
            ElementMessage::Other(_) => "other",
        }
    }
}

/// Convenience constructor used by timer-driven actions, kept here
/// rather than on `Action` since it's purely a display/bookkeeping
/// helper, not a runtime effect.
#[must_use]
pub fn timer_label(id: &str, interval: Duration) -> String {
    format!("{id}@{interval:?}")
}

/// FIFO of `buffer`/`caps`/`event`/`demand` messages that arrived while
/// playback wasn't yet `playing` (spec.md §4.6 "PlaybackBuffer"). Drains
/// from the head exactly once, in order, when playback reaches
/// `playing`; a drain failure aborts the transition and leaves the
/// remaining messages queued.
#[derive(Debug, Default)]
pub struct PlaybackBuffer {
    queue: VecDeque<ElementMessage>,
}

impl PlaybackBuffer {
    /// An empty deferred queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to the tail.
    pub fn push(&mut self, message: ElementMessage) {
        self.queue.push_back(message);
    }

    /// `true` iff nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Removes and returns the head message, if any.
    pub fn pop_front(&mut self) -> Option<ElementMessage> {
        self.queue.pop_front()
    }

    /// Re-queues a message at the head, e.g. after a failed drain.
    /// [`ElementActor::run`](crate::element::ElementActor) drains this
    /// queue directly via `pop_front`/`push_front` rather than through a
    /// closure-based helper here, since draining calls an async
    /// dispatch method (spec.md §4.6: "drain failures abort the
    /// transition and leave remaining messages in the queue").
    pub fn push_front(&mut self, message: ElementMessage) {
        self.queue.push_front(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_messages_in_fifo_order() {
        let mut buffer = PlaybackBuffer::new();
        buffer.push(ElementMessage::Buffer {
            pad: PadRef::Static("sink"),
            batch: BufferBatch::default(),
        });
        buffer.push(ElementMessage::LinkingFinished);

        assert_eq!(buffer.pop_front().unwrap().kind(), "buffer");
        assert_eq!(buffer.pop_front().unwrap().kind(), "linking_finished");
        assert!(buffer.is_empty());
    }

    #[test]
    fn push_front_reinstates_a_message_at_the_head() {
        let mut buffer = PlaybackBuffer::new();
        buffer.push(ElementMessage::LinkingFinished);
        let first = buffer.pop_front().unwrap();
        buffer.push_front(first);

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.pop_front().unwrap().kind(), "linking_finished");
    }
}
