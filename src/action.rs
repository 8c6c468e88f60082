//! Actions returned by behavior callbacks, and their validation.
//!
//! Callbacks never mutate the runtime directly: they return a list of
//! [`Action`]s, processed by the runtime only after the callback
//! returns (spec.md §9 "Action handler reentrancy"). Grounded on the
//! teacher's `events::emitter`/`impl_emit!` pattern of a small tagged
//! enum of outgoing effects applied by the owning task rather than by
//! the code that produced them.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::event_caps::Event;
use crate::pad::{Caps, PadRef};
use crate::pull_buffer::BufferBatch;

/// One effect a behavior callback wants the runtime to perform.
#[derive(Debug, Clone)]
pub enum Action {
    /// Send a buffer batch out an output pad.
    Buffer { pad: PadRef, batch: BufferBatch },
    /// Send caps out an output pad.
    Caps { pad: PadRef, caps: Caps },
    /// Send an event out a pad (either direction, depending on the
    /// event: StartOfStream/EndOfStream flow downstream from an output).
    Event { pad: PadRef, event: Event },
    /// Issue demand upstream on an input pad.
    Demand { pad: PadRef, amount: u64 },
    /// Re-invoke `handle_demand` for an output pad without changing its
    /// demand counter — used to resume a split action sequence.
    Redemand { pad: PadRef },
    /// Send an arbitrary message to another element's mailbox.
    Forward { to: crate::element::ElementAddress, payload: crate::message::UserMessage },
    /// Notify the parent supervisor.
    Notify { payload: crate::message::UserMessage },
    /// Start a named timer.
    StartTimer { id: String, interval: Duration, repeating: bool },
    /// Cancel a named timer.
    StopTimer { id: String },
    /// Mark a pad's end-of-stream, shorthand for `Event` with
    /// `Event::EndOfStream`.
    EndOfStream { pad: PadRef },
}

/// Which callback produced a batch of actions, used to validate that
/// each action is permitted from that callback (spec.md §6: "the action
/// handler validates that each action is permitted in the current
/// callback").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Init,
    StoppedToPrepared,
    PreparedToPlaying,
    PlayingToPrepared,
    PreparedToStopped,
    PadAdded,
    PadRemoved,
    Demand,
    Process,
    Caps,
    EventHandler,
    Tick,
    Other,
}

impl Origin {
    fn permits(self, action: &Action) -> bool {
        match action {
            Action::Buffer { .. } => matches!(self, Origin::Process | Origin::Demand | Origin::Other),
            Action::Caps { .. } => matches!(
                self,
                Origin::Init | Origin::StoppedToPrepared | Origin::Process | Origin::Demand | Origin::Caps
            ),
            Action::Event { .. } | Action::EndOfStream { .. } => !matches!(self, Origin::Tick),
            Action::Demand { .. } => matches!(self, Origin::Process | Origin::EventHandler | Origin::Caps | Origin::Other),
            Action::Redemand { .. } => matches!(self, Origin::Demand),
            Action::Forward { .. } | Action::Notify { .. } => true,
            Action::StartTimer { .. } | Action::StopTimer { .. } => true,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Origin::Init => "handle_init",
            Origin::StoppedToPrepared => "handle_stopped_to_prepared",
            Origin::PreparedToPlaying => "handle_prepared_to_playing",
            Origin::PlayingToPrepared => "handle_playing_to_prepared",
            Origin::PreparedToStopped => "handle_prepared_to_stopped",
            Origin::PadAdded => "handle_pad_added",
            Origin::PadRemoved => "handle_pad_removed",
            Origin::Demand => "handle_demand",
            Origin::Process => "handle_process",
            Origin::Caps => "handle_caps",
            Origin::EventHandler => "handle_event",
            Origin::Tick => "handle_tick",
            Origin::Other => "handle_other",
        }
    }
}

/// Validates that `action` is permitted from `origin`, per the
/// permission table implied by spec.md §6.
pub fn validate(action: &Action, origin: Origin) -> Result<()> {
    if origin.permits(action) {
        Ok(())
    } else {
        Err(Error::InvalidAction {
            action: format!("{action:?}"),
            callback: origin.label().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_action_rejected_from_tick_callback() {
        let action = Action::Buffer {
            pad: PadRef::Static("src"),
            batch: BufferBatch::default(),
        };
        let err = validate(&action, Origin::Tick).unwrap_err();
        assert!(matches!(err, Error::InvalidAction { .. }));
    }

    #[test]
    fn buffer_action_permitted_from_process_callback() {
        let action = Action::Buffer {
            pad: PadRef::Static("src"),
            batch: BufferBatch::default(),
        };
        validate(&action, Origin::Process).unwrap();
    }

    #[test]
    fn redemand_only_permitted_from_demand_callback() {
        let action = Action::Redemand {
            pad: PadRef::Static("src"),
        };
        validate(&action, Origin::Demand).unwrap();
        assert!(validate(&action, Origin::Process).is_err());
    }
}
