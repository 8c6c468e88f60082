//! Event and caps delivery protocol for input pads.
//!
//! Decides whether an inbound event or caps update must be stored into
//! a pull input's [`crate::pull_buffer::PullBuffer`] to preserve
//! ordering with buffers, or dispatched immediately to the behavior
//! callback, and enforces the StartOfStream/EndOfStream ordering
//! invariants from spec.md §4.5. Grounded on the teacher's
//! `events/bridge.rs`, which decides per-subscriber whether an event is
//! queued or forwarded immediately depending on subscriber state.

use crate::error::{Error, Result, StreamProtocolKind};
use crate::pad::{Caps, Direction, Mode, Pad, PadRef};
use crate::pull_buffer::{MarkerValue, NonBufferKind, StoreKind};

/// An in-band stream-control signal.
#[derive(Debug, Clone)]
pub enum Event {
    /// Marks the first data to flow on a pad. Must precede
    /// [`Event::EndOfStream`] and may occur at most once.
    StartOfStream,
    /// Marks that no further buffers will arrive on a pad. Must follow
    /// [`Event::StartOfStream`] and may occur at most once.
    EndOfStream,
    /// Any other event kind; opaque to the core.
    Custom(MarkerValue),
}

/// Whether an event must be delivered synchronously in order with
/// buffers, or may bypass ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTiming {
    Sync,
    Async,
}

/// What the caller must do next after [`handle_event`] or
/// [`handle_caps`] returns successfully.
pub enum Disposition {
    /// The item was queued into the pad's PullBuffer; no callback
    /// invocation is needed right now.
    Stored,
    /// The item must be dispatched to the behavior callback immediately.
    Dispatch,
}

/// Applies spec.md §4.5's event-flow decision and StartOfStream/
/// EndOfStream bookkeeping. `pad` is mutated in place: its
/// `start_of_stream`/`end_of_stream` flags update, and synchronous
/// events on a buffered pull input are stored rather than dispatched.
pub fn handle_event(pad: &mut Pad, pad_ref: PadRef, event: Event, timing: EventTiming) -> Result<Disposition> {
    if pad.direction != Direction::Input {
        return Err(Error::InvalidMessage {
            msg: "event".into(),
            mode: "output".into(),
        });
    }

    match event {
        Event::StartOfStream => {
            if pad.start_of_stream {
                return Err(Error::StreamProtocol {
                    kind: StreamProtocolKind::SosAlreadyReceived,
                });
            }
            pad.start_of_stream = true;
        }
        Event::EndOfStream => {
            if !pad.start_of_stream {
                return Err(Error::StreamProtocol {
                    kind: StreamProtocolKind::SosNotReceived,
                });
            }
            if pad.end_of_stream {
                return Err(Error::StreamProtocol {
                    kind: StreamProtocolKind::AlreadyReceived,
                });
            }
            pad.end_of_stream = true;
        }
        Event::Custom(_) => {}
    }

    buffer_or_dispatch(pad, pad_ref, timing, NonBufferKind::Event)
}

fn buffer_or_dispatch(
    pad: &mut Pad,
    pad_ref: PadRef,
    timing: EventTiming,
    marker_kind: NonBufferKind,
) -> Result<Disposition> {
    let should_store = timing == EventTiming::Sync
        && pad.mode == Mode::Pull
        && pad.buffer.as_ref().is_some_and(|b| !b.is_empty());

    if should_store {
        let buffer = pad.buffer.as_mut().expect("checked above");
        buffer.store(pad_ref, StoreKind::NonBuffer(marker_kind, MarkerValue::new(())))?;
        Ok(Disposition::Stored)
    } else {
        Ok(Disposition::Dispatch)
    }
}

/// Applies spec.md §4.5's caps-matching and flow decision. Returns an
/// error if `caps` doesn't satisfy `accepts`'s predicate; otherwise
/// behaves like [`handle_event`] for ordering purposes, and the caller
/// is expected to update `pad.caps` after the behavior callback runs
/// (the negotiation isn't considered final until the callback accepts
/// it, per spec.md §3 "caps may be re-negotiated only while that pad
/// has no buffered data").
pub fn handle_caps(
    pad: &mut Pad,
    pad_ref: PadRef,
    caps: &Caps,
    accepts: impl FnOnce(&Caps) -> bool,
    timing: EventTiming,
) -> Result<Disposition> {
    if !accepts(caps) {
        return Err(Error::InvalidCaps {
            pad: pad_ref,
            got: "offered caps".into(),
            expected: "pad's accepted-caps predicate".into(),
        });
    }
    buffer_or_dispatch(pad, pad_ref, timing, NonBufferKind::Caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::{DemandUnit, PadOptions};

    #[test]
    fn start_of_stream_ordering_violation() {
        let mut set = crate::pad::PadSet::new(vec![crate::pad::PadTemplate {
            name: "sink",
            direction: Direction::Input,
            mode: Mode::Push,
            demand_unit: DemandUnit::Buffers,
            availability: crate::pad::Availability::Always,
            accepted_caps: Box::new(|_| true),
            pad_options: PadOptions::default(),
            demand_pads: Vec::new(),
        }]);
        let pad_ref = PadRef::Static("sink");

        let pad = set.get_mut(pad_ref).unwrap();
        let err = handle_event(pad, pad_ref, Event::EndOfStream, EventTiming::Async).unwrap_err();
        assert!(matches!(
            err,
            Error::StreamProtocol {
                kind: StreamProtocolKind::SosNotReceived
            }
        ));
        assert!(!pad.start_of_stream);

        handle_event(pad, pad_ref, Event::StartOfStream, EventTiming::Async).unwrap();
        handle_event(pad, pad_ref, Event::EndOfStream, EventTiming::Async).unwrap();
        assert!(pad.start_of_stream && pad.end_of_stream);
    }
}
