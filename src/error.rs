//! Centralized error types for the streamcore runtime.
//!
//! Every failure an element, pad, or controller can report is one variant
//! of [`Error`]. Invariant violations (negative `current_size`, a
//! non-adjacent playback transition) are programming errors and panic
//! instead of returning here — see the invariants called out on
//! [`crate::pull_buffer::PullBuffer`] and [`crate::element::PlaybackState`].

use thiserror::Error;

use crate::pad::PadRef;

/// Application-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes surfaced by the runtime.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// An element failed to start: its behavior module rejected
    /// `handle_init`, or the supplied module was otherwise invalid.
    #[error("element init failed: {reason}")]
    InitError {
        /// Reason reported by the behavior module or the runtime.
        reason: String,
    },

    /// A message arrived at an entry point that doesn't accept it in the
    /// current mode (e.g. a data message classified as control, or vice
    /// versa).
    #[error("invalid message {msg} for pad mode {mode}")]
    InvalidMessage {
        /// Name of the message variant.
        msg: String,
        /// The pad mode that rejected it.
        mode: String,
    },

    /// A callback returned an action it isn't permitted to return.
    #[error("action {action} is not permitted from callback {callback}")]
    InvalidAction {
        /// Debug-formatted action.
        action: String,
        /// Name of the callback that returned it.
        callback: String,
    },

    /// Caps offered by a peer don't satisfy a pad's accepted-caps
    /// predicate.
    #[error("invalid caps on {pad:?}: got {got}, expected {expected}")]
    InvalidCaps {
        /// The pad that rejected the caps.
        pad: PadRef,
        /// Debug-formatted offered caps.
        got: String,
        /// Debug-formatted accepted-caps predicate.
        expected: String,
    },

    /// Linking two pads failed: mode mismatch, duplicate link, unknown
    /// pad, or unknown child.
    #[error("link error: {reason}")]
    LinkError {
        /// Human-readable reason.
        reason: String,
    },

    /// A pull input pad in toilet mode crossed its `fail_level`.
    #[error("toilet overflow on {pad:?}: size {size}")]
    ToiletOverflow {
        /// The overflowing pad.
        pad: PadRef,
        /// The size at the moment of overflow.
        size: u64,
    },

    /// A stream-control protocol violation: duplicate `StartOfStream`,
    /// `EndOfStream` before `StartOfStream`, etc.
    #[error("stream protocol violation: {kind}")]
    StreamProtocol {
        /// Which violation occurred.
        kind: StreamProtocolKind,
    },

    /// A timer operation failed (duplicate id on start, unknown id on
    /// stop/tick).
    #[error("timer error ({kind}) for timer {id}")]
    TimerError {
        /// Which failure occurred.
        kind: TimerErrorKind,
        /// The timer id involved.
        id: String,
    },

    /// A [`crate::sync::SyncBarrier`] operation was invoked in a state
    /// that forbids it (e.g. `activate()` while already active).
    #[error("bad activity request")]
    BadActivityRequest,

    /// The element's parent died; the runtime is shutting the element
    /// down as a result.
    #[error("parent crashed: {reason}")]
    ParentCrash {
        /// Reason reported by the parent's monitor.
        reason: String,
    },
}

impl Error {
    /// Stable string discriminant for one error family, independent of
    /// the human-readable message. Useful for log filtering and metrics
    /// cardinality, the non-HTTP analogue of the teacher's `.code()`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitError { .. } => "init_error",
            Self::InvalidMessage { .. } => "invalid_message",
            Self::InvalidAction { .. } => "invalid_action",
            Self::InvalidCaps { .. } => "invalid_caps",
            Self::LinkError { .. } => "link_error",
            Self::ToiletOverflow { .. } => "toilet_overflow",
            Self::StreamProtocol { .. } => "stream_protocol",
            Self::TimerError { .. } => "timer_error",
            Self::BadActivityRequest => "bad_activity_request",
            Self::ParentCrash { .. } => "parent_crash",
        }
    }
}

/// Specific stream-control protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamProtocolKind {
    /// `EndOfStream` or a buffer arrived before `StartOfStream`.
    #[error("start-of-stream not received")]
    SosNotReceived,
    /// `StartOfStream` arrived twice on the same pad.
    #[error("start-of-stream already received")]
    SosAlreadyReceived,
    /// `EndOfStream` arrived twice on the same pad.
    #[error("end-of-stream already received")]
    AlreadyReceived,
}

/// Specific timer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerErrorKind {
    /// `start_timer` was called with an id already in use.
    #[error("duplicate timer id")]
    DuplicateId,
    /// `stop_timer`/`handle_tick` referenced an id that doesn't exist.
    #[error("unknown timer id")]
    UnknownId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toilet_overflow_reports_its_kind() {
        let err = Error::ToiletOverflow {
            pad: PadRef::Static("sink"),
            size: 450,
        };
        assert_eq!(err.kind(), "toilet_overflow");
    }

    #[test]
    fn bad_activity_request_has_no_payload() {
        let err = Error::BadActivityRequest;
        assert_eq!(err.kind(), "bad_activity_request");
        assert_eq!(err.to_string(), "bad activity request");
    }
}
