//! The user-supplied element behavior contract (spec.md §6).
//!
//! An `ElementBehavior` is the "capability record" spec.md §9 describes:
//! a fixed set of callback methods bound at construction, with no
//! dynamic module lookup afterward. Grounded on the teacher's
//! `Lifecycle`/`EventEmitter` traits (`lifecycle.rs`, `events/emitter.rs`),
//! which split a component's responsibilities into a small set of named
//! async methods implemented per concrete type; generalized here to the
//! larger, playback-aware callback set spec.md §6 requires.

use crate::action::Action;
use crate::error::Result;
use crate::event_caps::Event;
use crate::message::UserMessage;
use crate::pad::{Caps, PadRef};
use crate::pull_buffer::BufferBatch;
use crate::sync::SyncHandle;

/// What a callback hands back to the runtime: actions to perform, and
/// the (possibly updated) user state.
pub struct CallbackResult<S> {
    pub actions: Vec<Action>,
    pub state: S,
}

impl<S> CallbackResult<S> {
    /// No actions, just a (possibly unchanged) state.
    pub fn state_only(state: S) -> Self {
        Self {
            actions: Vec::new(),
            state,
        }
    }

    /// The given actions alongside a state.
    pub fn new(actions: Vec<Action>, state: S) -> Self {
        Self { actions, state }
    }
}

/// Context handed to every callback: read-only facts about the pad the
/// callback concerns, if any. Kept intentionally small — the element's
/// full pad set is a runtime-internal detail, not exposed to user code,
/// per spec.md §1 ("user-defined element callback bodies ... black
/// boxes" — they only see what this context exposes).
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub element_name: &'a str,
    /// The element's sync cohort handle, if one has been installed by
    /// a `set_stream_sync` message (spec.md §3's "optional
    /// synchronization handle"). Callbacks that need to join or report
    /// into the cohort clone this and forward it out via an
    /// [`Action::Forward`]/timer-driven mechanism of their own, since
    /// callbacks themselves run synchronously.
    pub sync: Option<&'a SyncHandle>,
}

/// The behavior contract every element type implements. Each method
/// corresponds to one row of spec.md §6's callback table.
pub trait ElementBehavior: Send + 'static {
    /// The element's private, opaque state.
    type State: Send;
    /// Construction-time options, opaque to the runtime.
    type Options: Send;

    fn handle_init(&self, ctx: Context<'_>, options: Self::Options) -> Result<Self::State>;

    fn handle_stopped_to_prepared(
        &self,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_prepared_to_playing(
        &self,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_playing_to_prepared(
        &self,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_prepared_to_stopped(
        &self,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_pad_added(
        &self,
        pad: PadRef,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_pad_removed(
        &self,
        pad: PadRef,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_demand(
        &self,
        pad: PadRef,
        size: i64,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_process(
        &self,
        pad: PadRef,
        batch: BufferBatch,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_caps(
        &self,
        pad: PadRef,
        caps: Caps,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_event(
        &self,
        pad: PadRef,
        event: Event,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_tick(
        &self,
        id: &str,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_other(
        &self,
        msg: UserMessage,
        ctx: Context<'_>,
        state: Self::State,
    ) -> Result<CallbackResult<Self::State>>;

    fn handle_shutdown(&self, state: Self::State);
}
