//! `streamcore` — the per-element runtime for a pluggable multimedia
//! streaming pipeline.
//!
//! This crate is the core that a pipeline/bin supervisor builds on: it
//! hosts one element's lifecycle (the playback state machine and its
//! deferred-message queue), the typed pad/link model, the credit-based
//! pull-mode backpressure engine (`PullBuffer`), the output-side demand
//! controller and input-side event/caps controllers, a synchronization
//! barrier for multi-element rendezvous, and clock-scaled periodic
//! timers. Topology parsing, graph construction, and the concrete wire
//! formats carried in buffers are outside this crate — see each
//! module's docs for the exact seam.
//!
//! # Module map
//!
//! - [`behavior`]: the [`behavior::ElementBehavior`] trait user elements
//!   implement, and the actions their callbacks return.
//! - [`element`]: the element runtime — [`element::ElementActor`]'s
//!   message loop, playback state machine, and dispatch.
//! - [`pad`]: [`pad::Pad`], [`pad::PadSet`], and the link/unlink
//!   protocol.
//! - [`pull_buffer`]: [`pull_buffer::PullBuffer`], the in-order
//!   buffer/event/caps queue with demand accounting and toilet overflow
//!   detection.
//! - [`demand`], [`event_caps`]: the output-side demand controller and
//!   input-side event/caps controllers.
//! - [`message`]: the mailbox message enum and the deferred-message
//!   queue ([`message::PlaybackBuffer`]) drained on entering `playing`.
//! - [`sync`]: [`sync::SyncBarrier`] and its actor-hosted
//!   [`sync::SyncHandle`], for latency-compensated multi-element release.
//! - [`clock`], [`timer`]: the clock-ratio publisher and per-element
//!   timer controller.
//! - [`action`]: the `Action` enum callbacks return, and the
//!   permitted-from-callback validation.
//! - [`error`]: the centralized [`error::Error`] type.
//! - [`telemetry`]: opt-in `tracing`-based emission of the named
//!   lifecycle/link events.
//! - [`runtime`]: the [`runtime::TaskSpawner`] abstraction used to spawn
//!   an element's task without hard-coding an executor.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod behavior;
pub mod clock;
pub mod demand;
pub mod element;
pub mod error;
pub mod event_caps;
pub mod message;
pub mod pad;
pub mod pull_buffer;
pub mod runtime;
pub mod sync;
pub mod telemetry;
pub mod timer;

pub use action::{Action, Origin};
pub use behavior::{CallbackResult, Context, ElementBehavior};
pub use clock::{Clock, ClockHandle, Ratio};
pub use element::{ElementActor, ElementAddress, ElementHandle, ElementOptions, PlaybackState};
pub use error::{Error, Result};
pub use event_caps::{Disposition, Event, EventTiming};
pub use message::{ElementMessage, PlaybackBuffer, PlaybackTarget};
pub use pad::{Caps, Direction, Mode, Pad, PadRef, PadSet, PadTemplate};
pub use pull_buffer::{BufferBatch, PullBuffer, ToiletOptions};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use sync::{SyncBarrier, SyncHandle, SyncOptions};
pub use telemetry::TelemetryConfig;
pub use timer::{Timer, TimerController};
