//! The per-element task: message loop, dispatch, and action application.

use crate::action::{self, Action, Origin};
use crate::behavior::{CallbackResult, Context, ElementBehavior};
use crate::clock::{ClockHandle, Ratio};
use crate::demand;
use crate::error::{Error, Result};
use crate::event_caps::{self, Disposition, Event, EventTiming};
use crate::message::{DownReason, ElementMessage, PlaybackBuffer, PlaybackTarget, UserMessage};
use crate::pad::{Direction, Mode, PadRef, PadSet, PadTemplate, PeerHandle};
use crate::pull_buffer::{BufferBatch, StoreKind, ToiletOptions};
use crate::runtime::TaskSpawner;
use crate::sync::SyncHandle;
use crate::telemetry::{self, TelemetryConfig};
use crate::timer::{Timer, TimerController};

use super::{address_from_sender, mailbox, ElementAddress, ElementHandle, PlaybackState, DEFAULT_MAILBOX_CAPACITY};

/// Everything needed to start one element.
pub struct ElementOptions<B: ElementBehavior> {
    pub name: String,
    pub behavior: B,
    pub behavior_options: B::Options,
    pub pad_templates: Vec<PadTemplate>,
    pub parent: Option<ElementAddress>,
    pub clock: ClockHandle,
    pub mailbox_capacity: usize,
    pub telemetry: TelemetryConfig,
    /// The optional synchronization handle (spec.md §3): when set, this
    /// element's behavior may call into it (e.g. from `handle_tick`) to
    /// join a latency-compensated release cohort. Also installable
    /// later via `ElementMessage::SetStreamSync`.
    pub sync: Option<SyncHandle>,
}

impl<B: ElementBehavior> ElementOptions<B> {
    /// Builds options with a minimal, test-friendly default: no
    /// parent, a unit clock, the default mailbox size, telemetry off.
    pub fn new(name: impl Into<String>, behavior: B, behavior_options: B::Options, pad_templates: Vec<PadTemplate>) -> Self {
        Self {
            name: name.into(),
            behavior,
            behavior_options,
            pad_templates,
            parent: None,
            clock: ClockHandle::unit(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            telemetry: TelemetryConfig::default(),
            sync: None,
        }
    }
}

/// Notification forwarded to the parent when playback settles into a
/// new state.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackStateChanged {
    pub state: PlaybackState,
}

/// The task-owned state of a running element (spec.md §3 "Element").
pub struct ElementActor<B: ElementBehavior> {
    name: String,
    behavior: B,
    state: Option<B::State>,
    pads: PadSet,
    playback: PlaybackState,
    pending_transition: Option<PlaybackTarget>,
    deferred: PlaybackBuffer,
    timers: TimerController,
    clock: ClockHandle,
    mailbox: tokio::sync::mpsc::Receiver<ElementMessage>,
    parent: Option<ElementAddress>,
    telemetry: TelemetryConfig,
    terminating: bool,
    sync: Option<SyncHandle>,
}

/// Spawns an element's task and returns a handle to its mailbox.
/// Fails with `InitError` before anything is spawned if
/// `handle_init` rejects the supplied options (spec.md §4.1).
pub fn start<B, Sp>(spawner: &Sp, options: ElementOptions<B>) -> Result<ElementHandle>
where
    B: ElementBehavior,
    Sp: TaskSpawner,
{
    let ctx = Context {
        element_name: &options.name,
        sync: options.sync.as_ref(),
    };
    let state = options.behavior.handle_init(ctx, options.behavior_options)?;

    let (sender, receiver) = mailbox(options.mailbox_capacity);
    let address = address_from_sender(sender);

    telemetry::element_init(options.telemetry, &options.name);

    let actor = ElementActor {
        timers: TimerController::new(options.clock.clone()),
        name: options.name,
        behavior: options.behavior,
        state: Some(state),
        pads: PadSet::new(options.pad_templates),
        playback: PlaybackState::Stopped,
        pending_transition: None,
        deferred: PlaybackBuffer::new(),
        clock: options.clock,
        mailbox: receiver,
        parent: options.parent,
        telemetry: options.telemetry,
        terminating: false,
        sync: options.sync,
    };

    spawner.spawn(actor.run());
    Ok(ElementHandle { address })
}

impl<B: ElementBehavior> ElementActor<B> {
    /// The element's message loop (spec.md §4.1). Runs until a
    /// `stopped` transition completes or the mailbox closes.
    pub async fn run(mut self) {
        loop {
            let has_timers = !self.timers.is_empty();
            tokio::select! {
                biased;
                maybe_msg = self.mailbox.recv() => {
                    match maybe_msg {
                        Some(msg) => {
                            tracing::trace!(element = %self.name, kind = msg.kind(), "dispatch");
                            if let Err(err) = self.handle_message(msg).await {
                                tracing::warn!(element = %self.name, error = %err, "callback error, stopping");
                                self.notify_parent_error(&err).await;
                            }
                        }
                        None => break,
                    }
                }
                id = self.timers.next_expired(), if has_timers => {
                    if let Err(err) = self.handle_timer_tick(id).await {
                        tracing::warn!(element = %self.name, error = %err, "timer callback error");
                    }
                }
                ratio = self.clock.changed() => {
                    self.handle_clock_update(ratio);
                }
            }

            if self.terminating {
                break;
            }
        }

        telemetry::element_terminate(self.telemetry, &self.name, "shutdown");
        if let Some(state) = self.state.take() {
            self.behavior.handle_shutdown(state);
        } else {
            tracing::warn!(element = %self.name, "no final state available for handle_shutdown");
        }
    }

    async fn notify_parent_error(&mut self, err: &Error) {
        if let Some(parent) = &self.parent {
            let _ = parent
                .send(ElementMessage::Notification(UserMessage::new(err.to_string())))
                .await;
        }
    }

    fn is_hot_path_buffer(&self, pad: PadRef) -> bool {
        self.playback == PlaybackState::Playing
            && self
                .pads
                .get(pad)
                .is_some_and(|p| p.direction == Direction::Input && p.mode == Mode::Push)
    }

    async fn handle_message(&mut self, msg: ElementMessage) -> Result<()> {
        if msg.is_data() {
            if self.playback != PlaybackState::Playing {
                self.deferred.push(msg);
                return Ok(());
            }
            if let ElementMessage::Buffer { pad, batch } = &msg {
                if self.is_hot_path_buffer(*pad) {
                    return self.dispatch_process(*pad, batch.clone()).await;
                }
            }
            return self.dispatch_data(msg).await;
        }
        self.dispatch_control(msg).await
    }

    async fn dispatch_control(&mut self, msg: ElementMessage) -> Result<()> {
        match msg {
            ElementMessage::ChangePlaybackState(target) => self.transition(target).await,
            ElementMessage::HandleLink {
                pad_name,
                peer,
                peer_mode,
                peer_demand_unit,
                offered_caps,
            } => {
                self.handle_link(pad_name, peer, peer_mode, peer_demand_unit, offered_caps)
                    .await
            }
            ElementMessage::HandleUnlink(pad_ref) => {
                self.pads.handle_unlink(pad_ref);
                self.run_callback(Origin::PadRemoved, move |b, ctx, state| {
                    b.handle_pad_removed(pad_ref, ctx, state)
                })
                .await
            }
            ElementMessage::LinkingFinished => {
                self.pads.linking_finished();
                Ok(())
            }
            ElementMessage::PushModeAnnouncement(pad_ref) => {
                let toilet = self
                    .pads
                    .get(pad_ref)
                    .and_then(|p| p.pad_options.toilet)
                    .unwrap_or(ToiletOptions {
                        warn_level: u64::MAX,
                        fail_level: u64::MAX,
                    });
                self.pads.enable_toilet_if_pull(pad_ref, toilet);
                Ok(())
            }
            ElementMessage::TimerTick(id) => self.handle_timer_tick(id).await,
            ElementMessage::ClockRatioUpdate(ratio) => {
                self.handle_clock_update(ratio);
                Ok(())
            }
            ElementMessage::SetStreamSync(payload) => {
                if let Some(handle) = payload.downcast_ref::<SyncHandle>() {
                    self.sync = Some(handle.clone());
                } else {
                    tracing::warn!(element = %self.name, "set_stream_sync payload was not a SyncHandle");
                }
                Ok(())
            }
            ElementMessage::SetControllingPid(_) | ElementMessage::Notification(_) => Ok(()),
            ElementMessage::Down(reason) => {
                self.terminating = true;
                if let DownReason::Crashed(reason) = reason {
                    return Err(Error::ParentCrash { reason });
                }
                Ok(())
            }
            ElementMessage::Other(payload) => {
                self.run_callback(Origin::Other, move |b, ctx, state| {
                    b.handle_other(payload.clone(), ctx, state)
                })
                .await
            }
            ElementMessage::Buffer { .. }
            | ElementMessage::Caps { .. }
            | ElementMessage::Event { .. }
            | ElementMessage::Demand { .. } => {
                unreachable!("data messages are routed through dispatch_data")
            }
        }
    }

    async fn dispatch_data(&mut self, msg: ElementMessage) -> Result<()> {
        match msg {
            ElementMessage::Buffer { pad, batch } => self.handle_buffer(pad, batch).await,
            ElementMessage::Caps { pad, caps } => self.handle_caps_message(pad, caps).await,
            ElementMessage::Event { pad, event, sync } => self.handle_event_message(pad, event, sync).await,
            ElementMessage::Demand { pad, amount } => self.handle_demand_message(pad, amount).await,
            _ => unreachable!("only data messages reach dispatch_data"),
        }
    }

    async fn handle_buffer(&mut self, pad: PadRef, batch: BufferBatch) -> Result<()> {
        let mode = self.pads.get(pad).map(|p| p.mode);
        match mode {
            Some(Mode::Push) => self.dispatch_process(pad, batch).await,
            Some(Mode::Pull) => {
                if let Some(p) = self.pads.get_mut(pad) {
                    if let Some(buffer) = p.buffer.as_mut() {
                        buffer.store(pad, StoreKind::Buffers(batch))?;
                    }
                }
                Ok(())
            }
            None => Err(Error::LinkError {
                reason: format!("unknown pad {pad}"),
            }),
        }
    }

    async fn dispatch_process(&mut self, pad: PadRef, batch: BufferBatch) -> Result<()> {
        self.run_callback(Origin::Process, move |b, ctx, state| {
            b.handle_process(pad, batch.clone(), ctx, state)
        })
        .await
    }

    async fn handle_caps_message(&mut self, pad_ref: PadRef, caps: crate::pad::Caps) -> Result<()> {
        let accepts = self.pads.pad_accepts(pad_ref, &caps);
        let disposition = {
            let pad = self.pads.get_mut(pad_ref).ok_or_else(|| Error::LinkError {
                reason: format!("unknown pad {pad_ref}"),
            })?;
            event_caps::handle_caps(pad, pad_ref, &caps, |_| accepts, EventTiming::Sync)?
        };
        match disposition {
            Disposition::Stored => Ok(()),
            Disposition::Dispatch => {
                let result = self
                    .run_callback(Origin::Caps, move |b, ctx, state| b.handle_caps(pad_ref, caps.clone(), ctx, state))
                    .await;
                if result.is_ok() {
                    if let Some(pad) = self.pads.get_mut(pad_ref) {
                        pad.caps = Some(caps);
                    }
                }
                result
            }
        }
    }

    async fn handle_event_message(&mut self, pad_ref: PadRef, event: Event, sync: bool) -> Result<()> {
        let timing = if sync { EventTiming::Sync } else { EventTiming::Async };
        let disposition = {
            let pad = self.pads.get_mut(pad_ref).ok_or_else(|| Error::LinkError {
                reason: format!("unknown pad {pad_ref}"),
            })?;
            event_caps::handle_event(pad, pad_ref, event.clone(), timing)?
        };
        match disposition {
            Disposition::Stored => Ok(()),
            Disposition::Dispatch => {
                self.run_callback(Origin::EventHandler, move |b, ctx, state| {
                    b.handle_event(pad_ref, event.clone(), ctx, state)
                })
                .await
            }
        }
    }

    async fn handle_demand_message(&mut self, pad_ref: PadRef, amount: u64) -> Result<()> {
        let outcome = demand::handle_demand(&mut self.pads, pad_ref, amount)?;

        for (input_ref, top_up) in outcome.auto_demand_requests {
            self.send_demand_upstream(input_ref, top_up).await;
        }

        if outcome.invoke_callback {
            self.run_callback(Origin::Demand, move |b, ctx, state| {
                b.handle_demand(pad_ref, outcome.total, ctx, state)
            })
            .await
        } else {
            Ok(())
        }
    }

    async fn send_demand_upstream(&mut self, pad_ref: PadRef, amount: u64) {
        let peer = self.pads.get(pad_ref).and_then(|p| p.peer.clone());
        if let Some(peer) = peer {
            let _ = peer
                .address
                .send(ElementMessage::Demand {
                    pad: peer.pad_ref,
                    amount,
                })
                .await;
        }
    }

    async fn handle_link(
        &mut self,
        pad_name: &'static str,
        peer: PeerHandle,
        peer_mode: Mode,
        peer_demand_unit: crate::pad::DemandUnit,
        offered_caps: Option<crate::pad::Caps>,
    ) -> Result<()> {
        let peer_address = peer.address.clone();
        let peer_ref = peer.pad_ref;
        let pad_ref = self.pads.get_pad_ref(pad_name)?;

        let resolution = self
            .pads
            .handle_link(pad_ref, peer_mode, peer_demand_unit, peer, offered_caps.as_ref())?;
        let local_ref = resolution.local_ref;

        telemetry::link_new(self.telemetry, &self.name, peer_ref.name());

        if let Some(initial_demand) = resolution.initial_demand {
            self.send_demand_upstream(local_ref, initial_demand).await;
        }

        if resolution.announce_push_to_peer {
            let _ = peer_address
                .send(ElementMessage::PushModeAnnouncement(peer_ref))
                .await;
        }

        if self.pads.is_linking_finished() {
            self.run_callback(Origin::PadAdded, move |b, ctx, state| b.handle_pad_added(local_ref, ctx, state))
                .await
        } else {
            Ok(())
        }
    }

    async fn handle_timer_tick(&mut self, id: String) -> Result<()> {
        self.run_callback(Origin::Tick, move |b, ctx, state| b.handle_tick(&id, ctx, state))
            .await
    }

    fn handle_clock_update(&mut self, _ratio: Ratio) {
        // `TimerController` reads `self.clock` directly on each rearm,
        // so there's nothing further to recompute here; this hook
        // exists for behaviors that want to observe ratio changes via
        // `handle_tick`-adjacent bookkeeping in a future extension.
    }

    async fn transition(&mut self, target: PlaybackTarget) -> Result<()> {
        let target_state = PlaybackState::from_target(target);
        if !self.playback.can_reach(target_state) {
            return Err(Error::InvalidMessage {
                msg: "change_playback_state".into(),
                mode: format!("{:?}->{:?}", self.playback, target_state),
            });
        }
        if self.pending_transition.is_some() {
            return Err(Error::BadActivityRequest);
        }
        self.pending_transition = Some(target);

        let origin = match (self.playback, target_state) {
            (PlaybackState::Stopped, PlaybackState::Prepared) => Origin::StoppedToPrepared,
            (PlaybackState::Prepared, PlaybackState::Playing) => Origin::PreparedToPlaying,
            (PlaybackState::Playing, PlaybackState::Prepared) => Origin::PlayingToPrepared,
            (PlaybackState::Prepared, PlaybackState::Stopped) => Origin::PreparedToStopped,
            _ => unreachable!("can_reach guarantees an adjacent pair"),
        };

        let result = match origin {
            Origin::StoppedToPrepared => {
                self.run_callback(origin, |b, ctx, s| b.handle_stopped_to_prepared(ctx, s)).await
            }
            Origin::PreparedToPlaying => {
                self.run_callback(origin, |b, ctx, s| b.handle_prepared_to_playing(ctx, s)).await
            }
            Origin::PlayingToPrepared => {
                self.run_callback(origin, |b, ctx, s| b.handle_playing_to_prepared(ctx, s)).await
            }
            Origin::PreparedToStopped => {
                self.run_callback(origin, |b, ctx, s| b.handle_prepared_to_stopped(ctx, s)).await
            }
            _ => unreachable!(),
        };

        self.pending_transition = None;

        match result {
            Ok(()) => {
                // Drain before committing: a failed drain must leave
                // playback exactly where it was rather than reporting
                // `playing` reached while messages remain queued
                // (spec.md §4.6 "drain failures abort the transition").
                if target_state == PlaybackState::Playing {
                    self.drain_deferred().await?;
                }
                self.playback = target_state;
                tracing::info!(element = %self.name, state = ?target_state, "playback transition");
                if target_state == PlaybackState::Stopped {
                    self.terminating = true;
                }
                if let Some(parent) = &self.parent {
                    let _ = parent
                        .send(ElementMessage::Notification(UserMessage::new(PlaybackStateChanged {
                            state: target_state,
                        })))
                        .await;
                }
                Ok(())
            }
            Err(err) => {
                self.playback = PlaybackState::Stopped;
                self.terminating = true;
                Err(err)
            }
        }
    }

    async fn drain_deferred(&mut self) -> Result<()> {
        while let Some(msg) = self.deferred.pop_front() {
            if let Err(err) = self.dispatch_data(msg.clone()).await {
                self.deferred.push_front(msg);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Invokes a behavior callback and applies the actions it returns.
    /// Actions are processed only after the callback returns, never
    /// during (spec.md §9 "Action handler reentrancy").
    async fn run_callback<F>(&mut self, origin: Origin, f: F) -> Result<()>
    where
        F: FnOnce(&B, Context<'_>, B::State) -> Result<CallbackResult<B::State>>,
    {
        let ctx = Context {
            element_name: &self.name,
            sync: self.sync.as_ref(),
        };
        let state = self.state.take().expect("state present between messages");
        match f(&self.behavior, ctx, state) {
            Ok(CallbackResult { actions, state }) => {
                self.state = Some(state);
                self.apply_actions(actions, origin).await
            }
            Err(err) => {
                self.terminating = true;
                self.playback = PlaybackState::Stopped;
                Err(err)
            }
        }
    }

    async fn apply_actions(&mut self, actions: Vec<Action>, origin: Origin) -> Result<()> {
        for action in actions {
            action::validate(&action, origin)?;
            self.apply_action(action).await?;
        }
        Ok(())
    }

    async fn apply_action(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Buffer { pad, batch } => self.send_buffer(pad, batch).await,
            Action::Caps { pad, caps } => self.send_caps(pad, caps).await,
            Action::Event { pad, event } => self.send_event(pad, event).await,
            Action::Demand { pad, amount } => {
                self.send_demand_upstream(pad, amount).await;
                Ok(())
            }
            Action::Redemand { pad } => self.redemand(pad).await,
            Action::Forward { to, payload } => to.send(ElementMessage::Other(payload)).await,
            Action::Notify { payload } => {
                if let Some(parent) = &self.parent {
                    parent.send(ElementMessage::Notification(payload)).await
                } else {
                    Ok(())
                }
            }
            Action::StartTimer { id, interval, repeating } => {
                self.timers.start_timer(id, Timer { interval, repeating })
            }
            Action::StopTimer { id } => self.timers.stop_timer(&id),
            Action::EndOfStream { pad } => self.send_event(pad, Event::EndOfStream).await,
        }
    }

    async fn send_buffer(&mut self, pad: PadRef, batch: BufferBatch) -> Result<()> {
        let peer = self.pads.get(pad).and_then(|p| p.peer.clone());
        let count = batch.0.len() as i64;
        if let Some(p) = self.pads.get_mut(pad) {
            p.demand -= count;
        }
        if let Some(peer) = peer {
            peer.address
                .send(ElementMessage::Buffer {
                    pad: peer.pad_ref,
                    batch,
                })
                .await?;
        }
        Ok(())
    }

    async fn send_caps(&mut self, pad: PadRef, caps: crate::pad::Caps) -> Result<()> {
        let peer = self.pads.get(pad).and_then(|p| p.peer.clone());
        if let Some(p) = self.pads.get_mut(pad) {
            p.caps = Some(caps.clone());
        }
        if let Some(peer) = peer {
            peer.address
                .send(ElementMessage::Caps {
                    pad: peer.pad_ref,
                    caps,
                })
                .await?;
        }
        Ok(())
    }

    async fn send_event(&mut self, pad: PadRef, event: Event) -> Result<()> {
        let peer = self.pads.get(pad).and_then(|p| p.peer.clone());
        if let Some(peer) = peer {
            peer.address
                .send(ElementMessage::Event {
                    pad: peer.pad_ref,
                    event,
                    sync: true,
                })
                .await?;
        }
        Ok(())
    }

    /// Re-invokes `handle_demand` for `pad` with its current total,
    /// without changing the demand counter. Boxed to break the
    /// `run_callback` → `apply_action` → `redemand` → `run_callback`
    /// cycle, since recursive `async fn`s need an indirection point
    /// with a fixed-size future.
    fn redemand(&mut self, pad: PadRef) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let total = self
                .pads
                .get(pad)
                .map(|p| p.demand)
                .ok_or_else(|| Error::LinkError {
                    reason: format!("unknown pad {pad}"),
                })?;
            self.run_callback(Origin::Demand, move |b, ctx, state| b.handle_demand(pad, total, ctx, state))
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::{Availability, Caps, DemandUnit, PadOptions};
    use crate::runtime::TokioSpawner;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc as tmpsc;

    /// A no-op behavior that records every `handle_process` invocation
    /// onto an unbounded channel, so a test can observe dispatch order
    /// without reaching into the actor's private state.
    struct RecordingBehavior {
        processed: tmpsc::UnboundedSender<Vec<Bytes>>,
    }

    impl ElementBehavior for RecordingBehavior {
        type State = ();
        type Options = ();

        fn handle_init(&self, _ctx: Context<'_>, _options: ()) -> Result<()> {
            Ok(())
        }

        fn handle_stopped_to_prepared(&self, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_prepared_to_playing(&self, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_playing_to_prepared(&self, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_prepared_to_stopped(&self, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_pad_added(&self, _pad: PadRef, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_pad_removed(&self, _pad: PadRef, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_demand(&self, _pad: PadRef, _size: i64, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_process(&self, _pad: PadRef, batch: BufferBatch, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            let _ = self.processed.send(batch.0);
            Ok(CallbackResult::state_only(state))
        }

        fn handle_caps(&self, _pad: PadRef, _caps: Caps, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_event(&self, _pad: PadRef, _event: Event, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_tick(&self, _id: &str, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_other(&self, _msg: UserMessage, _ctx: Context<'_>, state: ()) -> Result<CallbackResult<()>> {
            Ok(CallbackResult::state_only(state))
        }

        fn handle_shutdown(&self, _state: ()) {}
    }

    fn push_input_template(name: &'static str) -> PadTemplate {
        PadTemplate {
            name,
            direction: Direction::Input,
            mode: Mode::Push,
            demand_unit: DemandUnit::Buffers,
            availability: Availability::Always,
            accepted_caps: Box::new(|_: &Caps| true),
            pad_options: PadOptions::default(),
            demand_pads: Vec::new(),
        }
    }

    /// End-to-end rendition of spec.md §8 scenario 3: an element in
    /// `prepared` receives two buffers, which must be deferred; once
    /// `handle_prepared_to_playing` completes, `handle_process` fires
    /// exactly once per buffer, in production order.
    #[tokio::test]
    async fn playback_deferral_replays_buffers_in_order_once_playing() {
        let spawner = TokioSpawner::current();
        let (tx, mut rx) = tmpsc::unbounded_channel();
        let behavior = RecordingBehavior { processed: tx };

        let options = ElementOptions::new("sink", behavior, (), vec![push_input_template("sink")]);
        let handle = start(&spawner, options).unwrap();

        let b1 = BufferBatch::single(Bytes::from_static(b"one"));
        let b2 = BufferBatch::single(Bytes::from_static(b"two"));

        handle
            .address
            .send(ElementMessage::Buffer {
                pad: PadRef::Static("sink"),
                batch: b1.clone(),
            })
            .await
            .unwrap();
        handle
            .address
            .send(ElementMessage::Buffer {
                pad: PadRef::Static("sink"),
                batch: b2.clone(),
            })
            .await
            .unwrap();

        // Still `stopped`: both buffers above sit in the deferred queue,
        // nothing has been processed yet.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err(), "buffers must not process before playing");

        handle
            .change_playback_state(crate::message::PlaybackTarget::Prepared)
            .await
            .unwrap();
        handle
            .change_playback_state(crate::message::PlaybackTarget::Playing)
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("handle_process should fire for the first deferred buffer")
            .unwrap();
        assert_eq!(first[0], Bytes::from_static(b"one"));

        let second = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("handle_process should fire for the second deferred buffer")
            .unwrap();
        assert_eq!(second[0], Bytes::from_static(b"two"));
    }

    /// Once in `playing`, a push-mode input buffer takes the hot path
    /// (spec.md §4.1) straight into `handle_process`, without touching
    /// the deferred queue.
    #[tokio::test]
    async fn playing_buffers_take_the_hot_path() {
        let spawner = TokioSpawner::current();
        let (tx, mut rx) = tmpsc::unbounded_channel();
        let behavior = RecordingBehavior { processed: tx };

        let options = ElementOptions::new("sink", behavior, (), vec![push_input_template("sink")]);
        let handle = start(&spawner, options).unwrap();

        handle
            .change_playback_state(crate::message::PlaybackTarget::Prepared)
            .await
            .unwrap();
        handle
            .change_playback_state(crate::message::PlaybackTarget::Playing)
            .await
            .unwrap();

        handle
            .address
            .send(ElementMessage::Buffer {
                pad: PadRef::Static("sink"),
                batch: BufferBatch::single(Bytes::from_static(b"live")),
            })
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("hot path should deliver the buffer immediately")
            .unwrap();
        assert_eq!(received[0], Bytes::from_static(b"live"));
    }

    /// A non-adjacent transition request (`stopped` straight to
    /// `playing`) is rejected; the element stays in `stopped` rather
    /// than skipping `prepared`, per spec.md §3 "Transitions are
    /// adjacent only".
    #[tokio::test]
    async fn non_adjacent_transition_is_rejected() {
        let spawner = TokioSpawner::current();
        let (tx, mut rx) = tmpsc::unbounded_channel();
        let behavior = RecordingBehavior { processed: tx };

        let options = ElementOptions::new("sink", behavior, (), vec![push_input_template("sink")]);
        let handle = start(&spawner, options).unwrap();

        // `stopped -> playing` skips `prepared`; the actor rejects it
        // and stays in `stopped` rather than advancing.
        handle
            .change_playback_state(crate::message::PlaybackTarget::Playing)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle
            .address
            .send(ElementMessage::Buffer {
                pad: PadRef::Static("sink"),
                batch: BufferBatch::single(Bytes::from_static(b"still-stopped")),
            })
            .await
            .unwrap();

        // Since playback never reached `playing`, the buffer is
        // deferred rather than processed — confirmed by following up
        // with a valid stopped->prepared->playing climb and observing
        // the deferred buffer drain in turn.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "buffer must not process while stuck in stopped");

        handle
            .change_playback_state(crate::message::PlaybackTarget::Prepared)
            .await
            .unwrap();
        handle
            .change_playback_state(crate::message::PlaybackTarget::Playing)
            .await
            .unwrap();

        let drained = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("the deferred buffer drains once playing is finally reached")
            .unwrap();
        assert_eq!(drained[0], Bytes::from_static(b"still-stopped"));
    }
}
