//! Synchronization barriers with latency compensation.
//!
//! A `SyncBarrier` coordinates a cohort of elements (typically sinks)
//! that must start producing output together despite differing
//! per-member processing latency. Grounded on the teacher's
//! `services/sync_group_manager.rs`, which tracks a group of Sonos
//! players and releases them together once every member has reported
//! ready; generalized here to latency-compensated release timing
//! (spec.md §4.7's "release = max(reported latencies) - own latency").

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::runtime::TaskSpawner;

/// Options controlling a barrier's idle behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// When `true`, a barrier with zero registered members is
    /// considered satisfied immediately rather than waiting forever.
    pub empty_exit: bool,
}

/// One registered member's state within a barrier.
#[derive(Debug, Clone, Copy)]
struct Member {
    latency: Option<Duration>,
}

/// Lifecycle state of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Active,
}

/// A rendezvous point for a cohort of elements, each registering its
/// own processing latency and then waiting to be released in lockstep.
/// Owned by whichever element runs the synchronization role (spec.md
/// §4.7); not shared across tasks — other members reach it only by
/// sending messages to that owning element.
pub struct SyncBarrier {
    members: HashMap<&'static str, Member>,
    state: State,
    options: SyncOptions,
}

impl SyncBarrier {
    /// Builds an idle barrier with no registered members.
    #[must_use]
    pub fn new(options: SyncOptions) -> Self {
        Self {
            members: HashMap::new(),
            state: State::Idle,
            options,
        }
    }

    /// Adds `name` to the cohort with no reported latency yet. Only
    /// valid while the barrier is inactive (spec.md §4.7); errors with
    /// `BadActivityRequest` if called while active.
    pub fn register(&mut self, name: &'static str) -> Result<()> {
        if self.state == State::Active {
            return Err(Error::BadActivityRequest);
        }
        self.members.entry(name).or_insert(Member { latency: None });
        Ok(())
    }

    /// Removes `name` from the cohort.
    pub fn unregister(&mut self, name: &'static str) {
        self.members.remove(name);
    }

    /// `true` while the barrier accepts `report_latency` calls.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// Transitions the barrier into `Active`, in which members may
    /// report latency and be released. Errors if already active
    /// (spec.md §9's `BadActivityRequest`).
    pub fn activate(&mut self) -> Result<()> {
        if self.state == State::Active {
            return Err(Error::BadActivityRequest);
        }
        self.state = State::Active;
        Ok(())
    }

    /// Returns the barrier to `Idle`, clearing every member's reported
    /// latency. Errors if already idle.
    pub fn deactivate(&mut self) -> Result<()> {
        if self.state == State::Idle {
            return Err(Error::BadActivityRequest);
        }
        self.state = State::Idle;
        for member in self.members.values_mut() {
            member.latency = None;
        }
        Ok(())
    }

    /// Records `name`'s processing latency. Errors if the barrier isn't
    /// active or `name` isn't registered.
    pub fn report_latency(&mut self, name: &'static str, latency: Duration) -> Result<()> {
        if self.state != State::Active {
            return Err(Error::BadActivityRequest);
        }
        let member = self
            .members
            .get_mut(name)
            .ok_or(Error::BadActivityRequest)?;
        member.latency = Some(latency);
        Ok(())
    }

    /// `true` once every registered member has reported a latency (or
    /// the cohort is empty and `empty_exit` is set).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        if self.members.is_empty() {
            return self.options.empty_exit;
        }
        self.members.values().all(|m| m.latency.is_some())
    }

    /// Computes each registered member's release delay: the highest
    /// reported latency in the cohort minus that member's own latency,
    /// so every member's output lands at the same wall-clock moment
    /// (spec.md §4.7). Returns `None` if not every member has reported
    /// yet. Members with no reported latency are omitted.
    #[must_use]
    pub fn release_delays(&self) -> Option<HashMap<&'static str, Duration>> {
        if !self.is_ready() || self.members.is_empty() {
            return if self.members.is_empty() && self.is_ready() {
                Some(HashMap::new())
            } else {
                None
            };
        }
        let max_latency = self
            .members
            .values()
            .filter_map(|m| m.latency)
            .max()
            .expect("is_ready verified every member has a latency");

        Some(
            self.members
                .iter()
                .filter_map(|(name, member)| {
                    member.latency.map(|latency| (*name, max_latency - latency))
                })
                .collect(),
        )
    }
}

/// A request sent to a running [`SyncService`] through a [`SyncHandle`].
enum Command {
    Register {
        name: &'static str,
        reply: oneshot::Sender<Result<()>>,
    },
    Unregister {
        name: &'static str,
    },
    Activate {
        reply: oneshot::Sender<Result<()>>,
    },
    Deactivate {
        reply: oneshot::Sender<Result<()>>,
    },
    Sync {
        name: &'static str,
        latency: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Hosts one [`SyncBarrier`] as its own task and releases cohorts with
/// real delayed replies, per spec.md §4.7: "schedules a delayed reply to
/// each group at time `(max_latency - latency)`". Reached only through
/// a [`SyncHandle`] — the "optional synchronization handle" spec.md §3
/// lists on Element — never shared directly, matching `PullBuffer`'s
/// single-owner-task discipline (spec.md §5).
struct SyncService<Sp> {
    barrier: SyncBarrier,
    rx: mpsc::Receiver<Command>,
    pending: Vec<(&'static str, oneshot::Sender<Result<()>>)>,
    spawner: Sp,
}

impl<Sp: TaskSpawner + 'static> SyncService<Sp> {
    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Register { name, reply } => {
                    let _ = reply.send(self.barrier.register(name));
                }
                Command::Unregister { name } => {
                    self.barrier.unregister(name);
                    self.pending.retain(|(pending_name, _)| *pending_name != name);
                }
                Command::Activate { reply } => {
                    let _ = reply.send(self.barrier.activate());
                }
                Command::Deactivate { reply } => {
                    let result = self.barrier.deactivate();
                    if result.is_ok() {
                        for (_, pending_reply) in self.pending.drain(..) {
                            let _ = pending_reply.send(Err(Error::BadActivityRequest));
                        }
                    }
                    let _ = reply.send(result);
                }
                Command::Sync { name, latency, reply } => self.handle_sync(name, latency, reply),
            }
        }
    }

    fn handle_sync(&mut self, name: &'static str, latency: Duration, reply: oneshot::Sender<Result<()>>) {
        if !self.barrier.is_active() {
            let _ = reply.send(Ok(()));
            return;
        }
        if let Err(err) = self.barrier.report_latency(name, latency) {
            let _ = reply.send(Err(err));
            return;
        }
        self.pending.push((name, reply));
        if let Some(delays) = self.barrier.release_delays() {
            self.release(delays);
            let _ = self.barrier.deactivate();
            let _ = self.barrier.activate();
        }
    }

    /// Groups the now-ready cohort by release delay and spawns one task
    /// per group so every member in a group is replied to in the same
    /// wakeup, simultaneously (spec.md §8 scenario 4).
    fn release(&mut self, delays: HashMap<&'static str, Duration>) {
        let mut groups: HashMap<Duration, Vec<oneshot::Sender<Result<()>>>> = HashMap::new();
        for (name, reply) in self.pending.drain(..) {
            let delay = delays.get(name).copied().unwrap_or_default();
            groups.entry(delay).or_default().push(reply);
        }
        for (delay, replies) in groups {
            self.spawner.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                for reply in replies {
                    let _ = reply.send(Ok(()));
                }
            });
        }
    }
}

/// A cheap, cloneable reference to a running [`SyncService`] — the only
/// way other elements reach a sync cohort, per spec.md §5's
/// message-only interaction rule.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SyncHandle(..)")
    }
}

impl SyncHandle {
    /// Spawns a [`SyncService`] task owning a fresh [`SyncBarrier`] and
    /// returns a handle to it.
    pub fn start<Sp>(spawner: &Sp, options: SyncOptions) -> Self
    where
        Sp: TaskSpawner + Clone + 'static,
    {
        let (tx, rx) = mpsc::channel(32);
        let service = SyncService {
            barrier: SyncBarrier::new(options),
            rx,
            pending: Vec::new(),
            spawner: spawner.clone(),
        };
        spawner.spawn(service.run());
        Self { tx }
    }

    /// Adds `name` to the cohort.
    pub async fn register(&self, name: &'static str) -> Result<()> {
        self.call(|reply| Command::Register { name, reply }).await
    }

    /// Removes `name` from the cohort.
    pub async fn unregister(&self, name: &'static str) {
        let _ = self.tx.send(Command::Unregister { name }).await;
    }

    /// Activates the barrier.
    pub async fn activate(&self) -> Result<()> {
        self.call(|reply| Command::Activate { reply }).await
    }

    /// Deactivates the barrier.
    pub async fn deactivate(&self) -> Result<()> {
        self.call(|reply| Command::Deactivate { reply }).await
    }

    /// Reports `latency` for `name` and awaits release: resolves
    /// immediately if the barrier is inactive, otherwise once every
    /// registered member has reported and this member's compensated
    /// delay has elapsed.
    pub async fn sync(&self, name: &'static str, latency: Duration) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Sync { name, latency, reply }).await.is_err() {
            return Err(Error::BadActivityRequest);
        }
        rx.await.unwrap_or(Err(Error::BadActivityRequest))
    }

    async fn call(&self, make: impl FnOnce(oneshot::Sender<Result<()>>) -> Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(make(reply)).await.is_err() {
            return Err(Error::BadActivityRequest);
        }
        rx.await.unwrap_or(Err(Error::BadActivityRequest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_twice_is_rejected() {
        let mut barrier = SyncBarrier::new(SyncOptions::default());
        barrier.activate().unwrap();
        assert!(matches!(
            barrier.activate().unwrap_err(),
            Error::BadActivityRequest
        ));
    }

    #[test]
    fn report_latency_before_activation_is_rejected() {
        let mut barrier = SyncBarrier::new(SyncOptions::default());
        barrier.register("sink_a").unwrap();
        assert!(matches!(
            barrier
                .report_latency("sink_a", Duration::from_millis(5))
                .unwrap_err(),
            Error::BadActivityRequest
        ));
    }

    #[test]
    fn not_ready_until_every_member_reports() {
        let mut barrier = SyncBarrier::new(SyncOptions::default());
        barrier.register("sink_a").unwrap();
        barrier.register("sink_b").unwrap();
        barrier.activate().unwrap();
        barrier
            .report_latency("sink_a", Duration::from_millis(5))
            .unwrap();
        assert!(!barrier.is_ready());
        barrier
            .report_latency("sink_b", Duration::from_millis(12))
            .unwrap();
        assert!(barrier.is_ready());
    }

    #[test]
    fn release_delays_compensate_for_the_slowest_member() {
        let mut barrier = SyncBarrier::new(SyncOptions::default());
        barrier.register("sink_a").unwrap();
        barrier.register("sink_b").unwrap();
        barrier.activate().unwrap();
        barrier
            .report_latency("sink_a", Duration::from_millis(5))
            .unwrap();
        barrier
            .report_latency("sink_b", Duration::from_millis(20))
            .unwrap();

        let delays = barrier.release_delays().unwrap();
        assert_eq!(delays["sink_a"], Duration::from_millis(15));
        assert_eq!(delays["sink_b"], Duration::from_millis(0));
    }

    #[test]
    fn empty_cohort_waits_unless_empty_exit_is_set() {
        let waiting = SyncBarrier::new(SyncOptions { empty_exit: false });
        assert!(!waiting.is_ready());

        let exits = SyncBarrier::new(SyncOptions { empty_exit: true });
        assert!(exits.is_ready());
    }

    #[test]
    fn deactivate_clears_reported_latencies() {
        let mut barrier = SyncBarrier::new(SyncOptions::default());
        barrier.register("sink_a").unwrap();
        barrier.activate().unwrap();
        barrier
            .report_latency("sink_a", Duration::from_millis(5))
            .unwrap();
        barrier.deactivate().unwrap();
        barrier.activate().unwrap();
        assert!(!barrier.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn handle_releases_cohort_simultaneously_after_compensated_delay() {
        use crate::runtime::TokioSpawner;
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let spawner = TokioSpawner::current();
        let handle = SyncHandle::start(&spawner, SyncOptions::default());
        handle.register("sink_a").await.unwrap();
        handle.register("sink_b").await.unwrap();
        handle.activate().await.unwrap();

        let a_done = Arc::new(AtomicBool::new(false));
        let b_done = Arc::new(AtomicBool::new(false));

        let a_task = {
            let handle = handle.clone();
            let a_done = a_done.clone();
            tokio::spawn(async move {
                handle.sync("sink_a", Duration::from_millis(5)).await.unwrap();
                a_done.store(true, Ordering::SeqCst);
            })
        };
        let b_task = {
            let handle = handle.clone();
            let b_done = b_done.clone();
            tokio::spawn(async move {
                handle.sync("sink_b", Duration::from_millis(20)).await.unwrap();
                b_done.store(true, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!a_done.load(Ordering::SeqCst));
        assert!(!b_done.load(Ordering::SeqCst));

        tokio::time::advance(Duration::from_millis(20)).await;
        a_task.await.unwrap();
        b_task.await.unwrap();
        assert!(a_done.load(Ordering::SeqCst));
        assert!(b_done.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_sync_returns_immediately_when_inactive() {
        use crate::runtime::TokioSpawner;

        let spawner = TokioSpawner::current();
        let handle = SyncHandle::start(&spawner, SyncOptions::default());
        handle.register("sink_a").await.unwrap();

        handle.sync("sink_a", Duration::from_millis(50)).await.unwrap();
    }
}
