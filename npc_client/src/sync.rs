//! Sync loop.
//!
//! Steady-state cycle started after bootstrap reaches `Ready`. The host calls
//! `tick` every frame; a cycle starts only when
//! - at least `interval` has passed since the previous cycle started, and
//! - the previous cycle's exchange has resolved.
//!
//! A started cycle snapshots the registry and spawns the exchange, so `tick`
//! never waits on the network. When the response arrives, updates are fanned
//! out to controllers. Failures are logged and otherwise ignored; the next
//! eligible tick simply tries again. A cycle that panics in a host
//! collaborator is counted as failed and still frees the loop for the next
//! cycle.
//!
//! Teardown clears the registry, which bumps its generation. A response that
//! arrives afterwards sees the generation mismatch and is dropped.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use npc_shared::protocol::{SyncRequest, SyncResponse};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    bootstrap::Ready,
    registry::{ActorRegistry, ActorSnapshot, SharedRegistry},
    transport::{self, Transport},
};

/// What a call to `tick` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new exchange was started.
    Started,
    /// Less than the update interval since the last cycle started.
    NotDue,
    /// Due, but the previous exchange is still outstanding.
    InFlight,
    /// The loop was shut down.
    Stopped,
}

/// Cumulative counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub updates_applied: u64,
    pub unknown_ignored: u64,
    pub stale_discarded: u64,
    pub skipped_in_flight: u64,
}

#[derive(Debug, Default)]
struct SyncCounters {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    updates_applied: AtomicU64,
    unknown_ignored: AtomicU64,
    stale_discarded: AtomicU64,
    skipped_in_flight: AtomicU64,
}

impl SyncCounters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn load(&self) -> SyncStats {
        SyncStats {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            unknown_ignored: self.unknown_ignored.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            skipped_in_flight: self.skipped_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time upload built from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    /// Actors in registry insertion order.
    pub actors: Vec<ActorSnapshot>,
    /// Seconds since the previous cycle started.
    pub delta_time: f32,
}

impl SyncSnapshot {
    pub fn capture(registry: &ActorRegistry, elapsed: Duration) -> Self {
        Self {
            actors: registry.snapshot_all(),
            delta_time: elapsed.as_secs_f32(),
        }
    }

    /// Wire form for `unity/update`.
    pub fn to_request(&self) -> SyncRequest {
        let mut req = SyncRequest {
            delta_time: self.delta_time,
            ..Default::default()
        };
        for actor in &self.actors {
            req.npc_positions.insert(actor.id.clone(), actor.position);
            if let Some(label) = &actor.animation {
                req.npc_animations.insert(actor.id.clone(), label.clone());
            }
        }
        req
    }
}

/// Timer-gated snapshot/update cycle.
pub struct SyncLoop {
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    interval: Duration,
    ready_at: Instant,
    last_start: Option<Instant>,
    in_flight: Arc<AtomicBool>,
    counters: Arc<SyncCounters>,
    pending: Option<JoinHandle<()>>,
    stopped: bool,
}

impl SyncLoop {
    /// Creates the loop. Requires the proof that bootstrap finished.
    pub fn new(
        ready: Ready,
        transport: Arc<dyn Transport>,
        registry: SharedRegistry,
        interval: Duration,
    ) -> Self {
        info!(
            interval_ms = interval.as_millis() as u64,
            npcs = ready.report().created.len(),
            "Starting NPC sync"
        );
        Self {
            transport,
            registry,
            interval,
            ready_at: ready.at(),
            last_start: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(SyncCounters::default()),
            pending: None,
            stopped: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn stats(&self) -> SyncStats {
        self.counters.load()
    }

    /// One scheduling opportunity at time `now`.
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.stopped {
            return TickOutcome::Stopped;
        }
        if let Some(last) = self.last_start {
            if now.saturating_duration_since(last) < self.interval {
                return TickOutcome::NotDue;
            }
        }
        if self.pending.as_ref().is_some_and(JoinHandle::is_finished) {
            self.wait_in_flight().await;
        }
        if self.is_in_flight() {
            SyncCounters::bump(&self.counters.skipped_in_flight, 1);
            debug!("Previous NPC sync still in flight; skipping cycle");
            return TickOutcome::InFlight;
        }

        let elapsed = now.saturating_duration_since(self.last_start.unwrap_or(self.ready_at));
        let (snapshot, generation) = {
            let registry = self.registry.lock().await;
            (
                SyncSnapshot::capture(&registry, elapsed),
                registry.generation(),
            )
        };

        let in_flight = InFlight::acquire(&self.in_flight);
        self.last_start = Some(now);
        SyncCounters::bump(&self.counters.started, 1);

        let cycle = SyncCycle {
            transport: self.transport.clone(),
            registry: self.registry.clone(),
            _in_flight: in_flight,
            counters: self.counters.clone(),
            generation,
        };
        self.pending = Some(tokio::spawn(cycle.run(snapshot.to_request())));
        TickOutcome::Started
    }

    /// Waits until the outstanding exchange, if any, has been resolved.
    /// A cycle that panicked counts as failed.
    pub async fn wait_in_flight(&mut self) {
        if let Some(handle) = self.pending.take() {
            if let Err(e) = handle.await {
                SyncCounters::bump(&self.counters.failed, 1);
                warn!(error = %e, "NPC sync task ended abnormally");
            }
        }
    }

    /// Stops scheduling and clears the registry. A response still in flight
    /// will be discarded when it lands.
    pub async fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.registry.lock().await.clear();
        info!(in_flight = self.is_in_flight(), "NPC sync stopped; registry cleared");
    }

    /// Drives `tick` once per `frame_interval` until `shutdown` reads true or
    /// its sender goes away, then shuts the loop down.
    pub async fn run(
        mut self,
        frame_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> SyncStats {
        let mut frames = tokio::time::interval(frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !*shutdown.borrow() {
            tokio::select! {
                now = frames.tick() => {
                    self.tick(now).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        self.stats()
    }
}

/// Holds the in-flight flag for one cycle and clears it on drop, including
/// when the cycle's task panics or is cancelled.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One spawned exchange.
struct SyncCycle {
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    _in_flight: InFlight,
    counters: Arc<SyncCounters>,
    generation: u64,
}

impl SyncCycle {
    async fn run(self, request: SyncRequest) {
        match transport::sync(self.transport.as_ref(), &request).await {
            Ok(response) => self.apply(response).await,
            Err(e) => {
                SyncCounters::bump(&self.counters.failed, 1);
                warn!(error = %e, "NPC sync exchange failed");
            }
        }
    }

    async fn apply(&self, response: SyncResponse) {
        let mut registry = self.registry.lock().await;
        if registry.generation() != self.generation {
            SyncCounters::bump(&self.counters.stale_discarded, 1);
            debug!("Discarding NPC sync response from a torn-down session");
            return;
        }
        SyncCounters::bump(&self.counters.succeeded, 1);

        let mut applied = 0;
        let mut unknown = 0;
        for (id, update) in &response.npc_updates {
            match registry.get_mut(id) {
                Some(controller) => {
                    controller.apply_update(update);
                    applied += 1;
                }
                None => {
                    debug!(npc_id = %id, "Ignoring update for unknown NPC");
                    unknown += 1;
                }
            }
        }
        SyncCounters::bump(&self.counters.updates_applied, applied);
        SyncCounters::bump(&self.counters.unknown_ignored, unknown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bootstrap::{BootstrapOptions, BootstrapSequencer},
        testing::{RecordingHost, RecordingSink, ScriptedTransport},
        transport::TransportError,
    };
    use npc_shared::{
        math::Vec3,
        protocol::{ActorId, Route},
    };
    use serde_json::json;

    /// Bootstraps actors `a` and `b`, then hands back a sync loop over the
    /// same transport.
    async fn ready_loop(transport: ScriptedTransport, interval_ms: u64) -> (SyncLoop, SharedRegistry) {
        let registry = ActorRegistry::shared();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let ready = BootstrapSequencer::new(
            transport.clone(),
            registry.clone(),
            BootstrapOptions::immediate(),
        )
        .run(&mut RecordingHost::default(), &mut RecordingSink::default())
        .await
        .unwrap();
        let sync = SyncLoop::new(
            ready,
            transport,
            registry.clone(),
            Duration::from_millis(interval_ms),
        );
        (sync, registry)
    }

    fn backend(sync: impl Fn(&serde_json::Value) -> Result<serde_json::Value, TransportError> + Send + Sync + 'static) -> ScriptedTransport {
        ScriptedTransport::new(move |route, payload| match route {
            Route::World => Ok(json!({"npcs": ["a", "b"]})),
            Route::Npc(_) => Ok(json!({
                "position": {"x": 0.0, "y": 0.0, "z": 0.0},
                "animation_state": "idle"
            })),
            Route::Sync => sync(payload),
            other => Err(TransportError::status(other, 404, "unexpected")),
        })
    }

    fn ms(base: Instant, n: u64) -> Instant {
        base + Duration::from_millis(n)
    }

    #[tokio::test]
    async fn applies_updates_and_ignores_unknown_ids() {
        let transport = backend(|payload| {
            assert_eq!(payload["npc_animations"]["a"], "idle");
            assert_eq!(payload["npc_positions"]["b"]["x"], 0.0);
            Ok(json!({"npc_updates": {
                "a": {"target_position": {"x": 3.0, "y": 0.0, "z": 4.0}},
                "b": {"desired_animation": "wave", "dialogue_state": {"greeting": "hi"}},
                "ghost": {"desired_animation": "walk"}
            }}))
        });
        let (mut sync, registry) = ready_loop(transport, 100).await;

        assert_eq!(sync.tick(Instant::now()).await, TickOutcome::Started);
        sync.wait_in_flight().await;

        let reg = registry.lock().await;
        let a = reg.get(&ActorId::from("a")).unwrap();
        assert_eq!(a.goal(), Some(Vec3::new(3.0, 0.0, 4.0)));
        assert_eq!(a.animation(), Some("idle"));
        let b = reg.get(&ActorId::from("b")).unwrap();
        assert_eq!(b.animation(), Some("wave"));
        assert_eq!(b.goal(), None);
        assert_eq!(b.dialogue()["greeting"], "hi");
        assert!(!reg.contains(&ActorId::from("ghost")));
        assert_eq!(reg.len(), 2);

        let stats = sync.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.updates_applied, 2);
        assert_eq!(stats.unknown_ignored, 1);
        assert!(!sync.is_in_flight());
    }

    #[tokio::test]
    async fn interval_gates_cycles() {
        let transport = backend(|_| Ok(json!({"npc_updates": {}})));
        let (mut sync, _registry) = ready_loop(transport.clone(), 100).await;
        let base = Instant::now();

        let mut started = Vec::new();
        for frame in 0..12u64 {
            let at = frame * 30;
            if sync.tick(ms(base, at)).await == TickOutcome::Started {
                started.push(at);
            }
            sync.wait_in_flight().await;
        }

        // Frames land at 0, 30, 60, ... 330ms.
        assert_eq!(started, vec![0, 120, 240]);
        for pair in started.windows(2) {
            assert!(pair[1] - pair[0] >= 100);
        }
        let sync_calls = transport
            .calls()
            .iter()
            .filter(|(route, _)| *route == Route::Sync)
            .count();
        assert_eq!(sync_calls, 3);
    }

    #[tokio::test]
    async fn slow_exchange_blocks_new_cycles() {
        let transport = backend(|_| Ok(json!({"npc_updates": {"a": {"desired_animation": "run"}}})));
        let gate = transport.gate_sync();
        let (mut sync, registry) = ready_loop(transport.clone(), 100).await;
        let base = Instant::now();

        assert_eq!(sync.tick(ms(base, 0)).await, TickOutcome::Started);
        // Let the spawned exchange reach the gate.
        tokio::task::yield_now().await;
        // Exchange takes ~250ms: frames every 30ms until then.
        let mut outcomes = Vec::new();
        for at in (30..250).step_by(30) {
            outcomes.push(sync.tick(ms(base, at)).await);
        }
        assert!(!outcomes.contains(&TickOutcome::Started));
        assert!(outcomes.contains(&TickOutcome::InFlight));
        assert_eq!(transport.sync_calls(), 1);

        gate.add_permits(1);
        sync.wait_in_flight().await;
        assert_eq!(
            registry.lock().await.get(&ActorId::from("a")).unwrap().animation(),
            Some("run")
        );

        assert_eq!(sync.tick(ms(base, 270)).await, TickOutcome::Started);
        gate.add_permits(1);
        sync.wait_in_flight().await;
        assert_eq!(transport.sync_calls(), 2);
        assert!(sync.stats().skipped_in_flight >= 1);
    }

    #[tokio::test]
    async fn failures_leave_state_and_loop_alive() {
        let transport = backend(|_| Err(TransportError::connection(&Route::Sync, "reset by peer")));
        let (mut sync, registry) = ready_loop(transport, 100).await;
        let before: Vec<_> = registry.lock().await.snapshot_all();
        let base = Instant::now();

        assert_eq!(sync.tick(ms(base, 0)).await, TickOutcome::Started);
        sync.wait_in_flight().await;
        assert_eq!(sync.tick(ms(base, 50)).await, TickOutcome::NotDue);
        assert_eq!(sync.tick(ms(base, 100)).await, TickOutcome::Started);
        sync.wait_in_flight().await;

        assert_eq!(registry.lock().await.snapshot_all(), before);
        let stats = sync.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.succeeded, 0);
    }

    #[tokio::test]
    async fn panicking_collaborator_does_not_wedge_loop() {
        let served = Arc::new(AtomicU64::new(0));
        let counter = served.clone();
        let transport = backend(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(json!({"npc_updates": {"a": {"desired_animation": "boom"}}}))
            } else {
                Ok(json!({"npc_updates": {}}))
            }
        });
        let registry = ActorRegistry::shared();
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let mut host = RecordingHost {
            panic_on_play: Some("boom".to_string()),
            ..Default::default()
        };
        let ready = BootstrapSequencer::new(
            transport.clone(),
            registry.clone(),
            BootstrapOptions::immediate(),
        )
        .run(&mut host, &mut RecordingSink::default())
        .await
        .unwrap();
        let mut sync = SyncLoop::new(ready, transport, registry.clone(), Duration::from_millis(100));
        let base = Instant::now();

        assert_eq!(sync.tick(ms(base, 0)).await, TickOutcome::Started);
        // Let the cycle run to its panic without joining it.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!sync.is_in_flight());

        let mut outcomes = Vec::new();
        for k in 1..=5u64 {
            outcomes.push(sync.tick(ms(base, k * 200)).await);
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
        }
        assert_eq!(outcomes, vec![TickOutcome::Started; 5]);
        assert_eq!(served.load(Ordering::SeqCst), 6);
        assert_eq!(sync.stats().failed, 1);
        assert!(registry.lock().await.contains(&ActorId::from("a")));
    }

    #[tokio::test]
    async fn late_response_after_shutdown_is_discarded() {
        let transport = backend(|_| Ok(json!({"npc_updates": {"a": {"desired_animation": "run"}}})));
        let gate = transport.gate_sync();
        let (mut sync, registry) = ready_loop(transport, 100).await;

        assert_eq!(sync.tick(Instant::now()).await, TickOutcome::Started);
        sync.shutdown().await;
        assert!(registry.lock().await.is_empty());

        gate.add_permits(1);
        sync.wait_in_flight().await;

        assert!(registry.lock().await.is_empty());
        assert_eq!(sync.stats().stale_discarded, 1);
        assert_eq!(sync.stats().updates_applied, 0);
        assert_eq!(sync.tick(Instant::now()).await, TickOutcome::Stopped);
    }

    #[tokio::test]
    async fn snapshot_delta_is_time_since_previous_cycle() {
        let transport = backend(|_| Ok(json!({})));
        let (mut sync, _registry) = ready_loop(transport.clone(), 100).await;
        let base = Instant::now();

        sync.tick(ms(base, 0)).await;
        sync.wait_in_flight().await;
        sync.tick(ms(base, 250)).await;
        sync.wait_in_flight().await;

        let deltas: Vec<f64> = transport
            .calls()
            .iter()
            .filter(|(route, _)| *route == Route::Sync)
            .filter_map(|(_, payload)| payload["delta_time"].as_f64())
            .collect();
        assert_eq!(deltas.len(), 2);
        assert!((deltas[1] - 0.25).abs() < 1e-4, "{deltas:?}");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let transport = backend(|_| Ok(json!({"npc_updates": {}})));
        let (sync, registry) = ready_loop(transport, 10).await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(sync.run(Duration::from_millis(2), rx));
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert!(stats.started >= 1);
        assert!(registry.lock().await.is_empty());
    }

    #[test]
    fn snapshot_request_skips_missing_animation() {
        let snap = SyncSnapshot {
            actors: vec![
                ActorSnapshot {
                    id: ActorId::from("a"),
                    position: Vec3::new(1.0, 2.0, 3.0),
                    animation: None,
                },
                ActorSnapshot {
                    id: ActorId::from("b"),
                    position: Vec3::ZERO,
                    animation: Some("idle".into()),
                },
            ],
            delta_time: 0.1,
        };
        let req = snap.to_request();
        assert_eq!(req.npc_positions.len(), 2);
        assert_eq!(req.npc_animations.len(), 1);
        assert_eq!(req.npc_animations[&ActorId::from("b")], "idle");
    }
}
