//! Bootstrap sequencer.
//!
//! One-time staged startup that populates the registry before steady-state
//! sync begins:
//!
//! | stage              | progress    | work                                   |
//! |--------------------|-------------|----------------------------------------|
//! | `Idle`             | 0.0         |                                        |
//! | `Connecting`       | 0.0 – 0.2   | fetch world state (fatal on failure)   |
//! | `LoadingResources` | 0.2 – 0.6   | local preload steps, no network        |
//! | `CreatingActors`   | 0.6 – 0.9   | fetch + create each actor (skippable)  |
//! | `Finalizing`       | 0.9 – 1.0   | short hold so the sink can show it     |
//! | `Ready` / `Error`  | 1.0         | terminal                               |
//!
//! `run` consumes the sequencer, so a terminal state is reached exactly once.
//! The `Ready` value it returns is the only way to construct a sync loop.

use std::{sync::Arc, time::Duration};

use npc_shared::{
    config::ClientConfig,
    protocol::{ActorId, WorldState},
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    controller::{ActorHost, ActorState},
    registry::{RegistryError, SharedRegistry},
    transport::{self, Transport, TransportError},
};

/// Bootstrap stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    Idle,
    Connecting,
    LoadingResources,
    CreatingActors,
    Finalizing,
    Ready,
    Error,
}

impl BootstrapStage {
    /// Progress range covered by the stage.
    pub fn range(self) -> (f32, f32) {
        match self {
            BootstrapStage::Idle => (0.0, 0.0),
            BootstrapStage::Connecting => (0.0, 0.2),
            BootstrapStage::LoadingResources => (0.2, 0.6),
            BootstrapStage::CreatingActors => (0.6, 0.9),
            BootstrapStage::Finalizing => (0.9, 1.0),
            BootstrapStage::Ready | BootstrapStage::Error => (1.0, 1.0),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BootstrapStage::Ready | BootstrapStage::Error)
    }

    /// Maps a fraction of the stage's own work onto overall progress.
    pub fn lerp(self, t: f32) -> f32 {
        let (lo, hi) = self.range();
        lo + (hi - lo) * t.clamp(0.0, 1.0)
    }
}

/// Consumer of bootstrap progress (e.g. a loading screen).
pub trait ProgressSink: Send {
    fn set_progress(&mut self, fraction: f32, status: &str);
}

/// Sink that reports progress through `tracing`.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn set_progress(&mut self, fraction: f32, status: &str) {
        info!(progress = %format!("{:.0}%", fraction * 100.0), status, "Loading");
    }
}

/// Last reported progress.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapProgress {
    pub fraction: f32,
    pub status: String,
}

/// An actor that could not be created; bootstrap continued without it.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedActor {
    pub id: ActorId,
    pub reason: String,
}

/// Outcome of the actor creation stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootstrapReport {
    /// Created actors, in world order.
    pub created: Vec<ActorId>,
    pub skipped: Vec<SkippedActor>,
}

/// Proof that bootstrap reached `Ready`.
#[derive(Debug)]
pub struct Ready {
    report: BootstrapReport,
    at: Instant,
}

impl Ready {
    pub fn report(&self) -> &BootstrapReport {
        &self.report
    }

    /// When bootstrap finished.
    pub fn at(&self) -> Instant {
        self.at
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BootstrapError {
    /// World discovery failed; nothing was created.
    #[error("bootstrap failed while {stage:?}: {source}")]
    Fatal {
        stage: BootstrapStage,
        #[source]
        source: TransportError,
    },
    /// The session already ran its bootstrap.
    #[error("bootstrap already ran for this session")]
    AlreadyRan,
}

#[derive(Debug, Error)]
enum CreateFailure {
    #[error("fetch failed: {0}")]
    Fetch(#[from] TransportError),
    #[error("host could not bind actor: {0:#}")]
    Bind(anyhow::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Tunables for the local stages.
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub resource_steps: u32,
    pub resource_step_delay: Duration,
    pub finalize_hold: Duration,
    pub default_prefab: String,
}

impl BootstrapOptions {
    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            resource_steps: cfg.resource_steps,
            resource_step_delay: cfg.resource_step_delay(),
            finalize_hold: cfg.finalize_hold(),
            default_prefab: cfg.default_prefab.clone(),
        }
    }

    /// No artificial delays; for tests and headless tools.
    pub fn immediate() -> Self {
        Self {
            resource_step_delay: Duration::ZERO,
            finalize_hold: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Drives world discovery and actor creation.
pub struct BootstrapSequencer {
    transport: Arc<dyn Transport>,
    registry: SharedRegistry,
    options: BootstrapOptions,
    stage: BootstrapStage,
    progress: BootstrapProgress,
}

impl BootstrapSequencer {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: SharedRegistry,
        options: BootstrapOptions,
    ) -> Self {
        Self {
            transport,
            registry,
            options,
            stage: BootstrapStage::Idle,
            progress: BootstrapProgress {
                fraction: 0.0,
                status: String::new(),
            },
        }
    }

    /// Runs every stage to a terminal state.
    pub async fn run(
        mut self,
        host: &mut dyn ActorHost,
        sink: &mut dyn ProgressSink,
    ) -> Result<Ready, BootstrapError> {
        self.enter(BootstrapStage::Connecting);
        self.report(sink, 0.0, "Connecting to AI system...");
        let world = match transport::fetch_world(self.transport.as_ref()).await {
            Ok(world) => world,
            Err(source) => return Err(self.fail(sink, source)),
        };
        info!(npcs = world.npcs.len(), "World state received");
        self.report(sink, BootstrapStage::Connecting.lerp(1.0), "World state received");

        self.enter(BootstrapStage::LoadingResources);
        self.load_resources(host, sink).await;

        self.enter(BootstrapStage::CreatingActors);
        let report = self.create_actors(&world, host, sink).await;

        self.enter(BootstrapStage::Finalizing);
        self.report(sink, BootstrapStage::Finalizing.lerp(0.0), "Finalizing...");
        if !self.options.finalize_hold.is_zero() {
            tokio::time::sleep(self.options.finalize_hold).await;
        }

        self.enter(BootstrapStage::Ready);
        self.report(sink, 1.0, "Ready!");
        info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            "NPC bootstrap complete"
        );
        Ok(Ready {
            report,
            at: Instant::now(),
        })
    }

    fn enter(&mut self, stage: BootstrapStage) {
        self.stage = stage;
    }

    /// Forwards progress to the sink, keeping it monotonic and below 1.0
    /// until a terminal stage.
    fn report(&mut self, sink: &mut dyn ProgressSink, fraction: f32, status: &str) {
        let (lo, hi) = self.stage.range();
        let mut fraction = fraction.clamp(lo, hi).max(self.progress.fraction);
        if !self.stage.is_terminal() {
            fraction = fraction.min(1.0 - f32::EPSILON);
        }
        self.progress = BootstrapProgress {
            fraction,
            status: status.to_string(),
        };
        sink.set_progress(fraction, status);
    }

    fn fail(&mut self, sink: &mut dyn ProgressSink, source: TransportError) -> BootstrapError {
        let stage = self.stage;
        warn!(?stage, error = %source, "NPC bootstrap failed");
        self.enter(BootstrapStage::Error);
        self.report(sink, 1.0, &format!("Error: {source}"));
        BootstrapError::Fatal { stage, source }
    }

    async fn load_resources(&mut self, host: &mut dyn ActorHost, sink: &mut dyn ProgressSink) {
        let total = self.options.resource_steps as usize;
        self.report(sink, BootstrapStage::LoadingResources.lerp(0.0), "Loading resources...");
        for step in 0..total {
            host.preload(step, total);
            if !self.options.resource_step_delay.is_zero() {
                tokio::time::sleep(self.options.resource_step_delay).await;
            }
            let t = (step + 1) as f32 / total as f32;
            self.report(
                sink,
                BootstrapStage::LoadingResources.lerp(t),
                &format!("Loading resources ({}/{})...", step + 1, total),
            );
        }
    }

    async fn create_actors(
        &mut self,
        world: &WorldState,
        host: &mut dyn ActorHost,
        sink: &mut dyn ProgressSink,
    ) -> BootstrapReport {
        let total = world.npcs.len();
        let mut report = BootstrapReport::default();

        for (i, id) in world.npcs.iter().enumerate() {
            match self.create_one(id, host).await {
                Ok(()) => {
                    info!(npc_id = %id, "NPC created");
                    report.created.push(id.clone());
                }
                Err(e) => {
                    warn!(npc_id = %id, error = %e, "Skipping NPC");
                    report.skipped.push(SkippedActor {
                        id: id.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            let processed = i + 1;
            self.report(
                sink,
                BootstrapStage::CreatingActors.lerp(report.created.len() as f32 / total as f32),
                &format!("Creating NPC {processed}/{total}"),
            );
        }
        report
    }

    async fn create_one(&self, id: &ActorId, host: &mut dyn ActorHost) -> Result<(), CreateFailure> {
        let data = transport::fetch_npc(self.transport.as_ref(), id).await?;
        let prefab_ref = data
            .prefab_ref
            .clone()
            .unwrap_or_else(|| self.options.default_prefab.clone());

        let mut registry = self.registry.lock().await;
        if registry.contains(id) {
            return Err(RegistryError::DuplicateActor { id: id.clone() }.into());
        }
        let bindings = host.bind(id, &prefab_ref).map_err(CreateFailure::Bind)?;
        let initial = ActorState {
            prefab_ref,
            ..Default::default()
        };
        registry.create(id.clone(), initial, bindings)?.initialize(&data);
        Ok(())
    }
}
