//! Test doubles shared by the unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use npc_shared::{
    math::Vec3,
    protocol::{ActorId, Route},
};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::{
    bootstrap::{BootstrapProgress, ProgressSink},
    controller::{
        ActorBindings, ActorHost, AnimationPlayer, DialogueView, NullDialogueView,
        NullPathFollower, PathFollower,
    },
    transport::{Transport, TransportError},
};

type Handler = dyn Fn(&Route, &Value) -> Result<Value, TransportError> + Send + Sync;

/// Transport answering from a closure and recording every exchange.
#[derive(Clone)]
pub struct ScriptedTransport {
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<(Route, Value)>>>,
    sync_gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Route, &Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            calls: Arc::default(),
            sync_gate: Arc::default(),
        }
    }

    /// Makes every `unity/update` exchange wait for one permit on the
    /// returned semaphore before answering.
    pub fn gate_sync(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.sync_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<(Route, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sync_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(route, _)| *route == Route::Sync)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exchange(&self, route: &Route, payload: Value) -> Result<Value, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((route.clone(), payload.clone()));

        if *route == Route::Sync {
            let gate = self.sync_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
        }
        (self.handler)(route, &payload)
    }
}

/// Progress sink that keeps every report.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<BootstrapProgress>,
}

impl ProgressSink for RecordingSink {
    fn set_progress(&mut self, fraction: f32, status: &str) {
        self.events.push(BootstrapProgress {
            fraction,
            status: status.to_string(),
        });
    }
}

/// Host that records binds and preloads; ids in `reject` fail to bind.
/// With `panic_on_play` set, every bound animator panics on that label.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub bound: Vec<(String, String)>,
    pub preloads: Vec<(usize, usize)>,
    pub reject: Vec<String>,
    pub panic_on_play: Option<String>,
}

struct PanickingAnimator(String);

impl AnimationPlayer for PanickingAnimator {
    fn play(&mut self, label: &str) {
        if label == self.0 {
            panic!("animation {label} crashed the player");
        }
    }
}

impl ActorHost for RecordingHost {
    fn bind(&mut self, id: &ActorId, prefab_ref: &str) -> anyhow::Result<ActorBindings> {
        if self.reject.iter().any(|r| r == id.as_str()) {
            anyhow::bail!("prefab {prefab_ref} refused for {id}");
        }
        self.bound.push((id.to_string(), prefab_ref.to_string()));
        Ok(match &self.panic_on_play {
            Some(label) => ActorBindings::new(
                Box::new(NullPathFollower),
                Box::new(PanickingAnimator(label.clone())),
                Box::new(NullDialogueView),
            ),
            None => ActorBindings::headless(),
        })
    }

    fn preload(&mut self, step: usize, total: usize) {
        self.preloads.push((step, total));
    }
}

/// Everything the recording bindings were asked to do.
#[derive(Debug, Default)]
pub struct BindingCalls {
    pub warps: Vec<Vec3>,
    pub goals: Vec<Vec3>,
    pub plays: Vec<String>,
    pub renders: usize,
}

pub type BindingLog = Arc<Mutex<BindingCalls>>;

struct RecordingHandle(BindingLog);

impl PathFollower for RecordingHandle {
    fn set_goal(&mut self, goal: Vec3) {
        self.0.lock().unwrap().goals.push(goal);
    }

    fn warp(&mut self, position: Vec3) {
        self.0.lock().unwrap().warps.push(position);
    }
}

impl AnimationPlayer for RecordingHandle {
    fn play(&mut self, label: &str) {
        self.0.lock().unwrap().plays.push(label.to_string());
    }
}

impl DialogueView for RecordingHandle {
    fn render(&mut self, _dialogue: &Map<String, Value>) {
        self.0.lock().unwrap().renders += 1;
    }
}

pub fn recording_bindings() -> (ActorBindings, BindingLog) {
    let log = BindingLog::default();
    let bindings = ActorBindings::new(
        Box::new(RecordingHandle(log.clone())),
        Box::new(RecordingHandle(log.clone())),
        Box::new(RecordingHandle(log.clone())),
    );
    (bindings, log)
}
