//! Configuration system.
//!
//! Loads client and backend configuration from JSON strings (file IO left to
//! the binaries). Every field has a default so partial files are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which transport the client uses to reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// JSON over HTTP against `api_url`.
    #[default]
    Http,
    /// Length-prefixed JSON frames over TCP against `backend_addr`.
    Framed,
}

/// Client-side sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the HTTP backend, e.g. `http://localhost:8000`.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Address of the framed TCP backend, e.g. `127.0.0.1:40100`.
    #[serde(default = "default_backend_addr")]
    pub backend_addr: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// Minimum time between the starts of two sync cycles.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Host frame rate driving sync ticks.
    #[serde(default = "default_frame_hz")]
    pub frame_hz: u32,
    /// Number of local resource preparation steps during bootstrap.
    #[serde(default = "default_resource_steps")]
    pub resource_steps: u32,
    #[serde(default = "default_resource_step_delay_ms")]
    pub resource_step_delay_ms: u64,
    /// How long the finalizing stage holds before reporting ready.
    #[serde(default = "default_finalize_hold_ms")]
    pub finalize_hold_ms: u64,
    /// Prefab used when the backend does not name one for an actor.
    #[serde(default = "default_prefab")]
    pub default_prefab: String,
    /// Optional per-request timeout. Unset means the transport never times out.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_backend_addr() -> String {
    "127.0.0.1:40100".to_string()
}

fn default_update_interval_ms() -> u64 {
    100
}

fn default_frame_hz() -> u32 {
    60
}

fn default_resource_steps() -> u32 {
    3
}

fn default_resource_step_delay_ms() -> u64 {
    100
}

fn default_finalize_hold_ms() -> u64 {
    500
}

fn default_prefab() -> String {
    "Prefabs/DefaultNPC".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            backend_addr: default_backend_addr(),
            transport: TransportKind::default(),
            update_interval_ms: default_update_interval_ms(),
            frame_hz: default_frame_hz(),
            resource_steps: default_resource_steps(),
            resource_step_delay_ms: default_resource_step_delay_ms(),
            finalize_hold_ms: default_finalize_hold_ms(),
            default_prefab: default_prefab(),
            request_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Interval between host frames; never zero.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.frame_hz.max(1) as f32)
    }

    pub fn resource_step_delay(&self) -> Duration {
        Duration::from_millis(self.resource_step_delay_ms)
    }

    pub fn finalize_hold(&self) -> Duration {
        Duration::from_millis(self.finalize_hold_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

/// Development backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:40100`.
    #[serde(default = "default_backend_addr")]
    pub listen_addr: String,
    /// NPC ids spawned at startup, in world order.
    #[serde(default = "default_roster")]
    pub npcs: Vec<String>,
    /// Seed for wander target selection.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Radius around each NPC's home that wander targets are drawn from.
    #[serde(default = "default_wander_radius")]
    pub wander_radius: f32,
    /// Seconds an NPC idles at a reached target before picking a new one.
    #[serde(default = "default_idle_secs")]
    pub idle_secs: f32,
}

fn default_roster() -> Vec<String> {
    vec![
        "guard".to_string(),
        "merchant".to_string(),
        "villager".to_string(),
    ]
}

fn default_seed() -> u64 {
    7
}

fn default_wander_radius() -> f32 {
    10.0
}

fn default_idle_secs() -> f32 {
    2.0
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_backend_addr(),
            npcs: default_roster(),
            seed: default_seed(),
            wander_radius: default_wander_radius(),
            idle_secs: default_idle_secs(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
