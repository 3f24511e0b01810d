//! Route wire types.
//!
//! One explicit structure per route request/response. Optional fields decode
//! leniently: a missing, `null`, or wrongly typed value becomes `None` rather
//! than failing the whole response, so the backend can evolve its payloads
//! without breaking older clients.

use std::{collections::BTreeMap, fmt};

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::math::Vec3;

/// Backend-assigned actor identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        ActorId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        ActorId(s.to_string())
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        ActorId(s)
    }
}

/// Logical backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// World discovery: which actors exist.
    World,
    /// Per-actor initial data.
    Npc(ActorId),
    /// Periodic snapshot upload / update download.
    Sync,
    /// Player interaction with one actor.
    Interact,
}

impl Route {
    /// Path of the route relative to the backend root.
    pub fn path(&self) -> String {
        match self {
            Route::World => "world".to_string(),
            Route::Npc(id) => format!("npc/{id}"),
            Route::Sync => "unity/update".to_string(),
            Route::Interact => "interact".to_string(),
        }
    }

    /// Unescaped path segments; an actor id is always a single segment.
    pub fn segments(&self) -> Vec<&str> {
        match self {
            Route::World => vec!["world"],
            Route::Npc(id) => vec!["npc", id.as_str()],
            Route::Sync => vec!["unity", "update"],
            Route::Interact => vec!["interact"],
        }
    }

    /// Routes that only read backend state and carry no payload.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Route::World | Route::Npc(_))
    }

    /// Parses a backend path, with or without a leading slash.
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim_start_matches('/');
        match path {
            "world" => Some(Route::World),
            "unity/update" => Some(Route::Sync),
            "interact" => Some(Route::Interact),
            _ => path
                .strip_prefix("npc/")
                .filter(|id| !id.is_empty() && !id.contains('/'))
                .map(|id| Route::Npc(ActorId::from(id))),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

fn lenient<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(de)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// `GET world` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    #[serde(default)]
    pub npcs: Vec<ActorId>,
}

/// `GET npc/{id}` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NpcData {
    #[serde(default, alias = "prefab_path", deserialize_with = "lenient")]
    pub prefab_ref: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub position: Option<Vec3>,
    #[serde(default, deserialize_with = "lenient")]
    pub animation_state: Option<String>,
}

/// Server-issued partial state delta for one actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_position: Option<Vec3>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub desired_animation: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub dialogue_state: Option<Map<String, Value>>,
}

impl UpdateRecord {
    /// True when the record carries nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.target_position.is_none()
            && self.desired_animation.is_none()
            && self.dialogue_state.is_none()
    }
}

/// `POST unity/update` request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub npc_positions: BTreeMap<ActorId, Vec3>,
    #[serde(default)]
    pub npc_animations: BTreeMap<ActorId, String>,
    #[serde(default)]
    pub delta_time: f32,
}

fn lenient_updates<'de, D>(de: D) -> Result<BTreeMap<ActorId, UpdateRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<ActorId, Value>>::deserialize(de)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(id, value)| match serde_json::from_value(value) {
            Ok(record) => Some((id, record)),
            Err(e) => {
                debug!(npc_id = %id, error = %e, "Dropping undecodable update record");
                None
            }
        })
        .collect())
}

/// `POST unity/update` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default, deserialize_with = "lenient_updates")]
    pub npc_updates: BTreeMap<ActorId, UpdateRecord>,
}

/// `POST interact` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractRequest {
    pub npc_id: ActorId,
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

/// `POST interact` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub data: Value,
}
