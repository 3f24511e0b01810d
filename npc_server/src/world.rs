//! In-memory NPC world.
//!
//! The development backend's authority over NPC intent. Clients own where an
//! NPC actually stands (they report positions on every sync); the world owns
//! where it should go next and what it should be doing.
//!
//! Wander model:
//! - An idle NPC counts down `idle_secs`, then picks a target within
//!   `wander_radius` of its home and starts walking.
//! - Once a reported position is within `ARRIVE_DISTANCE` of the target the
//!   NPC goes idle again.
//! - Talking to an NPC stops it and holds it idle.
//!
//! Targets come from a seeded RNG so a given seed and request sequence always
//! produce the same updates.

use npc_shared::{
    config::ServerConfig,
    math::Vec3,
    protocol::{
        ActorId, InteractRequest, InteractResponse, NpcData, SyncRequest, SyncResponse,
        UpdateRecord, WorldState,
    },
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

/// Distance at which a walking NPC counts as arrived.
pub const ARRIVE_DISTANCE: f32 = 0.5;

/// Spacing between NPC homes along the x axis.
const HOME_SPACING: f32 = 4.0;

#[derive(Debug, Clone)]
pub struct Npc {
    pub id: ActorId,
    pub prefab_ref: String,
    pub home: Vec3,
    pub position: Vec3,
    pub animation: String,
    pub target: Option<Vec3>,
    idle_left: f32,
    dialogue: Map<String, Value>,
    dialogue_dirty: bool,
    talk_count: u64,
}

impl Npc {
    fn new(id: ActorId, home: Vec3) -> Self {
        Self {
            prefab_ref: format!("Prefabs/NPC_{id}"),
            id,
            home,
            position: home,
            animation: "idle".to_string(),
            target: None,
            idle_left: 0.0,
            dialogue: Map::new(),
            dialogue_dirty: false,
            talk_count: 0,
        }
    }

    fn greeting(&self) -> &'static str {
        match self.id.as_str() {
            "guard" => "Halt! State your business.",
            "merchant" => "Finest wares this side of the river.",
            _ => "Hello, traveler.",
        }
    }

    fn go_idle(&mut self, hold: f32) {
        self.target = None;
        self.idle_left = hold;
        self.animation = "idle".to_string();
    }
}

pub struct NpcWorld {
    cfg: ServerConfig,
    npcs: Vec<Npc>,
    rng: StdRng,
    updates_served: u64,
}

impl NpcWorld {
    pub fn new(cfg: ServerConfig) -> Self {
        let mut npcs: Vec<Npc> = Vec::with_capacity(cfg.npcs.len());
        for id in &cfg.npcs {
            let id = ActorId::from(id.as_str());
            if npcs.iter().any(|n| n.id == id) {
                debug!(npc_id = %id, "Duplicate roster entry ignored");
                continue;
            }
            let home = Vec3::new(npcs.len() as f32 * HOME_SPACING, 0.0, 0.0);
            npcs.push(Npc::new(id, home));
        }
        info!(npcs = npcs.len(), seed = cfg.seed, "NPC world created");
        Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            cfg,
            npcs,
            updates_served: 0,
        }
    }

    pub fn npcs(&self) -> &[Npc] {
        &self.npcs
    }

    pub fn npc(&self, id: &ActorId) -> Option<&Npc> {
        self.npcs.iter().find(|n| &n.id == id)
    }

    fn npc_mut(&mut self, id: &ActorId) -> Option<&mut Npc> {
        self.npcs.iter_mut().find(|n| &n.id == id)
    }

    pub fn updates_served(&self) -> u64 {
        self.updates_served
    }

    /// `world`
    pub fn world_state(&self) -> WorldState {
        WorldState {
            npcs: self.npcs.iter().map(|n| n.id.clone()).collect(),
        }
    }

    /// `npc/{id}`
    pub fn npc_data(&self, id: &ActorId) -> Option<NpcData> {
        self.npc(id).map(|n| NpcData {
            prefab_ref: Some(n.prefab_ref.clone()),
            position: Some(n.position),
            animation_state: Some(n.animation.clone()),
        })
    }

    /// `unity/update`: takes the client's snapshot, advances the wander
    /// simulation by `delta_time`, and returns intent for every NPC.
    pub fn update(&mut self, req: &SyncRequest) -> SyncResponse {
        for (id, position) in &req.npc_positions {
            match self.npc_mut(id) {
                Some(npc) => npc.position = *position,
                None => debug!(npc_id = %id, "Position reported for unknown NPC"),
            }
        }

        let dt = req.delta_time.max(0.0);
        let radius = self.cfg.wander_radius.max(0.0);
        let idle_secs = self.cfg.idle_secs;
        let mut resp = SyncResponse::default();

        for npc in &mut self.npcs {
            match npc.target {
                Some(target) if npc.position.distance(target) <= ARRIVE_DISTANCE => {
                    npc.go_idle(idle_secs);
                }
                Some(_) => {}
                None => {
                    npc.idle_left -= dt;
                    if npc.idle_left <= 0.0 {
                        let offset = if radius > 0.0 {
                            Vec3::new(
                                self.rng.gen_range(-radius..=radius),
                                0.0,
                                self.rng.gen_range(-radius..=radius),
                            )
                        } else {
                            Vec3::ZERO
                        };
                        let target = Vec3::new(
                            npc.home.x + offset.x,
                            npc.home.y,
                            npc.home.z + offset.z,
                        );
                        npc.target = Some(target);
                        npc.animation = "walk".to_string();
                    }
                }
            }

            let dialogue_state = npc
                .dialogue_dirty
                .then(|| npc.dialogue.clone());
            npc.dialogue_dirty = false;

            resp.npc_updates.insert(
                npc.id.clone(),
                UpdateRecord {
                    target_position: npc.target,
                    desired_animation: Some(npc.animation.clone()),
                    dialogue_state,
                },
            );
        }

        self.updates_served += 1;
        resp
    }

    /// `interact`
    pub fn interact(&mut self, req: &InteractRequest) -> InteractResponse {
        let idle_secs = self.cfg.idle_secs;
        let Some(npc) = self.npc_mut(&req.npc_id) else {
            return InteractResponse {
                success: false,
                error: Some("npc not found".to_string()),
                data: Value::Null,
            };
        };

        match req.action.as_str() {
            "talk" => {
                npc.talk_count += 1;
                let line = npc.greeting();
                npc.dialogue.insert("speaker".into(), json!(npc.id));
                npc.dialogue.insert("line".into(), json!(line));
                npc.dialogue.insert("talk_count".into(), json!(npc.talk_count));
                npc.dialogue_dirty = true;
                npc.go_idle(idle_secs);
                npc.animation = "talk".to_string();
                info!(npc_id = %npc.id, "Player started a conversation");
                InteractResponse {
                    success: true,
                    error: None,
                    data: json!({ "line": line }),
                }
            }
            "stop" => {
                npc.go_idle(idle_secs);
                InteractResponse {
                    success: true,
                    error: None,
                    data: Value::Null,
                }
            }
            other => InteractResponse {
                success: false,
                error: Some(format!("unsupported action: {other}")),
                data: Value::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> NpcWorld {
        NpcWorld::new(ServerConfig::default())
    }

    fn tick(world: &mut NpcWorld, dt: f32) -> SyncResponse {
        world.update(&SyncRequest {
            delta_time: dt,
            ..Default::default()
        })
    }

    #[test]
    fn roster_order_and_duplicates() {
        let w = NpcWorld::new(ServerConfig {
            npcs: vec!["b".into(), "a".into(), "b".into()],
            ..Default::default()
        });
        assert_eq!(
            w.world_state().npcs,
            vec![ActorId::from("b"), ActorId::from("a")]
        );
        assert_eq!(w.npc(&ActorId::from("a")).unwrap().home, Vec3::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn npc_data_for_known_and_unknown() {
        let w = world();
        let data = w.npc_data(&ActorId::from("guard")).unwrap();
        assert_eq!(data.prefab_ref.as_deref(), Some("Prefabs/NPC_guard"));
        assert_eq!(data.animation_state.as_deref(), Some("idle"));
        assert!(w.npc_data(&ActorId::from("dragon")).is_none());
    }

    #[test]
    fn first_update_sends_every_npc_walking() {
        let mut w = world();
        let resp = tick(&mut w, 0.1);
        assert_eq!(resp.npc_updates.len(), 3);
        for (id, update) in &resp.npc_updates {
            let npc = w.npc(id).unwrap();
            let target = update.target_position.unwrap();
            assert!((target.x - npc.home.x).abs() <= 10.0);
            assert!((target.z - npc.home.z).abs() <= 10.0);
            assert_eq!(update.desired_animation.as_deref(), Some("walk"));
            assert!(update.dialogue_state.is_none());
        }
    }

    #[test]
    fn same_seed_same_targets() {
        let mut a = world();
        let mut b = world();
        assert_eq!(tick(&mut a, 0.1), tick(&mut b, 0.1));
    }

    #[test]
    fn arrival_goes_idle_then_wanders_again() {
        let mut w = NpcWorld::new(ServerConfig {
            npcs: vec!["a".into()],
            idle_secs: 1.0,
            ..Default::default()
        });
        let id = ActorId::from("a");
        let target = tick(&mut w, 0.1).npc_updates[&id].target_position.unwrap();

        let mut req = SyncRequest {
            delta_time: 0.1,
            ..Default::default()
        };
        req.npc_positions.insert(id.clone(), target);
        let arrived = w.update(&req);
        assert_eq!(arrived.npc_updates[&id].target_position, None);
        assert_eq!(arrived.npc_updates[&id].desired_animation.as_deref(), Some("idle"));

        assert_eq!(tick(&mut w, 0.5).npc_updates[&id].target_position, None);
        assert!(tick(&mut w, 0.6).npc_updates[&id].target_position.is_some());
    }

    #[test]
    fn talk_sets_dialogue_once_and_holds_npc() {
        let mut w = world();
        let id = ActorId::from("guard");
        tick(&mut w, 0.1);

        let resp = w.interact(&InteractRequest {
            npc_id: id.clone(),
            action: "talk".into(),
            data: Value::Null,
        });
        assert!(resp.success);
        assert_eq!(resp.data["line"], "Halt! State your business.");

        let resp = tick(&mut w, 0.1);
        let update = &resp.npc_updates[&id];
        assert_eq!(update.target_position, None);
        assert_eq!(update.desired_animation.as_deref(), Some("talk"));
        let dialogue = update.dialogue_state.as_ref().unwrap();
        assert_eq!(dialogue["talk_count"], 1);

        assert!(tick(&mut w, 0.1).npc_updates[&id].dialogue_state.is_none());
    }

    #[test]
    fn interact_failures() {
        let mut w = world();
        let unknown = w.interact(&InteractRequest {
            npc_id: ActorId::from("dragon"),
            action: "talk".into(),
            data: Value::Null,
        });
        assert!(!unknown.success);
        assert_eq!(unknown.error.as_deref(), Some("npc not found"));

        let bad = w.interact(&InteractRequest {
            npc_id: ActorId::from("guard"),
            action: "dance".into(),
            data: Value::Null,
        });
        assert!(!bad.success);
        assert!(bad.error.unwrap().contains("dance"));
    }
}
