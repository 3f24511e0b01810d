//! Actor registry.
//!
//! The single source of truth for which actors exist. Each id maps to exactly
//! one controller (which owns the actor's state). Iteration follows insertion
//! order so snapshots are deterministic.
//!
//! The registry is shared between bootstrap and the sync loop behind a tokio
//! mutex. The lock is never held across a transport exchange.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use npc_shared::{math::Vec3, protocol::ActorId};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::controller::{ActorBindings, ActorController, ActorState};

/// Registry handle shared by the session's phases.
pub type SharedRegistry = Arc<Mutex<ActorRegistry>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("actor already exists: {id}")]
    DuplicateActor { id: ActorId },
}

/// Point-in-time view of one actor for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorSnapshot {
    pub id: ActorId,
    pub position: Vec3,
    pub animation: Option<String>,
}

/// Actor id -> controller mapping.
#[derive(Debug, Default)]
pub struct ActorRegistry {
    order: Vec<ActorId>,
    actors: HashMap<ActorId, ActorController>,
    /// Bumped on `clear`, so work started against an older population can
    /// tell it is stale.
    generation: u64,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a fresh registry in a shared handle.
    pub fn shared() -> SharedRegistry {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Creates an actor. Fails without touching existing state if `id` is
    /// already registered.
    pub fn create(
        &mut self,
        id: ActorId,
        initial: ActorState,
        bindings: ActorBindings,
    ) -> Result<&mut ActorController, RegistryError> {
        match self.actors.entry(id) {
            Entry::Occupied(e) => Err(RegistryError::DuplicateActor {
                id: e.key().clone(),
            }),
            Entry::Vacant(v) => {
                let id = v.key().clone();
                debug!(npc_id = %id, "Registering actor");
                self.order.push(id.clone());
                Ok(v.insert(ActorController::new(id, initial, bindings)))
            }
        }
    }

    pub fn get(&self, id: &ActorId) -> Option<&ActorController> {
        self.actors.get(id)
    }

    pub fn get_mut(&mut self, id: &ActorId) -> Option<&mut ActorController> {
        self.actors.get_mut(id)
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.actors.contains_key(id)
    }

    /// Positions and animation labels of every actor, in insertion order.
    pub fn snapshot_all(&self) -> Vec<ActorSnapshot> {
        self.iter()
            .map(|c| ActorSnapshot {
                id: c.id().clone(),
                position: c.position(),
                animation: c.animation().map(str::to_string),
            })
            .collect()
    }

    /// Controllers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ActorController> {
        self.order.iter().filter_map(|id| self.actors.get(id))
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> &[ActorId] {
        &self.order
    }

    /// Records a host-reported position. Returns false for unknown ids.
    pub fn report_position(&mut self, id: &ActorId, position: Vec3) -> bool {
        match self.actors.get_mut(id) {
            Some(c) => {
                c.report_position(position);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &ActorId) -> bool {
        if self.actors.remove(id).is_some() {
            self.order.retain(|x| x != id);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.actors.clear();
        self.order.clear();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}
