//! Actor controller.
//!
//! A controller owns one actor's local state and relays backend intent to the
//! host engine through three collaborators:
//! - `PathFollower` receives movement goals (the controller never plans paths)
//! - `AnimationPlayer` plays animation labels
//! - `DialogueView` renders the dialogue blob
//!
//! Nothing here returns an error. A field that is absent in an update means
//! "nothing to do" for that part of the actor.

use std::fmt;

use npc_shared::{
    math::Vec3,
    protocol::{ActorId, NpcData, UpdateRecord},
};
use serde_json::{Map, Value};
use tracing::trace;

/// Navigation facility that moves an actor toward a goal.
pub trait PathFollower: Send {
    fn set_goal(&mut self, goal: Vec3);

    /// Places the actor at `position` without pathing.
    fn warp(&mut self, _position: Vec3) {}
}

/// Animation playback facility.
pub trait AnimationPlayer: Send {
    fn play(&mut self, label: &str);
}

/// Dialogue UI rendered from the actor's dialogue blob.
pub trait DialogueView: Send {
    fn render(&mut self, dialogue: &Map<String, Value>);
}

/// No-op navigation for headless runs.
#[derive(Debug, Default)]
pub struct NullPathFollower;

impl PathFollower for NullPathFollower {
    fn set_goal(&mut self, _goal: Vec3) {}
}

/// No-op animation for headless runs.
#[derive(Debug, Default)]
pub struct NullAnimationPlayer;

impl AnimationPlayer for NullAnimationPlayer {
    fn play(&mut self, _label: &str) {}
}

/// No-op dialogue view for headless runs.
#[derive(Debug, Default)]
pub struct NullDialogueView;

impl DialogueView for NullDialogueView {
    fn render(&mut self, _dialogue: &Map<String, Value>) {}
}

/// Host-side handles for one actor.
pub struct ActorBindings {
    pub navigator: Box<dyn PathFollower>,
    pub animator: Box<dyn AnimationPlayer>,
    pub dialogue: Box<dyn DialogueView>,
}

impl ActorBindings {
    pub fn new(
        navigator: Box<dyn PathFollower>,
        animator: Box<dyn AnimationPlayer>,
        dialogue: Box<dyn DialogueView>,
    ) -> Self {
        Self {
            navigator,
            animator,
            dialogue,
        }
    }

    /// Bindings that drop every call.
    pub fn headless() -> Self {
        Self::new(
            Box::new(NullPathFollower),
            Box::new(NullAnimationPlayer),
            Box::new(NullDialogueView),
        )
    }
}

impl Default for ActorBindings {
    fn default() -> Self {
        Self::headless()
    }
}

/// The host engine: materializes actors and prepares local resources.
pub trait ActorHost: Send {
    /// Creates the host-side representation of an actor from its prefab.
    fn bind(&mut self, id: &ActorId, prefab_ref: &str) -> anyhow::Result<ActorBindings>;

    /// Prepares local resources; `step` counts from 0 to `total - 1`.
    fn preload(&mut self, _step: usize, _total: usize) {}
}

/// Host without any presentation layer.
#[derive(Debug, Default)]
pub struct HeadlessHost;

impl ActorHost for HeadlessHost {
    fn bind(&mut self, _id: &ActorId, _prefab_ref: &str) -> anyhow::Result<ActorBindings> {
        Ok(ActorBindings::headless())
    }
}

/// Local state of one actor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorState {
    pub position: Vec3,
    /// Currently playing animation label.
    pub animation: Option<String>,
    /// Last movement goal relayed to the navigator.
    pub goal: Option<Vec3>,
    pub prefab_ref: String,
    pub dialogue: Map<String, Value>,
}

/// Applies backend intent to one actor.
pub struct ActorController {
    id: ActorId,
    state: ActorState,
    bindings: ActorBindings,
}

impl fmt::Debug for ActorController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorController")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ActorController {
    pub(crate) fn new(id: ActorId, state: ActorState, bindings: ActorBindings) -> Self {
        Self {
            id,
            state,
            bindings,
        }
    }

    /// Applies the starting position and animation. Each field the backend
    /// left out keeps its default.
    pub fn initialize(&mut self, data: &NpcData) {
        if let Some(position) = data.position {
            self.state.position = position;
            self.bindings.navigator.warp(position);
        }
        if let Some(label) = &data.animation_state {
            self.bindings.animator.play(label);
            self.state.animation = Some(label.clone());
        }
    }

    /// Applies one server-issued delta.
    pub fn apply_update(&mut self, update: &UpdateRecord) {
        if let Some(goal) = update.target_position {
            self.bindings.navigator.set_goal(goal);
            self.state.goal = Some(goal);
        }

        if let Some(label) = &update.desired_animation {
            // Replaying the current label would restart the clip.
            if self.state.animation.as_deref() != Some(label.as_str()) {
                trace!(npc_id = %self.id, animation = %label, "Switching animation");
                self.bindings.animator.play(label);
                self.state.animation = Some(label.clone());
            }
        }

        if let Some(patch) = &update.dialogue_state {
            for (key, value) in patch {
                self.state.dialogue.insert(key.clone(), value.clone());
            }
            self.bindings.dialogue.render(&self.state.dialogue);
        }
    }

    /// Records where the host actually placed the actor.
    pub fn report_position(&mut self, position: Vec3) {
        self.state.position = position;
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    pub fn state(&self) -> &ActorState {
        &self.state
    }

    pub fn position(&self) -> Vec3 {
        self.state.position
    }

    pub fn animation(&self) -> Option<&str> {
        self.state.animation.as_deref()
    }

    pub fn goal(&self) -> Option<Vec3> {
        self.state.goal
    }

    pub fn dialogue(&self) -> &Map<String, Value> {
        &self.state.dialogue
    }
}
