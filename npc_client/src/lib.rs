//! `npc_client`
//!
//! Client-side NPC synchronization:
//! - Transport to the authoritative backend (HTTP or framed TCP)
//! - Actor registry and per-actor controllers
//! - Staged bootstrap that discovers the world and materializes actors
//! - Timer-gated sync loop that uploads snapshots and applies updates
//! - Session owner tying the phases together

pub mod bootstrap;
pub mod controller;
pub mod framed;
pub mod http;
pub mod registry;
pub mod session;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use bootstrap::{BootstrapError, BootstrapSequencer, BootstrapStage, ProgressSink, Ready};
pub use controller::{ActorBindings, ActorController, ActorHost, ActorState};
pub use registry::{ActorRegistry, RegistryError, SharedRegistry};
pub use session::{InteractError, NpcSession};
pub use sync::{SyncLoop, SyncStats, TickOutcome};
pub use transport::{Transport, TransportError};
