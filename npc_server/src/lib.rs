//! `npc_server`
//!
//! Development NPC backend:
//! - In-memory NPC world with a seeded wander simulation
//! - Route dispatch for `world`, `npc/{id}`, `unity/update` and `interact`
//! - Framed TCP listener, one task per connection
//!
//! Stands in for the production AI backend in integration tests and local
//! runs of the client.

pub mod server;
pub mod world;

pub use server::BackendServer;
pub use world::NpcWorld;
