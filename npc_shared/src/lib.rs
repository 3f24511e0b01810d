//! `npc_shared`
//!
//! Shared libraries used by both the sync client and the development backend.
//!
//! Design goals:
//! - Explicit, typed wire structures per route (no reflected JSON objects).
//! - Tolerant decoding: a backend that omits or mangles an optional field
//!   must not break the client.
//! - Clear separation of concerns (math, config, protocol, framing).
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod net;
pub mod protocol;

