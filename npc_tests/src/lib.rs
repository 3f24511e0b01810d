//! Integration test host crate for the NPC sync workspace.
