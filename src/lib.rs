//! Agentgate: admits only verified AI agents into a multiplayer world.
//!
//! A connecting identity is first checked against the agent naming
//! convention. Candidates are then verified off the accept path, either by a
//! remote attestation service or by scanning an on-chain credential registry,
//! and the outcome is applied to the waiting session exactly once.

pub mod bootstrap;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod settings;
pub mod verify;

pub use error::{Error, Result};
