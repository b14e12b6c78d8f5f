//! Monitor core - published state, owner loop and lifecycle operations

pub mod events;
pub mod monitor;
pub mod operations;
pub mod state;
