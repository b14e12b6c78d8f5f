//! External tool integrations

pub mod runtime;
