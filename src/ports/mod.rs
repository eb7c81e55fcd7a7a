//! Port traits for the collaborators the core depends on.

pub mod cache_port;
pub mod config_port;
pub mod data_port;
