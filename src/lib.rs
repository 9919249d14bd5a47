// Clippy allows for reasonable defaults
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::unnecessary_map_or)] // map_or can be clearer than alternatives
#![allow(clippy::collapsible_if)] // Separate ifs can be more readable
#![allow(clippy::redundant_closure)] // |x| f(x) can be clearer than f
#![allow(clippy::manual_strip)] // Manual prefix stripping can be clearer

// Module declarations
pub mod agents;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod file_storage;
pub mod models;
pub mod session;
pub mod shutdown;
mod utils;

// Re-export models for library consumers
pub use error::{SupervisorError, SupervisorResult};
pub use models::*;
pub use utils::as_path;
