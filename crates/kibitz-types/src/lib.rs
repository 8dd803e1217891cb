//! Shared domain types for the Kibitz project.

pub mod analysis;
pub mod backend;
pub mod board;
pub mod config;
pub mod events;
pub mod game;
pub mod telemetry;
pub mod variant;

mod errors;

pub use errors::{KibitzError, Result};
