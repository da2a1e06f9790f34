//! CLI Commands

pub mod config;
pub mod memif;
pub mod schema;
