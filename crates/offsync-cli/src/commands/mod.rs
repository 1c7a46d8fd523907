//! Command handlers for the CLI

pub mod asset;
pub mod config;
pub mod entities;
pub mod queue;
pub mod status;
pub mod submit;
pub mod sync;
pub mod watch;
