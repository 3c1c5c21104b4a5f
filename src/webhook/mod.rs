//! GitHub webhook intake for serve mode.

pub mod events;
pub mod handler;
pub mod signature;
