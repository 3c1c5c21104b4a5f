//! Review cycle orchestration for pull requests: AI and human review rounds,
//! a merge gate, merge execution and post-merge cleanup.

pub mod agent;
pub mod config;
pub mod error;
pub mod merge;
pub mod platform;
pub mod queue;
pub mod review;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod webhook;
pub mod workflow;
pub mod workspace;
