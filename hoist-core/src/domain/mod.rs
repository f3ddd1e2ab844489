//! Core domain types
//!
//! These types describe builds, services and deploys. They are shared by the
//! engine (which produces them from remote hosts) and the CLI (which
//! presents them).

pub mod build;
pub mod deploy;
pub mod rollout;
pub mod service;
