//! Hoist Core
//!
//! Pure domain layer of the hoist deployment tool.
//!
//! This crate contains:
//! - Tag codec: sortable, parseable build identifiers
//! - Crontab block editor: text transforms over shared scheduler documents
//! - Fleet configuration: `hoist.yml` types and validation
//! - Domain types and DTOs shared by the engine and the CLI

pub mod config;
pub mod crontab;
pub mod domain;
pub mod dto;
pub mod tag;

pub use tag::{BuildTag, TagError};
