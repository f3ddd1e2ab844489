//! Data transfer objects
//!
//! Payloads that leave the process, serialized as JSON.

pub mod event;
