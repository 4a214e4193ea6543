//! Shared types for the ndt7 client.
//!
//! This crate contains:
//! - **Protocol messages**: the ndt7 server measurement JSON, the subprotocol
//!   identifier, and the messages exchanged between a subtest worker and its
//!   supervisor
//! - **Data models**: subtest outcomes, the composite session status and the
//!   final results record

pub mod models;
pub mod protocol;
