//! Velroute Egress Connectors
//!
//! This crate provides the connector to the remote system of record:
//! - Shared HTTP client construction
//! - Velneo REST connector implementing `RemoteGateway`
//! - Dual-shape payload parsing (wrapper object or bare array)

pub mod client;
pub mod error;
pub mod payload;
pub mod velneo;

pub use error::{EgressError, Result};
pub use payload::ParsedPayload;
pub use velneo::{EntityEndpoint, VelneoConfig, VelneoConnector};
