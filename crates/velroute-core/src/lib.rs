//! Velroute Core Types and Traits
//!
//! This crate provides the fundamental types and traits used throughout Velroute:
//! - Entity and operation kinds plus the typed routing key
//! - Tenant configuration and its provider trait
//! - Hybrid resilience settings
//! - Local and remote gateway trait abstractions
//! - Core error types

pub mod entity;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod settings;
pub mod tenant;

pub use entity::{EntityKind, OperationKind, RoutingKey};
pub use error::{Error, Result};
pub use gateway::{LocalGateway, OperationPayload, PayloadShape, RecordSet, RemoteGateway, RemoteRequest};
pub use settings::HybridSettings;
pub use tenant::{TenantConfigProvider, TenantConfiguration, TenantId};
