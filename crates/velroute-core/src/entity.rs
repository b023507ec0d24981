//! Entity and operation kinds and the typed routing key
//!
//! Routing keys render as `"{Entity}.{OPERATION}"` (e.g. `Client.GET`) and
//! parse case-insensitively, so `client.get` and `CLIENT.Get` name the same key.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Business entities the hybrid layer knows how to route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Client,
    Broker,
    Currency,
    Company,
    Poliza,
    Document,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Client,
        EntityKind::Broker,
        EntityKind::Currency,
        EntityKind::Company,
        EntityKind::Poliza,
        EntityKind::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Client => "Client",
            EntityKind::Broker => "Broker",
            EntityKind::Currency => "Currency",
            EntityKind::Company => "Company",
            EntityKind::Poliza => "Poliza",
            EntityKind::Document => "Document",
        }
    }

    /// Operations that must have a routing rule for this entity.
    ///
    /// Documents are create/read only: they have no UPDATE, DELETE or SEARCH.
    pub fn supported_operations(&self) -> &'static [OperationKind] {
        match self {
            EntityKind::Document => &[OperationKind::Get, OperationKind::Create],
            _ => &OperationKind::ALL,
        }
    }

    /// Default remote endpoint, relative to the tenant base URL
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            EntityKind::Client => "v1/clientes",
            EntityKind::Broker => "v1/corredores",
            EntityKind::Currency => "v1/monedas",
            EntityKind::Company => "v1/companias",
            EntityKind::Poliza => "v1/contratos",
            EntityKind::Document => "v1/documentos",
        }
    }

    /// Default name of the collection property in wrapped remote responses
    pub fn default_collection(&self) -> &'static str {
        match self {
            EntityKind::Client => "clientes",
            EntityKind::Broker => "corredores",
            EntityKind::Currency => "monedas",
            EntityKind::Company => "companias",
            EntityKind::Poliza => "contratos",
            EntityKind::Document => "documentos",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("Unknown entity '{}'", s)))
    }
}

/// CRUD operations plus search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Get,
    Create,
    Update,
    Delete,
    Search,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Get,
        OperationKind::Create,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Get => "GET",
            OperationKind::Create => "CREATE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Search => "SEARCH",
        }
    }

    /// Reads and searches; the only operations safe to retry or serve stale
    pub fn is_read(&self) -> bool {
        matches!(self, OperationKind::Get | OperationKind::Search)
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        OperationKind::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("Unknown operation '{}'", s)))
    }
}

/// Typed `(entity, operation)` routing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey {
    pub entity: EntityKind,
    pub operation: OperationKind,
}

impl RoutingKey {
    pub fn new(entity: EntityKind, operation: OperationKind) -> Self {
        Self { entity, operation }
    }

    /// Every key that must be configured before the system serves traffic
    pub fn required() -> Vec<RoutingKey> {
        EntityKind::ALL
            .iter()
            .flat_map(|entity| {
                entity
                    .supported_operations()
                    .iter()
                    .map(move |op| RoutingKey::new(*entity, *op))
            })
            .collect()
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.operation)
    }
}

impl FromStr for RoutingKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (entity, operation) = s.split_once('.').ok_or_else(|| {
            Error::Config(format!(
                "Invalid routing key '{}', expected '{{Entity}}.{{OPERATION}}'",
                s
            ))
        })?;
        Ok(RoutingKey::new(entity.parse()?, operation.parse()?))
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(EntityKind);
string_serde!(OperationKind);
string_serde!(RoutingKey);
