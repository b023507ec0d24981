//! Routing table
//!
//! Maps every `(entity, operation)` pair to a destination. The table is built
//! once at startup, validated against the full required key set, and never
//! mutated afterwards.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use velroute_core::{EntityKind, Error, OperationKind, Result, RoutingKey};

/// Where a request is served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Destination {
    /// Local repository only
    #[default]
    Local,
    /// Remote system of record only
    Remote,
    /// Remote is the source of truth, Local mirrors it
    Both,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Local => "Local",
            Destination::Remote => "Remote",
            Destination::Both => "Both",
        }
    }

    pub fn uses_remote(&self) -> bool {
        matches!(self, Destination::Remote | Destination::Both)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Destination::Local),
            "remote" => Ok(Destination::Remote),
            "both" => Ok(Destination::Both),
            other => Err(Error::Config(format!(
                "Unknown destination '{}', expected Local, Remote or Both",
                other
            ))),
        }
    }
}

impl Serialize for Destination {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn default_true() -> bool {
    true
}

/// Rule settings as written in configuration, keyed externally by `RoutingKey`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub destination: Destination,

    /// Serve Local when Remote fails (reads), or accept the write locally (Both)
    #[serde(default)]
    pub require_fallback: bool,

    /// Per-attempt remote timeout for this key; 0 = tenant or global default
    #[serde(default)]
    pub timeout_seconds: u64,

    /// Under Both, mirror successful remote writes into Local
    #[serde(default = "default_true")]
    pub write_through: bool,
}

impl RuleConfig {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            require_fallback: false,
            timeout_seconds: 0,
            write_through: true,
        }
    }
}

/// A routing rule bound to its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub entity: EntityKind,
    pub operation: OperationKind,
    pub destination: Destination,
    pub require_fallback: bool,
    pub timeout_seconds: u64,
    pub write_through: bool,
}

impl RoutingRule {
    pub fn new(entity: EntityKind, operation: OperationKind, destination: Destination) -> Self {
        Self::from_config(RoutingKey::new(entity, operation), RuleConfig::new(destination))
    }

    pub fn from_config(key: RoutingKey, config: RuleConfig) -> Self {
        Self {
            entity: key.entity,
            operation: key.operation,
            destination: config.destination,
            require_fallback: config.require_fallback,
            timeout_seconds: config.timeout_seconds,
            write_through: config.write_through,
        }
    }

    pub fn with_fallback(mut self, require_fallback: bool) -> Self {
        self.require_fallback = require_fallback;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_write_through(mut self, write_through: bool) -> Self {
        self.write_through = write_through;
        self
    }

    pub fn key(&self) -> RoutingKey {
        RoutingKey::new(self.entity, self.operation)
    }
}

/// Immutable routing table
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    rules: HashMap<RoutingKey, RoutingRule>,
}

impl RoutingTable {
    /// Create an empty routing table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rules; a later rule for the same key replaces an earlier one
    pub fn from_rules(rules: impl IntoIterator<Item = RoutingRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|rule| (rule.key(), rule)).collect(),
        }
    }

    /// Build from the `routing` configuration map
    pub fn from_config(config: impl IntoIterator<Item = (RoutingKey, RuleConfig)>) -> Self {
        Self::from_rules(
            config
                .into_iter()
                .map(|(key, rule)| RoutingRule::from_config(key, rule)),
        )
    }

    /// Return the table only if every required key is present
    pub fn validated(self) -> Result<Self> {
        self.validate_configuration()?;
        Ok(self)
    }

    /// Required keys with no rule, in declaration order
    pub fn missing_keys(&self) -> Vec<RoutingKey> {
        RoutingKey::required()
            .into_iter()
            .filter(|key| !self.rules.contains_key(key))
            .collect()
    }

    /// Check the full required key set, reporting every missing key at once
    pub fn validate_configuration(&self) -> Result<()> {
        let missing = self.missing_keys();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Configuration {
                missing: missing.iter().map(ToString::to_string).collect(),
            })
        }
    }

    /// Destination for a key; keys without a rule resolve to Local
    pub fn destination(&self, entity: EntityKind, operation: OperationKind) -> Destination {
        self.rule(entity, operation)
            .map(|rule| rule.destination)
            .unwrap_or_default()
    }

    /// Destination for string names, matched case-insensitively.
    ///
    /// Unknown entities or operations resolve to Local.
    pub fn destination_for(&self, entity: &str, operation: &str) -> Destination {
        match (entity.parse::<EntityKind>(), operation.parse::<OperationKind>()) {
            (Ok(entity), Ok(operation)) => self.destination(entity, operation),
            _ => Destination::Local,
        }
    }

    pub fn rule(&self, entity: EntityKind, operation: OperationKind) -> Option<&RoutingRule> {
        self.rules.get(&RoutingKey::new(entity, operation))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutingRule> {
        self.rules.values()
    }
}
