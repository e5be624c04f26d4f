//! Schema types and structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, Result};
use crate::fingerprint::Fingerprint;

/// Identifier the registry assigns to one exact schema body
pub type SchemaId = u32;

/// A parsed Avro schema body with its derived identity
///
/// The stored definition has private helper keys (any key starting with
/// `__`) removed, so a schema fetched back from the registry compares equal
/// to the hand-authored one it came from.
#[derive(Debug, Clone)]
pub struct SchemaBody {
    definition: serde_json::Value,
    schema: apache_avro::Schema,
    full_name: Option<String>,
    fingerprint: Fingerprint,
}

impl SchemaBody {
    /// Parse a schema from its JSON definition
    pub fn parse(definition: serde_json::Value) -> Result<Self> {
        let definition = strip_private_keys(definition);
        let schema = apache_avro::Schema::parse(&definition)
            .map_err(|e| RegistryError::InvalidSchema(e.to_string()))?;
        let full_name = avro_full_name(&definition);
        let fingerprint = Fingerprint::of_definition(&definition);

        Ok(Self {
            definition,
            schema,
            full_name,
            fingerprint,
        })
    }

    /// Parse a schema from JSON text
    pub fn parse_str(text: &str) -> Result<Self> {
        let definition: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| RegistryError::InvalidSchema(e.to_string()))?;
        Self::parse(definition)
    }

    /// The JSON definition, without private helper keys
    pub fn definition(&self) -> &serde_json::Value {
        &self.definition
    }

    /// The parsed Avro schema used for encoding and decoding
    pub fn avro(&self) -> &apache_avro::Schema {
        &self.schema
    }

    /// Fully-qualified name for named types (records, enums, fixed)
    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    /// Content fingerprint over the canonical form
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// The schema as a string, as the registry expects it in request bodies
    pub fn to_registry_string(&self) -> String {
        self.definition.to_string()
    }
}

impl PartialEq for SchemaBody {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for SchemaBody {}

/// Get the fully-qualified name of an Avro schema definition
///
/// A `name` containing a period is already fully qualified. Otherwise a
/// `namespace`, when present, is prepended.
pub fn avro_full_name(definition: &serde_json::Value) -> Option<String> {
    let name = definition.get("name")?.as_str()?;
    match definition.get("namespace").and_then(|n| n.as_str()) {
        Some(namespace) if !name.contains('.') && !namespace.is_empty() => {
            Some(format!("{}.{}", namespace, name))
        }
        _ => Some(name.to_string()),
    }
}

/// Remove private helper keys injected by Avro tooling, recursively
pub fn strip_private_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(key, _)| !key.starts_with("__"))
                .map(|(key, v)| (key, strip_private_keys(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(strip_private_keys).collect())
        }
        other => other,
    }
}

/// A schema version under a subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Subject the version belongs to
    pub subject: String,
    /// 1-based, registry-assigned version number
    pub version: u32,
    /// Schema ID bound to this version
    pub id: SchemaId,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} (id {})", self.subject, self.version, self.id)
    }
}

/// Which version of a subject to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Number(u32),
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => write!(f, "latest"),
            VersionSelector::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Compatibility rules the registry enforces when a new version is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityType {
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
    None,
}

impl CompatibilityType {
    /// All settings, in the registry's documentation order
    pub const ALL: [CompatibilityType; 7] = [
        CompatibilityType::Backward,
        CompatibilityType::BackwardTransitive,
        CompatibilityType::Forward,
        CompatibilityType::ForwardTransitive,
        CompatibilityType::Full,
        CompatibilityType::FullTransitive,
        CompatibilityType::None,
    ];

    /// The registry's name for this setting
    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityType::Backward => "BACKWARD",
            CompatibilityType::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityType::Forward => "FORWARD",
            CompatibilityType::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityType::Full => "FULL",
            CompatibilityType::FullTransitive => "FULL_TRANSITIVE",
            CompatibilityType::None => "NONE",
        }
    }
}

impl fmt::Display for CompatibilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == upper)
            .ok_or_else(|| {
                RegistryError::Config(format!(
                    "Compatibility setting {:?} is not in the allowed set: {:?}",
                    s,
                    Self::ALL.iter().map(|c| c.as_str()).collect::<Vec<_>>()
                ))
            })
    }
}
