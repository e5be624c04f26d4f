//! Record-name schema manager
//!
//! Manages the schemas an application carries with it, for registries that
//! use the record name subject strategy: each schema is registered under a
//! subject named for its own fully-qualified name, rather than for a topic.
//!
//! Schemas are loaded from a directory of `*.json` files. An optional suffix
//! (e.g. `_dev1`) is appended to every schema name, and so to every subject,
//! so that staging registrations never touch the compatibility history of
//! production subjects.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::client::RegistryClient;
use crate::error::{RegistryError, Result};
use crate::schema::{CompatibilityType, SchemaBody, SchemaId};
use crate::serializer::PolySerializer;

/// Load every `*.json` schema under `root`, keyed by fully-qualified name
///
/// When `suffix` is non-empty it is appended to each schema's `name`.
pub fn load_schema_dir(root: &Path, suffix: &str) -> Result<BTreeMap<String, SchemaBody>> {
    if !root.is_dir() {
        return Err(RegistryError::Io(format!(
            "schema root {} is not a directory",
            root.display()
        )));
    }

    let mut schemas = BTreeMap::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || path.extension().map(|e| e != "json").unwrap_or(true) {
            continue;
        }

        let content = std::fs::read_to_string(path)?;
        let mut definition: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            RegistryError::InvalidSchema(format!("{}: {}", path.display(), e))
        })?;

        if !suffix.is_empty() {
            if let Some(name) = definition.get("name").and_then(|n| n.as_str()) {
                let suffixed = format!("{}{}", name, suffix);
                definition["name"] = serde_json::Value::String(suffixed);
            }
        }

        let body = SchemaBody::parse(definition)
            .map_err(|e| RegistryError::InvalidSchema(format!("{}: {}", path.display(), e)))?;
        let name = body.full_name().map(String::from).ok_or_else(|| {
            RegistryError::InvalidSchema(format!("{}: schema has no name", path.display()))
        })?;

        tracing::debug!(schema = %name, path = %path.display(), "Loaded schema");
        if schemas.insert(name.clone(), body).is_some() {
            tracing::warn!(schema = %name, path = %path.display(), "Duplicate schema name; later file wins");
        }
    }

    Ok(schemas)
}

/// Registers local schemas and serializes messages by schema name
#[derive(Debug)]
pub struct RecordNameSchemaManager {
    registry: RegistryClient,
    schemas: BTreeMap<String, SchemaBody>,
    serializer: PolySerializer,
}

impl RecordNameSchemaManager {
    /// Manage an already-loaded set of schemas, keyed by fully-qualified name
    pub fn new(registry: RegistryClient, schemas: BTreeMap<String, SchemaBody>) -> Self {
        Self {
            serializer: PolySerializer::new(registry.clone()),
            registry,
            schemas,
        }
    }

    /// Manage the schemas found under `root`
    pub fn from_dir(registry: RegistryClient, root: &Path, suffix: &str) -> Result<Self> {
        let schemas = load_schema_dir(root, suffix)?;
        tracing::info!(root = %root.display(), count = schemas.len(), "Loaded local schemas");
        Ok(Self::new(registry, schemas))
    }

    /// Names of the loaded schemas, sorted
    pub fn schema_names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    /// A loaded schema by name
    pub fn schema(&self, name: &str) -> Option<&SchemaBody> {
        self.schemas.get(name)
    }

    /// The ID `name` was registered with, if `register_schemas` has run
    pub fn id_of(&self, name: &str) -> Option<SchemaId> {
        self.serializer.id_of(name)
    }

    /// Register every loaded schema under its own name
    ///
    /// With `compatibility`, each subject's rule is brought to that level
    /// before its schema is registered. Without it, subjects keep their
    /// current rule, and new subjects inherit the registry's global one.
    pub async fn register_schemas(&self, compatibility: Option<CompatibilityType>) -> Result<()> {
        for (subject, body) in &self.schemas {
            if let Some(compatibility) = compatibility {
                self.ensure_compatibility(subject, compatibility).await?;
            }
            let id = self.serializer.register_schema(subject, body.clone()).await?;
            tracing::info!(subject = %subject, schema_id = id, "Registered schema");
        }
        Ok(())
    }

    async fn ensure_compatibility(
        &self,
        subject: &str,
        compatibility: CompatibilityType,
    ) -> Result<()> {
        let current = match self.registry.get_compatibility(subject).await {
            Ok(level) => Some(level),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if current == Some(compatibility) {
            tracing::debug!(subject = %subject, %compatibility, "Compatibility already set");
            return Ok(());
        }

        self.registry.set_compatibility(subject, compatibility).await?;
        tracing::info!(
            subject = %subject,
            from = ?current.map(|c| c.as_str()),
            to = %compatibility,
            "Set subject compatibility"
        );
        Ok(())
    }

    fn unknown(&self, name: &str) -> RegistryError {
        RegistryError::UnknownSchema {
            name: name.to_string(),
            available: self.schema_names(),
        }
    }

    /// Serialize with the registered schema named `name`
    pub fn serialize<T: Serialize + ?Sized>(&self, data: &T, name: &str) -> Result<bytes::Bytes> {
        if !self.schemas.contains_key(name) || self.serializer.id_of(name).is_none() {
            return Err(self.unknown(name));
        }
        self.serializer.serialize(data, name)
    }

    /// Serialize an Avro value with the registered schema named `name`
    pub fn serialize_value(
        &self,
        value: apache_avro::types::Value,
        name: &str,
    ) -> Result<bytes::Bytes> {
        if !self.schemas.contains_key(name) || self.serializer.id_of(name).is_none() {
            return Err(self.unknown(name));
        }
        self.serializer.serialize_value(value, name)
    }
}
