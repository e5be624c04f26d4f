//! Avro serializers and deserializers for the registry wire format
//!
//! - [`Serializer`] writes messages for one fixed schema.
//! - [`PolySerializer`] writes messages for many schemas, addressed by name.
//! - [`Deserializer`] reads any message whose schema is in the registry.

use apache_avro::schema::{NamesRef, ResolvedSchema, Schema};
use apache_avro::types::Value;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::client::RegistryClient;
use crate::error::{RegistryError, Result};
use crate::schema::{SchemaBody, SchemaId};
use crate::wire;

/// Encode a serializable value against a schema, without the envelope
pub fn encode_payload<T: Serialize + ?Sized>(schema: &SchemaBody, data: &T) -> Result<Vec<u8>> {
    encode_value(schema, apache_avro::to_value(data)?)
}

/// Encode an Avro value against a schema, without the envelope
///
/// The value is resolved against the schema first, so a map can stand in
/// for a record and an `i64` for an `int`. An `i64` outside the `int`
/// range is rejected rather than truncated.
pub fn encode_value(schema: &SchemaBody, value: Value) -> Result<Vec<u8>> {
    let resolved_schema = ResolvedSchema::try_from(schema.avro())?;
    check_int_ranges(&value, schema.avro(), resolved_schema.get_names())?;
    let resolved = value.resolve(schema.avro())?;
    Ok(apache_avro::to_avro_datum(schema.avro(), resolved)?)
}

fn check_int_ranges(value: &Value, schema: &Schema, names: &NamesRef<'_>) -> Result<()> {
    match (schema, value) {
        (Schema::Int, Value::Long(n)) => match i32::try_from(*n) {
            Ok(_) => Ok(()),
            Err(_) => Err(RegistryError::Encoding(format!(
                "{} is out of range for an Avro int",
                n
            ))),
        },
        (Schema::Ref { name }, _) => match names.get(name) {
            Some(named) => check_int_ranges(value, named, names),
            None => Ok(()),
        },
        (Schema::Record(record), Value::Record(fields)) => {
            for (name, field_value) in fields {
                if let Some(&index) = record.lookup.get(name) {
                    check_int_ranges(field_value, &record.fields[index].schema, names)?;
                }
            }
            Ok(())
        }
        (Schema::Record(record), Value::Map(items)) => {
            for field in &record.fields {
                if let Some(field_value) = items.get(&field.name) {
                    check_int_ranges(field_value, &field.schema, names)?;
                }
            }
            Ok(())
        }
        (Schema::Array(inner), Value::Array(items)) => items
            .iter()
            .try_for_each(|item| check_int_ranges(item, inner, names)),
        (Schema::Map(inner), Value::Map(items)) => items
            .values()
            .try_for_each(|item| check_int_ranges(item, inner, names)),
        (Schema::Union(_), Value::Union(_, inner)) => check_int_ranges(inner, schema, names),
        (Schema::Union(union), Value::Long(_)) => {
            // A long-typed branch takes the value whole
            let widening = union
                .variants()
                .iter()
                .any(|v| matches!(v, Schema::Long | Schema::Float | Schema::Double));
            match union.variants().iter().find(|v| matches!(v, Schema::Int)) {
                Some(int) if !widening => check_int_ranges(value, int, names),
                _ => Ok(()),
            }
        }
        (Schema::Union(union), _) => {
            let branch = union.variants().iter().find(|v| {
                matches!(
                    (v, value),
                    (Schema::Array(_), Value::Array(_))
                        | (Schema::Map(_), Value::Map(_))
                        | (Schema::Record(_) | Schema::Ref { .. }, Value::Record(_) | Value::Map(_))
                )
            });
            match branch {
                Some(branch) => check_int_ranges(value, branch, names),
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

/// Decode a payload written with `schema`
pub fn decode_payload(schema: &SchemaBody, mut payload: &[u8]) -> Result<Value> {
    Ok(apache_avro::from_avro_datum(schema.avro(), &mut payload, None)?)
}

/// Serializer for messages of a single schema
///
/// Call [`Serializer::register`] once before serializing; it obtains the
/// schema's ID and is safe to repeat.
#[derive(Debug)]
pub struct Serializer {
    registry: RegistryClient,
    schema: Arc<SchemaBody>,
    subject: Option<String>,
    id: OnceLock<SchemaId>,
}

impl Serializer {
    /// Bind a serializer to a schema. The subject defaults to the schema's
    /// fully-qualified name.
    pub fn new(registry: RegistryClient, schema: SchemaBody) -> Self {
        Self {
            registry,
            schema: Arc::new(schema),
            subject: None,
            id: OnceLock::new(),
        }
    }

    /// Register under an explicit subject instead of the schema's name
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Create and register in one step
    pub async fn register_new(
        registry: RegistryClient,
        schema: SchemaBody,
        subject: Option<&str>,
    ) -> Result<Self> {
        let mut serializer = Self::new(registry, schema);
        serializer.subject = subject.map(String::from);
        serializer.register().await?;
        Ok(serializer)
    }

    /// Register the schema (or find its existing ID)
    pub async fn register(&self) -> Result<SchemaId> {
        if let Some(id) = self.id.get() {
            return Ok(*id);
        }
        let id = match &self.subject {
            Some(subject) => self.registry.register_schema(subject, &self.schema).await?,
            None => self.registry.register_schema_auto(&self.schema).await?,
        };
        Ok(*self.id.get_or_init(|| id))
    }

    /// The schema ID, once registered
    pub fn id(&self) -> Option<SchemaId> {
        self.id.get().copied()
    }

    pub fn schema(&self) -> &SchemaBody {
        &self.schema
    }

    /// Serialize a value into a wire-format message
    pub fn serialize<T: Serialize + ?Sized>(&self, data: &T) -> Result<Bytes> {
        let id = self.id().ok_or(RegistryError::NotRegistered)?;
        Ok(wire::encode(id, &encode_payload(&self.schema, data)?))
    }

    /// Serialize an Avro value into a wire-format message
    pub fn serialize_value(&self, value: Value) -> Result<Bytes> {
        let id = self.id().ok_or(RegistryError::NotRegistered)?;
        Ok(wire::encode(id, &encode_value(&self.schema, value)?))
    }
}

/// A decoded message with its schema information
#[derive(Debug, Clone)]
pub struct MessageInfo {
    /// Registry ID of the message's schema
    pub id: SchemaId,
    /// The writer schema
    pub schema: Arc<SchemaBody>,
    /// The decoded message
    pub message: Value,
}

/// Deserializer for wire-format messages of any registered schema
///
/// The schema is looked up per message by the ID in its envelope; lookups
/// after the first for a given ID are served from the client's cache.
#[derive(Debug, Clone)]
pub struct Deserializer {
    registry: RegistryClient,
}

impl Deserializer {
    pub fn new(registry: RegistryClient) -> Self {
        Self { registry }
    }

    /// Decode a message into an Avro value
    pub async fn deserialize(&self, message: &[u8]) -> Result<MessageInfo> {
        let (id, payload) = wire::decode(message)?;
        let schema = self.registry.get_schema_by_id(id).await?;
        let message = decode_payload(&schema, payload)?;
        Ok(MessageInfo {
            id,
            schema,
            message,
        })
    }

    /// Decode a message into a Rust type
    pub async fn deserialize_into<T: DeserializeOwned>(&self, message: &[u8]) -> Result<T> {
        let info = self.deserialize(message).await?;
        Ok(apache_avro::from_value(&info.message)?)
    }
}

#[derive(Debug, Clone)]
struct NamedSchema {
    id: SchemaId,
    schema: Arc<SchemaBody>,
}

/// Serializer for messages of many schemas, addressed by name
///
/// Each name is also the subject its schema is registered under.
#[derive(Debug)]
pub struct PolySerializer {
    registry: RegistryClient,
    schemas: RwLock<HashMap<String, NamedSchema>>,
}

impl PolySerializer {
    pub fn new(registry: RegistryClient) -> Self {
        Self {
            registry,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Register `schema` under the subject `name` and remember it
    pub async fn register_schema(&self, name: &str, schema: SchemaBody) -> Result<SchemaId> {
        let id = self.registry.register_schema(name, &schema).await?;
        self.schemas
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                name.to_string(),
                NamedSchema {
                    id,
                    schema: Arc::new(schema),
                },
            );
        Ok(id)
    }

    /// The ID registered for `name`
    pub fn id_of(&self, name: &str) -> Option<SchemaId> {
        self.lookup(name).map(|s| s.id)
    }

    /// Names registered so far, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .schemas
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str) -> Option<NamedSchema> {
        self.schemas
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn named(&self, name: &str) -> Result<NamedSchema> {
        self.lookup(name)
            .ok_or_else(|| RegistryError::SchemaNotFound(format!("no schema registered as {}", name)))
    }

    /// Serialize with the schema registered as `name`
    pub fn serialize<T: Serialize + ?Sized>(&self, data: &T, name: &str) -> Result<Bytes> {
        let named = self.named(name)?;
        Ok(wire::encode(named.id, &encode_payload(&named.schema, data)?))
    }

    /// Serialize an Avro value with the schema registered as `name`
    pub fn serialize_value(&self, value: Value, name: &str) -> Result<Bytes> {
        let named = self.named(name)?;
        Ok(wire::encode(named.id, &encode_value(&named.schema, value)?))
    }

    /// Serialize with a schema fetched from the registry by ID
    pub async fn serialize_with_id<T: Serialize + ?Sized>(
        &self,
        data: &T,
        id: SchemaId,
    ) -> Result<Bytes> {
        let schema = self.registry.get_schema_by_id(id).await?;
        Ok(wire::encode(id, &encode_payload(&schema, data)?))
    }

    /// Serialize with a schema, registering it first if needed
    ///
    /// Without a subject, the schema's fully-qualified name is used.
    pub async fn serialize_with_schema<T: Serialize + ?Sized>(
        &self,
        data: &T,
        schema: &SchemaBody,
        subject: Option<&str>,
    ) -> Result<Bytes> {
        let id = match subject {
            Some(subject) => self.registry.register_schema(subject, schema).await?,
            None => self.registry.register_schema_auto(schema).await?,
        };
        Ok(wire::encode(id, &encode_payload(schema, data)?))
    }
}
