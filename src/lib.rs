//! Registry Serde
//!
//! A client for Confluent-compatible Schema Registries, with Avro
//! serializers that speak the registry wire format.
//!
//! ## Features
//!
//! - **Cached Registry Client**: Schema bodies by ID and registrations by
//!   subject are cached; concurrent misses for the same key share one request
//! - **Sans-I/O Protocol**: All HTTP goes through a [`Transport`]; `reqwest` in
//!   production, [`MockTransport`] in tests
//! - **Wire Format**: 5-byte envelope (magic byte + big-endian schema ID)
//! - **Serializers**: Single-schema, multi-schema and schema-agnostic readers
//! - **Record-Name Schema Manager**: Bulk registration of local `*.json` schemas
//!
//! ## Architecture
//!
//! ```text
//! serialize:   value -> Serializer -> RegistryClient (id) -> wire::encode -> bytes
//! deserialize: bytes -> wire::decode (id) -> RegistryClient (schema) -> value
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod manager;
pub mod schema;
pub mod serializer;
pub mod transport;
pub mod wire;

pub use client::RegistryClient;
pub use config::RegistrySettings;
pub use error::{RegistryError, Result};
pub use fingerprint::Fingerprint;
pub use manager::{load_schema_dir, RecordNameSchemaManager};
pub use schema::{CompatibilityType, SchemaBody, SchemaId, Version, VersionSelector};
pub use serializer::{Deserializer, MessageInfo, PolySerializer, Serializer};
pub use transport::{HttpRequest, HttpResponse, Method, MockTransport, ReqwestTransport, Transport};
