//! Schema Registry client
//!
//! Protocol logic for the registry's REST API: URL construction, request
//! and response shapes, cache policy and error mapping. All I/O goes through
//! a [`Transport`], so the same client runs over `reqwest` in production and
//! over [`MockTransport`](crate::transport::MockTransport) in tests.
//!
//! Schema lookups by ID and registrations are cached and coalesced. Version
//! listings and compatibility settings are always fetched live.

use futures::future::{try_join_all, FutureExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Inflight, SchemaCache, SubjectCache, SubjectKey};
use crate::config::RegistrySettings;
use crate::error::{RegistryError, Result};
use crate::schema::{CompatibilityType, SchemaBody, SchemaId, Version, VersionSelector};
use crate::transport::{
    decipher_response, format_url, HttpRequest, Method, ReqwestTransport, Transport,
};

#[derive(Debug, Deserialize)]
struct SchemaByIdResponse {
    schema: String,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: SchemaId,
}

#[derive(Debug, Deserialize)]
struct SubjectVersionResponse {
    subject: String,
    version: u32,
    id: SchemaId,
    schema: String,
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    #[serde(rename = "compatibilityLevel", alias = "compatibility")]
    compatibility_level: CompatibilityType,
}

fn parse_response<T: DeserializeOwned>(data: serde_json::Value, what: &str) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| RegistryError::Json(format!("Unexpected {} response: {}", what, e)))
}

/// Request execution shared by the client and its pending resolutions
struct Protocol {
    url: String,
    transport: Arc<dyn Transport>,
}

impl Protocol {
    async fn request(
        &self,
        method: Method,
        template: &str,
        url_vars: &[(&str, String)],
        data: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let url = format_url(&self.url, template, url_vars);
        let request = HttpRequest::new(method, url.clone(), data)?;
        let response = self.transport.send(request).await?;
        decipher_response(method, &url, &response)
    }

    async fn fetch_schema(&self, id: SchemaId) -> Result<SchemaBody> {
        let data = self
            .request(Method::Get, "/schemas/ids/{id}", &[("id", id.to_string())], None)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => RegistryError::SchemaNotFound(format!("schema id {}", id)),
                e => e,
            })?;
        let response: SchemaByIdResponse = parse_response(data, "schema")?;
        SchemaBody::parse_str(&response.schema)
    }

    async fn register(&self, subject: &str, body: &SchemaBody) -> Result<SchemaId> {
        let data = json!({ "schema": body.to_registry_string() });
        let result = self
            .request(
                Method::Post,
                "/subjects/{subject}/versions",
                &[("subject", subject.to_string())],
                Some(&data),
            )
            .await
            .map_err(|e| incompatible(subject, e))?;
        let response: RegisterResponse = parse_response(result, "registration")?;
        Ok(response.id)
    }
}

/// A 409 on registration means the subject's compatibility rule rejected it
fn incompatible(subject: &str, error: RegistryError) -> RegistryError {
    match error {
        RegistryError::Transport {
            status: Some(409),
            message,
            ..
        } => RegistryError::IncompatibleSchema {
            subject: subject.to_string(),
            message,
        },
        other => other,
    }
}

struct ClientInner {
    protocol: Arc<Protocol>,
    schemas: Arc<SchemaCache>,
    subjects: Arc<SubjectCache>,
    schema_fetches: Inflight<SchemaId, Arc<SchemaBody>>,
    registrations: Inflight<SubjectKey, SchemaId>,
}

/// Client for a Schema Registry
///
/// Cloning is cheap; clones share the transport and the caches.
#[derive(Clone)]
pub struct RegistryClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("url", &self.inner.protocol.url)
            .field("cached_schemas", &self.inner.schemas.len())
            .field("cached_subjects", &self.inner.subjects.len())
            .finish()
    }
}

impl RegistryClient {
    /// Create a client for the registry at `url` (e.g. `http://registry:8081`)
    pub fn new(url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                protocol: Arc::new(Protocol {
                    url: url.into(),
                    transport,
                }),
                schemas: Arc::new(SchemaCache::new()),
                subjects: Arc::new(SubjectCache::new()),
                schema_fetches: Inflight::new(),
                registrations: Inflight::new(),
            }),
        }
    }

    /// Create a client over `reqwest` from settings
    pub fn from_settings(settings: &RegistrySettings) -> Result<Self> {
        let transport =
            ReqwestTransport::new(Duration::from_secs(settings.registry.timeout_secs))?;
        Ok(Self::new(settings.registry.url.clone(), Arc::new(transport)))
    }

    /// Base URL of the registry
    pub fn url(&self) -> &str {
        &self.inner.protocol.url
    }

    // ---------------------------------------------------------------------
    // Low-level verbs
    // ---------------------------------------------------------------------

    /// Send a GET request. `template` may contain `{var}` or `{/var}`.
    pub async fn get(&self, template: &str, url_vars: &[(&str, String)]) -> Result<serde_json::Value> {
        self.inner
            .protocol
            .request(Method::Get, template, url_vars, None)
            .await
    }

    /// Send a POST request with a JSON body
    pub async fn post(
        &self,
        template: &str,
        url_vars: &[(&str, String)],
        data: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.inner
            .protocol
            .request(Method::Post, template, url_vars, Some(data))
            .await
    }

    /// Send a PUT request, returning the parsed response body
    pub async fn put(
        &self,
        template: &str,
        url_vars: &[(&str, String)],
        data: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.inner
            .protocol
            .request(Method::Put, template, url_vars, data)
            .await
    }

    /// Send a PATCH request, returning the parsed response body
    pub async fn patch(
        &self,
        template: &str,
        url_vars: &[(&str, String)],
        data: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.inner
            .protocol
            .request(Method::Patch, template, url_vars, Some(data))
            .await
    }

    /// Send a DELETE request, returning the parsed response body
    pub async fn delete(
        &self,
        template: &str,
        url_vars: &[(&str, String)],
        data: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value> {
        self.inner
            .protocol
            .request(Method::Delete, template, url_vars, data)
            .await
    }

    // ---------------------------------------------------------------------
    // Cached operations
    // ---------------------------------------------------------------------

    /// Get a schema by its registry ID
    ///
    /// Wraps `GET /schemas/ids/{id}`. Returns without suspending when the ID
    /// is cached; concurrent misses for the same ID share one request.
    pub async fn get_schema_by_id(&self, id: SchemaId) -> Result<Arc<SchemaBody>> {
        if let Some(body) = self.inner.schemas.get(id) {
            return Ok(body);
        }

        let schemas = Arc::clone(&self.inner.schemas);
        let resolution = self.inner.schema_fetches.join_or_start(
            &id,
            || schemas.get(id),
            || {
                let protocol = Arc::clone(&self.inner.protocol);
                let schemas = Arc::clone(&self.inner.schemas);
                async move {
                    tracing::debug!(schema_id = id, "Schema cache miss; fetching from registry");
                    let body = protocol.fetch_schema(id).await?;
                    Ok(schemas.insert(id, Arc::new(body)))
                }
                .boxed()
            },
        );

        let result = resolution.clone().await;
        self.inner.schema_fetches.finish(&id, &resolution);
        result
    }

    /// Register a schema under `subject`, or get the ID it already has
    ///
    /// Wraps `POST /subjects/{subject}/versions`. The registry treats a
    /// byte-identical body as already registered, so this is idempotent;
    /// the local cache makes repeated calls free.
    pub async fn register_schema(&self, subject: &str, body: &SchemaBody) -> Result<SchemaId> {
        let key: SubjectKey = (subject.to_string(), body.fingerprint().clone());
        if let Some(id) = self.inner.subjects.get(&key) {
            return Ok(id);
        }

        let subjects = Arc::clone(&self.inner.subjects);
        let resolution = self.inner.registrations.join_or_start(
            &key,
            || subjects.get(&key),
            || {
                let protocol = Arc::clone(&self.inner.protocol);
                let schemas = Arc::clone(&self.inner.schemas);
                let subjects = Arc::clone(&self.inner.subjects);
                let body = Arc::new(body.clone());
                let key = key.clone();
                async move {
                    let id = protocol.register(&key.0, &body).await?;
                    tracing::debug!(
                        subject = %key.0,
                        schema_id = id,
                        fingerprint = body.fingerprint().short(),
                        "Schema registered"
                    );
                    schemas.insert(id, body);
                    subjects.insert(key, id);
                    Ok(id)
                }
                .boxed()
            },
        );

        let result = resolution.clone().await;
        self.inner.registrations.finish(&key, &resolution);
        result
    }

    /// Register a schema under the subject named by its fully-qualified name
    pub async fn register_schema_auto(&self, body: &SchemaBody) -> Result<SchemaId> {
        let subject = body.full_name().ok_or_else(|| {
            RegistryError::InvalidSchema(
                "Cannot derive a subject name from a schema without a 'name'".to_string(),
            )
        })?;
        self.register_schema(subject, body).await
    }

    // ---------------------------------------------------------------------
    // Live queries
    // ---------------------------------------------------------------------

    /// Find the version under which `body` is registered in `subject`
    ///
    /// Wraps `POST /subjects/{subject}`.
    pub async fn lookup_version(&self, subject: &str, body: &SchemaBody) -> Result<Version> {
        let data = json!({ "schema": body.to_registry_string() });
        let result = self
            .post("/subjects/{subject}", &[("subject", subject.to_string())], &data)
            .await?;
        let response: SubjectVersionResponse = parse_response(result, "lookup")?;
        Ok(Version {
            subject: response.subject,
            version: response.version,
            id: response.id,
        })
    }

    /// Get one version of a subject together with its schema body
    ///
    /// Wraps `GET /subjects/{subject}/versions/{version}`. The body is
    /// added to the ID cache.
    pub async fn get_schema_by_subject(
        &self,
        subject: &str,
        version: VersionSelector,
    ) -> Result<(Version, Arc<SchemaBody>)> {
        let result = self
            .get(
                "/subjects/{subject}/versions/{version}",
                &[("subject", subject.to_string()), ("version", version.to_string())],
            )
            .await?;
        let response: SubjectVersionResponse = parse_response(result, "subject version")?;
        let body = match self.inner.schemas.get(response.id) {
            Some(body) => body,
            None => {
                let parsed = SchemaBody::parse_str(&response.schema)?;
                self.inner.schemas.insert(response.id, Arc::new(parsed))
            }
        };
        Ok((
            Version {
                subject: response.subject,
                version: response.version,
                id: response.id,
            },
            body,
        ))
    }

    /// All versions of a subject, in ascending order
    ///
    /// Wraps `GET /subjects/{subject}/versions`, then resolves each version's
    /// schema ID.
    pub async fn get_versions(&self, subject: &str) -> Result<Vec<Version>> {
        let result = self
            .get("/subjects/{subject}/versions", &[("subject", subject.to_string())])
            .await?;
        let mut numbers: Vec<u32> = parse_response(result, "version list")?;
        numbers.sort_unstable();

        let versions = try_join_all(numbers.into_iter().map(|n| async move {
            self.get_schema_by_subject(subject, VersionSelector::Number(n))
                .await
                .map(|(version, _)| version)
        }))
        .await?;
        Ok(versions)
    }

    /// The latest version of a subject
    pub async fn get_latest(&self, subject: &str) -> Result<Version> {
        let (version, _) = self
            .get_schema_by_subject(subject, VersionSelector::Latest)
            .await?;
        Ok(version)
    }

    /// Set a subject's compatibility rule
    ///
    /// Wraps `PUT /config/{subject}` and returns the level the registry
    /// reports back.
    pub async fn set_compatibility(
        &self,
        subject: &str,
        compatibility: CompatibilityType,
    ) -> Result<CompatibilityType> {
        let data = json!({ "compatibility": compatibility });
        let result = self
            .put("/config/{subject}", &[("subject", subject.to_string())], Some(&data))
            .await?;
        let response: ConfigResponse = parse_response(result, "config")?;
        Ok(response.compatibility_level)
    }

    /// Get a subject's compatibility rule
    ///
    /// Wraps `GET /config/{subject}`. Fails with a not-found error when the
    /// subject has no subject-level setting.
    pub async fn get_compatibility(&self, subject: &str) -> Result<CompatibilityType> {
        let result = self
            .get("/config/{subject}", &[("subject", subject.to_string())])
            .await?;
        let response: ConfigResponse = parse_response(result, "config")?;
        Ok(response.compatibility_level)
    }

    /// Set the registry-wide default compatibility rule
    pub async fn set_global_compatibility(
        &self,
        compatibility: CompatibilityType,
    ) -> Result<CompatibilityType> {
        let data = json!({ "compatibility": compatibility });
        let result = self.put("/config", &[], Some(&data)).await?;
        let response: ConfigResponse = parse_response(result, "config")?;
        Ok(response.compatibility_level)
    }

    /// Get the registry-wide default compatibility rule
    pub async fn get_global_compatibility(&self) -> Result<CompatibilityType> {
        let result = self.get("/config", &[]).await?;
        let response: ConfigResponse = parse_response(result, "config")?;
        Ok(response.compatibility_level)
    }

    // ---------------------------------------------------------------------
    // Cache introspection
    // ---------------------------------------------------------------------

    /// A cached schema body, without touching the registry
    pub fn cached_schema(&self, id: SchemaId) -> Option<Arc<SchemaBody>> {
        self.inner.schemas.get(id)
    }

    /// The cached ID of `body` under `subject`, without touching the registry
    pub fn cached_id(&self, subject: &str, body: &SchemaBody) -> Option<SchemaId> {
        self.inner
            .subjects
            .get(&(subject.to_string(), body.fingerprint().clone()))
    }

    /// The cached ID of a schema body under any subject
    pub fn cached_id_of(&self, body: &SchemaBody) -> Option<SchemaId> {
        self.inner.schemas.id_of(body.fingerprint())
    }

    /// Number of schema bodies in the ID cache
    pub fn schema_cache_len(&self) -> usize {
        self.inner.schemas.len()
    }

    /// Number of entries in the subject cache
    pub fn subject_cache_len(&self) -> usize {
        self.inner.subjects.len()
    }
}
