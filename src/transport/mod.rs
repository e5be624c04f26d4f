//! Transport contract and the protocol pieces that do not depend on it
//!
//! The registry client never talks to the network directly. It builds an
//! [`HttpRequest`], hands it to a [`Transport`], and interprets the raw
//! [`HttpResponse`] itself with [`decipher_response`]. Any HTTP mechanism can
//! drive the same protocol logic by implementing the trait.

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{RegistryError, Result};

mod http;
mod mock;

pub use http::ReqwestTransport;
pub use mock::{MockTransport, RecordedRequest};

/// Media type the registry speaks
pub const REGISTRY_MEDIA_TYPE: &str = "application/vnd.schemaregistry.v1+json";

/// HTTP verbs used against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-formed request, ready for a transport to send
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Expanded, absolute URL
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Serialized JSON body, if any
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Build a request with the registry headers and an optional JSON body
    pub fn new(method: Method, url: String, data: Option<&serde_json::Value>) -> Result<Self> {
        let mut headers = make_headers();
        let body = match data {
            Some(data) => {
                let body = serde_json::to_vec(data)?;
                headers.push((
                    "content-type".to_string(),
                    "application/json; charset=utf-8".to_string(),
                ));
                headers.push(("content-length".to_string(), body.len().to_string()));
                Some(body)
            }
            None => {
                headers.push(("content-length".to_string(), "0".to_string()));
                None
            }
        };

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }

    /// Look up a header by (lowercase) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The body parsed back as JSON
    pub fn json(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// A raw response: status, content type and body bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A registry-typed JSON response
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: Some(REGISTRY_MEDIA_TYPE.to_string()),
            body: body.to_string().into_bytes(),
        }
    }
}

/// The capability the registry client needs from an HTTP mechanism
///
/// Implementations only move bytes. A response with any status is a
/// successful `send`; connection-level failures are reported as
/// [`RegistryError::Transport`] with no status.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Default headers for registry requests
pub fn make_headers() -> Vec<(String, String)> {
    vec![("accept".to_string(), REGISTRY_MEDIA_TYPE.to_string())]
}

/// Split a content-type header into its media type and charset
pub fn parse_content_type(content_type: Option<&str>) -> (Option<String>, String) {
    let Some(content_type) = content_type else {
        return (None, "utf-8".to_string());
    };
    let mut parts = content_type.split(';').map(str::trim);
    let media_type = parts.next().map(|t| t.to_ascii_lowercase());
    let charset = parts
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.eq_ignore_ascii_case("charset"))
        .map(|(_, v)| v.trim_matches('"').to_ascii_lowercase())
        .unwrap_or_else(|| "utf-8".to_string());
    (media_type, charset)
}

/// Decode a response body according to its content type
///
/// The body text is decoded with the declared charset (UTF-8 when none is
/// given). JSON media types are parsed. An empty body or a missing content
/// type decodes to `null`. Anything else is returned as a JSON string.
pub fn decode_body(content_type: Option<&str>, body: &[u8]) -> Result<serde_json::Value> {
    if body.is_empty() || content_type.is_none() {
        return Ok(serde_json::Value::Null);
    }
    let (media_type, charset) = parse_content_type(content_type);
    let text = decode_text(body, &charset)?;
    match media_type.as_deref() {
        Some(REGISTRY_MEDIA_TYPE) | Some("application/json") => Ok(serde_json::from_str(&text)?),
        other => {
            tracing::warn!(
                content_type = ?other,
                "Unrecognized content type; decoding the body as a string"
            );
            Ok(serde_json::Value::String(text))
        }
    }
}

/// Decode body bytes in a charset the registry may declare
fn decode_text(body: &[u8], charset: &str) -> Result<String> {
    match charset {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8(body.to_vec())
            .map_err(|e| RegistryError::Encoding(format!("Body is not valid {}: {}", charset, e))),
        "iso-8859-1" | "latin1" | "latin-1" => Ok(body.iter().map(|&b| char::from(b)).collect()),
        other => Err(RegistryError::Encoding(format!(
            "Unsupported response charset {:?}",
            other
        ))),
    }
}

/// Turn a raw response into parsed JSON or a typed error
pub fn decipher_response(
    method: Method,
    url: &str,
    response: &HttpResponse,
) -> Result<serde_json::Value> {
    let data = decode_body(response.content_type.as_deref(), &response.body);
    let status = response.status;

    if (200..300).contains(&status) {
        return data;
    }

    let data = data.unwrap_or(serde_json::Value::Null);
    let error_code = data.get("error_code").and_then(|c| c.as_i64());
    let message = data
        .get("message")
        .and_then(|m| m.as_str())
        .map(String::from)
        .unwrap_or_default();

    match (status, error_code) {
        (404, Some(40401..=40403)) => Err(RegistryError::SchemaNotFound(if message.is_empty() {
            url.to_string()
        } else {
            message
        })),
        (422, Some(42201)) => Err(RegistryError::InvalidSchema(message)),
        _ => Err(RegistryError::Transport {
            method,
            url: url.to_string(),
            status: Some(status),
            error_code,
            message,
        }),
    }
}

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{(/?)([A-Za-z0-9_]+)\}").unwrap())
}

/// Join a URL template onto the host and expand its variables
///
/// Supports `{name}` and `{/name}` (which expands with a leading slash).
/// Values are percent-encoded; undefined variables expand to nothing.
pub fn format_url(host: &str, template: &str, url_vars: &[(&str, String)]) -> String {
    let joined = if template.starts_with("http://") || template.starts_with("https://") {
        template.to_string()
    } else {
        format!(
            "{}/{}",
            host.trim_end_matches('/'),
            template.trim_start_matches('/')
        )
    };

    template_pattern()
        .replace_all(&joined, |caps: &Captures<'_>| {
            let name = &caps[2];
            match url_vars.iter().find(|(k, _)| *k == name) {
                Some((_, value)) => format!("{}{}", &caps[1], urlencoding::encode(value)),
                None => String::new(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_make_headers() {
        let headers = make_headers();
        assert_eq!(headers[0], ("accept".to_string(), REGISTRY_MEDIA_TYPE.to_string()));
    }

    #[test]
    fn test_request_with_body() {
        let req = HttpRequest::new(Method::Post, "http://r/x".into(), Some(&json!({"a": 1}))).unwrap();
        assert_eq!(req.header("content-type"), Some("application/json; charset=utf-8"));
        assert_eq!(req.header("content-length"), Some("7"));
        assert_eq!(req.json(), Some(json!({"a": 1})));
    }

    #[test]
    fn test_request_without_body() {
        let req = HttpRequest::new(Method::Get, "http://r/x".into(), None).unwrap();
        assert_eq!(req.header("content-length"), Some("0"));
        assert!(req.header("content-type").is_none());
        assert!(req.body.is_none());
    }

    #[test]
    fn test_format_url() {
        let url = format_url(
            "http://registry:8081/",
            "/subjects/{subject}/versions",
            &[("subject", "myapp.a".to_string())],
        );
        assert_eq!(url, "http://registry:8081/subjects/myapp.a/versions");
    }

    #[test]
    fn test_format_url_slash_prefixed_variables() {
        let url = format_url(
            "http://registry:8081",
            "/subjects{/subject}/versions{/version}",
            &[("subject", "a b".to_string())],
        );
        assert_eq!(url, "http://registry:8081/subjects/a%20b/versions");
    }

    #[test]
    fn test_format_url_absolute_template() {
        let url = format_url("http://registry:8081", "https://other/config", &[]);
        assert_eq!(url, "https://other/config");
    }

    #[test]
    fn test_parse_content_type() {
        assert_eq!(parse_content_type(None), (None, "utf-8".to_string()));
        assert_eq!(
            parse_content_type(Some("application/json; charset=ISO-8859-1")),
            (Some("application/json".to_string()), "iso-8859-1".to_string())
        );
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(Some(REGISTRY_MEDIA_TYPE), b"").unwrap(), serde_json::Value::Null);
        assert_eq!(decode_body(None, b"[1]").unwrap(), serde_json::Value::Null);
        assert_eq!(decode_body(Some("application/json"), b"[1,2,3]").unwrap(), json!([1, 2, 3]));
        assert_eq!(decode_body(Some("text/plain"), b"hello").unwrap(), json!("hello"));
    }

    #[test]
    fn test_decode_body_uses_charset() {
        let latin1 = b"{\"message\": \"caf\xe9\"}";
        assert_eq!(
            decode_body(Some("application/json; charset=ISO-8859-1"), latin1).unwrap(),
            json!({"message": "café"})
        );
        assert!(matches!(
            decode_body(Some("application/json; charset=utf-8"), latin1),
            Err(RegistryError::Encoding(_))
        ));
        assert!(matches!(
            decode_body(Some("text/plain; charset=koi8-r"), b"hello"),
            Err(RegistryError::Encoding(_))
        ));
    }

    #[test]
    fn test_decipher_success() {
        let resp = HttpResponse::json(200, &json!([1, 2, 3]));
        assert_eq!(decipher_response(Method::Get, "u", &resp).unwrap(), json!([1, 2, 3]));

        let empty = HttpResponse { status: 204, content_type: None, body: Vec::new() };
        assert_eq!(decipher_response(Method::Delete, "u", &empty).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_decipher_server_error_without_message() {
        let resp = HttpResponse { status: 500, content_type: Some(REGISTRY_MEDIA_TYPE.into()), body: Vec::new() };
        let err = decipher_response(Method::Get, "u", &resp).unwrap_err();
        assert!(err.is_server_error());
    }

    #[test]
    fn test_decipher_bad_request_with_message() {
        let resp = HttpResponse::json(401, &json!({"error_code": 40101, "message": "I've got reasons"}));
        let err = decipher_response(Method::Get, "u", &resp).unwrap_err();
        assert!(err.is_bad_request());
        match err {
            RegistryError::Transport { error_code, message, .. } => {
                assert_eq!(error_code, Some(40101));
                assert_eq!(message, "I've got reasons");
            }
            other => panic!("Expected Transport, got {:?}", other),
        }
    }

    #[test]
    fn test_decipher_redirect() {
        let resp = HttpResponse { status: 301, content_type: None, body: Vec::new() };
        assert!(decipher_response(Method::Get, "u", &resp).unwrap_err().is_redirection());
    }

    #[test]
    fn test_decipher_not_found_codes() {
        let resp = HttpResponse::json(404, &json!({"error_code": 40403, "message": "Schema not found"}));
        assert_eq!(
            decipher_response(Method::Get, "u", &resp).unwrap_err(),
            RegistryError::SchemaNotFound("Schema not found".to_string())
        );
    }

    #[test]
    fn test_decipher_invalid_schema() {
        let resp = HttpResponse::json(422, &json!({"error_code": 42201, "message": "Invalid schema"}));
        assert!(matches!(
            decipher_response(Method::Post, "u", &resp),
            Err(RegistryError::InvalidSchema(_))
        ));
    }
}
