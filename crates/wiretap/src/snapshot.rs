//! Serialized snapshots of requests and responses, and the records built from them.
//!
//! Snapshots are immutable once produced. The body carries an explicit tag
//! (empty, text, json, binary) decided at serialization time from the
//! content type; binary payloads are base64 on the wire.

use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use bytes::Bytes;

use crate::error::Error;

/// Request body or response body with an explicit content tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "data", rename_all = "lowercase")]
pub enum Body {
    #[default]
    Empty,
    /// UTF-8 text payload.
    Text(String),
    /// Structured JSON payload, re-encoded when the response is synthesized.
    Json(serde_json::Value),
    /// Raw bytes, base64-encoded on the wire.
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Body {
    /// Classify raw bytes using the declared content type.
    pub fn from_bytes(content_type: Option<&str>, bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Body::Empty;
        }
        let content_type = content_type.unwrap_or("").to_ascii_lowercase();
        if content_type.contains("json") {
            if let Ok(value) = serde_json::from_slice(bytes) {
                return Body::Json(value);
            }
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Body::Text(text.to_string()),
            Err(_) => Body::Binary(bytes.to_vec()),
        }
    }

    /// Render the payload bytes written to the caller-visible channel.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Text(text) => Bytes::from(text.clone()),
            Body::Json(value) => Bytes::from(serde_json::to_vec(value).unwrap_or_default()),
            Body::Binary(bytes) => Bytes::from(bytes.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        use serde::de::Error as _;
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}

/// Immutable snapshot of an outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRequest {
    pub method: String,
    pub scheme: String,
    /// Authority, possibly with an explicit port.
    pub host: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Header mapping with lowercased unique keys; repeated headers are comma-joined.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Body::is_empty")]
    pub body: Body,
}

impl SerializedRequest {
    /// Snapshot the head of a request without consuming its body.
    pub fn from_parts(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let scheme = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();
        let host = uri
            .authority()
            .map(|authority| authority.as_str().to_ascii_lowercase())
            .or_else(|| {
                headers
                    .get(HOST)
                    .and_then(|value| value.to_str().ok())
                    .map(|value| value.to_ascii_lowercase())
            })
            .unwrap_or_default();

        Self {
            method: method.as_str().to_uppercase(),
            scheme,
            host,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers: header_map(headers),
            body: Body::Empty,
        }
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Full URL of the call: `scheme://host/path?query`.
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}://{}{}?{}", self.scheme, self.host, self.path, query),
            None => format!("{}://{}{}", self.scheme, self.host, self.path),
        }
    }

    /// URL with lowercased scheme and host, for matching.
    pub fn normalized_url(&self) -> String {
        let mut url = format!(
            "{}://{}{}",
            self.scheme.to_ascii_lowercase(),
            self.host.to_ascii_lowercase(),
            self.path
        );
        if let Some(query) = &self.query {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Path plus query, matching how test code usually spells URLs.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// Immutable snapshot of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Body::is_empty")]
    pub body: Body,
}

impl SerializedResponse {
    pub fn from_parts(status: StatusCode, headers: &HeaderMap, bytes: &[u8]) -> Self {
        let content_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok());
        Self {
            status: status.as_u16(),
            headers: header_map(headers),
            body: Body::from_bytes(content_type, bytes),
        }
    }

    /// Rebuild a caller-visible HTTP response from this snapshot.
    ///
    /// Headers that are not valid HTTP header names/values are skipped.
    pub fn to_http(&self) -> Result<Response<Full<Bytes>>, Error> {
        let status =
            StatusCode::from_u16(self.status).map_err(|error| Error::Response(error.to_string()))?;
        let mut response = Response::builder()
            .status(status)
            .body(Full::new(self.body.to_bytes()))
            .map_err(|error| Error::Response(error.to_string()))?;
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        Ok(response)
    }
}

/// One completed exchange: the unit persisted to and replayed from fixtures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub request: SerializedRequest,
    pub response: SerializedResponse,
    /// Round-trip time in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

/// Drain a streaming body into bytes.
pub async fn drain<B>(body: B) -> Result<Bytes, Error>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let collected = body
        .collect()
        .await
        .map_err(|error| Error::Body(error.to_string()))?;
    Ok(collected.to_bytes())
}

/// Consume a request, draining its body into a finished snapshot.
pub async fn serialize_request<B>(request: Request<B>) -> Result<SerializedRequest, Error>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = request.into_parts();
    let head = SerializedRequest::from_parts(&parts.method, &parts.uri, &parts.headers);
    let bytes = drain(body).await?;
    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    Ok(head.with_body(Body::from_bytes(content_type, &bytes)))
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        map.entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    #[test]
    fn test_body_classification() {
        assert_eq!(Body::from_bytes(None, b""), Body::Empty);
        assert_eq!(
            Body::from_bytes(Some("application/json"), br#"{"id":1}"#),
            Body::Json(json!({"id": 1}))
        );
        assert_eq!(
            Body::from_bytes(Some("text/plain"), b"hello"),
            Body::Text("hello".to_string())
        );
        // Malformed JSON falls back to text.
        assert_eq!(
            Body::from_bytes(Some("application/json"), b"not json"),
            Body::Text("not json".to_string())
        );
        assert_eq!(
            Body::from_bytes(Some("application/octet-stream"), &[0xff, 0xfe]),
            Body::Binary(vec![0xff, 0xfe])
        );
    }

    #[test]
    fn test_binary_body_base64_wire_format() {
        let body = Body::Binary(vec![0xde, 0xad, 0xbe, 0xef]);
        let wire = serde_json::to_value(&body).unwrap();
        assert_eq!(wire, json!({"mode": "binary", "data": "3q2+7w=="}));

        let decoded: Body = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_request_snapshot_from_parts() {
        let request = Request::builder()
            .method("get")
            .uri("HTTP://Api.Example.com:8080/users/1?full=true")
            .header("X-Token", "abc")
            .header("Accept", "application/json")
            .body(())
            .unwrap();

        let snapshot =
            SerializedRequest::from_parts(request.method(), request.uri(), request.headers());
        assert_eq!(snapshot.method, "GET");
        assert_eq!(snapshot.scheme, "http");
        assert_eq!(snapshot.host, "api.example.com:8080");
        assert_eq!(snapshot.path, "/users/1");
        assert_eq!(snapshot.query.as_deref(), Some("full=true"));
        assert_eq!(snapshot.headers.get("x-token"), Some(&"abc".to_string()));
        assert_eq!(
            snapshot.url(),
            "http://api.example.com:8080/users/1?full=true"
        );
        assert_eq!(snapshot.path_and_query(), "/users/1?full=true");
    }

    #[test]
    fn test_host_falls_back_to_header() {
        let request = Request::builder()
            .method("GET")
            .uri("/relative")
            .header("Host", "fallback.example.com")
            .body(())
            .unwrap();

        let snapshot =
            SerializedRequest::from_parts(request.method(), request.uri(), request.headers());
        assert_eq!(snapshot.host, "fallback.example.com");
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let request = Request::builder()
            .method("GET")
            .uri("http://example.com/")
            .header("Set-Cookie", "a=1")
            .header("Set-Cookie", "b=2")
            .body(())
            .unwrap();

        let snapshot =
            SerializedRequest::from_parts(request.method(), request.uri(), request.headers());
        assert_eq!(snapshot.headers.get("set-cookie"), Some(&"a=1, b=2".to_string()));
    }

    #[test]
    fn test_response_round_trip() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let snapshot =
            SerializedResponse::from_parts(StatusCode::OK, &headers, br#"{"id":1}"#);

        let response = snapshot.to_http().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("application/json"))
        );
    }

    #[test]
    fn test_record_wire_shape() {
        let record = Record {
            request: SerializedRequest {
                method: "GET".to_string(),
                scheme: "http".to_string(),
                host: "example.com".to_string(),
                path: "/users/1".to_string(),
                query: None,
                headers: HashMap::new(),
                body: Body::Empty,
            },
            response: SerializedResponse {
                status: 200,
                headers: HashMap::new(),
                body: Body::Json(json!({"id": 1})),
            },
            duration_ms: 42,
        };

        let wire = serde_json::to_value(&record).unwrap();
        assert_json_include!(
            actual: wire,
            expected: json!({
                "request": {"method": "GET", "host": "example.com", "path": "/users/1"},
                "response": {"status": 200, "body": {"mode": "json", "data": {"id": 1}}},
                "duration": 42
            })
        );
    }

    #[tokio::test]
    async fn test_serialize_request_drains_body() {
        let request = Request::builder()
            .method("POST")
            .uri("http://example.com/items")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from_static(br#"{"name":"x"}"#)))
            .unwrap();

        let snapshot = serialize_request(request).await.unwrap();
        assert_eq!(snapshot.method, "POST");
        assert_eq!(snapshot.body, Body::Json(json!({"name": "x"})));
    }
}
