//! HTTP access to the server.
//!
//! Commands only build an [`ApiRequest`]; sending it goes through the
//! [`CouchApi`] trait so the transport can be swapped out.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, HeaderName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use tracing::debug;
use url::Url;

use crate::context::Context;
use crate::error::{CliError, CliResult};

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Put,
    Post,
    Delete,
    Copy,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
            Method::Copy => copy_method(),
        }
    }
}

/// CouchDB's non-standard `COPY` verb.
fn copy_method() -> reqwest::Method {
    reqwest::Method::from_bytes(b"COPY").unwrap_or(reqwest::Method::POST)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Raw { content_type: String, bytes: Vec<u8> },
}

/// How the response body should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Raw,
    /// Headers only, for `HEAD` requests.
    Head,
}

/// A request relative to the server root. Path elements are sent
/// percent-encoded, so a document ID containing `/` stays one element.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: Vec<String>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub response: ResponseFormat,
}

impl ApiRequest {
    pub fn new<I, S>(method: Method, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ApiRequest {
            method,
            path: path.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
            response: ResponseFormat::Json,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn raw_response(mut self) -> Self {
        self.response = ResponseFormat::Raw;
        self
    }

    pub fn head_response(mut self) -> Self {
        self.response = ResponseFormat::Head;
        self
    }

    /// `/a/b/c`, unencoded, for logs and messages.
    pub fn display_path(&self) -> String {
        format!("/{}", self.path.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Raw {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
    Head(ResponseHead),
}

/// The headers of a `HEAD` response that describe a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseHead {
    /// ETag with the surrounding quotes removed.
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl ResponseHead {
    fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        ResponseHead {
            etag: text(ETAG).map(|etag| etag.trim_matches('"').to_string()),
            content_type: text(CONTENT_TYPE),
            content_length: text(CONTENT_LENGTH).and_then(|len| len.parse().ok()),
        }
    }
}

#[async_trait]
pub trait CouchApi: Send + Sync {
    async fn send(&self, request: ApiRequest) -> CliResult<ApiResponse>;
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub base_url: Url,
    pub user: String,
    pub password: String,
}

impl ClientInfo {
    /// Derives the server address from a resolved context. The `couch` and
    /// `couchdb` schemes are aliases of `http`, `couchs` and `couchdbs` of
    /// `https`.
    pub fn from_context(context: &Context) -> CliResult<Self> {
        let scheme = match context.scheme.as_str() {
            "" | "http" | "couch" | "couchdb" => "http",
            "https" | "couchs" | "couchdbs" => "https",
            other => {
                return Err(CliError::usage(format!("unsupported URL scheme: {other}")));
            }
        };
        if context.host.is_empty() {
            return Err(CliError::usage("server hostname required"));
        }

        let invalid =
            |e: url::ParseError| CliError::usage(format!("invalid server address {:?}: {e}", context.host));
        let mut base_url = Url::parse(&format!("{scheme}://{}/", context.host)).map_err(invalid)?;
        let root = context.root();
        if !root.is_empty() {
            base_url
                .path_segments_mut()
                .map_err(|_| CliError::usage("server address cannot have a path"))?
                .pop_if_empty()
                .extend(root.split('/').filter(|s| !s.is_empty()));
        }

        Ok(ClientInfo {
            base_url,
            user: context.user.clone(),
            password: context.password.clone(),
        })
    }

    /// Whether requests carry basic auth. A password alone is sent with an
    /// empty user name.
    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() || !self.password.is_empty()
    }

    pub fn url_for(&self, request: &ApiRequest) -> CliResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| CliError::usage("server address cannot have a path"))?;
            segments.pop_if_empty();
            if request.path.is_empty() {
                segments.push("");
            } else {
                segments.extend(&request.path);
            }
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub request: Option<Duration>,
}

/// [`CouchApi`] over `reqwest`.
pub struct HttpClient {
    client: reqwest::Client,
    info: ClientInfo,
}

impl HttpClient {
    pub fn new(info: ClientInfo, timeouts: Timeouts) -> CliResult<Self> {
        let mut builder =
            reqwest::Client::builder().user_agent(concat!("couchctl/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeouts.connect {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = timeouts.request {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(CliError::Unavailable)?;
        Ok(HttpClient { client, info })
    }

    pub fn info(&self) -> &ClientInfo {
        &self.info
    }
}

#[async_trait]
impl CouchApi for HttpClient {
    async fn send(&self, request: ApiRequest) -> CliResult<ApiResponse> {
        let url = self.info.url_for(&request)?;
        debug!("[HttpClient::send] {} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.into(), url)
            .header(ACCEPT, JSON_CONTENT_TYPE);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if self.info.has_credentials() {
            debug!(
                "[HttpClient::send] Using basic auth as '{}', has password: {}",
                self.info.user,
                !self.info.password.is_empty()
            );
            let password = Some(self.info.password.as_str()).filter(|p| !p.is_empty());
            builder = builder.basic_auth(&self.info.user, password);
        }
        builder = match request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(&value),
            Body::Raw {
                content_type,
                bytes,
            } => builder.header(CONTENT_TYPE, content_type).body(bytes),
        };

        let response = builder.send().await.map_err(CliError::Unavailable)?;
        let status = response.status();
        let head = ResponseHead::from_headers(response.headers());
        let bytes = response.bytes().await.map_err(CliError::Unavailable)?;
        debug!(
            "[HttpClient::send] Response {} ({} bytes)",
            status,
            bytes.len()
        );

        if !status.is_success() {
            return Err(http_error(status, &bytes));
        }
        match request.response {
            ResponseFormat::Head => Ok(ApiResponse::Head(head)),
            ResponseFormat::Raw => Ok(ApiResponse::Raw {
                content_type: head.content_type,
                bytes: bytes.to_vec(),
            }),
            ResponseFormat::Json => serde_json::from_slice(&bytes)
                .map(ApiResponse::Json)
                .map_err(|e| CliError::Protocol(format!("expected JSON from server: {e}"))),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    reason: Option<String>,
}

fn http_error(status: StatusCode, body: &[u8]) -> CliError {
    let status_text = status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_str().to_string());
    let detail = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.reason.or(b.error))
        .filter(|r| !r.is_empty());
    let reason = match detail {
        Some(detail) => format!("{status_text}: {detail}"),
        None => status_text,
    };
    CliError::Http {
        status: status.as_u16(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code;
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn context(scheme: &str, host: &str, database: &str, doc_id: &str) -> Context {
        Context {
            scheme: scheme.to_string(),
            host: host.to_string(),
            database: database.to_string(),
            doc_id: doc_id.to_string(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("", "http://localhost:5984/")]
    #[case("http", "http://localhost:5984/")]
    #[case("couch", "http://localhost:5984/")]
    #[case("couchdb", "http://localhost:5984/")]
    #[case("https", "https://localhost:5984/")]
    #[case("couchs", "https://localhost:5984/")]
    #[case("couchdbs", "https://localhost:5984/")]
    fn test_scheme_mapping(#[case] scheme: &str, #[case] expected: &str) {
        let info = ClientInfo::from_context(&context(scheme, "localhost:5984", "", "")).unwrap();
        assert_eq!(info.base_url.as_str(), expected);
    }

    #[rstest]
    #[case(context("ftp", "h", "", ""), "unsupported URL scheme: ftp")]
    #[case(context("file", "", "db", "doc"), "unsupported URL scheme: file")]
    #[case(context("http", "", "db", ""), "server hostname required")]
    fn test_client_info_errors(#[case] cx: Context, #[case] message: &str) {
        let err = ClientInfo::from_context(&cx).unwrap_err();
        assert!(err.is_usage());
        assert_eq!(err.to_string(), message);
    }

    #[test]
    fn test_url_with_root_and_encoded_doc_id() {
        let info = ClientInfo::from_context(&context("http", "h", "couchdb/", "db")).unwrap();
        assert_eq!(info.base_url.as_str(), "http://h/couchdb");

        let request = ApiRequest::new(Method::Get, ["db", "a/b"]);
        assert_eq!(info.url_for(&request).unwrap().as_str(), "http://h/couchdb/db/a%2Fb");

        let request = ApiRequest::new(Method::Get, Vec::<String>::new());
        assert_eq!(info.url_for(&request).unwrap().as_str(), "http://h/couchdb/");
    }

    #[rstest]
    #[case(404, br#"{"error":"not_found","reason":"missing"}"#.as_slice(), "Not Found: missing")]
    #[case(409, br#"{"error":"conflict"}"#.as_slice(), "Conflict: conflict")]
    #[case(502, b"<html>".as_slice(), "Bad Gateway")]
    fn test_http_error(#[case] status: u16, #[case] body: &[u8], #[case] reason: &str) {
        let err = http_error(StatusCode::from_u16(status).unwrap(), body);
        assert_eq!(err.to_string(), reason);
        assert!(matches!(err, CliError::Http { status: s, .. } if s == status));
    }

    /// Serves one canned HTTP response and reports the request head.
    async fn serve_once(
        status_line: &'static str,
        content_type: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        serve_with_headers(status_line, format!("Content-Type: {content_type}\r\n"), body).await
    }

    async fn serve_with_headers(
        status_line: &'static str,
        headers: String,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\n{headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
        });
        (addr.to_string(), rx)
    }

    fn client_for(host: &str, user: &str, password: &str) -> HttpClient {
        let mut cx = context("http", host, "", "");
        cx.user = user.to_string();
        cx.password = password.to_string();
        HttpClient::new(ClientInfo::from_context(&cx).unwrap(), Timeouts::default()).unwrap()
    }

    #[tokio::test]
    async fn test_send_json() {
        let (host, head) = serve_once("200 OK", "application/json", r#"{"_id":"doc","_rev":"1-a"}"#).await;
        let client = client_for(&host, "admin", "abc123");
        let request = ApiRequest::new(Method::Get, ["db", "doc"])
            .with_query(vec![("rev".to_string(), "1-a".to_string())]);

        let response = client.send(request).await.unwrap();
        assert_eq!(
            response,
            ApiResponse::Json(serde_json::json!({"_id": "doc", "_rev": "1-a"}))
        );

        let head = head.await.unwrap();
        assert!(head.starts_with("GET /db/doc?rev=1-a HTTP/1.1\r\n"), "{head}");
        assert!(head.to_lowercase().contains("authorization: basic "));
    }

    #[tokio::test]
    async fn test_send_raw() {
        let (host, _head) = serve_once("200 OK", "text/plain", "hello").await;
        let client = client_for(&host, "", "");
        let request = ApiRequest::new(Method::Get, ["db", "doc", "file.txt"]).raw_response();

        let response = client.send(request).await.unwrap();
        assert_eq!(
            response,
            ApiResponse::Raw {
                content_type: Some("text/plain".to_string()),
                bytes: b"hello".to_vec(),
            }
        );
    }

    #[tokio::test]
    async fn test_send_not_found() {
        let (host, _head) = serve_once(
            "404 Object Not Found",
            "application/json",
            r#"{"error":"not_found","reason":"missing"}"#,
        )
        .await;
        let client = client_for(&host, "", "");
        let err = client
            .send(ApiRequest::new(Method::Get, ["db", "doc"]))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 14);
        assert_eq!(err.to_string(), "Not Found: missing");
    }

    #[tokio::test]
    async fn test_send_invalid_json_is_protocol_error() {
        let (host, _head) = serve_once("200 OK", "text/html", "<html></html>").await;
        let client = client_for(&host, "", "");
        let err = client
            .send(ApiRequest::new(Method::Get, Vec::<String>::new()))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), exit_code::PROTOCOL);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = client_for(&host, "", "");
        let err = client
            .send(ApiRequest::new(Method::Get, ["_up"]))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), exit_code::UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_password_without_user_is_sent() {
        let (host, head) = serve_once("200 OK", "application/json", "{}").await;
        let client = client_for(&host, "", "abc123");
        assert!(client.info().has_credentials());
        client
            .send(ApiRequest::new(Method::Get, ["db"]))
            .await
            .unwrap();

        // base64(":abc123")
        let head = head.await.unwrap().to_lowercase();
        assert!(head.contains("authorization: basic omfiyzeymw=="), "{head}");
    }

    #[tokio::test]
    async fn test_no_credentials_no_auth_header() {
        let (host, head) = serve_once("200 OK", "application/json", "{}").await;
        let client = client_for(&host, "", "");
        client
            .send(ApiRequest::new(Method::Get, ["db"]))
            .await
            .unwrap();
        assert!(!head.await.unwrap().to_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn test_send_head() {
        let (host, head) = serve_with_headers(
            "200 OK",
            "Content-Type: application/json\r\nETag: \"1-xxx\"\r\n".to_string(),
            r#"{"_id":"bar"}"#,
        )
        .await;
        let client = client_for(&host, "", "");
        let request = ApiRequest::new(Method::Head, ["foo", "bar"]).head_response();

        let response = client.send(request).await.unwrap();
        assert_eq!(
            response,
            ApiResponse::Head(ResponseHead {
                etag: Some("1-xxx".to_string()),
                content_type: Some("application/json".to_string()),
                content_length: Some(13),
            })
        );
        assert!(head.await.unwrap().starts_with("HEAD /foo/bar HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_send_copy_with_destination() {
        let (host, head) = serve_once(
            "201 Created",
            "application/json",
            r#"{"ok":true,"id":"new","rev":"1-a"}"#,
        )
        .await;
        let client = client_for(&host, "", "");
        let request = ApiRequest::new(Method::Copy, ["db", "old"]).with_header("Destination", "new?rev=1-a");

        let response = client.send(request).await.unwrap();
        assert_eq!(
            response,
            ApiResponse::Json(serde_json::json!({"ok": true, "id": "new", "rev": "1-a"}))
        );
        let head = head.await.unwrap();
        assert!(head.starts_with("COPY /db/old HTTP/1.1\r\n"), "{head}");
        assert!(head.to_lowercase().contains("destination: new?rev=1-a"));
    }
}
