//! HTTP API for the post ledger and the upload relay
//!
//! ## Relay API
//! - `POST /api/upload/text` - Store a text post's metadata blob
//! - `POST /api/upload/file?type=image|video` - Store a file, then its metadata blob
//! - `GET /api/content/{hash}` - Fetch a metadata blob
//! - `HEAD /api/content/{hash}` - Check if content exists
//! - `GET /api/raw/{hash}` - Raw bytes behind a reference
//! - `POST /api/search` - Search by tag or by content
//!
//! ## Ledger API
//! - `POST /api/posts` - Append a post (publisher from `X-Publisher`)
//! - `GET /api/posts?count=N` - Latest posts, newest first
//! - `GET /api/posts/range?start=A&end=B` - Inclusive id range
//! - `GET /api/posts/total` - Post counter
//! - `GET /api/posts/{id}` - One post
//! - `GET /api/posts/{id}/exists` - Whether an id is assigned
//! - `GET /api/tags` - Tag registry, first-seen order
//! - `GET /api/tags/top?count=N` - Most used tags
//! - `GET /api/tags/{tag}/posts` - Posts carrying a tag
//! - `GET /api/tags/{tag}/count` - Number of posts carrying a tag
//! - `GET /api/publishers/{publisher}/count` - Posts by one publisher
//! - `GET /api/events` - WebSocket stream of ledger events
//!
//! ## Example Usage
//!
//! ```bash
//! # Upload text, then record it in the ledger
//! curl -X POST -d '{"text":"gm #rust #区块链"}' http://localhost:8080/api/upload/text
//! curl -X POST -H "X-Publisher: alice" \
//!      -d '{"contentRef":"bafkrei...","contentType":"text","tags":["rust","区块链"]}' \
//!      http://localhost:8080/api/posts
//!
//! # Upload an image
//! curl -X POST -H "Content-Type: image/png" --data-binary @cat.png \
//!      "http://localhost:8080/api/upload/file?type=image"
//!
//! # Trending tags
//! curl "http://localhost:8080/api/tags/top?count=5"
//! ```

use crate::error::StorageError;
use crate::events_ws;
use crate::ledger::ContentType;
use crate::relay::Relay;
use crate::response::{
    binary_response, created, empty, error_response, not_found, ok, HandlerResult,
};
use crate::service::LedgerService;
use crate::tags::remove_tag_markers;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Header carrying the caller identity for `POST /api/posts`
pub const PUBLISHER_HEADER: &str = "x-publisher";

/// Default cap on request bodies
pub const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

const ALLOW_METHODS: &str = "GET, POST, HEAD, OPTIONS";
const ALLOW_HEADERS: &str = "Origin, Content-Type, Accept, X-Publisher";

#[derive(Debug, Deserialize)]
struct UploadTextRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct UploadFileQuery {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostRequest {
    content_ref: String,
    content_type: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum SearchType {
    Tag,
    Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    query: String,
    #[serde(default = "default_search_type")]
    search_type: SearchType,
}

fn default_search_type() -> SearchType {
    SearchType::Content
}

#[derive(Debug, Deserialize)]
struct CountQuery {
    count: i64,
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    start: u64,
    end: u64,
}

/// HTTP server state
pub struct HttpServer {
    ledger: Arc<LedgerService>,
    relay: Arc<Relay>,
    bind_addr: SocketAddr,
    allowed_origins: Vec<String>,
    max_body_bytes: usize,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(ledger: Arc<LedgerService>, relay: Arc<Relay>, bind_addr: SocketAddr) -> Self {
        Self {
            ledger,
            relay,
            bind_addr,
            allowed_origins: Vec::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Origins allowed by CORS; `"*"` allows any
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), StorageError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route a request and attach CORS headers to whatever comes back
    pub async fn handle_request<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let origin = req
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        debug!(method = %method, path = %path, "Incoming request");

        let mut response = match self.route(req, method.clone(), &path).await {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                let response = error_response(e);
                if response.status().is_server_error() {
                    error!(method = %method, path = %path, error = %message, "Request error");
                } else {
                    debug!(method = %method, path = %path, error = %message, "Request rejected");
                }
                response
            }
        };

        self.apply_cors(origin.as_deref(), &mut response);
        Ok(response)
    }

    async fn route<B>(&self, req: Request<B>, method: Method, path: &str) -> HandlerResult
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let query = req.uri().query().unwrap_or("").to_string();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        match (method, segments.as_slice()) {
            (Method::OPTIONS, _) => Ok(empty(StatusCode::NO_CONTENT)),

            (Method::GET, ["health"]) => self.handle_health().await,

            // WebSocket upgrade for ledger events
            (Method::GET, ["api", "events"]) if events_ws::is_websocket_upgrade(&req) => {
                events_ws::handle_events_upgrade(req, Arc::clone(self.ledger.events()))
            }

            // Relay API
            (Method::POST, ["api", "upload", "text"]) => self.handle_upload_text(req).await,
            (Method::POST, ["api", "upload", "file"]) => self.handle_upload_file(req, &query).await,
            (Method::GET, ["api", "content", hash]) => self.handle_get_content(hash).await,
            (Method::HEAD, ["api", "content", hash]) => self.handle_head_content(hash).await,
            (Method::GET, ["api", "raw", hash]) => self.handle_get_raw(hash).await,
            (Method::POST, ["api", "search"]) => self.handle_search(req).await,

            // Ledger API
            (Method::POST, ["api", "posts"]) => self.handle_create_post(req).await,
            (Method::GET, ["api", "posts"]) => {
                let q: CountQuery = parse_query(&query)?;
                Ok(ok(&self.ledger.get_latest(q.count).await?))
            }
            (Method::GET, ["api", "posts", "range"]) => {
                let q: RangeQuery = parse_query(&query)?;
                Ok(ok(&self.ledger.get_range(q.start, q.end).await?))
            }
            (Method::GET, ["api", "posts", "total"]) => {
                let total = self.ledger.total_posts().await;
                Ok(ok(&serde_json::json!({ "total": total })))
            }
            (Method::GET, ["api", "posts", id]) => {
                let id = parse_id(id)?;
                Ok(ok(&self.ledger.get_post(id).await?))
            }
            (Method::GET, ["api", "posts", id, "exists"]) => {
                let id = parse_id(id)?;
                let exists = self.ledger.post_exists(id).await;
                Ok(ok(&serde_json::json!({ "id": id, "exists": exists })))
            }
            (Method::GET, ["api", "tags"]) => Ok(ok(&self.ledger.get_all_tags().await)),
            (Method::GET, ["api", "tags", "top"]) => {
                let q: CountQuery = parse_query(&query)?;
                let ranked = self.ledger.get_top_tags(q.count).await?;
                let (tags, counts): (Vec<String>, Vec<usize>) =
                    ranked.into_iter().map(|tc| (tc.tag, tc.count)).unzip();
                Ok(ok(&serde_json::json!({ "tags": tags, "counts": counts })))
            }
            (Method::GET, ["api", "tags", tag, "posts"]) => {
                let tag = decode_segment(tag)?;
                Ok(ok(&self.ledger.get_posts_by_tag(&tag).await))
            }
            (Method::GET, ["api", "tags", tag, "count"]) => {
                let tag = decode_segment(tag)?;
                let count = self.ledger.get_post_count_by_tag(&tag).await;
                Ok(ok(&serde_json::json!({ "tag": tag, "count": count })))
            }
            (Method::GET, ["api", "publishers", publisher, "count"]) => {
                let publisher = decode_segment(publisher)?;
                let count = self.ledger.get_post_count_by_publisher(&publisher).await;
                Ok(ok(&serde_json::json!({ "publisher": publisher, "count": count })))
            }

            _ => Ok(not_found("Not Found")),
        }
    }

    /// Health check endpoint
    async fn handle_health(&self) -> HandlerResult {
        let stats = self.ledger.stats().await;
        Ok(ok(&serde_json::json!({
            "status": "ok",
            "time": chrono::Utc::now().timestamp(),
            "posts": stats.total_posts,
            "tags": stats.distinct_tags,
            "event_subscribers": self.ledger.events().subscriber_count(),
        })))
    }

    /// POST /api/upload/text
    async fn handle_upload_text<B>(&self, req: Request<B>) -> HandlerResult
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let body: UploadTextRequest = read_json(req.into_body(), self.max_body_bytes).await?;
        let result = self.relay.upload_text(&body.text).await?;
        Ok(ok(&result))
    }

    /// POST /api/upload/file?type=image|video
    async fn handle_upload_file<B>(&self, req: Request<B>, query: &str) -> HandlerResult
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let q: UploadFileQuery = parse_query(query)?;
        let kind: ContentType = q.kind.parse()?;
        let mime_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let data = read_body(req.into_body(), self.max_body_bytes).await?;
        let result = self.relay.upload_file(&data, &mime_type, kind).await?;
        Ok(ok(&result))
    }

    /// GET /api/content/{hash}
    async fn handle_get_content(&self, hash: &str) -> HandlerResult {
        let data = self.relay.get_content(hash).await?;
        Ok(ok(&data))
    }

    /// HEAD /api/content/{hash}
    async fn handle_head_content(&self, hash: &str) -> HandlerResult {
        let status = if self.relay.content_exists(hash).await? {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        };
        Ok(empty(status))
    }

    /// GET /api/raw/{hash}
    async fn handle_get_raw(&self, hash: &str) -> HandlerResult {
        let data = self.relay.get_raw(hash).await?;
        debug!(hash = %hash, size = data.len(), "Serving raw content");
        Ok(binary_response("application/octet-stream", data))
    }

    /// POST /api/search
    async fn handle_search<B>(&self, req: Request<B>) -> HandlerResult
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let body: SearchRequest = read_json(req.into_body(), self.max_body_bytes).await?;

        let posts = match body.search_type {
            SearchType::Tag => {
                let tag = remove_tag_markers(body.query.trim());
                if tag.is_empty() {
                    return Err(StorageError::InvalidInput("query is required".into()));
                }
                self.ledger.get_posts_by_tag(&tag).await
            }
            SearchType::Content => {
                if body.query.is_empty() {
                    return Err(StorageError::InvalidInput("query is required".into()));
                }
                let refs = self.ledger.content_refs().await;
                let hits = self.relay.search_content(&body.query, &refs).await;
                let matched: HashSet<String> = hits.into_iter().map(|hit| hit.hash).collect();
                self.ledger.get_posts_by_content_refs(&matched).await
            }
        };

        Ok(ok(&serde_json::json!({
            "count": posts.len(),
            "posts": posts,
        })))
    }

    /// POST /api/posts
    async fn handle_create_post<B>(&self, req: Request<B>) -> HandlerResult
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let publisher = req
            .headers()
            .get(PUBLISHER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| StorageError::InvalidInput("X-Publisher header is required".into()))?;

        let body: CreatePostRequest = read_json(req.into_body(), self.max_body_bytes).await?;
        let content_type: ContentType = body.content_type.parse()?;

        let post = self
            .ledger
            .create_post(&publisher, &body.content_ref, content_type, &body.tags)
            .await?;
        Ok(created(&post))
    }

    fn apply_cors(&self, origin: Option<&str>, response: &mut Response<Full<Bytes>>) {
        let allow_origin = if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*")
        } else {
            origin.filter(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
        };

        let Some(allow_origin) = allow_origin else {
            return;
        };
        let Ok(allow_origin) = HeaderValue::from_str(allow_origin) else {
            return;
        };

        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    }
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, StorageError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let collected = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| StorageError::InvalidInput(format!("Failed to read body: {}", e)))?;
    Ok(collected.to_bytes())
}

async fn read_json<T, B>(body: B, limit: usize) -> Result<T, StorageError>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = read_body(body, limit).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn parse_query<T: DeserializeOwned>(query: &str) -> Result<T, StorageError> {
    serde_urlencoded::from_str(query)
        .map_err(|e| StorageError::InvalidInput(format!("Invalid query string: {}", e)))
}

fn parse_id(segment: &str) -> Result<u64, StorageError> {
    segment
        .parse()
        .map_err(|_| StorageError::InvalidInput(format!("Invalid post id: {}", segment)))
}

fn decode_segment(segment: &str) -> Result<String, StorageError> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| StorageError::InvalidInput(format!("Invalid path segment: {}", e)))
}
