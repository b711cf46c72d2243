//! HTTP transport implementation.
//!
//! HTTP server with JSON-RPC over POST requests. `initialize` opens a
//! session whose id is returned in the `Mcp-Session-Id` header; every later
//! request must carry it. `DELETE` on the RPC path ends the session.
//!
//! Sessions that stay idle past the configured TTL are disconnected, and the
//! table is capped; the least recently used session makes room for a new one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use http::{Extensions, HeaderMap, HeaderName, StatusCode};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

use super::{TransportConfig, TransportError, TransportResult, config::HttpConfig};
use crate::core::McpServer;
use crate::core::protocol::{JsonRpcResponse, Session, decode_message};

/// Header carrying the session id.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// HTTP transport handler.
pub struct HttpTransport {
    config: HttpConfig,
}

struct SessionEntry {
    session: Arc<Session>,
    last_seen: Instant,
}

/// Live sessions by id, with idle expiry and a size cap.
struct SessionTable {
    entries: HashMap<String, SessionEntry>,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl SessionTable {
    fn new(idle_ttl: Duration, max_sessions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            idle_ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        now.duration_since(entry.last_seen) >= self.idle_ttl && entry.session.in_flight_count() == 0
    }

    /// Look up a live session and mark it as used.
    fn touch(&mut self, id: &str) -> Option<Arc<Session>> {
        let now = Instant::now();
        let expired = self.is_expired(self.entries.get(id)?, now);
        if expired {
            if let Some(entry) = self.entries.remove(id) {
                expire(&entry.session);
            }
            return None;
        }
        let entry = self.entries.get_mut(id)?;
        entry.last_seen = now;
        Some(entry.session.clone())
    }

    fn insert(&mut self, session: Arc<Session>) {
        self.reap();
        while self.entries.len() >= self.max_sessions {
            let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                warn!(session = %oldest, "Session table full, evicting least recently used session");
                entry.session.disconnect();
            }
        }
        self.entries.insert(
            session.id().to_string(),
            SessionEntry {
                session,
                last_seen: Instant::now(),
            },
        );
    }

    fn remove(&mut self, id: &str) -> Option<Arc<Session>> {
        self.entries.remove(id).map(|entry| entry.session)
    }

    /// Disconnect and drop every idle session. Returns how many went.
    fn reap(&mut self) -> usize {
        let now = Instant::now();
        let idle: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &idle {
            if let Some(entry) = self.entries.remove(id) {
                expire(&entry.session);
            }
        }
        idle.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn expire(session: &Session) {
    debug!(session = %session.id(), "Session idle, disconnecting");
    session.disconnect();
}

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The MCP server instance.
    server: McpServer,
    /// Live sessions by id.
    sessions: Arc<RwLock<SessionTable>>,
    rpc_path: String,
}

impl AppState {
    fn new(server: McpServer, config: &HttpConfig) -> Self {
        Self {
            server,
            sessions: Arc::new(RwLock::new(SessionTable::new(
                config.session_idle_ttl(),
                config.max_sessions,
            ))),
            rpc_path: config.rpc_path.clone(),
        }
    }

    async fn session(&self, headers: &HeaderMap) -> Result<Arc<Session>, Response> {
        let Some(id) = header_value(headers, SESSION_HEADER) else {
            return Err(rejection(
                StatusCode::BAD_REQUEST,
                "Missing Mcp-Session-Id header",
            ));
        };

        self.sessions
            .write()
            .await
            .touch(id)
            .ok_or_else(|| rejection(StatusCode::NOT_FOUND, "Unknown session"))
    }
}

impl HttpTransport {
    /// Create a new HTTP transport with the given config.
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }

    /// Create from TransportConfig (extracts HTTP config).
    pub fn from_transport_config(config: &TransportConfig) -> Option<Self> {
        match config {
            TransportConfig::Http(http_config) => Some(Self::new(http_config.clone())),
            _ => None,
        }
    }

    /// Get the bind address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Build the router without binding a socket.
    pub fn router(&self, server: McpServer) -> Router {
        self.router_with_state(AppState::new(server, &self.config))
    }

    fn router_with_state(&self, state: AppState) -> Router {
        let mut app = Router::new()
            .route(
                &self.config.rpc_path,
                post(handle_rpc).delete(handle_delete),
            )
            .route("/health", get(health_check))
            .route("/", get(root_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static(SESSION_HEADER)]);
            app = app.layer(cors);
        }

        app
    }

    /// Run the HTTP transport.
    pub async fn run(self, server: McpServer) -> TransportResult<()> {
        let addr = self.address();
        let state = AppState::new(server, &self.config);
        let reaper = tokio::spawn(reap_idle_sessions(
            state.sessions.clone(),
            self.config.session_idle_ttl(),
        ));
        let app = self.router_with_state(state);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::bind(&addr, e))?;

        let cors_status = if self.config.enable_cors {
            "enabled"
        } else {
            "disabled"
        };
        info!(
            "Ready - listening on {} (JSON-RPC over HTTP, CORS {})",
            addr, cors_status
        );
        info!("  → JSON-RPC: POST {}", self.config.rpc_path);
        info!("  → Health:   GET /health");

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
        reaper.abort();
        served.map_err(|e| TransportError::http(e.to_string()))?;

        Ok(())
    }
}

/// Sweep idle sessions once per TTL so abandoned clients do not pile up
/// between `initialize` requests.
async fn reap_idle_sessions(sessions: Arc<RwLock<SessionTable>>, ttl: Duration) {
    let mut interval = tokio::time::interval(ttl.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let reaped = sessions.write().await.reap();
        if reaped > 0 {
            info!(reaped, "Expired idle HTTP sessions");
        }
    }
}

/// Root handler - provides API info.
async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": state.server.name(),
        "version": state.server.version(),
        "transport": "HTTP",
        "endpoints": {
            "rpc": state.rpc_path,
            "health": "/health"
        },
        "protocol": "JSON-RPC 2.0",
        "tools": state.server.registry().tool_names(),
        "documentation": format!(
            "POST JSON-RPC messages to {}; send the {} header returned by initialize on every later request",
            state.rpc_path, SESSION_HEADER
        )
    }))
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.sessions.read().await.len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Handle one JSON-RPC message.
#[instrument(skip_all, fields(method))]
async fn handle_rpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    body: Bytes,
) -> Response {
    let request = match std::str::from_utf8(&body)
        .map_err(JsonRpcResponse::parse_error)
        .and_then(decode_message)
    {
        Ok(request) => request,
        Err(response) => return (StatusCode::BAD_REQUEST, Json(response)).into_response(),
    };
    tracing::Span::current().record("method", request.method.as_str());
    debug!("Received JSON-RPC message");

    let session = if request.method == "initialize" {
        state.server.open_session(client_ip(&headers, &extensions))
    } else {
        match state.session(&headers).await {
            Ok(session) => session,
            Err(rejection) => return rejection,
        }
    };

    let is_initialize = request.method == "initialize";
    let handled = state.server.handle(&session, request);
    let close = handled.close;
    let response = handled.reply.into_response().await;

    if is_initialize {
        if response.as_ref().is_some_and(|r| !r.is_error()) {
            state.sessions.write().await.insert(session.clone());
        } else {
            state.server.disconnect(&session);
        }
    }

    if close {
        let state = state.clone();
        let session = session.clone();
        tokio::spawn(async move {
            state.server.close_session(&session).await;
            state.sessions.write().await.remove(session.id());
        });
    }

    let session_header = [(SESSION_HEADER, session.id().to_string())];
    match response {
        Some(response) => (StatusCode::OK, session_header, Json(response)).into_response(),
        None => (StatusCode::ACCEPTED, session_header).into_response(),
    }
}

/// End a session.
async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session = match state.session(&headers).await {
        Ok(session) => session,
        Err(rejection) => return rejection,
    };

    state.sessions.write().await.remove(session.id());
    state.server.disconnect(&session);
    info!(session = %session.id(), "Session ended by client");

    StatusCode::NO_CONTENT.into_response()
}

fn rejection(status: StatusCode, message: &str) -> Response {
    warn!("Rejected HTTP request: {}", message);
    (
        status,
        Json(JsonRpcResponse::invalid_request(None, message)),
    )
        .into_response()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address: proxy headers first, then the socket peer.
fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_value(headers, "x-real-ip"))
        .or_else(|| header_value(headers, "cf-connecting-ip"))
        .map(str::to_string)
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use axum::body::Body;
    use http::{Request, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        app_with(HttpConfig::default())
    }

    fn app_with(config: HttpConfig) -> Router {
        let server = McpServer::new(Config::default()).unwrap();
        HttpTransport::new(config).router(server)
    }

    fn ping(id: i64) -> Value {
        json!({ "jsonrpc": "2.0", "id": id, "method": "ping" })
    }

    fn post(body: Value, session: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(session) = session {
            builder = builder.header(SESSION_HEADER, session);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn initialize(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(post(
                json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post(
                json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
                Some(&session),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        session
    }

    #[tokio::test]
    async fn test_session_flow() {
        let app = app();
        let session = initialize(&app).await;

        let response = app
            .clone()
            .oneshot(post(
                json!({
                    "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                    "params": { "name": "calculator", "arguments": { "expr": "6*7" } }
                }),
                Some(&session),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["id"], 2);
        assert_eq!(body["result"]["structuredContent"]["result"], 42);
    }

    #[tokio::test]
    async fn test_missing_and_unknown_session() {
        let app = app();
        let list = json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" });

        let response = app.clone().oneshot(post(list.clone(), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(post(list, Some("no-such-session")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_parse_error_is_bad_request() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mcp")
                    .body(Body::from("{oops"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_delete_ends_session() {
        let app = app();
        let session = initialize(&app).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/mcp")
                    .header(SESSION_HEADER, &session)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(post(
                json!({ "jsonrpc": "2.0", "id": 3, "method": "ping" }),
                Some(&session),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_idle_session_expires() {
        let app = app_with(HttpConfig {
            session_idle_ttl_ms: 50,
            ..HttpConfig::default()
        });
        let session = initialize(&app).await;

        let response = app.clone().oneshot(post(ping(2), Some(&session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let response = app.clone().oneshot(post(ping(3), Some(&session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["sessions"], 0);
    }

    #[tokio::test]
    async fn test_session_table_is_capped() {
        let app = app_with(HttpConfig {
            max_sessions: 2,
            ..HttpConfig::default()
        });
        let first = initialize(&app).await;
        let second = initialize(&app).await;
        let response = app.clone().oneshot(post(ping(2), Some(&first))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let third = initialize(&app).await;
        let response = app.clone().oneshot(post(ping(3), Some(&second))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        for session in [&first, &third] {
            let response = app.clone().oneshot(post(ping(4), Some(session))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[test]
    fn test_reap_disconnects_idle_sessions() {
        let mut table = SessionTable::new(Duration::ZERO, 8);
        let session = Session::new(crate::core::config::SessionConfig::default(), None);
        table.insert(session.clone());
        assert_eq!(table.len(), 1);

        assert_eq!(table.reap(), 1);
        assert_eq!(table.len(), 0);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_health_and_root() {
        let app = app();
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["endpoints"]["rpc"], "/mcp");
        assert_eq!(body["tools"], json!(["calculator", "network", "weather"]));
    }

    #[test]
    fn test_client_ip_precedence() {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 4000))));

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, &extensions).as_deref(), Some("10.0.0.9"));

        headers.insert("cf-connecting-ip", "203.0.113.3".parse().unwrap());
        assert_eq!(client_ip(&headers, &extensions).as_deref(), Some("203.0.113.3"));

        headers.insert("x-real-ip", "203.0.113.2".parse().unwrap());
        assert_eq!(client_ip(&headers, &extensions).as_deref(), Some("203.0.113.2"));

        headers.insert("x-forwarded-for", "203.0.113.1, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, &extensions).as_deref(), Some("203.0.113.1"));

        assert_eq!(client_ip(&HeaderMap::new(), &Extensions::new()), None);
    }
}
