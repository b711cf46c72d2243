//! MCP method routing on top of the session state machine.
//!
//! [`ProtocolHandler::handle`] is synchronous: everything that must happen in
//! message order (handshake, phase checks, call admission) is done before it
//! returns. Tool execution comes back as a [`Reply::Deferred`] future that
//! the transport may run concurrently with further reads.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use super::dispatcher::{DispatchError, Dispatcher, InFlightGuard, ToolInvocationRequest};
use super::message::{JsonRpcRequest, JsonRpcResponse, RequestId};
use super::session::{NegotiatedCapabilities, Session, SessionError, SessionPhase};
use crate::core::config::ServerConfig;

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

const INSTRUCTIONS: &str = "Tools: 'calculator' evaluates arithmetic expressions, 'network' runs DNS/TCP/HTTP probes and IP lookups, 'weather' reports current conditions or a 5-day forecast. Failed calls report an error kind and whether a retry may succeed.";

/// What the transport should send back for one message.
pub enum Reply {
    /// Ready now; `None` for notifications and suppressed responses.
    Immediate(Option<JsonRpcResponse>),
    /// A tool call in progress.
    Deferred(BoxFuture<'static, Completion>),
}

impl Reply {
    /// Wait for the response, whatever its kind.
    pub async fn into_response(self) -> Option<JsonRpcResponse> {
        match self {
            Self::Immediate(response) => response,
            Self::Deferred(future) => future.await.take_response(),
        }
    }
}

/// A finished tool call.
///
/// The call stays in the session's in-flight set until this is dropped, so a
/// closing session keeps draining while the transport hands the response off.
pub struct Completion {
    response: Option<JsonRpcResponse>,
    _slot: InFlightGuard,
}

impl Completion {
    /// The response to send; `None` if the session closed before the result
    /// was ready.
    pub fn take_response(&mut self) -> Option<JsonRpcResponse> {
        self.response.take()
    }
}

/// Result of handling one message.
pub struct Handled {
    pub reply: Reply,
    /// The session must be closed: stop reading, drain, then disconnect.
    pub close: bool,
}

impl Handled {
    fn reply(response: Option<JsonRpcResponse>) -> Self {
        Self {
            reply: Reply::Immediate(response),
            close: false,
        }
    }

    fn nothing() -> Self {
        Self::reply(None)
    }
}

/// Why a method could not be served.
enum Failure {
    Dispatch(DispatchError),
    InvalidParams(String),
}

impl From<SessionError> for Failure {
    fn from(err: SessionError) -> Self {
        Self::Dispatch(DispatchError::Session(err))
    }
}

impl From<DispatchError> for Failure {
    fn from(err: DispatchError) -> Self {
        Self::Dispatch(err)
    }
}

/// Routes JSON-RPC methods for one server; shared by all sessions.
pub struct ProtocolHandler {
    server: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl ProtocolHandler {
    pub fn new(server: ServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self { server, dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Handle one decoded message.
    #[instrument(skip_all, fields(session = %session.id(), method = %request.method))]
    pub fn handle(&self, session: &Arc<Session>, request: JsonRpcRequest) -> Handled {
        if session.is_closed() {
            debug!("Dropping message for closed session");
            return Handled::nothing();
        }

        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        debug!(request_id = ?id, "Handling message");

        match method.as_str() {
            "initialize" => {
                let outcome = self.initialize(session, params);
                self.finish(session, id, outcome)
            }
            "notifications/initialized" => {
                let outcome = session.mark_initialized().map(|_| Value::Null).map_err(Failure::from);
                self.finish(session, None, outcome)
            }
            "ping" => self.finish(session, id, Ok(json!({}))),
            "tools/list" => {
                let outcome = session
                    .require(&method, &[SessionPhase::Negotiating, SessionPhase::Ready])
                    .map(|_| json!({ "tools": self.dispatcher.registry().list() }))
                    .map_err(Failure::from);
                self.finish(session, id, outcome)
            }
            "tools/call" => self.call_tool(session, id, params),
            "notifications/cancelled" => {
                cancel_request(session, params);
                Handled::nothing()
            }
            "shutdown" | "close" => match session.begin_close(&method) {
                Ok(()) => Handled {
                    reply: Reply::Immediate(id.map(|id| JsonRpcResponse::success(Some(id), json!({})))),
                    close: true,
                },
                Err(err) => self.finish(session, id, Err(err.into())),
            },
            other if id.is_none() => {
                debug!("Ignoring notification: {}", other);
                Handled::nothing()
            }
            other => {
                warn!("Unknown method: {}", other);
                Handled::reply(Some(JsonRpcResponse::method_not_found(id, other)))
            }
        }
    }

    fn initialize(&self, session: &Session, params: Option<Value>) -> Result<Value, Failure> {
        let params = params.unwrap_or(Value::Null);
        let requested = params.get("protocolVersion").and_then(Value::as_str);
        let version = negotiate_version(requested);

        session.begin_initialize(NegotiatedCapabilities {
            protocol_version: version.to_string(),
            client_info: params.get("clientInfo").cloned(),
            client_capabilities: params.get("capabilities").cloned().unwrap_or(json!({})),
        })?;

        if let Some(client) = params.get("clientInfo") {
            let name = client.get("name").and_then(Value::as_str).unwrap_or("unknown");
            let client_version = client.get("version").and_then(Value::as_str).unwrap_or("");
            info!(
                "Client {} {} connected (protocol {})",
                name, client_version, version
            );
        }

        Ok(json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": self.server.name,
                "version": self.server.version
            },
            "instructions": INSTRUCTIONS,
            "tools": self.dispatcher.registry().list()
        }))
    }

    fn call_tool(&self, session: &Arc<Session>, id: Option<RequestId>, params: Option<Value>) -> Handled {
        let Some(id) = id else {
            warn!("tools/call sent as a notification, ignoring");
            return Handled::nothing();
        };

        if let Err(err) = session.require("tools/call", &[SessionPhase::Ready]) {
            return self.finish(session, Some(id), Err(err.into()));
        }

        let request = match parse_call(id.clone(), params) {
            Ok(request) => request,
            Err(message) => return self.finish(session, Some(id), Err(Failure::InvalidParams(message))),
        };

        let call = match self.dispatcher.prepare(session, request) {
            Ok(call) => call,
            Err(err) => return self.finish(session, Some(id), Err(err.into())),
        };

        let session = session.clone();
        let future = async move {
            let (result, guard) = call.run().await;
            let response = match serde_json::to_value(result.into_call_result()) {
                Ok(value) => JsonRpcResponse::success(Some(id), value),
                Err(e) => JsonRpcResponse::internal_error(Some(id), e.to_string()),
            };
            let response = if session.is_closed() {
                debug!(request_id = %guard.request_id(), "Session closed, dropping result");
                None
            } else {
                Some(response)
            };
            Completion {
                response,
                _slot: guard,
            }
        };

        Handled {
            reply: Reply::Deferred(Box::pin(future)),
            close: false,
        }
    }

    /// Turn a method outcome into a reply, counting sequence violations.
    fn finish(
        &self,
        session: &Session,
        id: Option<RequestId>,
        outcome: Result<Value, Failure>,
    ) -> Handled {
        let error = match outcome {
            Ok(value) => return Handled::reply(id.map(|id| JsonRpcResponse::success(Some(id), value))),
            Err(failure) => failure,
        };

        let mut close = false;
        let response = match error {
            Failure::Dispatch(err) => {
                if err.is_sequence_error() {
                    warn!("Protocol sequence violation: {}", err);
                    close = session.record_violation();
                } else {
                    debug!("Call rejected: {}", err);
                }
                JsonRpcResponse::failure(id.clone(), err.to_rpc_error())
            }
            Failure::InvalidParams(message) => JsonRpcResponse::invalid_params(id.clone(), message),
        };

        Handled {
            reply: Reply::Immediate(id.map(|_| response)),
            close,
        }
    }
}

/// The client's version when supported, otherwise the newest we support.
pub fn negotiate_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

fn parse_call(request_id: RequestId, params: Option<Value>) -> Result<ToolInvocationRequest, String> {
    let mut params = match params {
        Some(Value::Object(params)) => params,
        Some(_) => return Err("params must be an object".to_string()),
        None => return Err("Missing params".to_string()),
    };

    let tool_name = params
        .get("name")
        .or_else(|| params.get("toolName"))
        .and_then(Value::as_str)
        .ok_or_else(|| "Missing tool name".to_string())?
        .to_string();

    let arguments = match params.remove("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(arguments)) => arguments,
        Some(_) => return Err("arguments must be an object".to_string()),
    };

    Ok(ToolInvocationRequest {
        tool_name,
        arguments,
        request_id,
    })
}

fn cancel_request(session: &Session, params: Option<Value>) {
    let target = params
        .as_ref()
        .and_then(|p| p.get("requestId"))
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    match target {
        Some(id) => {
            if !session.cancel_call(&id) {
                debug!(request_id = %id, "Cancellation for unknown or finished request");
            }
        }
        None => warn!("notifications/cancelled without a valid requestId"),
    }
}
