//! Tool call dispatch.
//!
//! A call goes through two steps. [`Dispatcher::prepare`] runs synchronously,
//! in message order: session phase, duplicate id and concurrency checks, tool
//! lookup, schema check and the tool's own validation. [`PreparedCall::run`]
//! then executes the tool on its own task, racing the per-tool deadline and the
//! call's cancellation signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

use super::message::{JsonRpcError, RequestId, codes};
use super::session::{Session, SessionError};
use crate::core::config::ToolsConfig;
use crate::domains::tools::{
    Arguments, CancellationSignal, ExecutionError, InvocationContext, Tool, ToolError,
    ToolInvocationResult, ToolRegistry,
};

/// A `tools/call` request after envelope decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationRequest {
    pub tool_name: String,
    pub arguments: Arguments,
    pub request_id: RequestId,
}

/// Reasons a call is rejected before execution starts.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl DispatchError {
    /// JSON-RPC error for this rejection, with the error kind in `data`.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            Self::Session(err) => {
                let (code, kind) = match err {
                    SessionError::OutOfSequence { .. } => {
                        (codes::PROTOCOL_SEQUENCE, "ProtocolSequenceError")
                    }
                    SessionError::DuplicateRequest(_) => {
                        (codes::DUPLICATE_REQUEST, "DuplicateRequestError")
                    }
                    SessionError::Busy { .. } => (codes::SESSION_BUSY, "SessionBusyError"),
                };
                JsonRpcError::new(code, err.to_string()).with_data(json!({
                    "kind": kind,
                    "retryable": err.is_retryable(),
                }))
            }
            Self::Tool(err) => {
                let mut data = json!({ "kind": err.kind_name() });
                if let ToolError::InvalidArguments(validation) = err {
                    if let Some(field) = &validation.field {
                        data["field"] = json!(field);
                    }
                }
                let code = match err {
                    ToolError::ExecutionFailed(_)
                    | ToolError::Duplicate(_)
                    | ToolError::InvalidSchema { .. } => codes::INTERNAL_ERROR,
                    ToolError::NotFound(_) | ToolError::InvalidArguments(_) => {
                        codes::INVALID_PARAMS
                    }
                };
                JsonRpcError::new(code, err.to_string()).with_data(data)
            }
        }
    }

    pub fn is_sequence_error(&self) -> bool {
        matches!(self, Self::Session(SessionError::OutOfSequence { .. }))
    }
}

/// Routes validated calls to registry tools under per-tool deadlines.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    timeouts: ToolsConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, timeouts: ToolsConfig) -> Self {
        Self { registry, timeouts }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Admit a call into the session and validate it.
    ///
    /// On success the request id is in the session's in-flight set and stays
    /// there until the returned call (or its guard) is dropped.
    #[instrument(skip_all, fields(tool = %request.tool_name, request_id = %request.request_id))]
    pub fn prepare(
        &self,
        session: &Arc<Session>,
        request: ToolInvocationRequest,
    ) -> Result<PreparedCall, DispatchError> {
        let cancel = session.begin_call(&request.request_id)?;
        let guard = InFlightGuard::new(session.clone(), request.request_id.clone());

        let tool = self.registry.lookup(&request.tool_name)?;
        self.registry.check_arguments(tool.name(), &request.arguments)?;
        let arguments = tool.validate(request.arguments).map_err(ToolError::from)?;

        debug!("Call admitted");
        Ok(PreparedCall {
            timeout: self.timeouts.timeout_for(tool.name()),
            tool,
            arguments,
            context: InvocationContext::new(session.id(), session.client_ip().map(str::to_string)),
            cancel,
            guard,
        })
    }

    /// Prepare and run a call to completion.
    pub async fn dispatch(
        &self,
        session: &Arc<Session>,
        request: ToolInvocationRequest,
    ) -> Result<ToolInvocationResult, DispatchError> {
        let call = self.prepare(session, request)?;
        let (result, _guard) = call.run().await;
        Ok(result)
    }
}

/// Removes a request id from the in-flight set exactly once, on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    session: Arc<Session>,
    request_id: RequestId,
}

impl InFlightGuard {
    fn new(session: Arc<Session>, request_id: RequestId) -> Self {
        Self {
            session,
            request_id,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.session.finish_call(&self.request_id);
    }
}

/// Aborts the tool task when the future awaiting it goes away.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A validated call, registered in flight and ready to execute.
pub struct PreparedCall {
    tool: Arc<dyn Tool>,
    arguments: Arguments,
    context: InvocationContext,
    cancel: CancellationSignal,
    timeout: Duration,
    guard: InFlightGuard,
}

impl PreparedCall {
    pub fn request_id(&self) -> &RequestId {
        self.guard.request_id()
    }

    pub fn tool_name(&self) -> &str {
        self.tool.name()
    }

    /// Execute the tool.
    ///
    /// The guard is handed back so the caller can release the in-flight slot
    /// after the result has been delivered. Dropping the returned future
    /// aborts the tool.
    pub async fn run(self) -> (ToolInvocationResult, InFlightGuard) {
        let PreparedCall {
            tool,
            arguments,
            context,
            cancel,
            timeout,
            guard,
        } = self;

        let name = tool.name().to_string();
        let started = Instant::now();
        let task_cancel = cancel.clone();
        let mut task =
            tokio::spawn(async move { tool.execute(arguments, &context, task_cancel).await });
        let _abort = AbortOnDrop(task.abort_handle());

        let outcome = tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    Err(ExecutionError::internal(format!("tool '{}' panicked", name)))
                }
                Err(_) => Err(ExecutionError::cancelled(format!("tool '{}' was aborted", name))),
            },
            _ = tokio::time::sleep(timeout) => {
                task.abort();
                Err(ExecutionError::timeout(format!(
                    "tool '{}' exceeded its {} ms deadline",
                    name,
                    timeout.as_millis()
                )))
            }
            _ = cancel.cancelled() => {
                task.abort();
                Err(ExecutionError::cancelled(format!("tool '{}' call was cancelled", name)))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(
                tool = %name,
                request_id = %guard.request_id(),
                elapsed_ms,
                "Tool call succeeded"
            ),
            Err(err) => warn!(
                tool = %name,
                request_id = %guard.request_id(),
                elapsed_ms,
                kind = %err.kind,
                retryable = err.retryable,
                "Tool call failed: {}",
                err.message
            ),
        }

        (ToolInvocationResult::from(outcome), guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, SessionConfig};
    use crate::core::protocol::session::NegotiatedCapabilities;
    use crate::domains::tools::contract::describe;
    use crate::domains::tools::{ExecutionErrorKind, ToolDescriptor, ToolOutput, ValidationError};
    use async_trait::async_trait;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Deserialize, JsonSchema)]
    struct SleepParams {
        #[allow(dead_code)]
        ms: u64,
    }

    #[derive(Serialize, JsonSchema)]
    struct SleepOutput {
        slept_ms: u64,
    }

    /// Sleeps for `ms`; panics when `ms` is 13.
    struct SleepTool {
        descriptor: ToolDescriptor,
        finished: Arc<AtomicUsize>,
    }

    impl SleepTool {
        fn new() -> Self {
            Self::counting(Arc::new(AtomicUsize::new(0)))
        }

        /// Counts calls that ran to completion in `finished`.
        fn counting(finished: Arc<AtomicUsize>) -> Self {
            Self {
                descriptor: describe::<SleepParams, SleepOutput>("sleep", "sleeps"),
                finished,
            }
        }
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }

        fn validate(&self, arguments: Arguments) -> Result<Arguments, ValidationError> {
            Ok(arguments)
        }

        async fn execute(
            &self,
            arguments: Arguments,
            _context: &InvocationContext,
            _cancel: CancellationSignal,
        ) -> Result<ToolOutput, ExecutionError> {
            let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(0);
            if ms == 13 {
                panic!("unlucky");
            }
            tokio::time::sleep(Duration::from_millis(ms)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            ToolOutput::new("done", &SleepOutput { slept_ms: ms })
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = ToolRegistry::with_builtin_tools(&Config::default()).unwrap();
        registry.register(Arc::new(SleepTool::new())).unwrap();
        Dispatcher::new(
            Arc::new(registry),
            ToolsConfig {
                default_timeout_ms: 5_000,
                timeouts_ms: HashMap::from([("sleep".to_string(), 100)]),
            },
        )
    }

    fn ready_session() -> Arc<Session> {
        let session = Session::new(SessionConfig::default(), None);
        session
            .begin_initialize(NegotiatedCapabilities {
                protocol_version: "2025-06-18".to_string(),
                client_info: None,
                client_capabilities: json!({}),
            })
            .unwrap();
        session.mark_initialized().unwrap();
        session
    }

    fn call(id: i64, tool: &str, arguments: Value) -> ToolInvocationRequest {
        ToolInvocationRequest {
            tool_name: tool.to_string(),
            arguments: arguments.as_object().cloned().unwrap(),
            request_id: RequestId::Number(id),
        }
    }

    #[tokio::test]
    async fn test_calculator_call() {
        let dispatcher = dispatcher();
        let session = ready_session();
        let result = dispatcher
            .dispatch(&session, call(1, "calculator", json!({ "expr": "2+2" })))
            .await
            .unwrap();
        match result {
            ToolInvocationResult::Success(output) => assert_eq!(output.structured["result"], 4),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(session.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_before_ready() {
        let dispatcher = dispatcher();
        let session = Session::new(SessionConfig::default(), None);
        let err = dispatcher
            .dispatch(&session, call(1, "calculator", json!({ "expr": "1" })))
            .await
            .unwrap_err();
        assert!(err.is_sequence_error());
        assert_eq!(err.to_rpc_error().code, codes::PROTOCOL_SEQUENCE);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_validation_release_slot() {
        let dispatcher = dispatcher();
        let session = ready_session();

        let err = dispatcher
            .dispatch(&session, call(1, "teleport", json!({})))
            .await
            .unwrap_err();
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, codes::INVALID_PARAMS);
        assert_eq!(rpc.data.unwrap()["kind"], "UnknownToolError");

        let err = dispatcher
            .dispatch(&session, call(2, "calculator", json!({ "expr": "2 +" })))
            .await
            .unwrap_err();
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, codes::INVALID_PARAMS);
        assert_eq!(rpc.data.unwrap()["kind"], "ValidationError");

        let err = dispatcher
            .dispatch(&session, call(3, "sleep", json!({ "ms": "soon" })))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Tool(ToolError::InvalidArguments(_))));

        assert_eq!(session.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_schema_rejects_undeclared_arguments() {
        let dispatcher = dispatcher();
        let session = ready_session();

        let err = dispatcher
            .dispatch(
                &session,
                call(1, "calculator", json!({ "expr": "2+2", "bogus": true })),
            )
            .await
            .unwrap_err();
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, codes::INVALID_PARAMS);
        let data = rpc.data.unwrap();
        assert_eq!(data["kind"], "ValidationError");
        assert_eq!(data["field"], "bogus");

        let err = dispatcher
            .dispatch(
                &session,
                call(2, "network", json!({ "probe": "telnet", "target": "example.com" })),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_rpc_error().data.unwrap()["field"], "probe");
        assert_eq!(session.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_id_while_in_flight() {
        let dispatcher = dispatcher();
        let session = ready_session();

        let first = dispatcher
            .prepare(&session, call(7, "sleep", json!({ "ms": 10 })))
            .unwrap();
        let err = dispatcher
            .prepare(&session, call(7, "calculator", json!({ "expr": "1" })))
            .err()
            .unwrap();
        assert_eq!(err.to_rpc_error().code, codes::DUPLICATE_REQUEST);

        let (result, guard) = first.run().await;
        assert!(result.is_success());
        drop(guard);
        assert!(dispatcher.prepare(&session, call(7, "sleep", json!({ "ms": 1 }))).is_ok());
    }

    #[tokio::test]
    async fn test_timeout() {
        let dispatcher = dispatcher();
        let session = ready_session();
        let started = Instant::now();
        let result = dispatcher
            .dispatch(&session, call(1, "sleep", json!({ "ms": 10_000 })))
            .await
            .unwrap();
        let err = result.error().unwrap();
        assert_eq!(err.kind, ExecutionErrorKind::Timeout);
        assert!(err.retryable);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(session.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let dispatcher = dispatcher();
        let session = ready_session();
        let prepared = dispatcher
            .prepare(&session, call(5, "sleep", json!({ "ms": 90 })))
            .unwrap();
        assert!(session.cancel_call(&RequestId::Number(5)));

        let (result, guard) = prepared.run().await;
        assert_eq!(result.error().unwrap().kind, ExecutionErrorKind::Cancelled);
        drop(guard);
        assert_eq!(session.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_run_aborts_the_tool() {
        let finished = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(SleepTool::counting(finished.clone())))
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), ToolsConfig::default());
        let session = ready_session();

        let prepared = dispatcher
            .prepare(&session, call(1, "sleep", json!({ "ms": 60 })))
            .unwrap();
        let abandoned = tokio::time::timeout(Duration::from_millis(20), prepared.run()).await;
        assert!(abandoned.is_err());
        assert_eq!(session.in_flight_count(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_tool_is_isolated() {
        let dispatcher = dispatcher();
        let session = ready_session();
        let result = dispatcher
            .dispatch(&session, call(1, "sleep", json!({ "ms": 13 })))
            .await
            .unwrap();
        assert_eq!(result.error().unwrap().kind, ExecutionErrorKind::Internal);

        let result = dispatcher
            .dispatch(&session, call(2, "calculator", json!({ "expr": "6*7" })))
            .await
            .unwrap();
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_concurrent_calls_complete_out_of_order() {
        let dispatcher = Arc::new(dispatcher());
        let session = ready_session();

        let slow = dispatcher
            .prepare(&session, call(1, "sleep", json!({ "ms": 60 })))
            .unwrap();
        let fast = dispatcher
            .prepare(&session, call(2, "sleep", json!({ "ms": 1 })))
            .unwrap();
        assert_eq!(session.in_flight_count(), 2);

        let slow = tokio::spawn(async move {
            let (result, _guard) = slow.run().await;
            (Instant::now(), result)
        });
        let (fast_result, fast_guard) = fast.run().await;
        let fast_done = Instant::now();
        drop(fast_guard);

        let (slow_done, slow_result) = slow.await.unwrap();
        assert!(fast_result.is_success());
        assert!(slow_result.is_success());
        assert!(fast_done <= slow_done);
        assert_eq!(session.in_flight_count(), 0);
    }
}
