//! Tool contract: descriptors, the execution trait and the result envelope.
//!
//! Every tool is a [`Tool`] trait object stored in the
//! [`ToolRegistry`](super::ToolRegistry). The dispatcher drives it in two
//! steps: [`Tool::validate`] normalizes the raw arguments, then
//! [`Tool::execute`] runs with an [`InvocationContext`] and a
//! [`CancellationSignal`].

use async_trait::async_trait;
use rmcp::handler::server::tool::cached_schema_for_type;
use rmcp::model::{CallToolResult, Content, JsonObject};
use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::cancellation::CancellationSignal;
use super::error::{ExecutionError, ValidationError};

/// Descriptor advertised to clients: name, description, input and output schema.
pub use rmcp::model::Tool as ToolDescriptor;

/// Tool call arguments (a JSON object).
pub type Arguments = JsonObject;

/// Build a descriptor from the parameter and output types of a tool.
pub fn describe<P, O>(name: &'static str, description: &'static str) -> ToolDescriptor
where
    P: JsonSchema + 'static,
    O: JsonSchema + 'static,
{
    ToolDescriptor {
        name: name.into(),
        description: Some(description.into()),
        input_schema: cached_schema_for_type::<P>(),
        annotations: None,
        output_schema: Some(cached_schema_for_type::<O>()),
        icons: None,
        meta: None,
        title: None,
    }
}

/// Per-call information supplied by the transport.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    /// Session the call belongs to.
    pub session_id: String,

    /// Client address as observed by the transport, if it has one.
    pub client_ip: Option<String>,
}

impl InvocationContext {
    pub fn new(session_id: impl Into<String>, client_ip: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            client_ip,
        }
    }
}

/// The execution contract every tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static description of this tool.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Registered name of this tool.
    fn name(&self) -> &str {
        self.descriptor().name.as_ref()
    }

    /// Check semantic constraints and return normalized arguments.
    fn validate(&self, arguments: Arguments) -> Result<Arguments, ValidationError>;

    /// Run the tool on arguments previously returned by [`Tool::validate`].
    async fn execute(
        &self,
        arguments: Arguments,
        context: &InvocationContext,
        cancel: CancellationSignal,
    ) -> Result<ToolOutput, ExecutionError>;
}

/// Deserialize raw arguments into a tool's parameter type.
pub fn parse_arguments<P: DeserializeOwned>(arguments: &Arguments) -> Result<P, ValidationError> {
    serde_json::from_value(Value::Object(arguments.clone()))
        .map_err(|e| ValidationError::new(e.to_string()))
}

/// Serialize normalized parameters back into an argument object.
pub fn to_arguments<P: Serialize>(params: &P) -> Result<Arguments, ValidationError> {
    match serde_json::to_value(params) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationError::new("arguments must serialize to an object")),
        Err(e) => Err(ValidationError::new(e.to_string())),
    }
}

/// Decode arguments that already passed validation.
pub fn decode_validated<P: DeserializeOwned>(arguments: Arguments) -> Result<P, ExecutionError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|e| ExecutionError::internal(format!("normalized arguments rejected: {}", e)))
}

/// Successful tool output: a short human-readable summary plus structured data
/// matching the tool's output schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub summary: String,
    pub structured: Value,
}

impl ToolOutput {
    pub fn new<T: Serialize>(summary: impl Into<String>, data: &T) -> Result<Self, ExecutionError> {
        let structured = serde_json::to_value(data).map_err(|e| {
            ExecutionError::internal(format!("failed to serialize tool output: {}", e))
        })?;
        Ok(Self {
            summary: summary.into(),
            structured,
        })
    }
}

/// Outcome of one invocation: exactly one of success or failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocationResult {
    Success(ToolOutput),
    Failure(ExecutionError),
}

impl ToolInvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err),
        }
    }

    /// Convert into the MCP `tools/call` result shape.
    pub fn into_call_result(self) -> CallToolResult {
        match self {
            Self::Success(output) => CallToolResult {
                content: vec![Content::text(output.summary)],
                structured_content: Some(output.structured),
                is_error: Some(false),
                meta: None,
            },
            Self::Failure(err) => CallToolResult {
                content: vec![Content::text(err.to_string())],
                structured_content: Some(serde_json::json!({ "error": err })),
                is_error: Some(true),
                meta: None,
            },
        }
    }
}

impl From<Result<ToolOutput, ExecutionError>> for ToolInvocationResult {
    fn from(result: Result<ToolOutput, ExecutionError>) -> Self {
        match result {
            Ok(output) => Self::Success(output),
            Err(err) => Self::Failure(err),
        }
    }
}
