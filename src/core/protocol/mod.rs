//! MCP protocol runtime: JSON-RPC framing types, the per-connection session
//! state machine, tool dispatch and method routing.
//!
//! Transports only decode messages and hand them to [`ProtocolHandler`];
//! everything about sequencing and concurrency lives here.

pub mod dispatcher;
pub mod handler;
pub mod message;
pub mod session;

pub use dispatcher::{DispatchError, Dispatcher, InFlightGuard, PreparedCall, ToolInvocationRequest};
pub use handler::{Completion, Handled, ProtocolHandler, Reply, SUPPORTED_PROTOCOL_VERSIONS};
pub use message::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, decode_message};
pub use session::{NegotiatedCapabilities, Session, SessionError, SessionPhase};
