//! Client session: protocol phase, negotiated capabilities and the in-flight set.
//!
//! All mutable state sits behind one mutex with short, non-async critical
//! sections. The in-flight map is the only structure shared between the reader
//! and running calls; every check-and-update on it happens under that lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::message::RequestId;
use crate::core::config::SessionConfig;
use crate::domains::tools::{CancelHandle, CancellationSignal, cancellation_pair};

/// How long cancelled stragglers get to report back before the session closes.
const CANCEL_SETTLE: Duration = Duration::from_millis(250);

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Uninitialized,
    Negotiating,
    Ready,
    Closing,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Negotiating => "negotiating",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What the client announced during `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NegotiatedCapabilities {
    pub protocol_version: String,
    pub client_info: Option<Value>,
    pub client_capabilities: Value,
}

/// Session-level rejections.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Message not allowed in the current phase.
    #[error("'{method}' is not allowed while the session is {phase}")]
    OutOfSequence { method: String, phase: SessionPhase },

    /// The request id already names an outstanding invocation.
    #[error("request id {0} is already in flight")]
    DuplicateRequest(RequestId),

    /// The per-session concurrency ceiling is reached.
    #[error("session busy: {limit} tool calls already in flight")]
    Busy { limit: usize },
}

impl SessionError {
    pub fn out_of_sequence(method: impl Into<String>, phase: SessionPhase) -> Self {
        Self::OutOfSequence {
            method: method.into(),
            phase,
        }
    }

    /// Busy is the only rejection worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    capabilities: Option<NegotiatedCapabilities>,
    in_flight: HashMap<RequestId, CancelHandle>,
    violations: u32,
}

/// One client session.
#[derive(Debug)]
pub struct Session {
    id: String,
    client_ip: Option<String>,
    limits: SessionConfig,
    state: Mutex<SessionState>,
    drained: Notify,
}

impl Session {
    pub fn new(limits: SessionConfig, client_ip: Option<String>) -> Arc<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        debug!(session = %id, client_ip = ?client_ip, "Session opened");
        Arc::new(Self {
            id,
            client_ip,
            limits,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Uninitialized,
                capabilities: None,
                in_flight: HashMap::new(),
                violations: 0,
            }),
            drained: Notify::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == SessionPhase::Closed
    }

    pub fn capabilities(&self) -> Option<NegotiatedCapabilities> {
        self.lock().capabilities.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Fail unless the session is in one of `allowed`.
    pub fn require(&self, method: &str, allowed: &[SessionPhase]) -> Result<(), SessionError> {
        let phase = self.phase();
        if allowed.contains(&phase) {
            Ok(())
        } else {
            Err(SessionError::out_of_sequence(method, phase))
        }
    }

    /// `initialize`: Uninitialized -> Negotiating.
    pub fn begin_initialize(&self, capabilities: NegotiatedCapabilities) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.phase != SessionPhase::Uninitialized {
            return Err(SessionError::out_of_sequence("initialize", state.phase));
        }
        info!(
            session = %self.id,
            protocol_version = %capabilities.protocol_version,
            "Session negotiating"
        );
        state.phase = SessionPhase::Negotiating;
        state.capabilities = Some(capabilities);
        Ok(())
    }

    /// `notifications/initialized`: Negotiating -> Ready.
    pub fn mark_initialized(&self) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.phase != SessionPhase::Negotiating {
            return Err(SessionError::out_of_sequence(
                "notifications/initialized",
                state.phase,
            ));
        }
        state.phase = SessionPhase::Ready;
        info!(session = %self.id, "Session ready");
        Ok(())
    }

    /// Register a tool call. Checks phase, duplicate id and the concurrency
    /// ceiling atomically, then hands back the call's cancellation signal.
    pub fn begin_call(&self, request_id: &RequestId) -> Result<CancellationSignal, SessionError> {
        let mut state = self.lock();
        if state.phase != SessionPhase::Ready {
            return Err(SessionError::out_of_sequence("tools/call", state.phase));
        }
        if state.in_flight.contains_key(request_id) {
            return Err(SessionError::DuplicateRequest(request_id.clone()));
        }
        if state.in_flight.len() >= self.limits.max_in_flight {
            return Err(SessionError::Busy {
                limit: self.limits.max_in_flight,
            });
        }
        let (handle, signal) = cancellation_pair();
        state.in_flight.insert(request_id.clone(), handle);
        Ok(signal)
    }

    /// Remove a call from the in-flight set.
    pub fn finish_call(&self, request_id: &RequestId) {
        let mut state = self.lock();
        if state.in_flight.remove(request_id).is_none() {
            warn!(session = %self.id, request_id = %request_id, "Finished call was not in flight");
        }
        if state.in_flight.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Cancel one in-flight call. Returns false when the id is unknown.
    pub fn cancel_call(&self, request_id: &RequestId) -> bool {
        let state = self.lock();
        match state.in_flight.get(request_id) {
            Some(handle) => {
                handle.cancel();
                debug!(session = %self.id, request_id = %request_id, "Call cancelled by client");
                true
            }
            None => false,
        }
    }

    /// Count a protocol sequence violation. Returns true once the configured
    /// maximum is reached and the session should be closed.
    pub fn record_violation(&self) -> bool {
        let mut state = self.lock();
        state.violations += 1;
        let exceeded = state.violations >= self.limits.max_sequence_violations;
        if exceeded {
            warn!(
                session = %self.id,
                violations = state.violations,
                "Too many protocol sequence violations, closing session"
            );
        }
        exceeded
    }

    /// `shutdown`/`close` from the client: Negotiating|Ready -> Closing.
    pub fn begin_close(&self, method: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        match state.phase {
            SessionPhase::Negotiating | SessionPhase::Ready => {
                state.phase = SessionPhase::Closing;
                info!(session = %self.id, in_flight = state.in_flight.len(), "Session closing");
                Ok(())
            }
            phase => Err(SessionError::out_of_sequence(method, phase)),
        }
    }

    /// Close the session gracefully: stop accepting calls, let in-flight calls
    /// finish within `grace`, cancel the rest, then mark the session Closed.
    pub async fn close(&self, grace: Duration) {
        {
            let mut state = self.lock();
            if state.phase == SessionPhase::Closed {
                return;
            }
            state.phase = SessionPhase::Closing;
        }

        if tokio::time::timeout(grace, self.wait_drained()).await.is_err() {
            let stragglers = self.cancel_all();
            warn!(
                session = %self.id,
                stragglers,
                "Close grace period elapsed, cancelling remaining calls"
            );
            let _ = tokio::time::timeout(CANCEL_SETTLE, self.wait_drained()).await;
        }

        self.lock().phase = SessionPhase::Closed;
        info!(session = %self.id, "Session closed");
    }

    /// Transport went away: Closed immediately, every in-flight call cancelled.
    pub fn disconnect(&self) {
        let cancelled = {
            let mut state = self.lock();
            if state.phase == SessionPhase::Closed {
                return;
            }
            state.phase = SessionPhase::Closed;
            for handle in state.in_flight.values() {
                handle.cancel();
            }
            state.in_flight.len()
        };
        info!(session = %self.id, cancelled, "Session disconnected");
    }

    fn cancel_all(&self) -> usize {
        let state = self.lock();
        for handle in state.in_flight.values() {
            handle.cancel();
        }
        state.in_flight.len()
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.lock().in_flight.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
