//! JSON-RPC client state and the caller-facing call handle.
//!
//! `RpcClient` is the pending-call table. It lives inside the link actor
//! and is never shared: ids are assigned, responses routed and pending
//! calls failed from the actor's task only.
//!
//! `RpcHandle` is what collaborators hold. `call()` is synchronous; it
//! enqueues the request on the actor's command channel, so requests reach
//! the wire in the order they were issued, and returns a `PendingReply`
//! that resolves exactly once.
//!
//! # Panic-Free Guarantees
//!
//! - A caller that dropped its `PendingReply` is ignored on resolution
//! - A reply channel dropped by the actor resolves as `ConnectionLost`

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use lnm_core::{RpcError, RpcProtocolError};
use lnm_protocol::{Frame, Inbound, Request, RequestId};

use crate::link::LinkCommand;

/// Result of a single call.
pub type RpcResult = Result<Value, RpcError>;

// ============================================================================
// Reply Routing
// ============================================================================

/// Replies the link consumes itself instead of handing to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InternalReply {
    /// `getinfo` feeding the node info snapshot.
    NodeInfo,
}

/// Where a response goes once it arrives.
#[derive(Debug)]
pub(crate) enum ReplySink {
    Caller(oneshot::Sender<RpcResult>),
    Internal(InternalReply),
}

impl ReplySink {
    /// Resolves the sink with an error. Internal sinks have nobody waiting.
    pub(crate) fn fail(self, err: RpcError) {
        if let Self::Caller(tx) = self {
            let _ = tx.send(Err(err));
        }
    }
}

#[derive(Debug)]
struct PendingCall {
    method: String,
    sink: ReplySink,
}

/// What happened to one inbound frame.
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// Routed to the waiting caller.
    Delivered { id: RequestId, method: String },

    /// A reply the link itself asked for.
    Internal {
        id: RequestId,
        reply: InternalReply,
        result: RpcResult,
    },

    /// Unsolicited message from the daemon.
    Notification { method: String, params: Value },

    /// Dropped: malformed, or no matching pending call.
    Rejected(RpcProtocolError),
}

// ============================================================================
// Pending Call Table
// ============================================================================

/// Id allocation and response routing for one link.
///
/// Ids increase monotonically for the life of the link and are never
/// reused, so a late response from a previous connection can never be
/// mistaken for a call issued on the current one.
#[derive(Debug)]
pub struct RpcClient {
    next_id: RequestId,
    pending: HashMap<RequestId, PendingCall>,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcClient {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Number of calls awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Assigns a fresh id, records the call and returns the request to send.
    pub(crate) fn begin(&mut self, method: String, params: Value, sink: ReplySink) -> Request {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let request = Request::new(id, method.clone(), params);
        self.pending.insert(id, PendingCall { method, sink });
        request
    }

    /// Fails one call. Used when its request never made it onto the wire.
    pub(crate) fn fail(&mut self, id: RequestId, err: RpcError) {
        if let Some(call) = self.pending.remove(&id) {
            call.sink.fail(err);
        }
    }

    /// Fails every pending call with `err` and empties the table.
    ///
    /// Returns how many calls were failed.
    pub(crate) fn fail_all(&mut self, err: RpcError) -> usize {
        let count = self.pending.len();
        for (id, call) in self.pending.drain() {
            trace!(id, method = %call.method, error = %err, "Failing pending call");
            call.sink.fail(err.clone());
        }
        count
    }

    /// Routes one decoded frame.
    pub(crate) fn dispatch(&mut self, frame: Frame) -> Dispatch {
        let value = match frame {
            Frame::Message(value) => value,
            Frame::Malformed(reason) => {
                return Dispatch::Rejected(RpcProtocolError::Malformed(reason));
            }
        };

        match Inbound::classify(value) {
            Err(err) => Dispatch::Rejected(err),
            Ok(Inbound::Notification { method, params }) => {
                Dispatch::Notification { method, params }
            }
            Ok(Inbound::Response { id, outcome }) => {
                let Some(call) = self.pending.remove(&id) else {
                    return Dispatch::Rejected(RpcProtocolError::UnknownId(id.to_string()));
                };
                let result = outcome.map_err(|e| RpcError::Application {
                    code: e.code,
                    message: e.message,
                    data: e.data,
                });
                match call.sink {
                    ReplySink::Caller(tx) => {
                        let _ = tx.send(result);
                        Dispatch::Delivered {
                            id,
                            method: call.method,
                        }
                    }
                    ReplySink::Internal(reply) => Dispatch::Internal { id, reply, result },
                }
            }
        }
    }
}

// ============================================================================
// Call Handle
// ============================================================================

/// Cheap-to-clone handle for issuing calls on the link.
///
/// # Usage
///
/// ```ignore
/// let funds = rpc.call("listfunds", Value::Null).await?;
/// let info: RawGetInfo = rpc.call_as("getinfo", Value::Null).await?;
/// ```
#[derive(Clone, Debug)]
pub struct RpcHandle {
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl RpcHandle {
    pub(crate) fn new(commands: mpsc::UnboundedSender<LinkCommand>) -> Self {
        Self { commands }
    }

    /// Issues `method` with `params`.
    ///
    /// The request is queued immediately; awaiting the returned reply is
    /// optional. It resolves with the daemon's result, an
    /// `RpcError::Application`, `NotConnected` if no connection was up when
    /// the call was processed, or `ConnectionLost`.
    pub fn call(&self, method: impl Into<String>, params: Value) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        // A closed channel drops `tx`; the reply then resolves as ConnectionLost.
        let _ = self.commands.send(LinkCommand::Call {
            method: method.into(),
            params,
            sink: ReplySink::Caller(tx),
        });
        PendingReply { rx }
    }

    /// Issues a call and deserializes its result.
    ///
    /// # Errors
    ///
    /// Any error from `call`, or `RpcError::Decode` if the result does not
    /// match `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: impl Into<String>,
        params: Value,
    ) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Decode(e.to_string()))
    }

    pub(crate) fn call_internal(&self, method: &str, params: Value, reply: InternalReply) {
        let _ = self.commands.send(LinkCommand::Call {
            method: method.to_string(),
            params,
            sink: ReplySink::Internal(reply),
        });
    }

    /// Returns true while the link actor is accepting calls.
    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Completion of one call. Resolves exactly once.
#[derive(Debug)]
#[must_use = "dropping a PendingReply discards the daemon's answer"]
pub struct PendingReply {
    rx: oneshot::Receiver<RpcResult>,
}

impl Future for PendingReply {
    type Output = RpcResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(RpcError::ConnectionLost)))
    }
}
