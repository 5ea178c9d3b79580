//! Reply values and the single-settlement awaitable of a push.

use std::{future::Future, pin, task};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ReplyError;

/// The decoded `{status, response}` payload of a reply.
///
/// `status` is peer-defined; `"ok"`, `"error"` and the locally synthesized
/// `"timeout"` are the conventional values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Status reported by the peer.
    #[serde(default)]
    pub status: String,
    /// Status-specific response data.
    #[serde(default)]
    pub response: Value,
}

impl PushResponse {
    /// Creates a response value.
    pub fn new(status: impl Into<String>, response: Value) -> Self {
        PushResponse {
            status: status.into(),
            response,
        }
    }

    /// Decodes a reply payload.
    ///
    /// Missing fields decode leniently: no `status` becomes the empty string
    /// and no `response` becomes null, so a malformed reply still settles its
    /// push rather than wedging it.
    pub fn from_payload(payload: &Value) -> Self {
        PushResponse {
            status: payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            response: payload.get("response").cloned().unwrap_or(Value::Null),
        }
    }

    /// Whether the peer acknowledged the push.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Whether the peer rejected the push.
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }

    /// Whether this is the synthetic reply injected when the push timed out.
    pub fn is_timeout(&self) -> bool {
        self.status == "timeout"
    }
}

/// A status-keyed callback registered through
/// [`Push::on_reply`](crate::Push::on_reply).
pub type ReplyCallback = Box<dyn FnOnce(&PushResponse) + Send>;

type SharedReply = Shared<BoxFuture<'static, Result<PushResponse, ReplyError>>>;

/// Single-settlement slot shared between an attempt's resolvers and every
/// clone of its [`PendingReply`].
///
/// The shared receiver half is retained here so observers created after the
/// cell settled still see the settled value. Dropping the cell unsettled
/// resolves every observer with [`ReplyError::Abandoned`].
pub(crate) struct ResultCell {
    tx: Option<oneshot::Sender<Result<PushResponse, ReplyError>>>,
    shared: SharedReply,
}

impl ResultCell {
    pub(crate) fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        let shared = async move { rx.await.unwrap_or_else(|err| Err(err.into())) }
            .boxed()
            .shared();
        ResultCell {
            tx: Some(tx),
            shared,
        }
    }

    /// Settles the cell, returning `false` if it had already settled.
    pub(crate) fn settle(&mut self, result: Result<PushResponse, ReplyError>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn pending(&self) -> PendingReply {
        PendingReply {
            fut: self.shared.clone(),
        }
    }
}

/// The awaitable outcome of a push attempt.
///
/// Returned by [`Push::reply`](crate::Push::reply). Clones observe the same
/// settlement; the attempt settles at most once. If the push is reset or
/// dropped before settling, this resolves to [`ReplyError::Abandoned`].
#[allow(missing_debug_implementations)]
#[must_use = "reply wont be received without awaiting"]
#[derive(Clone)]
pub struct PendingReply {
    fut: SharedReply,
}

impl Future for PendingReply {
    type Output = Result<PushResponse, ReplyError>;

    fn poll(mut self: pin::Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        self.fut.poll_unpin(cx)
    }
}
