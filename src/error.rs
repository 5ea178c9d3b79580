//! Error types for push delivery and reply resolution.
//!
//! Only two failures cross the crate boundary: a transport-level
//! [`SocketError`] and the [`ReplyError`] a [`PendingReply`](crate::PendingReply)
//! can resolve with. Timeouts are not errors; they surface as a normal reply
//! with status `"timeout"`.

use std::{error, sync::Arc};

use thiserror::Error;
use tokio::sync::oneshot;

/// A dyn boxed error.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// A transport-level failure reported by the socket.
///
/// One connection failure fans out to every push waiting on a reply, so the
/// underlying error is shared and the wrapper is cheap to clone.
#[derive(Clone, Debug, Error)]
#[error(transparent)]
pub struct SocketError(Arc<dyn error::Error + Send + Sync + 'static>);

impl SocketError {
    /// Wraps an arbitrary transport error.
    pub fn new<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        SocketError(Arc::from(err.into()))
    }

    /// Returns a reference to the wrapped error, for downcasting.
    pub fn get_ref(&self) -> &(dyn error::Error + Send + Sync + 'static) {
        &*self.0
    }
}

/// Why a push's awaitable reply failed instead of producing a response.
#[derive(Clone, Debug, Error)]
pub enum ReplyError {
    /// The transport failed while the push was in flight.
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// The push was reset or dropped before its attempt settled.
    #[error("push abandoned before a reply was received")]
    Abandoned,
}

impl From<oneshot::error::RecvError> for ReplyError {
    fn from(_err: oneshot::error::RecvError) -> Self {
        ReplyError::Abandoned
    }
}
