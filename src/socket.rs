//! Transport abstraction consumed by pushes.

use std::future::Future;

use crate::error::SocketError;
use crate::message::{Message, Ref};

/// A connected transport multiplexing many channels.
///
/// Implementations own framing and connection lifecycle; pushes only need the
/// two operations below. `next_ref` must hand out references unique for the
/// lifetime of the connection, which is what keeps concurrent attempts from
/// ever sharing a correlation identity. Neither method may call back into the
/// push layer.
pub trait Socket: Send + Sync + 'static {
    /// Allocates the next message reference.
    fn next_ref(&self) -> Ref;

    /// Delivers a message to the remote peer.
    fn send_message(
        &self,
        message: Message,
    ) -> impl Future<Output = Result<(), SocketError>> + Send;
}
