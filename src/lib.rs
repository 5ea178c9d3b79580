#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]

pub mod channel;
pub mod error;
pub mod message;
pub mod push;
pub mod reply;
pub mod socket;

pub use channel::{Channel, ReplyWaiter, ReplyWaiters};
pub use error::{BoxError, ReplyError, SocketError};
pub use message::{Event, Message, Ref};
pub use push::Push;
pub use reply::{PendingReply, PushResponse, ReplyCallback};
pub use socket::Socket;
