//! Channel abstraction and the reply waiter table shared by its pushes.

use std::{collections::HashMap, future::Future, pin, sync::Mutex, task};

use futures::FutureExt;
use tokio::sync::oneshot;

use crate::error::SocketError;
use crate::message::{Event, Message, Ref};
use crate::socket::Socket;

/// A topic-scoped multiplexer over a shared socket.
///
/// [`Push`](crate::Push) drives its channel through this trait: it allocates a
/// reference from the channel's socket, registers a waiter for the derived
/// reply event, and injects synthetic timeout replies back through
/// [`trigger`](Channel::trigger) so every observer of the event sees the same
/// outcome. Implementations typically embed a [`ReplyWaiters`] table and feed
/// it every inbound message.
pub trait Channel: Send + Sync + 'static {
    /// The transport this channel multiplexes over.
    type Socket: Socket;

    /// Topic identifying the channel on the socket.
    fn topic(&self) -> &str;

    /// Reference of the join push that opened the channel, once joined.
    fn join_ref(&self) -> Option<Ref>;

    /// The underlying socket.
    fn socket(&self) -> &Self::Socket;

    /// Registers a one-shot waiter for the next message carrying `event`.
    fn on_push_reply(&self, event: &Event) -> ReplyWaiter;

    /// Drops every waiter registered for `event` without resolving it.
    fn remove_waiters(&self, event: &Event);

    /// Delivers a message to the waiters registered for its event.
    fn trigger(&self, message: Message);
}

/// A one-shot subscription to the next message for an event.
///
/// Resolves with the message, with the socket error that killed the
/// connection, or to `None` if the waiter was removed before either arrived.
#[must_use = "the reply wont be observed without awaiting the waiter"]
#[derive(Debug)]
pub struct ReplyWaiter {
    rx: oneshot::Receiver<Result<Message, SocketError>>,
}

impl Future for ReplyWaiter {
    type Output = Option<Result<Message, SocketError>>;

    fn poll(mut self: pin::Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(Result::ok)
    }
}

/// Routes inbound reply messages to the pushes waiting on them.
///
/// One table per channel, shared by every push on it; each push only ever
/// touches the entry keyed by its own reply event. Channel implementations
/// call [`trigger`](ReplyWaiters::trigger) for every inbound message and
/// [`fail_all`](ReplyWaiters::fail_all) when the connection dies, so a dying
/// socket settles every pending push instead of leaving them hanging.
///
/// # Example
///
/// ```
/// use pushwire::{Event, Message, Ref, ReplyWaiters};
///
/// # tokio_test::block_on(async {
/// let waiters = ReplyWaiters::new();
/// let reply_event = Event::reply_for(&Ref::new("1"));
/// let waiter = waiters.register(&reply_event);
///
/// // an inbound message for the event resolves the waiter
/// let resolved = waiters.trigger(&Message::reply_timeout(&Ref::new("1")));
/// assert_eq!(resolved, 1);
///
/// let message = waiter.await.expect("waiter resolved").expect("connection alive");
/// assert_eq!(message.event, reply_event);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct ReplyWaiters {
    waiters: Mutex<HashMap<Event, Vec<oneshot::Sender<Result<Message, SocketError>>>>>,
}

impl ReplyWaiters {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for the next message carrying `event`.
    ///
    /// Multiple waiters may be registered for one event; a trigger resolves
    /// all of them.
    pub fn register(&self, event: &Event) -> ReplyWaiter {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap()
            .entry(event.clone())
            .or_default()
            .push(tx);
        ReplyWaiter { rx }
    }

    /// Resolves every waiter registered for the message's event.
    ///
    /// Returns the number of waiters resolved; `0` means nobody was waiting.
    pub fn trigger(&self, message: &Message) -> usize {
        let Some(senders) = self.waiters.lock().unwrap().remove(&message.event) else {
            return 0;
        };
        let mut resolved = 0;
        for tx in senders {
            if tx.send(Ok(message.clone())).is_ok() {
                resolved += 1;
            }
        }
        resolved
    }

    /// Drops every waiter for `event`; their futures resolve as cancelled.
    pub fn remove(&self, event: &Event) {
        self.waiters.lock().unwrap().remove(event);
    }

    /// Fails every waiter for `event` with `error`.
    pub fn fail(&self, event: &Event, error: SocketError) {
        let Some(senders) = self.waiters.lock().unwrap().remove(event) else {
            return;
        };
        for tx in senders {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Fails every waiter in the table with `error`.
    pub fn fail_all(&self, error: SocketError) {
        let drained: Vec<_> = self.waiters.lock().unwrap().drain().collect();
        for (_, senders) in drained {
            for tx in senders {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    /// Number of waiters currently registered for `event`.
    pub fn waiting(&self, event: &Event) -> usize {
        self.waiters.lock().unwrap().get(event).map_or(0, Vec::len)
    }

    /// Whether the table holds no waiters at all.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn reply(event: &Event, status: &str) -> Message {
        Message {
            topic: Some("room:lobby".to_owned()),
            event: event.clone(),
            payload: json!({ "status": status, "response": {} }),
            reference: None,
            join_ref: None,
        }
    }

    #[tokio::test]
    async fn trigger_resolves_every_waiter_for_the_event() {
        let waiters = ReplyWaiters::new();
        let event = Event::new("chan_reply_1");
        let other = Event::new("chan_reply_2");
        let first = waiters.register(&event);
        let second = waiters.register(&event);
        let untouched = waiters.register(&other);

        assert_eq!(waiters.trigger(&reply(&event, "ok")), 2);
        assert_eq!(waiters.trigger(&reply(&event, "ok")), 0);

        for waiter in [first, second] {
            match waiter.await {
                Some(Ok(message)) => assert_eq!(message.event, event),
                outcome => panic!("expected a message, got {outcome:?}"),
            }
        }
        assert_eq!(waiters.waiting(&other), 1);
        drop(untouched);
    }

    #[tokio::test]
    async fn removed_waiters_resolve_as_cancelled() {
        let waiters = ReplyWaiters::new();
        let event = Event::new("chan_reply_7");
        let waiter = waiters.register(&event);

        waiters.remove(&event);

        assert!(waiter.await.is_none());
        assert!(waiters.is_empty());
    }

    #[tokio::test]
    async fn fail_scopes_to_a_single_event() {
        let waiters = ReplyWaiters::new();
        let failing = Event::new("chan_reply_3");
        let healthy = Event::new("chan_reply_4");
        let failed = waiters.register(&failing);
        let pending = waiters.register(&healthy);

        waiters.fail(&failing, SocketError::new("broken pipe"));

        match failed.await {
            Some(Err(err)) => assert_eq!(err.to_string(), "broken pipe"),
            outcome => panic!("expected a socket error, got {outcome:?}"),
        }
        assert_eq!(waiters.waiting(&healthy), 1);
        drop(pending);
    }

    #[tokio::test]
    async fn connection_failure_fails_every_waiter() {
        let waiters = ReplyWaiters::new();
        let a = waiters.register(&Event::new("chan_reply_5"));
        let b = waiters.register(&Event::new("chan_reply_6"));

        waiters.fail_all(SocketError::new("connection closed"));

        for waiter in [a, b] {
            assert!(matches!(waiter.await, Some(Err(_))));
        }
        assert!(waiters.is_empty());
    }
}
