//! The push itself: one outbound message and the correlation of its reply.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::{ReplyError, SocketError};
use crate::message::{Event, Message, Ref};
use crate::reply::{PendingReply, PushResponse, ReplyCallback, ResultCell};
use crate::socket::Socket;

/// One outbound message on a channel and the correlation of its reply.
///
/// A push owns the lifecycle of a single request over a multiplexed channel:
/// it lazily binds a reference from the socket, derives the reply event from
/// it, races a reply waiter against a timeout timer, and settles exactly once
/// per attempt. The outcome is observable two ways: through status-keyed
/// callbacks ([`on_reply`](Push::on_reply)) and through a clonable awaitable
/// ([`reply`](Push::reply)).
///
/// [`reset`](Push::reset) re-arms the push under a fresh reference so the
/// same logical request can be retried; a late reply for an abandoned attempt
/// can never reach the new one. Timers and waiters run as tasks on the
/// ambient tokio runtime and are cancelled on reset or drop.
pub struct Push<C: Channel> {
    channel: Arc<C>,
    event: Event,
    payload: Box<dyn Fn() -> Value + Send>,
    timeout: Duration,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Identity of the current attempt; reference and reply event are bound
    /// and cleared together.
    correlation: Option<Correlation>,
    /// Bumped on reset so tasks spawned for older attempts never reach
    /// dispatch.
    attempt: u64,
    sent: bool,
    listener_bound: bool,
    received: Option<PushResponse>,
    result: Option<ResultCell>,
    callbacks: HashMap<String, Vec<ReplyCallback>>,
    timer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

struct Correlation {
    push_ref: Ref,
    reply_event: Event,
}

impl<C: Channel> Push<C> {
    /// Timeout used by channel layers that do not configure one explicitly.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a push for `event` on `channel`.
    ///
    /// `payload` is invoked freshly on every [`send`](Push::send) and
    /// [`resend`](Push::resend), so a retry can carry a body recomputed from
    /// current state. Nothing touches the wire until the push is sent.
    pub fn new(
        channel: Arc<C>,
        event: impl Into<Event>,
        payload: impl Fn() -> Value + Send + 'static,
        timeout: Duration,
    ) -> Self {
        Push {
            channel,
            event: event.into(),
            payload: Box::new(payload),
            timeout,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// The outbound event this push sends.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Topic of the channel this push belongs to.
    pub fn topic(&self) -> &str {
        self.channel.topic()
    }

    /// The timeout applied to the current and future attempts.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a send was issued for the current attempt.
    pub fn is_sent(&self) -> bool {
        self.inner.lock().unwrap().sent
    }

    /// The response that resolved the current attempt, if any.
    pub fn received(&self) -> Option<PushResponse> {
        self.inner.lock().unwrap().received.clone()
    }

    /// Whether the current attempt resolved with the given status.
    pub fn has_received(&self, status: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .received
            .as_ref()
            .is_some_and(|received| received.status == status)
    }

    /// The reference correlating this attempt with its reply.
    ///
    /// Allocated from the socket on first access and pinned until
    /// [`reset`](Push::reset).
    pub fn reference(&self) -> Ref {
        self.correlate().0
    }

    /// The event the reply to this attempt will carry.
    pub fn reply_event(&self) -> Event {
        self.correlate().1
    }

    /// Registers a callback fired when the attempt resolves with `status`.
    ///
    /// Multiple callbacks may be registered per status; they fire in
    /// registration order, at most once per attempt, and the whole registry
    /// is cleared after a dispatch. Callbacks registered before a
    /// [`reset`](Push::reset) survive it and serve the next attempt.
    pub fn on_reply(
        &mut self,
        status: impl Into<String>,
        callback: impl FnOnce(&PushResponse) + Send + 'static,
    ) {
        self.inner
            .lock()
            .unwrap()
            .callbacks
            .entry(status.into())
            .or_default()
            .push(Box::new(callback));
    }

    /// Drops every registered callback without firing it.
    pub fn clear_replies(&mut self) {
        self.inner.lock().unwrap().callbacks.clear();
    }

    /// The awaitable outcome of the current attempt.
    ///
    /// Created lazily; clones all observe the same settlement. If the attempt
    /// already resolved, the returned future is immediately ready.
    pub fn reply(&self) -> PendingReply {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        match &mut inner.result {
            Some(result) => result.pending(),
            None => {
                let mut result = ResultCell::new();
                if let Some(received) = &inner.received {
                    result.settle(Ok(received.clone()));
                }
                let pending = result.pending();
                inner.result = Some(result);
                pending
            }
        }
    }

    /// Arms the reply waiter and the timeout timer for the current attempt.
    ///
    /// Idempotent: calling it again before the attempt resolves creates no
    /// second waiter and no second timer.
    pub fn start_timeout(&mut self) {
        let (push_ref, reply_event) = self.correlate();

        let (needs_listener, needs_timer) = {
            let inner = self.inner.lock().unwrap();
            (!inner.listener_bound, inner.timer.is_none())
        };

        if needs_listener {
            let waiter = self.channel.on_push_reply(&reply_event);
            let attempt = self.attempt();
            let listener = tokio::spawn(async move {
                match waiter.await {
                    Some(Ok(message)) => attempt.receive(message),
                    Some(Err(error)) => attempt.fail(error),
                    // waiter was removed; the attempt is already over
                    None => {}
                }
            });
            let mut inner = self.inner.lock().unwrap();
            inner.listener_bound = true;
            inner.listener = Some(listener);
        }

        if needs_timer {
            let attempt = self.attempt();
            let timeout = self.timeout;
            debug!(push_ref = %push_ref, timeout = ?timeout, "armed push timeout");
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                attempt.expire(push_ref, timeout);
            });
            self.inner.lock().unwrap().timer = Some(timer);
        }
    }

    /// Sends the push over the socket.
    ///
    /// Arms the timeout and the reply waiter, then hands the encoded message
    /// to the socket. A transport failure is routed into the same resolution
    /// path as a failed waiter: the awaitable fails, callbacks are bypassed.
    ///
    /// A push whose last resolution was a timeout refuses to send again until
    /// it is [`reset`](Push::reset) or retried via [`resend`](Push::resend).
    pub async fn send(&mut self) {
        {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            if inner
                .received
                .as_ref()
                .is_some_and(PushResponse::is_timeout)
            {
                warn!(event = %self.event, "push already timed out; reset before sending again");
                return;
            }
            inner.sent = true;
            // force a clean waiter registration for this send
            inner.listener_bound = false;
        }

        self.start_timeout();

        let (push_ref, _) = self.correlate();
        let message = Message {
            topic: Some(self.channel.topic().to_owned()),
            event: self.event.clone(),
            payload: (self.payload)(),
            reference: Some(push_ref),
            join_ref: self.channel.join_ref(),
        };
        if let Err(error) = self.channel.socket().send_message(message).await {
            self.attempt().fail(error);
        }
    }

    /// Resets the push and sends it again under a fresh correlation identity.
    ///
    /// `timeout` replaces the configured timeout when provided.
    pub async fn resend(&mut self, timeout: Option<Duration>) {
        if let Some(timeout) = timeout {
            self.timeout = timeout;
        }
        self.reset();
        self.send().await;
    }

    /// Cancels the current attempt's timeout timer, if armed.
    pub fn cancel_timeout(&mut self) {
        let timer = self.inner.lock().unwrap().timer.take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    /// Removes this push's reply waiters from the channel.
    pub fn clear_waiters(&mut self) {
        let reply_event = self
            .inner
            .lock()
            .unwrap()
            .correlation
            .as_ref()
            .map(|correlation| correlation.reply_event.clone());
        if let Some(reply_event) = reply_event {
            self.channel.remove_waiters(&reply_event);
        }
    }

    /// Discards the current attempt: timer, waiter, identity, received
    /// response and awaitable.
    ///
    /// Callbacks registered through [`on_reply`](Push::on_reply) survive the
    /// reset and serve the next attempt. Outstanding [`PendingReply`] clones
    /// resolve to [`ReplyError::Abandoned`](crate::ReplyError::Abandoned).
    pub fn reset(&mut self) {
        self.disarm();
        let mut inner = self.inner.lock().unwrap();
        inner.received = None;
        inner.sent = false;
        inner.listener_bound = false;
        inner.result = None;
        debug!(event = %self.event, "push reset");
    }

    /// Invalidates the current attempt: bumps the generation, cancels its
    /// tasks and detaches its waiters. Other state is left to the caller.
    fn disarm(&self) {
        let (timer, listener, reply_event) = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            inner.attempt += 1;
            (
                inner.timer.take(),
                inner.listener.take(),
                inner
                    .correlation
                    .take()
                    .map(|correlation| correlation.reply_event),
            )
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(listener) = listener {
            listener.abort();
        }
        if let Some(reply_event) = reply_event {
            self.channel.remove_waiters(&reply_event);
        }
    }

    /// Returns the cached correlation identity, binding it on first use.
    fn correlate(&self) -> (Ref, Event) {
        {
            let inner = self.inner.lock().unwrap();
            if let Some(correlation) = &inner.correlation {
                return (
                    correlation.push_ref.clone(),
                    correlation.reply_event.clone(),
                );
            }
        }
        // allocate outside the lock; the socket is a collaborator
        let push_ref = self.channel.socket().next_ref();
        let reply_event = Event::reply_for(&push_ref);
        let mut inner = self.inner.lock().unwrap();
        let correlation = inner.correlation.get_or_insert(Correlation {
            push_ref,
            reply_event,
        });
        (
            correlation.push_ref.clone(),
            correlation.reply_event.clone(),
        )
    }

    fn attempt(&self) -> Attempt<C> {
        Attempt {
            channel: Arc::clone(&self.channel),
            state: Arc::clone(&self.inner),
            generation: self.inner.lock().unwrap().attempt,
        }
    }
}

impl<C: Channel> fmt::Debug for Push<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Push")
            .field("event", &self.event)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<C: Channel> Drop for Push<C> {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Handle a timer or listener task uses to resolve the attempt it was
/// spawned for. Carries the generation it belongs to; stale generations are
/// dropped at the lock.
struct Attempt<C: Channel> {
    channel: Arc<C>,
    state: Arc<Mutex<Inner>>,
    generation: u64,
}

impl<C: Channel> Attempt<C> {
    /// Resolution for an inbound message: cancel the timer, decode the
    /// payload and dispatch it.
    fn receive(&self, message: Message) {
        let response = PushResponse::from_payload(&message.payload);
        let (timer, matched, reply_event) = {
            let mut guard = self.state.lock().unwrap();
            let inner = &mut *guard;
            if inner.attempt != self.generation {
                return;
            }
            let Some(correlation) = &inner.correlation else {
                return;
            };
            if correlation.reply_event != message.event {
                // a broader waiter may hand us unrelated events
                return;
            }
            let reply_event = correlation.reply_event.clone();
            let timer = inner.timer.take();
            inner.received = Some(response.clone());
            if let Some(result) = &mut inner.result {
                if !result.settle(Ok(response.clone())) {
                    warn!(
                        event = %reply_event,
                        status = %response.status,
                        "push resolved more than once"
                    );
                }
            }
            let matched = inner.callbacks.remove(&response.status).unwrap_or_default();
            inner.callbacks.clear();
            (timer, matched, reply_event)
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        for callback in matched {
            callback(&response);
        }
        self.channel.remove_waiters(&reply_event);
    }

    /// Resolution for a transport failure: the awaitable fails, callbacks
    /// are bypassed.
    fn fail(&self, error: SocketError) {
        let timer = {
            let mut guard = self.state.lock().unwrap();
            let inner = &mut *guard;
            if inner.attempt != self.generation {
                return;
            }
            let timer = inner.timer.take();
            match &mut inner.result {
                Some(result) => {
                    if !result.settle(Err(ReplyError::Socket(error.clone()))) {
                        warn!(%error, "push resolved more than once");
                    }
                }
                None => {
                    // settle a fresh cell so a later reply() observes the failure
                    warn!(%error, "push failed before its reply was observed");
                    let mut result = ResultCell::new();
                    result.settle(Err(ReplyError::Socket(error.clone())));
                    inner.result = Some(result);
                }
            }
            timer
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    /// Timer fire: inject a synthetic timeout reply through the channel so
    /// every waiter on the reply event observes the same outcome.
    fn expire(&self, push_ref: Ref, timeout: Duration) {
        {
            let mut inner = self.state.lock().unwrap();
            if inner.attempt != self.generation {
                return;
            }
            inner.timer = None;
        }
        warn!(
            topic = %self.channel.topic(),
            push_ref = %push_ref,
            timeout = ?timeout,
            "push timed out waiting for a reply"
        );
        self.channel.trigger(Message::reply_timeout(&push_ref));
    }
}
