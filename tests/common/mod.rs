//! Shared scaffolding: an in-memory socket and channel pair that records
//! outbound traffic and lets tests script replies and failures.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use pushwire::{Channel, Event, Message, Ref, ReplyWaiter, ReplyWaiters, Socket, SocketError};
use serde_json::Value;

/// Socket double: hands out sequential references and records every message
/// it accepts. Failures can be scripted one send at a time.
#[derive(Debug, Default)]
pub struct TestSocket {
    refs: AtomicU64,
    sent: Mutex<Vec<Message>>,
    failures: Mutex<VecDeque<SocketError>>,
}

impl TestSocket {
    /// Scripts the next send to fail with an io error carrying `message`.
    pub fn fail_next_send(&self, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push_back(SocketError::new(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                message.to_owned(),
            )));
    }

    /// Every message accepted so far, in send order.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

impl Socket for TestSocket {
    fn next_ref(&self) -> Ref {
        Ref::new((self.refs.fetch_add(1, Ordering::Relaxed) + 1).to_string())
    }

    async fn send_message(&self, message: Message) -> Result<(), SocketError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Channel double bound to a [`TestSocket`]: waiters live in a real
/// [`ReplyWaiters`] table and every triggered message is logged.
#[derive(Debug)]
pub struct TestChannel {
    topic: String,
    join_ref: Option<Ref>,
    socket: TestSocket,
    waiters: ReplyWaiters,
    triggered: Mutex<Vec<Message>>,
}

impl TestChannel {
    pub fn new(topic: &str) -> Self {
        TestChannel {
            topic: topic.to_owned(),
            join_ref: None,
            socket: TestSocket::default(),
            waiters: ReplyWaiters::new(),
            triggered: Mutex::new(Vec::new()),
        }
    }

    pub fn with_join_ref(topic: &str, join_ref: Ref) -> Self {
        let mut channel = TestChannel::new(topic);
        channel.join_ref = Some(join_ref);
        channel
    }

    /// Delivers a server reply addressed to `push_ref`.
    pub fn deliver_reply(&self, push_ref: &Ref, status: &str, response: Value) {
        self.trigger(Message {
            topic: Some(self.topic.clone()),
            event: Event::reply_for(push_ref),
            payload: serde_json::json!({ "status": status, "response": response }),
            reference: Some(push_ref.clone()),
            join_ref: None,
        });
    }

    /// Fails every registered waiter, as a dropped connection would.
    pub fn fail_connection(&self, error: SocketError) {
        self.waiters.fail_all(error);
    }

    /// Every message that went through [`Channel::trigger`], in order.
    pub fn triggered(&self) -> Vec<Message> {
        self.triggered.lock().unwrap().clone()
    }

    /// Number of waiters currently registered for `event`.
    pub fn waiting(&self, event: &Event) -> usize {
        self.waiters.waiting(event)
    }
}

impl Channel for TestChannel {
    type Socket = TestSocket;

    fn topic(&self) -> &str {
        &self.topic
    }

    fn join_ref(&self) -> Option<Ref> {
        self.join_ref.clone()
    }

    fn socket(&self) -> &TestSocket {
        &self.socket
    }

    fn on_push_reply(&self, event: &Event) -> ReplyWaiter {
        self.waiters.register(event)
    }

    fn remove_waiters(&self, event: &Event) {
        self.waiters.remove(event);
    }

    fn trigger(&self, message: Message) {
        self.triggered.lock().unwrap().push(message.clone());
        self.waiters.trigger(&message);
    }
}
