//! The wire vocabulary shared with the channel and socket collaborators.
//!
//! A [`Message`] is one frame in either direction. Outbound pushes carry a
//! [`Ref`] allocated by the socket; the reply to that push comes back tagged
//! with the [`Event`] derived from the same reference, which is how a reply is
//! demultiplexed to the push that caused it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// An opaque message reference, unique per connection.
///
/// Allocated monotonically by the socket so that concurrent pushes never share
/// a correlation identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ref(String);

impl Ref {
    /// Creates a reference from its wire representation.
    pub fn new(reference: impl Into<String>) -> Self {
        Ref(reference.into())
    }

    /// The wire representation of the reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A channel event name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(String);

impl Event {
    /// Creates an event from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Event(name.into())
    }

    /// The reply event for the push identified by `reference`.
    ///
    /// Pure derivation; the push listening for `Event::reply_for(&r)` is the
    /// one that sent the message carrying reference `r`.
    pub fn reply_for(reference: &Ref) -> Self {
        Event(format!("chan_reply_{reference}"))
    }

    /// The event name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Event(name.to_owned())
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Event(name)
    }
}

/// One message exchanged with the remote peer.
///
/// Outbound pushes populate every field; inbound replies only need `event`
/// and `payload` to be routed and decoded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Topic of the channel the message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Event name.
    pub event: Event,
    /// Event payload; replies decode it as `{status, response}`.
    #[serde(default)]
    pub payload: Value,
    /// Reference correlating a push with its reply.
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<Ref>,
    /// Reference of the join push that opened the channel.
    #[serde(rename = "join_ref", skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<Ref>,
}

impl Message {
    /// The synthetic reply injected locally when a push times out.
    ///
    /// Delivered through the channel's regular trigger path so every waiter on
    /// the reply event observes the same outcome as a real reply.
    pub fn reply_timeout(reference: &Ref) -> Self {
        Message {
            topic: None,
            event: Event::reply_for(reference),
            payload: json!({ "status": "timeout", "response": {} }),
            reference: Some(reference.clone()),
            join_ref: None,
        }
    }
}
