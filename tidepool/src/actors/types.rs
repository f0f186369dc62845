//! Core actor value types.
//!
//! These types form the messaging contract between callers, the router and
//! actors. The transport never sees a live actor: [`ActorMessageInfo`] is
//! the in-process envelope (it carries a sender handle and a reply slot),
//! while [`ActorRpcMessageInfo`] is its wire-safe projection.
//!
//! # Identity layout
//!
//! An [`ActorId`] is a fixed four-segment identifier:
//!
//! ```text
//! ┌────────────┬────────────┬──────────────┬─────────────────────────┐
//! │ ActorType  │ instance   │ token        │ node                    │
//! │ u64        │ u64        │ u64 (random) │ IPv4 (32) + port (16)   │
//! └────────────┴────────────┴──────────────┴─────────────────────────┘
//! ```
//!
//! The node segment is what makes routing possible without a directory
//! lookup: [`ActorId::node_id`] recovers the `"ip:port"` of the node that
//! registered the actor.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::actor::Actor;
use super::error::{ActorError, IdentityError};

/// Identifies an actor CATEGORY, e.g. room managers or player sessions.
///
/// # Convention
///
/// Use a hex constant, one per actor category:
/// ```rust
/// use tidepool::actors::ActorType;
/// const ROOM_MANAGER: ActorType = ActorType(0x5200_4D47);
/// ```
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Debug, Default)]
pub struct ActorType(pub u64);

/// The node part of an [`ActorId`]: an IPv4 address and port packed into
/// the low 48 bits of a `u64`.
///
/// The zero value means "no node" and renders as an empty string.
#[derive(
    Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Debug, Default,
)]
pub struct NodeSegment(u64);

impl NodeSegment {
    /// The empty node segment carried by ids that were never registered.
    pub const NONE: NodeSegment = NodeSegment(0);

    /// Encode a node id of the form `"a.b.c.d:port"`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidNodeAddress`] when the string is not
    /// an IPv4 socket address, or when it would encode to the empty segment
    /// (`0.0.0.0:0`).
    pub fn encode(node_id: &str) -> Result<Self, IdentityError> {
        let addr: SocketAddrV4 =
            node_id
                .trim()
                .parse()
                .map_err(|_| IdentityError::InvalidNodeAddress {
                    node_id: node_id.to_string(),
                })?;
        let packed = (u64::from(u32::from(*addr.ip())) << 16) | u64::from(addr.port());
        if packed == 0 {
            return Err(IdentityError::InvalidNodeAddress {
                node_id: node_id.to_string(),
            });
        }
        Ok(Self(packed))
    }

    /// Whether this is the empty segment.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Raw packed value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return Ok(());
        }
        let ip = Ipv4Addr::from((self.0 >> 16) as u32);
        let port = (self.0 & 0xFFFF) as u16;
        write!(f, "{ip}:{port}")
    }
}

/// Composite actor identifier.
///
/// Ids are minted when an actor is created ([`ActorId::new`]) and finalized
/// when the local proxy registers the actor, which draws a fresh uniqueness
/// token and stamps the local node segment. Two ids address the same actor
/// iff their canonical strings ([`ActorId::canonical`]) are equal.
///
/// The all-zero value ([`ActorId::default`]) stands for "no actor" and is
/// what crosses the wire when a message has no sender.
#[derive(Clone, Hash, Eq, PartialEq, Serialize, Deserialize, Debug, Default)]
pub struct ActorId {
    actor_type: ActorType,
    instance: u64,
    token: u64,
    node: NodeSegment,
}

impl ActorId {
    /// Create an unregistered id (no token, no node).
    pub fn new(actor_type: ActorType, instance: u64) -> Self {
        Self {
            actor_type,
            instance,
            token: 0,
            node: NodeSegment::NONE,
        }
    }

    /// The actor category.
    pub fn actor_type(&self) -> ActorType {
        self.actor_type
    }

    /// The instance segment.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// The uniqueness token (zero until registered).
    pub fn token(&self) -> u64 {
        self.token
    }

    /// The encoded node segment.
    pub fn node(&self) -> NodeSegment {
        self.node
    }

    /// The `"ip:port"` node id this actor lives on, or an empty string for
    /// ids that were never registered.
    pub fn node_id(&self) -> String {
        self.node.to_string()
    }

    /// Return a copy of this id carrying a freshly generated token.
    pub fn mint(&self) -> Self {
        let mut token = rand::random::<u64>();
        while token == 0 {
            token = rand::random::<u64>();
        }
        Self {
            token,
            ..self.clone()
        }
    }

    /// Return a copy of this id with the node segment rewritten.
    ///
    /// # Errors
    ///
    /// Fails when `node_id` cannot be encoded into the node segment.
    pub fn set_node_id(&self, node_id: &str) -> Result<Self, IdentityError> {
        let node = NodeSegment::encode(node_id)?;
        Ok(Self {
            node,
            ..self.clone()
        })
    }

    /// Whether this is the zero id ("no actor").
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// The canonical registry key.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{:x}.{:x}.{:016x}",
            self.node, self.actor_type.0, self.instance, self.token
        )
    }
}

/// A message addressed to an actor: the handler name plus positional
/// arguments.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ActorMessage {
    /// Name of the handler to invoke on the target actor.
    pub service: String,
    /// Positional arguments.
    pub data: Vec<Value>,
}

impl ActorMessage {
    /// Create a message for the given handler.
    pub fn new(service: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            service: service.into(),
            data,
        }
    }

    /// Decode the positional argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, ActorError> {
        decode_value(&self.data, index)
    }
}

/// Positional reply values written by the handling actor.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ActorReply(pub Vec<Value>);

impl ActorReply {
    /// Append a value to the reply.
    pub fn push<T: Serialize>(&mut self, value: T) -> Result<(), ActorError> {
        let value = serde_json::to_value(value).map_err(|e| ActorError::Handler(e.to_string()))?;
        self.0.push(value);
        Ok(())
    }

    /// Decode the value at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, ActorError> {
        decode_value(&self.0, index)
    }

    /// Number of reply values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn decode_value<T: DeserializeOwned>(values: &[Value], index: usize) -> Result<T, ActorError> {
    let value = values
        .get(index)
        .ok_or(ActorError::MissingValue { index })?;
    serde_json::from_value(value.clone()).map_err(|e| ActorError::Handler(e.to_string()))
}

/// In-process message envelope.
///
/// Only ever used inside one process: `sender` is a live handle and `reply`
/// is written by the handling actor before `tell` returns.
#[derive(Debug, Default)]
pub struct ActorMessageInfo {
    /// Sending actor, if any.
    pub sender: Option<Arc<dyn Actor>>,
    /// The message itself.
    pub message: ActorMessage,
    /// Reply slot.
    pub reply: ActorReply,
}

impl ActorMessageInfo {
    /// Create an envelope with an empty reply slot.
    pub fn new(sender: Option<Arc<dyn Actor>>, message: ActorMessage) -> Self {
        Self {
            sender,
            message,
            reply: ActorReply::default(),
        }
    }

    /// Replace the reply slot with a single value.
    pub fn reply_with<T: Serialize>(&mut self, value: T) -> Result<(), ActorError> {
        self.reply = ActorReply::default();
        self.reply.push(value)
    }
}

/// Wire-safe projection of [`ActorMessageInfo`].
///
/// The sender is reduced to its bare id (zero when absent); no live
/// reference ever crosses a node boundary.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ActorRpcMessageInfo {
    /// The target actor.
    pub target: ActorId,
    /// The sender id, or [`ActorId::default`] when there is none.
    pub sender: ActorId,
    /// The message.
    pub message: ActorMessage,
}
