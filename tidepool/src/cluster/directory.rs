//! Cluster directory: the collaborator that maps node ids and roles to
//! transport clients.
//!
//! The actor proxy and the membership agent never open sockets themselves.
//! They consume three traits:
//!
//! - [`ClusterDirectory`] publishes RPC services, resolves clients by node
//!   id or role, dials the master, and owns the node's online flag.
//! - [`NodeClient`] is one client handle able to make byte-level calls.
//! - [`RpcService`] is what a node publishes so peers can reach it.
//!
//! Methods are addressed as `"Service.Method"`; the directory routes on the
//! service half, the service dispatches on the method half.
//!
//! [`LocalNetwork`](super::LocalNetwork) is the in-process implementation.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{CodecError, MessageCodec};

/// Errors raised by the directory or the transport behind it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No client is known for this node id.
    #[error("no client for node {node_id}")]
    NodeNotFound {
        /// The node id that was looked up.
        node_id: String,
    },

    /// No node with this role is known.
    #[error("no node with role {role}")]
    RoleNotFound {
        /// The role that was looked up.
        role: String,
    },

    /// Dialing a node failed.
    #[error("failed to connect to {address}: {reason}")]
    ConnectFailed {
        /// The address that was dialed.
        address: String,
        /// Why it failed.
        reason: String,
    },

    /// The connection behind a client is closed.
    #[error("connection to {address} is closed")]
    ConnectionClosed {
        /// Remote address of the closed connection.
        address: String,
    },

    /// The remote node does not publish this service.
    #[error("service {service} not published on {address}")]
    ServiceNotFound {
        /// The service half of the method name.
        service: String,
        /// Remote address.
        address: String,
    },

    /// The remote service has no such method.
    #[error("unknown method {method}")]
    MethodNotFound {
        /// Full method name.
        method: String,
    },

    /// The remote side ran the call and returned an application error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Payload encoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Events reported by the transport for a dialed connection.
///
/// Callbacks receiving these may run on any thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection closed.
    Close,
    /// The transport reported an error without closing.
    Error(String),
}

impl ConnectionEvent {
    /// Transport event name (`"close"`, `"error"`).
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Close => "close",
            ConnectionEvent::Error(_) => "error",
        }
    }
}

/// Callback invoked by the transport on connection events.
pub type EventCallback = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// A client handle to one remote node.
#[async_trait::async_trait]
pub trait NodeClient: Send + Sync + fmt::Debug {
    /// Local socket address of the underlying connection (`"ip:port"`).
    fn local_addr(&self) -> String;

    /// Address of the remote node.
    fn remote_addr(&self) -> String;

    /// Invoke `method` (`"Service.Method"`) with an encoded payload.
    async fn call(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError>;
}

/// An RPC-callable object a node publishes for its peers.
#[async_trait::async_trait]
pub trait RpcService: Send + Sync {
    /// Service half of the method names this object serves.
    fn service_name(&self) -> &'static str;

    /// Handle `method` (the part after the dot) with an encoded payload.
    async fn dispatch(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// The directory a node uses to reach the rest of the cluster.
#[async_trait::async_trait]
pub trait ClusterDirectory: Send + Sync + fmt::Debug {
    /// Publish an RPC service so peers can call it.
    fn register(&self, service: Arc<dyn RpcService>) -> Result<(), TransportError>;

    /// Client for the node with this id.
    async fn node_client(&self, node_id: &str) -> Result<Arc<dyn NodeClient>, TransportError>;

    /// Client for some node carrying this role.
    async fn node_client_by_role(&self, role: &str) -> Result<Arc<dyn NodeClient>, TransportError>;

    /// Dial `address`, reporting later connection events to `on_event`.
    async fn connect_to_node(
        &self,
        address: &str,
        on_event: EventCallback,
    ) -> Result<Arc<dyn NodeClient>, TransportError>;

    /// Mark this node online or offline.
    fn set_online(&self, online: bool);

    /// Whether this node is currently connected to the master.
    fn is_online(&self) -> bool;
}

/// Encode `request`, call `method` on `client`, and decode the response.
pub async fn call_typed<C, Req, Resp>(
    client: &dyn NodeClient,
    codec: &C,
    method: &str,
    request: &Req,
) -> Result<Resp, TransportError>
where
    C: MessageCodec,
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let payload = codec.encode(request)?;
    let response = client.call(method, payload).await?;
    Ok(codec.decode(&response)?)
}

/// Split `"Service.Method"` into its halves.
pub fn split_method(method: &str) -> Option<(&str, &str)> {
    method
        .split_once('.')
        .filter(|(service, name)| !service.is_empty() && !name.is_empty())
}
