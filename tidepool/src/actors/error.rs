//! Errors returned by the actor layer.
//!
//! Every registry, router and façade operation returns these synchronously
//! so the caller can branch on them; none of them is ever retried here.

use crate::cluster::TransportError;

/// Failure to encode a node id into an [`ActorId`](super::ActorId).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The node id is not an `"ip:port"` IPv4 socket address.
    #[error("cannot encode node id {node_id:?} into an actor id")]
    InvalidNodeAddress {
        /// The offending node id.
        node_id: String,
    },
}

/// Errors from actor registry, routing and service operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    /// No local actor is registered under the target id.
    #[error("no such actor: {id}")]
    ActorNotFound {
        /// Canonical id of the missing actor.
        id: String,
    },

    /// No service with this name is registered on the proxy.
    #[error("no such service: {name}")]
    ServiceNotFound {
        /// The service name.
        name: String,
    },

    /// A service with this name is already registered on the proxy.
    #[error("service {name} is already registered")]
    ServiceConflict {
        /// The service name.
        name: String,
    },

    /// A remote service lookup was requested without a role.
    #[error("service {name} is not local and no role was given")]
    MissingRole {
        /// The service name.
        name: String,
    },

    /// The actor id could not be stamped with the local node.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Directory resolution or RPC failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The target actor has no handler for the message.
    #[error("unknown message: {0}")]
    UnknownMessage(String),

    /// A message argument or reply value is missing.
    #[error("missing value at position {index}")]
    MissingValue {
        /// Position that was requested.
        index: usize,
    },

    /// The actor's handler failed.
    #[error("handler error: {0}")]
    Handler(String),
}

impl ActorError {
    /// Whether this is one of the NotFound kinds (actor or service).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ActorError::ActorNotFound { .. } | ActorError::ServiceNotFound { .. }
        )
    }
}
