//! Actor identity, registry and routing.
//!
//! - [`types`]: [`ActorId`] and the message envelopes
//! - [`actor`]: the [`Actor`] trait, [`LocalActor`] and [`RemoteActor`]
//! - [`proxy`]: [`ActorProxy`], the per-node registry and router
//! - [`rpc`]: [`ActorProxyService`], the façade peers call
//! - [`service`]: named services and [`ActorServiceCaller`]

pub mod actor;
pub mod error;
pub mod proxy;
pub mod rpc;
pub mod service;
pub mod types;

pub use actor::{Actor, LocalActor, MessageHandler, RemoteActor};
pub use error::{ActorError, IdentityError};
pub use proxy::ActorProxy;
pub use rpc::ActorProxyService;
pub use service::{ActorService, ActorServiceCaller};
pub use types::{
    ActorId, ActorMessage, ActorMessageInfo, ActorReply, ActorRpcMessageInfo, ActorType,
    NodeSegment,
};
