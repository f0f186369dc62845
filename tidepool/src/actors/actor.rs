//! The actor capability and its two variants.
//!
//! Anything implementing [`Actor`] can be registered with the proxy,
//! bound to a service name, or used as a message sender:
//!
//! - [`LocalActor`] has real behavior: message handlers keyed by message
//!   service name. Handlers run concurrently and guard their own state.
//! - [`RemoteActor`] is a stub for an actor on another node; telling it
//!   routes through [`ActorProxy::emit`](super::ActorProxy::emit).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::codec::{JsonCodec, MessageCodec};

use super::error::ActorError;
use super::proxy::ActorProxy;
use super::types::{ActorId, ActorMessageInfo, ActorType};

/// An addressable actor.
#[async_trait::async_trait]
pub trait Actor: Send + Sync + fmt::Debug {
    /// Current identifier.
    fn id(&self) -> ActorId;

    /// Deliver a message. Implementations write their reply into
    /// `info.reply` before returning.
    async fn tell(&self, info: &mut ActorMessageInfo) -> Result<(), ActorError>;

    /// Adopt the identifier the proxy minted during registration.
    ///
    /// Stubs keep their id; only actors the local proxy owns need to
    /// override this.
    fn rebind(&self, _id: ActorId) {}
}

/// Handles one kind of message on a [`LocalActor`].
///
/// # Example
///
/// ```rust,ignore
/// struct NewRoom { next: AtomicU64 }
///
/// #[async_trait::async_trait]
/// impl MessageHandler for NewRoom {
///     async fn handle(&self, info: &mut ActorMessageInfo) -> Result<(), ActorError> {
///         let room = self.next.fetch_add(1, Ordering::Relaxed) + 1;
///         info.reply_with(room)
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a message, writing any reply into `info.reply`.
    async fn handle(&self, info: &mut ActorMessageInfo) -> Result<(), ActorError>;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&mut ActorMessageInfo) -> Result<(), ActorError> + Send + Sync,
{
    async fn handle(&self, info: &mut ActorMessageInfo) -> Result<(), ActorError> {
        (self.0)(info)
    }
}

/// An actor whose behavior is a table of message handlers.
///
/// `tell` never waits on the actor itself, so a handler may be re-entered
/// while it is still running, for example when a peer it called replies to
/// the sender. Handlers that keep mutable state guard it themselves.
pub struct LocalActor {
    id: RwLock<ActorId>,
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl LocalActor {
    /// Create an actor with no handlers.
    pub fn new(actor_type: ActorType, instance: u64) -> Self {
        Self {
            id: RwLock::new(ActorId::new(actor_type, instance)),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Install the handler for messages named `service`, replacing any
    /// previous one.
    pub fn add_handler(&self, service: impl Into<String>, handler: impl MessageHandler + 'static) {
        self.handlers.write().insert(service.into(), Arc::new(handler));
    }

    /// Install a synchronous closure as a handler.
    pub fn add_handler_fn<F>(&self, service: impl Into<String>, handler: F)
    where
        F: Fn(&mut ActorMessageInfo) -> Result<(), ActorError> + Send + Sync + 'static,
    {
        self.add_handler(service, FnHandler(handler));
    }

    /// Remove the handler for `service`.
    pub fn remove_handler(&self, service: &str) {
        self.handlers.write().remove(service);
    }

    fn handler(&self, service: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.read().get(service).cloned()
    }
}

impl fmt::Debug for LocalActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut services: Vec<String> = self.handlers.read().keys().cloned().collect();
        services.sort();
        f.debug_struct("LocalActor")
            .field("id", &*self.id.read())
            .field("handlers", &services)
            .finish()
    }
}

#[async_trait::async_trait]
impl Actor for LocalActor {
    fn id(&self) -> ActorId {
        self.id.read().clone()
    }

    async fn tell(&self, info: &mut ActorMessageInfo) -> Result<(), ActorError> {
        let handler = self
            .handler(&info.message.service)
            .ok_or_else(|| ActorError::UnknownMessage(info.message.service.clone()))?;
        handler.handle(info).await
    }

    fn rebind(&self, id: ActorId) {
        *self.id.write() = id;
    }
}

/// Stub standing in for an actor hosted on another node.
pub struct RemoteActor<C: MessageCodec = JsonCodec> {
    id: ActorId,
    proxy: Arc<ActorProxy<C>>,
}

impl<C: MessageCodec> RemoteActor<C> {
    /// Create a stub that routes through `proxy`.
    pub fn new(id: ActorId, proxy: Arc<ActorProxy<C>>) -> Self {
        Self { id, proxy }
    }
}

impl<C: MessageCodec> fmt::Debug for RemoteActor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteActor")
            .field("id", &self.id)
            .field("via", &self.proxy.node_id())
            .finish()
    }
}

#[async_trait::async_trait]
impl<C: MessageCodec> Actor for RemoteActor<C> {
    fn id(&self) -> ActorId {
        self.id.clone()
    }

    async fn tell(&self, info: &mut ActorMessageInfo) -> Result<(), ActorError> {
        self.proxy.emit(&self.id, info).await
    }
}
