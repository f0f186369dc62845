//! Named, cluster-discoverable actor handles.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::codec::{JsonCodec, MessageCodec};

use super::actor::Actor;
use super::error::ActorError;
use super::proxy::ActorProxy;
use super::types::{ActorMessage, ActorMessageInfo, ActorReply};

/// A service name bound to exactly one actor.
///
/// The owner is either a local actor or a [`RemoteActor`](super::RemoteActor)
/// stub, so calling through a service is location transparent.
#[derive(Clone)]
pub struct ActorService {
    name: String,
    owner: Arc<dyn Actor>,
}

impl ActorService {
    /// Bind `name` to `owner`.
    pub fn new(owner: Arc<dyn Actor>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner,
        }
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The actor behind the service.
    pub fn owner(&self) -> &Arc<dyn Actor> {
        &self.owner
    }

    /// Send `message` to the owning actor and return its reply.
    pub async fn call(
        &self,
        sender: Option<Arc<dyn Actor>>,
        message: ActorMessage,
    ) -> Result<ActorReply, ActorError> {
        let mut info = ActorMessageInfo::new(sender, message);
        self.owner.tell(&mut info).await?;
        Ok(info.reply)
    }
}

impl fmt::Debug for ActorService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorService")
            .field("name", &self.name)
            .field("owner", &self.owner.id())
            .finish()
    }
}

/// Calls actor services by name on behalf of a non-actor caller, such as a
/// client session at the gateway.
///
/// ```rust,ignore
/// let caller = ActorServiceCaller::new(proxy.clone(), None);
/// let reply = caller.call("room", "room-manager", "NewRoom", vec![json!(session_id)]).await?;
/// let room_id: u64 = reply.get(0)?;
/// ```
pub struct ActorServiceCaller<C: MessageCodec = JsonCodec> {
    proxy: Arc<ActorProxy<C>>,
    sender: Option<Arc<dyn Actor>>,
}

impl<C: MessageCodec> ActorServiceCaller<C> {
    /// Create a caller; `sender` is reported to the target actors.
    pub fn new(proxy: Arc<ActorProxy<C>>, sender: Option<Arc<dyn Actor>>) -> Self {
        Self { proxy, sender }
    }

    /// Resolve `service` (locally first, then on a node with `role`) and
    /// send it a `message_service` message carrying `args`.
    pub async fn call(
        &self,
        role: &str,
        service: &str,
        message_service: &str,
        args: Vec<Value>,
    ) -> Result<ActorReply, ActorError> {
        let target = self.proxy.get_actor_service(role, service).await?;
        target
            .call(self.sender.clone(), ActorMessage::new(message_service, args))
            .await
    }
}
