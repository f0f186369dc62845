//! RPC façade a node publishes so that peers can reach its actors.

use std::sync::{Arc, Weak};

use crate::cluster::{RpcService, TransportError};
use crate::codec::{JsonCodec, MessageCodec};

use super::actor::{Actor, RemoteActor};
use super::error::ActorError;
use super::proxy::ActorProxy;
use super::types::{ActorId, ActorMessageInfo, ActorReply, ActorRpcMessageInfo};

/// Remote entry points into one node's [`ActorProxy`].
///
/// Holds a weak reference: the proxy owns the façade through the directory,
/// not the other way round.
pub struct ActorProxyService<C: MessageCodec = JsonCodec> {
    proxy: Weak<ActorProxy<C>>,
    codec: C,
}

impl<C: MessageCodec> ActorProxyService<C> {
    /// Service name published through the directory.
    pub const NAME: &'static str = "ActorProxyService";
    /// Full method name of the service lookup.
    pub const SERVICE_INQUIRY: &'static str = "ActorProxyService.ServiceInquiry";
    /// Full method name of remote delivery.
    pub const TELL: &'static str = "ActorProxyService.Tell";

    /// Create a façade over `proxy`.
    pub fn new(proxy: Weak<ActorProxy<C>>, codec: C) -> Self {
        Self {
            proxy,
            codec,
        }
    }

    fn proxy(&self) -> Result<Arc<ActorProxy<C>>, ActorError> {
        self.proxy.upgrade().ok_or_else(|| {
            ActorError::Transport(TransportError::ServiceNotFound {
                service: Self::NAME.to_string(),
                address: String::new(),
            })
        })
    }

    /// Resolve a service bound on this node to the id of its owner.
    pub fn service_inquiry(&self, name: &str) -> Result<ActorId, ActorError> {
        let service = self.proxy()?.get_local_actor_service(name)?;
        Ok(service.owner().id())
    }

    /// Deliver a message that arrived from a peer.
    ///
    /// A zero sender id becomes "no sender"; any other id is rehydrated as a
    /// [`RemoteActor`] stub so the target can reply or tell it back.
    pub async fn tell(&self, request: ActorRpcMessageInfo) -> Result<ActorReply, ActorError> {
        let proxy = self.proxy()?;
        let sender: Option<Arc<dyn Actor>> = if request.sender.is_zero() {
            None
        } else {
            Some(Arc::new(RemoteActor::new(request.sender, Arc::clone(&proxy))))
        };
        let mut info = ActorMessageInfo::new(sender, request.message);
        proxy.local_tell(&request.target, &mut info).await?;
        Ok(info.reply)
    }
}

#[async_trait::async_trait]
impl<C: MessageCodec> RpcService for ActorProxyService<C> {
    fn service_name(&self) -> &'static str {
        Self::NAME
    }

    async fn dispatch(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        match method {
            "ServiceInquiry" => {
                let name: String = self.codec.decode(payload)?;
                let id = self.service_inquiry(&name).map_err(into_remote)?;
                Ok(self.codec.encode(&id)?)
            }
            "Tell" => {
                let request: ActorRpcMessageInfo = self.codec.decode(payload)?;
                let reply = self.tell(request).await.map_err(into_remote)?;
                Ok(self.codec.encode(&reply)?)
            }
            other => Err(TransportError::MethodNotFound {
                method: format!("{}.{}", Self::NAME, other),
            }),
        }
    }
}

fn into_remote(err: ActorError) -> TransportError {
    tracing::debug!(error = %err, "actor proxy call failed");
    TransportError::Remote(err.to_string())
}
