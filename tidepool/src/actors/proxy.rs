//! Actor proxy: per-node registries and the location-transparent router.
//!
//! One [`ActorProxy`] exists per node. It owns two concurrent maps:
//!
//! - local actors, keyed by canonical id
//! - services, keyed by name
//!
//! and a single outgoing entry point, [`ActorProxy::emit`], which delivers
//! locally when the target's node segment is this node and otherwise calls
//! the peer's [`ActorProxyService`](super::ActorProxyService).
//!
//! # Flow
//!
//! ```text
//! emit(target, info)
//!   ├─ target.node_id() == node_id ──► local_tell ──► actor.tell
//!   └─ otherwise ──► directory.node_client(node)
//!                      └─► "ActorProxyService.Tell"(ActorRpcMessageInfo)
//!                            └─► peer local_tell ──► reply copied back
//! ```
//!
//! Registries are `DashMap`s: concurrent lookups never serialize behind a
//! global lock, and there are no multi-key transactions.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::cluster::{call_typed, ClusterDirectory};
use crate::codec::{JsonCodec, MessageCodec};

use super::actor::{Actor, RemoteActor};
use super::error::ActorError;
use super::rpc::ActorProxyService;
use super::service::ActorService;
use super::types::{ActorId, ActorMessageInfo, ActorReply, ActorRpcMessageInfo, NodeSegment};

/// Per-node actor registry and message router.
pub struct ActorProxy<C: MessageCodec = JsonCodec> {
    node_id: String,
    local_actors: DashMap<String, Arc<dyn Actor>>,
    services: DashMap<String, ActorService>,
    directory: Arc<dyn ClusterDirectory>,
    codec: C,
}

impl ActorProxy {
    /// Create a proxy for `node_id` using the JSON codec.
    pub fn new(node_id: impl Into<String>, directory: Arc<dyn ClusterDirectory>) -> Self {
        Self::with_codec(node_id, directory, JsonCodec)
    }
}

impl<C: MessageCodec> ActorProxy<C> {
    /// Create a proxy for `node_id` with a custom wire codec.
    ///
    /// `node_id` is normalized to the rendering of its node segment when it
    /// encodes, so that it compares equal to ids stamped with it.
    pub fn with_codec(
        node_id: impl Into<String>,
        directory: Arc<dyn ClusterDirectory>,
        codec: C,
    ) -> Self {
        let node_id = node_id.into();
        let node_id = NodeSegment::encode(&node_id)
            .map(|node| node.to_string())
            .unwrap_or(node_id);
        Self {
            node_id,
            local_actors: DashMap::new(),
            services: DashMap::new(),
            directory,
            codec,
        }
    }

    /// Publish this proxy's RPC façade through the directory.
    pub fn initialize(self: &Arc<Self>) -> Result<(), ActorError> {
        tracing::info!(node_id = %self.node_id, "initializing actor proxy");
        let facade = ActorProxyService::new(Arc::downgrade(self), self.codec.clone());
        self.directory.register(Arc::new(facade))?;
        Ok(())
    }

    /// This node's id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether this node is currently connected to the master.
    pub fn is_online(&self) -> bool {
        self.directory.is_online()
    }

    /// Register `actor` as hosted on this node.
    ///
    /// Mints a fresh uniqueness token, stamps this node's segment, rebinds
    /// the actor to the new id and stores it. An actor registered here
    /// before loses its previous entry. On failure the actor is left
    /// untouched.
    pub fn register(&self, actor: Arc<dyn Actor>) -> Result<ActorId, ActorError> {
        let previous = actor.id();
        let id = previous.mint().set_node_id(&self.node_id)?;
        if previous.node_id() == self.node_id {
            self.local_actors.remove(&previous.canonical());
        }
        actor.rebind(id.clone());
        self.local_actors.insert(id.canonical(), actor);
        tracing::debug!(actor = %id, "registered local actor");
        Ok(id)
    }

    /// Remove `actor` by its current id. Absent actors are ignored.
    pub fn unregister(&self, actor: &dyn Actor) {
        if self.local_actors.remove(&actor.id().canonical()).is_some() {
            tracing::debug!(actor = %actor.id(), "unregistered local actor");
        }
    }

    /// Bind `name` to `actor` on this node.
    ///
    /// A name that is already bound is rejected and the existing binding
    /// is kept.
    pub fn register_service(
        &self,
        actor: Arc<dyn Actor>,
        name: impl Into<String>,
    ) -> Result<(), ActorError> {
        let name = name.into();
        match self.services.entry(name.clone()) {
            Entry::Occupied(_) => Err(ActorError::ServiceConflict { name }),
            Entry::Vacant(slot) => {
                slot.insert(ActorService::new(actor, name));
                Ok(())
            }
        }
    }

    /// Remove the service binding for `name`, if any.
    pub fn unregister_service(&self, name: &str) {
        self.services.remove(name);
    }

    /// Look up a service bound on this node.
    pub fn get_local_actor_service(&self, name: &str) -> Result<ActorService, ActorError> {
        self.services
            .get(name)
            .map(|service| service.value().clone())
            .ok_or_else(|| ActorError::ServiceNotFound {
                name: name.to_string(),
            })
    }

    /// Look up a service, preferring the local binding.
    ///
    /// On a local miss, asks a node carrying `role` for the service and
    /// wraps the returned id in a [`RemoteActor`] stub. An empty role means
    /// no remote lookup is possible. Directory and transport failures are
    /// returned as they are.
    pub async fn get_actor_service(
        self: &Arc<Self>,
        role: &str,
        name: &str,
    ) -> Result<ActorService, ActorError> {
        if let Ok(service) = self.get_local_actor_service(name) {
            return Ok(service);
        }
        if role.is_empty() {
            return Err(ActorError::MissingRole {
                name: name.to_string(),
            });
        }

        let client = self.directory.node_client_by_role(role).await?;
        let id: ActorId = call_typed(
            client.as_ref(),
            &self.codec,
            ActorProxyService::<C>::SERVICE_INQUIRY,
            &name,
        )
        .await?;
        tracing::debug!(service = name, role, actor = %id, "resolved remote service");

        let stub: Arc<dyn Actor> = Arc::new(RemoteActor::new(id, Arc::clone(self)));
        Ok(ActorService::new(stub, name))
    }

    /// Deliver to an actor registered on this node.
    pub async fn local_tell(
        &self,
        target: &ActorId,
        info: &mut ActorMessageInfo,
    ) -> Result<(), ActorError> {
        let actor = self
            .local_actors
            .get(&target.canonical())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ActorError::ActorNotFound {
                id: target.canonical(),
            })?;
        actor.tell(info).await
    }

    /// Send a message to `target`, wherever it lives.
    ///
    /// Local targets are delivered without touching the network. Remote
    /// targets receive only the sender's id; the remote reply is copied into
    /// `info.reply`. All errors propagate to the caller.
    pub async fn emit(&self, target: &ActorId, info: &mut ActorMessageInfo) -> Result<(), ActorError> {
        let sender = info
            .sender
            .as_ref()
            .map(|sender| sender.id().canonical())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::debug!(
            sender = %sender,
            message = %info.message.service,
            target = %target,
            "emit"
        );

        let node_id = target.node_id();
        if node_id == self.node_id {
            return self.local_tell(target, info).await;
        }

        let client = self.directory.node_client(&node_id).await?;
        let wire = ActorRpcMessageInfo {
            target: target.clone(),
            sender: info
                .sender
                .as_ref()
                .map(|sender| sender.id())
                .unwrap_or_default(),
            message: info.message.clone(),
        };
        let reply: ActorReply = call_typed(
            client.as_ref(),
            &self.codec,
            ActorProxyService::<C>::TELL,
            &wire,
        )
        .await?;
        info.reply = reply;
        Ok(())
    }

    /// Number of registered local actors.
    pub fn actor_count(&self) -> usize {
        self.local_actors.len()
    }

    /// Number of registered services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Drop every local actor and service binding.
    pub fn clear(&self) {
        let actors = self.local_actors.len();
        let services = self.services.len();
        self.local_actors.clear();
        self.services.clear();
        tracing::debug!(actors, services, "cleared actor registries");
    }
}

impl<C: MessageCodec> std::fmt::Debug for ActorProxy<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorProxy")
            .field("node_id", &self.node_id)
            .field("actors", &self.local_actors.len())
            .field("services", &self.services.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::actors::{ActorMessage, ActorType, IdentityError, LocalActor};
    use crate::cluster::{LocalNetwork, TransportError};

    const ECHO: ActorType = ActorType(0xEC40);
    const NODE_A: &str = "127.0.0.1:6001";

    fn proxy(network: &Arc<LocalNetwork>, address: &str, role: &str) -> Arc<ActorProxy> {
        let directory = network.join(address, role);
        let proxy = Arc::new(ActorProxy::new(address, directory));
        proxy.initialize().expect("initialize");
        proxy
    }

    fn echo_actor(instance: u64) -> Arc<LocalActor> {
        let actor = Arc::new(LocalActor::new(ECHO, instance));
        actor.add_handler_fn("Echo", |info: &mut ActorMessageInfo| {
            let text: String = info.message.arg(0)?;
            info.reply_with(text)
        });
        actor
    }

    fn echo(text: &str) -> ActorMessageInfo {
        ActorMessageInfo::new(None, ActorMessage::new("Echo", vec![json!(text)]))
    }

    #[tokio::test]
    async fn test_register_stamps_local_node() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let actor = echo_actor(1);

        let id = proxy.register(actor.clone()).expect("register");

        assert_eq!(id.node_id(), NODE_A);
        assert_ne!(id.token(), 0);
        assert_eq!(actor.id(), id);
        assert!(id.canonical().starts_with("127.0.0.1:6001/"));
        assert_eq!(proxy.actor_count(), 1);
    }

    #[tokio::test]
    async fn test_register_overwrites_foreign_node_segment() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let actor = echo_actor(1);
        actor.rebind(actor.id().set_node_id("10.9.9.9:1").expect("valid"));

        let id = proxy.register(actor.clone()).expect("register");

        assert_eq!(id.node_id(), NODE_A);
    }

    #[tokio::test]
    async fn test_online_follows_directory() {
        let network = LocalNetwork::new();
        let directory = network.join(NODE_A, "game");
        let proxy = ActorProxy::new(NODE_A, directory.clone());
        assert!(!proxy.is_online());

        directory.set_online(true);
        assert!(proxy.is_online());

        directory.set_online(false);
        assert!(!proxy.is_online());
    }

    #[tokio::test]
    async fn test_register_fails_on_malformed_node_id() {
        let network = LocalNetwork::new();
        let directory = network.join("game-server:6001", "game");
        let proxy = ActorProxy::new("game-server:6001", directory);
        let actor = echo_actor(1);
        let before = actor.id();

        let err = proxy.register(actor.clone()).expect_err("node id cannot be encoded");

        assert!(matches!(
            err,
            ActorError::Identity(IdentityError::InvalidNodeAddress { .. })
        ));
        assert_eq!(actor.id(), before);
        assert_eq!(proxy.actor_count(), 0);
    }

    #[tokio::test]
    async fn test_local_tell_and_unregister() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let actor = echo_actor(1);
        let id = proxy.register(actor.clone()).expect("register");

        let mut info = echo("hi");
        proxy.local_tell(&id, &mut info).await.expect("tell");
        assert_eq!(info.reply.get::<String>(0).expect("reply"), "hi");

        proxy.unregister(actor.as_ref());
        proxy.unregister(actor.as_ref());

        let err = proxy.local_tell(&id, &mut echo("hi")).await.expect_err("gone");
        assert!(matches!(err, ActorError::ActorNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reregister_retires_previous_id() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let actor = echo_actor(1);
        let first = proxy.register(actor.clone()).expect("register");
        let second = proxy.register(actor.clone()).expect("register again");

        assert_ne!(first, second);
        assert_eq!(proxy.actor_count(), 1);
        let err = proxy.local_tell(&first, &mut echo("x")).await.expect_err("stale id");
        assert!(matches!(err, ActorError::ActorNotFound { .. }));

        proxy.unregister(actor.as_ref());

        assert_eq!(proxy.actor_count(), 0);
        for id in [&first, &second] {
            let err = proxy.local_tell(id, &mut echo("x")).await.expect_err("gone");
            assert!(matches!(err, ActorError::ActorNotFound { .. }));
        }
    }

    #[tokio::test]
    async fn test_emit_local_never_touches_network() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let id = proxy.register(echo_actor(1)).expect("register");

        let mut info = echo("local");
        proxy.emit(&id, &mut info).await.expect("emit");

        assert_eq!(info.reply.get::<String>(0).expect("reply"), "local");
        assert_eq!(network.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_emit_local_missing_actor_is_not_found() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let id = ActorId::new(ECHO, 5).mint().set_node_id(NODE_A).expect("valid");

        let err = proxy.emit(&id, &mut echo("x")).await.expect_err("no actor");
        assert!(matches!(err, ActorError::ActorNotFound { .. }));
    }

    #[tokio::test]
    async fn test_emit_unknown_node_is_not_found() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let id = ActorId::new(ECHO, 5)
            .mint()
            .set_node_id("127.0.0.1:7999")
            .expect("valid");

        let err = proxy.emit(&id, &mut echo("x")).await.expect_err("no node");
        assert!(matches!(
            err,
            ActorError::Transport(TransportError::NodeNotFound { ref node_id }) if node_id == "127.0.0.1:7999"
        ));
    }

    #[tokio::test]
    async fn test_service_conflict_keeps_first_binding() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let first = echo_actor(1);
        let second = echo_actor(2);
        proxy.register(first.clone()).expect("register");
        proxy.register(second.clone()).expect("register");

        proxy.register_service(first.clone(), "echo").expect("first");
        let err = proxy
            .register_service(second, "echo")
            .expect_err("duplicate");

        assert!(matches!(err, ActorError::ServiceConflict { ref name } if name == "echo"));
        let service = proxy.get_local_actor_service("echo").expect("still bound");
        assert_eq!(service.owner().id(), first.id());
        assert_eq!(proxy.service_count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_service_is_idempotent() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        proxy.register_service(echo_actor(1), "echo").expect("bind");

        proxy.unregister_service("echo");
        proxy.unregister_service("echo");

        assert!(matches!(
            proxy.get_local_actor_service("echo"),
            Err(ActorError::ServiceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_actor_service_local_without_network() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let actor = echo_actor(1);
        proxy.register(actor.clone()).expect("register");
        proxy.register_service(actor.clone(), "echo").expect("bind");

        let service = proxy.get_actor_service("", "echo").await.expect("local");

        assert_eq!(service.owner().id(), actor.id());
        assert_eq!(network.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_get_actor_service_empty_role_is_configuration_error() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");

        let err = proxy.get_actor_service("", "missing").await.expect_err("no role");
        assert!(matches!(err, ActorError::MissingRole { ref name } if name == "missing"));
        assert_eq!(network.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_get_actor_service_propagates_directory_error() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");

        let err = proxy
            .get_actor_service("roleB", "missing")
            .await
            .expect_err("no such role");
        assert!(matches!(
            err,
            ActorError::Transport(TransportError::RoleNotFound { ref role }) if role == "roleB"
        ));
    }

    #[tokio::test]
    async fn test_concurrent_registration_and_routing() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let hits = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for instance in 0..32u64 {
            let proxy = Arc::clone(&proxy);
            let hits = Arc::clone(&hits);
            handles.push(tokio::spawn(async move {
                let actor = Arc::new(LocalActor::new(ECHO, instance));
                let counter = Arc::clone(&hits);
                actor.add_handler_fn("Hit", move |_info: &mut ActorMessageInfo| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                let id = proxy.register(actor).expect("register");
                let mut info = ActorMessageInfo::new(None, ActorMessage::new("Hit", vec![]));
                proxy.emit(&id, &mut info).await.expect("emit");
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(proxy.actor_count(), 32);
        assert_eq!(hits.load(Ordering::SeqCst), 32);
    }

    #[tokio::test]
    async fn test_clear_drains_registries() {
        let network = LocalNetwork::new();
        let proxy = proxy(&network, NODE_A, "game");
        let actor = echo_actor(1);
        let id = proxy.register(actor.clone()).expect("register");
        proxy.register_service(actor, "echo").expect("bind");

        proxy.clear();

        assert_eq!(proxy.actor_count(), 0);
        assert_eq!(proxy.service_count(), 0);
        assert!(proxy.local_tell(&id, &mut echo("x")).await.is_err());
    }
}
