//! TidepoolNode: one cluster participant wired together.
//!
//! [`TidepoolNode`] owns the actor proxy and, on workers, the membership
//! agent. The master node (no `master-address` configured) publishes a
//! [`MasterService`] instead of running an agent.
//!
//! # Builder API
//!
//! ```rust,ignore
//! let config = ClusterConfig::builder()
//!     .local_address("127.0.0.1:7001")
//!     .master_address("127.0.0.1:9000")
//!     .role("room")
//!     .app_name("lobby")
//!     .build()?;
//!
//! let mut node = TidepoolNode::builder()
//!     .config(config)
//!     .directory(network.join("127.0.0.1:7001", "room"))
//!     .start()
//!     .await?;
//!
//! node.proxy().register(actor.clone())?;
//! node.proxy().register_service(actor, "room-manager")?;
//!
//! node.shutdown().await;
//! ```
//!
//! # Lifecycle
//!
//! 1. **Initializing**: proxy created, façade published
//! 2. **Active**: membership agent running (workers), serving messages
//! 3. **Stopping**: close notice sent, registries drained

use std::sync::Arc;

use crate::actors::{Actor, ActorError, ActorProxy, ActorServiceCaller};
use crate::cluster::{ClusterDirectory, MasterService, MembershipAgent, TransportError};
use crate::codec::{JsonCodec, MessageCodec};
use crate::config::{ClusterConfig, ConfigError};

/// Lifecycle state of a [`TidepoolNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecycle {
    /// Collaborators being wired.
    Initializing,
    /// Serving messages.
    Active,
    /// Shut down.
    Stopping,
}

/// Errors from [`TidepoolNode`] startup.
///
/// All of these are structural: the node cannot run and nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// No configuration was given to the builder.
    #[error("node requires a config (call config())")]
    MissingConfig,

    /// No cluster directory was given to the builder.
    #[error("node requires a cluster directory (call directory())")]
    MissingDirectory,

    /// The configuration is invalid.
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The actor proxy could not be initialized.
    #[error("actor proxy initialization failed: {0}")]
    Initialize(#[from] ActorError),

    /// Publishing the master service failed.
    #[error("failed to publish master service: {0}")]
    Publish(#[from] TransportError),
}

/// A running cluster node.
pub struct TidepoolNode<C: MessageCodec = JsonCodec> {
    config: Arc<ClusterConfig>,
    directory: Arc<dyn ClusterDirectory>,
    proxy: Arc<ActorProxy<C>>,
    agent: Option<Arc<MembershipAgent<C>>>,
    master: Option<Arc<MasterService<C>>>,
    status: NodeLifecycle,
}

impl TidepoolNode {
    /// Start building a node with the JSON codec.
    pub fn builder() -> TidepoolNodeBuilder {
        TidepoolNodeBuilder {
            config: None,
            directory: None,
            codec: JsonCodec,
        }
    }
}

impl<C: MessageCodec> TidepoolNode<C> {
    /// The actor proxy.
    pub fn proxy(&self) -> &Arc<ActorProxy<C>> {
        &self.proxy
    }

    /// The membership agent, on worker nodes.
    pub fn agent(&self) -> Option<&Arc<MembershipAgent<C>>> {
        self.agent.as_ref()
    }

    /// The node table, on the master node.
    pub fn master(&self) -> Option<&Arc<MasterService<C>>> {
        self.master.as_ref()
    }

    /// The configuration the node was started with.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current lifecycle status.
    pub fn status(&self) -> NodeLifecycle {
        self.status
    }

    /// Whether this node is connected to the master.
    pub fn is_online(&self) -> bool {
        self.directory.is_online()
    }

    /// A service caller acting on behalf of `sender`.
    pub fn service_caller(&self, sender: Option<Arc<dyn Actor>>) -> ActorServiceCaller<C> {
        ActorServiceCaller::new(Arc::clone(&self.proxy), sender)
    }

    /// Shut the node down.
    ///
    /// Stops the membership agent (one close notice to the master), then
    /// drops every local actor and service binding. Idempotent.
    pub async fn shutdown(&mut self) {
        if self.status == NodeLifecycle::Stopping {
            return;
        }
        self.status = NodeLifecycle::Stopping;
        tracing::info!(node_id = %self.proxy.node_id(), "shutting down node");

        if let Some(agent) = &self.agent {
            agent.shutdown().await;
        }
        self.proxy.clear();
    }
}

impl<C: MessageCodec> std::fmt::Debug for TidepoolNode<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TidepoolNode")
            .field("node_id", &self.proxy.node_id())
            .field("role", &self.config.role())
            .field("status", &self.status)
            .finish()
    }
}

/// Builder for [`TidepoolNode`].
pub struct TidepoolNodeBuilder<C: MessageCodec = JsonCodec> {
    config: Option<ClusterConfig>,
    directory: Option<Arc<dyn ClusterDirectory>>,
    codec: C,
}

impl<C: MessageCodec> TidepoolNodeBuilder<C> {
    /// Set the configuration (required).
    pub fn config(mut self, config: ClusterConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the cluster directory (required).
    pub fn directory(mut self, directory: Arc<dyn ClusterDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Set a custom message codec.
    pub fn with_codec<C2: MessageCodec>(self, codec: C2) -> TidepoolNodeBuilder<C2> {
        TidepoolNodeBuilder {
            config: self.config,
            directory: self.directory,
            codec,
        }
    }

    /// Wire the node and start it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or directory is missing, the config
    /// is invalid, or a service cannot be published.
    pub async fn start(self) -> Result<TidepoolNode<C>, NodeError> {
        let config = Arc::new(self.config.ok_or(NodeError::MissingConfig)?);
        let directory = self.directory.ok_or(NodeError::MissingDirectory)?;
        config.validate()?;

        let proxy = Arc::new(ActorProxy::with_codec(
            config.local_address(),
            Arc::clone(&directory),
            self.codec.clone(),
        ));
        proxy.initialize()?;

        let (agent, master) = if config.master_address().is_some() {
            let agent = Arc::new(MembershipAgent::with_codec(
                Arc::clone(&config),
                Arc::clone(&directory),
                self.codec,
            ));
            agent.start();
            (Some(agent), None)
        } else {
            let master = Arc::new(MasterService::with_codec(self.codec));
            directory.register(master.clone())?;
            directory.set_online(true);
            (None, Some(master))
        };

        tracing::info!(
            node_id = %proxy.node_id(),
            role = %config.role(),
            master = agent.is_none(),
            "node started"
        );

        Ok(TidepoolNode {
            config,
            directory,
            proxy,
            agent,
            master,
            status: NodeLifecycle::Active,
        })
    }
}
