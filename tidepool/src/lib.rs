//! # Tidepool
//!
//! Location-transparent actors and cluster membership for multi-node
//! servers.
//!
//! Each node hosts addressable actors behind an [`ActorProxy`]. An actor's
//! id embeds the node it lives on, so sending a message never needs a
//! directory lookup: the proxy delivers locally or calls the owning node's
//! [`ActorProxyService`]. Worker nodes keep a live relationship with a
//! master through a [`MembershipAgent`] that reconnects on its own and
//! sends periodic heartbeats.
//!
//! ## Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  node        TidepoolNode: wiring, lifecycle, shutdown      │
//! ├──────────────────────────┬──────────────────────────────────┤
//! │  actors                  │  cluster                         │
//! │  • ActorId, messages     │  • ClusterDirectory traits       │
//! │  • LocalActor / Remote   │  • LocalNetwork (in-process)     │
//! │  • ActorProxy (router)   │  • MasterService, NodeInfo       │
//! │  • ActorProxyService     │  • MembershipAgent               │
//! ├──────────────────────────┴──────────────────────────────────┤
//! │  config (ClusterConfig)          codec (MessageCodec)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! let network = LocalNetwork::new();
//! let node = TidepoolNode::builder()
//!     .config(config)
//!     .directory(network.join("127.0.0.1:7001", "room"))
//!     .start()
//!     .await?;
//!
//! let echo = Arc::new(LocalActor::new(ECHO, 1));
//! echo.add_handler_fn("Echo", |info| {
//!     let text: String = info.message.arg(0)?;
//!     info.reply_with(text)
//! });
//! node.proxy().register(echo.clone())?;
//! node.proxy().register_service(echo, "echo")?;
//! ```

#![deny(missing_docs)]

pub mod actors;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod node;

pub use actors::{
    Actor, ActorError, ActorId, ActorMessage, ActorMessageInfo, ActorProxy, ActorProxyService,
    ActorReply, ActorService, ActorServiceCaller, ActorType, LocalActor, RemoteActor,
};
pub use cluster::{
    ClusterDirectory, LocalNetwork, MasterService, MembershipAgent, MembershipPhase, NodeInfo,
    TransportError,
};
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use config::{ClusterConfig, ConfigError};
pub use node::{NodeError, NodeLifecycle, TidepoolNode, TidepoolNodeBuilder};
