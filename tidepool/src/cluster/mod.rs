//! Cluster collaborators and membership.
//!
//! - [`directory`]: the traits the actor layer consumes to reach peers
//! - [`local`]: in-process implementation of those traits
//! - [`master`]: the master's node table and the worker-side client
//! - [`membership`]: the worker's connect/reconnect and heartbeat agent

pub mod directory;
pub mod local;
pub mod master;
pub mod membership;

pub use directory::{
    call_typed, split_method, ClusterDirectory, ConnectionEvent, EventCallback, NodeClient,
    RpcService, TransportError,
};
pub use local::{LocalDirectory, LocalNetwork};
pub use master::{MasterClient, MasterService, NodeInfo};
pub use membership::{MembershipAgent, MembershipPhase, ReportCollector};
