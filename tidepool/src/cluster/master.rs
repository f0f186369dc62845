//! Master-side node table and the client workers use to feed it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::codec::{JsonCodec, MessageCodec};

use super::directory::{call_typed, NodeClient, RpcService, TransportError};

/// Heartbeat payload a worker sends to the master.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct NodeInfo {
    /// Externally reachable `"ip:port"` of the worker.
    pub address: String,
    /// The worker's role.
    pub role: String,
    /// Application name.
    pub app_name: String,
    /// Collected metrics, keyed by collector name.
    pub metrics: HashMap<String, f64>,
}

/// The master's view of the cluster, published as `"MasterService"`.
///
/// `ReportNodeInfo` upserts by address; `ReportNodeClose` removes.
pub struct MasterService<C: MessageCodec = JsonCodec> {
    nodes: DashMap<String, NodeInfo>,
    reports: AtomicU64,
    codec: C,
}

impl MasterService {
    /// Create an empty node table using the JSON codec.
    pub fn new() -> Self {
        Self::with_codec(JsonCodec)
    }
}

impl Default for MasterService {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: MessageCodec> MasterService<C> {
    /// Service name published through the directory.
    pub const NAME: &'static str = "MasterService";
    /// Full method name of the heartbeat.
    pub const REPORT_NODE_INFO: &'static str = "MasterService.ReportNodeInfo";
    /// Full method name of the close notice.
    pub const REPORT_NODE_CLOSE: &'static str = "MasterService.ReportNodeClose";

    /// Create an empty node table with a custom codec.
    pub fn with_codec(codec: C) -> Self {
        Self {
            nodes: DashMap::new(),
            reports: AtomicU64::new(0),
            codec,
        }
    }

    /// Record a heartbeat.
    pub fn report_node_info(&self, info: NodeInfo) -> bool {
        self.reports.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(address = %info.address, metrics = info.metrics.len(), "node report");
        self.nodes.insert(info.address.clone(), info);
        true
    }

    /// Forget a node that announced it is closing.
    pub fn report_node_close(&self, address: &str) -> bool {
        if self.nodes.remove(address).is_some() {
            tracing::info!(address, "node closed");
        }
        true
    }

    /// Snapshot of every known node, sorted by address.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self.nodes.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.address.cmp(&b.address));
        nodes
    }

    /// The last report from `address`.
    pub fn node(&self, address: &str) -> Option<NodeInfo> {
        self.nodes.get(address).map(|e| e.value().clone())
    }

    /// Total heartbeats received.
    pub fn report_count(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl<C: MessageCodec> RpcService for MasterService<C> {
    fn service_name(&self) -> &'static str {
        Self::NAME
    }

    async fn dispatch(&self, method: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        match method {
            "ReportNodeInfo" => {
                let info: NodeInfo = self.codec.decode(payload)?;
                Ok(self.codec.encode(&self.report_node_info(info))?)
            }
            "ReportNodeClose" => {
                let address: String = self.codec.decode(payload)?;
                Ok(self.codec.encode(&self.report_node_close(&address))?)
            }
            other => Err(TransportError::MethodNotFound {
                method: format!("{}.{}", Self::NAME, other),
            }),
        }
    }
}

/// Typed wrapper over a connection to the master.
#[derive(Clone, Debug)]
pub struct MasterClient<C: MessageCodec = JsonCodec> {
    client: Arc<dyn NodeClient>,
    codec: C,
}

impl<C: MessageCodec> MasterClient<C> {
    /// Wrap a dialed master connection.
    pub fn new(client: Arc<dyn NodeClient>, codec: C) -> Self {
        Self { client, codec }
    }

    /// Local socket address of the connection.
    pub fn local_addr(&self) -> String {
        self.client.local_addr()
    }

    /// Send a heartbeat.
    pub async fn report_node_info(&self, info: &NodeInfo) -> Result<bool, TransportError> {
        call_typed(
            self.client.as_ref(),
            &self.codec,
            MasterService::<C>::REPORT_NODE_INFO,
            info,
        )
        .await
    }

    /// Announce that the node at `address` is closing.
    pub async fn report_node_close(&self, address: &str) -> Result<bool, TransportError> {
        call_typed(
            self.client.as_ref(),
            &self.codec,
            MasterService::<C>::REPORT_NODE_CLOSE,
            &address,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterDirectory, ConnectionEvent, LocalNetwork};

    fn info(address: &str, load: f64) -> NodeInfo {
        NodeInfo {
            address: address.to_string(),
            role: "room".to_string(),
            app_name: "lobby".to_string(),
            metrics: HashMap::from([("load".to_string(), load)]),
        }
    }

    #[test]
    fn test_report_upserts_by_address() {
        let master = MasterService::new();
        assert!(master.report_node_info(info("10.0.0.2:7001", 0.1)));
        assert!(master.report_node_info(info("10.0.0.2:7001", 0.7)));
        assert!(master.report_node_info(info("10.0.0.1:7001", 0.3)));

        let nodes = master.nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].address, "10.0.0.1:7001");
        assert_eq!(master.node("10.0.0.2:7001").expect("known").metrics["load"], 0.7);
        assert_eq!(master.report_count(), 3);
    }

    #[test]
    fn test_close_removes_node() {
        let master = MasterService::new();
        master.report_node_info(info("10.0.0.2:7001", 0.1));

        assert!(master.report_node_close("10.0.0.2:7001"));
        assert!(master.report_node_close("10.0.0.2:7001"));
        assert!(master.node("10.0.0.2:7001").is_none());
    }

    #[tokio::test]
    async fn test_client_round_trip() {
        let network = LocalNetwork::new();
        let master_dir = network.join("10.0.0.1:9000", "master");
        let master = Arc::new(MasterService::new());
        master_dir.register(master.clone()).expect("register");
        let worker = network.join("10.0.0.2:7001", "room");

        let conn = worker
            .connect_to_node("10.0.0.1:9000", Arc::new(|_: ConnectionEvent| {}))
            .await
            .expect("connect");
        let client = MasterClient::new(conn, JsonCodec);

        assert!(client
            .report_node_info(&info("10.0.0.2:7001", 0.5))
            .await
            .expect("report"));
        assert!(master.node("10.0.0.2:7001").is_some());

        assert!(client.report_node_close("10.0.0.2:7001").await.expect("close"));
        assert!(master.nodes().is_empty());
        assert_eq!(network.call_count(MasterService::<JsonCodec>::REPORT_NODE_CLOSE), 1);
    }
}
