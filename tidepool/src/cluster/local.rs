//! In-process cluster directory and transport.
//!
//! [`LocalNetwork`] stands in for the real RPC layer when every node lives in
//! one process: demos, integration tests and single-binary deployments.
//! Each node joins with an address and a role and gets a [`LocalDirectory`]
//! implementing [`ClusterDirectory`].
//!
//! Calls still go through bytes: the caller encodes, the network hands the
//! payload to the target node's published [`RpcService`], and the response is
//! decoded on the way back. No live reference crosses a node boundary.
//!
//! Faults are injected from the outside:
//!
//! - [`LocalNetwork::set_reachable`] makes dials to a node fail
//! - [`LocalNetwork::disconnect`] severs dialed connections and fires their
//!   `close` callbacks from a separate OS thread, like a transport reader
//!   thread would
//!
//! Every call is counted per method ([`LocalNetwork::call_count`]).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::directory::{
    split_method, ClusterDirectory, ConnectionEvent, EventCallback, NodeClient, RpcService,
    TransportError,
};

/// First port handed out as the local side of a dialed connection.
const EPHEMERAL_PORT_BASE: u64 = 40000;
const EPHEMERAL_PORT_RANGE: u64 = 20000;

struct LocalNode {
    role: String,
    reachable: AtomicBool,
    services: DashMap<&'static str, Arc<dyn RpcService>>,
}

struct Connection {
    from: String,
    to: String,
    callback: EventCallback,
    open: Arc<AtomicBool>,
}

/// Shared in-process network all local nodes join.
pub struct LocalNetwork {
    nodes: DashMap<String, Arc<LocalNode>>,
    connections: DashMap<u64, Connection>,
    next_connection: AtomicU64,
    calls: DashMap<String, usize>,
}

impl LocalNetwork {
    /// Create an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            connections: DashMap::new(),
            next_connection: AtomicU64::new(1),
            calls: DashMap::new(),
        })
    }

    /// Add a node and return its directory. Re-joining an address replaces
    /// the previous node and its published services.
    pub fn join(
        self: &Arc<Self>,
        address: impl Into<String>,
        role: impl Into<String>,
    ) -> Arc<LocalDirectory> {
        let address = address.into();
        let role = role.into();
        self.nodes.insert(
            address.clone(),
            Arc::new(LocalNode {
                role: role.clone(),
                reachable: AtomicBool::new(true),
                services: DashMap::new(),
            }),
        );
        tracing::debug!(address = %address, role = %role, "node joined local network");
        Arc::new(LocalDirectory {
            network: Arc::clone(self),
            address,
            role,
            online: RwLock::new(false),
        })
    }

    /// Remove a node, closing every connection dialed to it.
    pub fn leave(&self, address: &str) {
        self.nodes.remove(address);
        self.disconnect_all(address);
    }

    /// Make dials to `address` fail (`false`) or succeed again (`true`).
    ///
    /// Existing connections and plain calls are not affected.
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        if let Some(node) = self.nodes.get(address) {
            node.reachable.store(reachable, Ordering::SeqCst);
        }
    }

    /// Sever connections dialed from `from` to `to`, firing their `close`
    /// callbacks. Returns how many were closed.
    pub fn disconnect(&self, from: &str, to: &str) -> usize {
        self.close_where(|conn| conn.from == from && conn.to == to)
    }

    /// Sever every connection dialed to `to`.
    pub fn disconnect_all(&self, to: &str) -> usize {
        self.close_where(|conn| conn.to == to)
    }

    fn close_where(&self, matches: impl Fn(&Connection) -> bool) -> usize {
        let ids: Vec<u64> = self
            .connections
            .iter()
            .filter(|entry| matches(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        let mut callbacks = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, conn)) = self.connections.remove(&id) {
                conn.open.store(false, Ordering::SeqCst);
                tracing::debug!(from = %conn.from, to = %conn.to, id, "closing local connection");
                callbacks.push(conn.callback);
            }
        }

        let closed = callbacks.len();
        if closed > 0 {
            let reader = std::thread::spawn(move || {
                for callback in callbacks {
                    callback(ConnectionEvent::Close);
                }
            });
            if reader.join().is_err() {
                tracing::warn!("connection close callback panicked");
            }
        }
        closed
    }

    /// Number of open dialed connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of calls made to `method` (`"Service.Method"`).
    pub fn call_count(&self, method: &str) -> usize {
        self.calls.get(method).map(|count| *count).unwrap_or(0)
    }

    /// Number of calls made to any method.
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|entry| *entry.value()).sum()
    }

    fn node(&self, address: &str) -> Option<Arc<LocalNode>> {
        self.nodes.get(address).map(|node| Arc::clone(node.value()))
    }

    fn client(
        self: &Arc<Self>,
        local: String,
        remote: String,
        open: Arc<AtomicBool>,
    ) -> Arc<dyn NodeClient> {
        Arc::new(LocalClient {
            network: Arc::clone(self),
            local,
            remote,
            open,
        })
    }
}

impl fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<String> = self.nodes.iter().map(|n| n.key().clone()).collect();
        nodes.sort();
        f.debug_struct("LocalNetwork")
            .field("nodes", &nodes)
            .field("connections", &self.connections.len())
            .finish()
    }
}

/// One node's view of a [`LocalNetwork`].
#[derive(Debug)]
pub struct LocalDirectory {
    network: Arc<LocalNetwork>,
    address: String,
    role: String,
    online: RwLock<bool>,
}

impl LocalDirectory {
    /// The address this node joined with.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The role this node joined with.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// The network this node belongs to.
    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    fn host(&self) -> &str {
        self.address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.address)
    }
}

#[async_trait::async_trait]
impl ClusterDirectory for LocalDirectory {
    fn register(&self, service: Arc<dyn RpcService>) -> Result<(), TransportError> {
        let node = self
            .network
            .node(&self.address)
            .ok_or_else(|| TransportError::NodeNotFound {
                node_id: self.address.clone(),
            })?;
        let name = service.service_name();
        if node.services.insert(name, service).is_some() {
            tracing::debug!(service = name, address = %self.address, "replaced published service");
        }
        Ok(())
    }

    async fn node_client(&self, node_id: &str) -> Result<Arc<dyn NodeClient>, TransportError> {
        if self.network.node(node_id).is_none() {
            return Err(TransportError::NodeNotFound {
                node_id: node_id.to_string(),
            });
        }
        Ok(self.network.client(
            self.address.clone(),
            node_id.to_string(),
            Arc::new(AtomicBool::new(true)),
        ))
    }

    async fn node_client_by_role(&self, role: &str) -> Result<Arc<dyn NodeClient>, TransportError> {
        let address = self
            .network
            .nodes
            .iter()
            .filter(|node| node.role == role && node.reachable.load(Ordering::SeqCst))
            .map(|node| node.key().clone())
            .min()
            .ok_or_else(|| TransportError::RoleNotFound {
                role: role.to_string(),
            })?;
        self.node_client(&address).await
    }

    async fn connect_to_node(
        &self,
        address: &str,
        on_event: EventCallback,
    ) -> Result<Arc<dyn NodeClient>, TransportError> {
        let node = self
            .network
            .node(address)
            .ok_or_else(|| TransportError::ConnectFailed {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            })?;
        if !node.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectFailed {
                address: address.to_string(),
                reason: "unreachable".to_string(),
            });
        }

        let id = self.network.next_connection.fetch_add(1, Ordering::SeqCst);
        let open = Arc::new(AtomicBool::new(true));
        self.network.connections.insert(
            id,
            Connection {
                from: self.address.clone(),
                to: address.to_string(),
                callback: on_event,
                open: Arc::clone(&open),
            },
        );
        let local = format!(
            "{}:{}",
            self.host(),
            EPHEMERAL_PORT_BASE + id % EPHEMERAL_PORT_RANGE
        );
        tracing::debug!(from = %local, to = address, id, "dialed local connection");
        Ok(self.network.client(local, address.to_string(), open))
    }

    fn set_online(&self, online: bool) {
        *self.online.write() = online;
    }

    fn is_online(&self) -> bool {
        *self.online.read()
    }
}

#[derive(Debug)]
struct LocalClient {
    network: Arc<LocalNetwork>,
    local: String,
    remote: String,
    open: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl NodeClient for LocalClient {
    fn local_addr(&self) -> String {
        self.local.clone()
    }

    fn remote_addr(&self) -> String {
        self.remote.clone()
    }

    async fn call(&self, method: &str, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        *self.network.calls.entry(method.to_string()).or_insert(0) += 1;

        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed {
                address: self.remote.clone(),
            });
        }
        let node = self
            .network
            .node(&self.remote)
            .ok_or_else(|| TransportError::ConnectionClosed {
                address: self.remote.clone(),
            })?;
        let (service, name) = split_method(method).ok_or_else(|| TransportError::MethodNotFound {
            method: method.to_string(),
        })?;
        let handler = node
            .services
            .get(service)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::ServiceNotFound {
                service: service.to_string(),
                address: self.remote.clone(),
            })?;

        handler.dispatch(name, &payload).await
    }
}
