//! Cluster handle and provisioning
//!
//! A `ClusterHandle` is the coordinator's view of a fixed set of worker
//! nodes. It owns no data. Any transport failure marks the node down, after
//! which the handle refuses further dataset work until it is rebuilt.

pub mod guard;
pub mod node;
pub mod protocol;
pub mod remote;
pub mod transport;

pub use guard::with_cluster;
pub use node::Worker;
pub use protocol::{Frame, NodeErrorKind, NodeRequest, NodeResponse};
pub use remote::{serve, RemoteTransport};
pub use transport::{LocalTransport, NodeTransport, TransportError};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{ClusterConfig, ClusterMode};
use crate::error::{HarnessError, Result};
use crate::health::{EventKind, EventLog, NodeEvent};

/// Longest wait for one node to acknowledge shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Index of a node within its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAddress {
    /// In-process worker
    Local(usize),
    Remote(SocketAddr),
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddress::Local(index) => write!(f, "local:{}", index),
            NodeAddress::Remote(addr) => write!(f, "{}", addr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub id: NodeId,
    pub name: String,
    pub address: NodeAddress,
}

struct ClusterInner {
    transports: Vec<Arc<dyn NodeTransport>>,
    nodes: Vec<NodeRef>,
    events: broadcast::Sender<NodeEvent>,
    event_seq: AtomicU64,
    down: Mutex<BTreeSet<NodeId>>,
    torn_down: AtomicBool,
    teardowns: AtomicUsize,
}

/// Shared handle to a provisioned set of nodes
#[derive(Clone)]
pub struct ClusterHandle {
    inner: Arc<ClusterInner>,
}

impl ClusterHandle {
    /// Wrap already connected transports; `events` is the channel local nodes forward to
    pub fn assemble(
        transports: Vec<Arc<dyn NodeTransport>>,
        events: broadcast::Sender<NodeEvent>,
    ) -> Self {
        let nodes = transports.iter().map(|t| t.node().clone()).collect();
        Self {
            inner: Arc::new(ClusterInner {
                transports,
                nodes,
                events,
                event_seq: AtomicU64::new(0),
                down: Mutex::new(BTreeSet::new()),
                torn_down: AtomicBool::new(false),
                teardowns: AtomicUsize::new(0),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.inner.nodes
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.inner.nodes.iter().map(|n| n.id)
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// How many times teardown actually ran (0 or 1)
    pub fn teardown_count(&self) -> usize {
        self.inner.teardowns.load(Ordering::SeqCst)
    }

    pub fn down_nodes(&self) -> Vec<NodeId> {
        self.inner
            .down
            .lock()
            .map(|down| down.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Fail unless every node is up and the cluster is still live
    pub fn ensure_operational(&self) -> Result<()> {
        if self.is_torn_down() {
            return Err(HarnessError::ClusterTornDown);
        }
        let down = self.down_nodes();
        if !down.is_empty() {
            return Err(HarnessError::ClusterDegraded { down });
        }
        Ok(())
    }

    /// Send one request to one node
    ///
    /// Node-reported errors come back as `NodeResponse::Error`; only a
    /// transport failure is an `Err`, and it marks the node down.
    pub async fn call(&self, node: NodeId, request: NodeRequest) -> Result<NodeResponse> {
        if self.is_torn_down() {
            return Err(HarnessError::ClusterTornDown);
        }
        let transport = self
            .inner
            .transports
            .get(node.0)
            .ok_or_else(|| HarnessError::internal(format!("no node with id {}", node)))?;
        let request_name = request.name();
        match transport.call(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!("Node {} failed during {}: {}", node, request_name, e);
                self.mark_down(node, &e.to_string());
                Err(HarnessError::node_failure(node, e.to_string()))
            }
        }
    }

    /// Send a request to every node concurrently; results in node order
    pub async fn call_all<F>(&self, make_request: F) -> Vec<(NodeId, Result<NodeResponse>)>
    where
        F: Fn(&NodeRef) -> NodeRequest,
    {
        let calls = self.inner.nodes.iter().map(|node| {
            let request = make_request(node);
            async move { (node.id, self.call(node.id, request).await) }
        });
        join_all(calls).await
    }

    fn mark_down(&self, node: NodeId, reason: &str) {
        if let Ok(mut down) = self.inner.down.lock() {
            if !down.insert(node) {
                return;
            }
        }
        self.publish(
            node,
            EventKind::Unreachable {
                reason: reason.to_string(),
            },
        );
    }

    /// Publish a coordinator-side event about `node`
    pub fn publish(&self, node: NodeId, kind: EventKind) {
        let seq = self.inner.event_seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.inner.events.send(NodeEvent::new(node, seq, kind));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.inner.events.subscribe()
    }

    /// Pull buffered events from nodes that hold them and publish them
    pub async fn flush_events(&self) {
        if self.is_torn_down() {
            return;
        }
        for transport in &self.inner.transports {
            if !transport.buffers_events() {
                continue;
            }
            let node = transport.node().id;
            if self.down_nodes().contains(&node) {
                continue;
            }
            match self.call(node, NodeRequest::DrainEvents).await {
                Ok(NodeResponse::Events { events }) => {
                    for event in events {
                        let _ = self.inner.events.send(event);
                    }
                }
                Ok(other) => warn!("Node {} answered drain with {}", node, other.kind_name()),
                Err(e) => warn!("Could not drain events from node {}: {}", node, e),
            }
        }
    }

    /// Stop every node and release its data; later calls are no-ops
    pub async fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            debug!("Cluster already torn down");
            return;
        }
        self.inner.teardowns.fetch_add(1, Ordering::SeqCst);
        info!("Tearing down cluster of {} nodes", self.size());

        let down = self.down_nodes();
        let shutdowns = self
            .inner
            .transports
            .iter()
            .filter(|t| !down.contains(&t.node().id))
            .map(|transport| async move {
                let node = transport.node().id;
                let shutdown = transport.call(NodeRequest::Shutdown);
                match tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await {
                    Ok(Ok(_)) => debug!("Node {} shut down", node),
                    Ok(Err(e)) => warn!("Node {} failed to shut down cleanly: {}", node, e),
                    Err(_) => warn!("Node {} did not answer shutdown in time", node),
                }
            });
        join_all(shutdowns).await;
    }
}

impl fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterHandle")
            .field("nodes", &self.inner.nodes)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

/// Something that can bring up a cluster
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self) -> Result<ClusterHandle>;
}

#[async_trait]
impl Provisioner for ClusterConfig {
    async fn provision(&self) -> Result<ClusterHandle> {
        build(self).await
    }
}

/// Build a cluster as configured, failing if any node does not answer
pub async fn build(config: &ClusterConfig) -> Result<ClusterHandle> {
    let (events, _) = broadcast::channel(config.event_buffer.max(16));
    let mut failures = Vec::new();
    let transports: Vec<Arc<dyn NodeTransport>> = match config.mode {
        ClusterMode::Local => {
            if config.nodes == 0 {
                return Err(HarnessError::config("cluster.nodes must be at least 1"));
            }
            (0..config.nodes)
                .map(|index| {
                    let id = NodeId(index);
                    let node = NodeRef {
                        id,
                        name: format!("local-{}", index),
                        address: NodeAddress::Local(index),
                    };
                    let worker = Arc::new(Worker::new(
                        id,
                        node.name.clone(),
                        EventLog::forwarding(id, events.clone()),
                    ));
                    Arc::new(LocalTransport::spawn(node, worker)) as Arc<dyn NodeTransport>
                })
                .collect()
        }
        ClusterMode::HostsFile => {
            let addresses = config.resolve_hosts()?;
            let connects = addresses.iter().enumerate().map(|(index, addr)| {
                let node = NodeRef {
                    id: NodeId(index),
                    name: addr.to_string(),
                    address: NodeAddress::Remote(*addr),
                };
                RemoteTransport::connect(node, *addr, config.startup_timeout)
            });
            let mut transports: Vec<Arc<dyn NodeTransport>> = Vec::new();
            for (addr, result) in addresses.iter().zip(join_all(connects).await) {
                match result {
                    Ok(transport) => transports.push(Arc::new(transport)),
                    Err(e) => failures.push(format!("{}: {}", addr, e)),
                }
            }
            if !failures.is_empty() {
                let required = addresses.len();
                shutdown_all(&transports).await;
                return Err(HarnessError::Provision {
                    required,
                    reachable: transports.len(),
                    failures,
                });
            }
            transports
        }
    };

    let required = transports.len();
    let pings = transports.iter().map(|transport| async move {
        let node = transport.node().clone();
        let ping = transport.call(NodeRequest::Ping);
        match tokio::time::timeout(config.startup_timeout, ping).await {
            Ok(Ok(NodeResponse::Pong { name })) => {
                debug!("Node {} ({}) is up", node.id, name);
                Ok(())
            }
            Ok(Ok(other)) => Err(format!(
                "{}: unexpected '{}' response to ping",
                node.address,
                other.kind_name()
            )),
            Ok(Err(e)) => Err(format!("{}: {}", node.address, e)),
            Err(_) => Err(format!(
                "{}: no answer within {:?}",
                node.address, config.startup_timeout
            )),
        }
    });
    failures.extend(join_all(pings).await.into_iter().filter_map(|r| r.err()));

    if !failures.is_empty() {
        shutdown_all(&transports).await;
        return Err(HarnessError::Provision {
            required,
            reachable: required - failures.len(),
            failures,
        });
    }

    info!("Cluster of {} nodes is up ({:?} mode)", required, config.mode);
    Ok(ClusterHandle::assemble(transports, events))
}

async fn shutdown_all(transports: &[Arc<dyn NodeTransport>]) {
    join_all(transports.iter().map(|t| t.call(NodeRequest::Shutdown))).await;
}
