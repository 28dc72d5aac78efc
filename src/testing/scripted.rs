//! Scripted cluster for tests
//!
//! Each node is a real `Worker` behind a transport that can be told to
//! answer slowly, to stop answering after some number of reductions, or to
//! never come up at all.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::cluster::{
    ClusterHandle, NodeAddress, NodeId, NodeRef, NodeRequest, NodeResponse, NodeTransport,
    Provisioner, TransportError, Worker,
};
use crate::error::{HarnessError, Result};
use crate::health::EventLog;

/// Behaviour of one scripted node
#[derive(Debug, Clone, Default)]
pub struct NodeScript {
    pub delay: Duration,
    /// Extra delay for one kind of request, keyed by `NodeRequest::name`
    pub request_delays: Vec<(&'static str, Duration)>,
    /// Disconnect on the reduction after this many have been answered
    pub crash_after_reductions: Option<usize>,
    pub unreachable: bool,
}

/// Shared counters observed by tests
#[derive(Debug, Default)]
struct Observations {
    shutdowns: AtomicUsize,
    provisions: AtomicUsize,
    completions: Mutex<Vec<NodeId>>,
}

pub struct ScriptedTransport {
    node: NodeRef,
    worker: Arc<Worker>,
    script: NodeScript,
    reductions: AtomicUsize,
    crashed: AtomicBool,
    observations: Arc<Observations>,
}

impl ScriptedTransport {
    fn disconnected(&self, reason: &str) -> TransportError {
        TransportError::Disconnected(format!("{} {}", self.node.name, reason))
    }
}

#[async_trait]
impl NodeTransport for ScriptedTransport {
    fn node(&self) -> &NodeRef {
        &self.node
    }

    async fn call(
        &self,
        request: NodeRequest,
    ) -> std::result::Result<NodeResponse, TransportError> {
        if self.script.unreachable {
            return Err(self.disconnected("is unreachable"));
        }
        if self.crashed.load(Ordering::SeqCst) {
            return Err(self.disconnected("has crashed"));
        }

        match &request {
            NodeRequest::PartialReduce { .. } => {
                let answered = self.reductions.fetch_add(1, Ordering::SeqCst);
                if self
                    .script
                    .crash_after_reductions
                    .is_some_and(|limit| answered >= limit)
                {
                    self.crashed.store(true, Ordering::SeqCst);
                    return Err(self.disconnected("crashed mid-reduction"));
                }
            }
            NodeRequest::Shutdown => {
                self.observations.shutdowns.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }

        let extra: Duration = self
            .script
            .request_delays
            .iter()
            .filter(|(name, _)| *name == request.name())
            .map(|(_, delay)| *delay)
            .sum();
        let delay = self.script.delay + extra;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let is_reduction = matches!(request, NodeRequest::PartialReduce { .. });
        let worker = self.worker.clone();
        let response = tokio::task::spawn_blocking(move || worker.handle(request))
            .await
            .map_err(|e| TransportError::Protocol(format!("worker task failed: {}", e)))?;
        if is_reduction {
            if let Ok(mut completions) = self.observations.completions.lock() {
                completions.push(self.node.id);
            }
        }
        Ok(response)
    }
}

/// Builder and provisioner for a cluster of scripted nodes
pub struct ScriptedCluster {
    scripts: Vec<NodeScript>,
    observations: Arc<Observations>,
}

impl ScriptedCluster {
    pub fn new(nodes: usize) -> Self {
        Self {
            scripts: vec![NodeScript::default(); nodes],
            observations: Arc::new(Observations::default()),
        }
    }

    fn script(&mut self, node: usize) -> &mut NodeScript {
        if node >= self.scripts.len() {
            self.scripts.resize(node + 1, NodeScript::default());
        }
        &mut self.scripts[node]
    }

    pub fn with_delay(mut self, node: usize, delay: Duration) -> Self {
        self.script(node).delay = delay;
        self
    }

    /// Delay only requests named `request`, e.g. `"commit_dataset"`
    pub fn with_request_delay(
        mut self,
        node: usize,
        request: &'static str,
        delay: Duration,
    ) -> Self {
        self.script(node).request_delays.push((request, delay));
        self
    }

    pub fn with_crash_after_reductions(mut self, node: usize, reductions: usize) -> Self {
        self.script(node).crash_after_reductions = Some(reductions);
        self
    }

    pub fn with_unreachable(mut self, node: usize) -> Self {
        self.script(node).unreachable = true;
        self
    }

    /// Shutdown requests received over every cluster built so far
    pub fn shutdown_count(&self) -> usize {
        self.observations.shutdowns.load(Ordering::SeqCst)
    }

    pub fn provision_count(&self) -> usize {
        self.observations.provisions.load(Ordering::SeqCst)
    }

    /// Nodes in the order their partial reductions finished
    pub fn completions(&self) -> Vec<NodeId> {
        self.observations
            .completions
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Assemble a cluster without checking that nodes answer
    pub fn assemble(&self) -> ClusterHandle {
        let (events, _) = broadcast::channel(1024);
        let transports = self
            .scripts
            .iter()
            .enumerate()
            .map(|(index, script)| {
                let id = NodeId(index);
                let node = NodeRef {
                    id,
                    name: format!("scripted-{}", index),
                    address: NodeAddress::Local(index),
                };
                let worker = Arc::new(Worker::new(
                    id,
                    node.name.clone(),
                    EventLog::forwarding(id, events.clone()),
                ));
                Arc::new(ScriptedTransport {
                    node,
                    worker,
                    script: script.clone(),
                    reductions: AtomicUsize::new(0),
                    crashed: AtomicBool::new(false),
                    observations: self.observations.clone(),
                }) as Arc<dyn NodeTransport>
            })
            .collect();
        ClusterHandle::assemble(transports, events)
    }
}

#[async_trait]
impl Provisioner for ScriptedCluster {
    async fn provision(&self) -> Result<ClusterHandle> {
        self.observations.provisions.fetch_add(1, Ordering::SeqCst);
        let cluster = self.assemble();
        let pings = cluster.node_ids().map(|node| {
            let cluster = &cluster;
            async move {
                cluster
                    .call(node, NodeRequest::Ping)
                    .await
                    .err()
                    .map(|e| e.to_string())
            }
        });
        let failures: Vec<String> = join_all(pings).await.into_iter().flatten().collect();

        if failures.is_empty() {
            Ok(cluster)
        } else {
            cluster.teardown().await;
            Err(HarnessError::Provision {
                required: cluster.size(),
                reachable: cluster.size() - failures.len(),
                failures,
            })
        }
    }
}
