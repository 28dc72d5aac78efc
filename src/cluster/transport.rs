use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::node::Worker;
use super::protocol::{NodeErrorKind, NodeRequest, NodeResponse};
use super::NodeRef;

/// Failure to deliver a request or receive its response
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("node disconnected: {0}")]
    Disconnected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Seam between the coordinator and one node
#[async_trait]
pub trait NodeTransport: Send + Sync {
    fn node(&self) -> &NodeRef;

    async fn call(&self, request: NodeRequest) -> Result<NodeResponse, TransportError>;

    /// Whether this node holds events until they are drained
    fn buffers_events(&self) -> bool {
        false
    }
}

type Envelope = (NodeRequest, oneshot::Sender<NodeResponse>);

/// In-process node: an actor task in front of a `Worker`
pub struct LocalTransport {
    node: NodeRef,
    sender: mpsc::Sender<Envelope>,
}

impl LocalTransport {
    /// Start the actor on the current runtime
    pub fn spawn(node: NodeRef, worker: Arc<Worker>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Envelope>(64);
        let node_id = node.id;
        tokio::spawn(async move {
            while let Some((request, reply)) = receiver.recv().await {
                let shutdown = matches!(request, NodeRequest::Shutdown);
                trace!("Node {} received {}", node_id, request.name());
                let worker = worker.clone();
                tokio::spawn(async move {
                    let response = tokio::task::spawn_blocking(move || worker.handle(request))
                        .await
                        .unwrap_or_else(|e| {
                            NodeResponse::error(
                                NodeErrorKind::Internal,
                                format!("worker task failed: {}", e),
                            )
                        });
                    let _ = reply.send(response);
                });
                if shutdown {
                    break;
                }
            }
            debug!("Node {} actor stopped", node_id);
        });
        Self { node, sender }
    }
}

#[async_trait]
impl NodeTransport for LocalTransport {
    fn node(&self) -> &NodeRef {
        &self.node
    }

    async fn call(&self, request: NodeRequest) -> Result<NodeResponse, TransportError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send((request, reply))
            .await
            .map_err(|_| TransportError::Disconnected(format!("{} has stopped", self.node.name)))?;
        response.await.map_err(|_| {
            TransportError::Disconnected(format!("{} dropped the request", self.node.name))
        })
    }
}
