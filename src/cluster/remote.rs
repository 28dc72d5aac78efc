//! TCP transport: one connection per node, newline-delimited JSON
//!
//! `serve` runs a worker behind a listener (the `sumcheck worker`
//! subcommand); `RemoteTransport` is the coordinator's side of it.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::node::Worker;
use super::protocol::{Frame, NodeErrorKind, NodeRequest, NodeResponse};
use super::transport::{NodeTransport, TransportError};
use super::NodeRef;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    buffer: Vec<u8>,
    /// Set while a request is unanswered; a dropped call leaves it set
    in_flight: bool,
}

impl Connection {
    async fn send<T: serde::Serialize>(&mut self, message: &T) -> Result<(), TransportError> {
        let mut payload =
            serde_json::to_vec(message).map_err(|e| TransportError::Protocol(e.to_string()))?;
        payload.push(b'\n');
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next message, `None` when the peer closed the connection
    async fn receive<T: serde::de::DeserializeOwned>(
        &mut self,
    ) -> Result<Option<T>, TransportError> {
        self.buffer.clear();
        if self.reader.read_until(b'\n', &mut self.buffer).await? == 0 {
            return Ok(None);
        }
        serde_json::from_slice(&self.buffer)
            .map(Some)
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

fn split(stream: TcpStream) -> Connection {
    let (read, write) = stream.into_split();
    Connection {
        reader: BufReader::new(read),
        writer: write,
        buffer: Vec::new(),
        in_flight: false,
    }
}

async fn open(addr: SocketAddr, timeout: Duration) -> Result<Connection, TransportError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            TransportError::Disconnected(format!(
                "connect to {} timed out after {:?}",
                addr, timeout
            ))
        })??;
    stream.set_nodelay(true)?;
    Ok(split(stream))
}

/// Coordinator-side handle to a worker listening on TCP
///
/// Requests are numbered and replies must echo the number. A call dropped
/// before its reply arrived (a timed-out reduction, say) leaves that reply
/// on the wire, so the next call opens a fresh connection instead of
/// reading it.
pub struct RemoteTransport {
    node: NodeRef,
    addr: SocketAddr,
    connect_timeout: Duration,
    next_id: AtomicU64,
    connection: Mutex<Connection>,
}

impl RemoteTransport {
    pub async fn connect(
        node: NodeRef,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let connection = open(addr, timeout).await?;
        debug!("Connected to node {} at {}", node.id, addr);
        Ok(Self {
            node,
            addr,
            connect_timeout: timeout,
            next_id: AtomicU64::new(1),
            connection: Mutex::new(connection),
        })
    }
}

#[async_trait]
impl NodeTransport for RemoteTransport {
    fn node(&self) -> &NodeRef {
        &self.node
    }

    async fn call(&self, request: NodeRequest) -> Result<NodeResponse, TransportError> {
        let mut connection = self.connection.lock().await;
        if connection.in_flight {
            warn!(
                "Abandoned request pending on node {}; reconnecting to {}",
                self.node.id, self.addr
            );
            *connection = open(self.addr, self.connect_timeout).await?;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        connection.in_flight = true;
        connection
            .send(&Frame {
                id,
                message: &request,
            })
            .await?;
        let reply = connection
            .receive::<Frame<NodeResponse>>()
            .await?
            .ok_or_else(|| {
                TransportError::Disconnected(format!("{} closed the connection", self.node.name))
            })?;
        if reply.id != id {
            return Err(TransportError::Protocol(format!(
                "reply {} from {} does not answer request {}",
                reply.id, self.node.name, id
            )));
        }
        connection.in_flight = false;

        // Workers do not know their index in this cluster
        Ok(match reply.message {
            NodeResponse::Events { mut events } => {
                for event in &mut events {
                    event.node = self.node.id;
                }
                NodeResponse::Events { events }
            }
            other => other,
        })
    }

    fn buffers_events(&self) -> bool {
        true
    }
}

/// Serve one worker until a `Shutdown` request arrives
pub async fn serve(listener: TcpListener, worker: Arc<Worker>) -> std::io::Result<()> {
    let stop = Arc::new(Notify::new());
    info!(
        "Worker '{}' listening on {}",
        worker.name(),
        listener.local_addr()?
    );

    loop {
        tokio::select! {
            _ = stop.notified() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                stream.set_nodelay(true)?;
                debug!("Accepted coordinator connection from {}", peer);
                let worker = worker.clone();
                let stop = stop.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(split(stream), worker, stop).await {
                        warn!("Connection from {} ended with error: {}", peer, e);
                    }
                });
            }
        }
    }

    info!("Worker '{}' stopped", worker.name());
    Ok(())
}

async fn serve_connection(
    mut connection: Connection,
    worker: Arc<Worker>,
    stop: Arc<Notify>,
) -> Result<(), TransportError> {
    while let Some(Frame { id, message }) = connection.receive::<Frame<NodeRequest>>().await? {
        let shutdown = matches!(message, NodeRequest::Shutdown);
        let handler = worker.clone();
        let response = tokio::task::spawn_blocking(move || handler.handle(message))
            .await
            .unwrap_or_else(|e| {
                NodeResponse::error(NodeErrorKind::Internal, format!("worker task failed: {}", e))
            });
        connection
            .send(&Frame {
                id,
                message: response,
            })
            .await?;
        if shutdown {
            stop.notify_one();
            break;
        }
    }
    Ok(())
}
