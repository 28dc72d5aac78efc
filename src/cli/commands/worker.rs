//! Worker command implementation

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::cluster::{serve, NodeId, Worker};
use crate::health::EventLog;

/// Serve a single worker until the coordinator shuts it down
pub async fn run_worker_command(listen: SocketAddr, name: Option<String>) -> Result<()> {
    let name = match name {
        Some(name) => name,
        None => hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "worker".to_string()),
    };
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;
    let local = listener.local_addr()?;
    println!("worker {} listening on {}", name, local);

    // The coordinator renumbers drained events with its own node ids
    let id = NodeId(0);
    let worker = Arc::new(Worker::new(id, name, EventLog::buffered(id)));
    serve(listener, worker).await?;
    info!("Worker on {} stopped", local);
    Ok(())
}
