//! Node-side request handling
//!
//! A `Worker` owns one node's shard store and event log. Both the in-process
//! actor and the TCP server drive the same `handle` method.

use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

use super::protocol::{NodeErrorKind, NodeRequest, NodeResponse};
use super::NodeId;
use crate::health::{EventKind, EventLog};
use crate::import::parse_segments;
use crate::import::parser::ParseFailure;
use crate::store::{ShardStore, StoreError};

pub struct Worker {
    id: NodeId,
    name: String,
    store: Mutex<ShardStore>,
    events: EventLog,
}

impl Worker {
    pub fn new(id: NodeId, name: impl Into<String>, events: EventLog) -> Self {
        let name = name.into();
        events.record(EventKind::NodeStarted { name: name.clone() });
        Self {
            id,
            name,
            store: Mutex::new(ShardStore::new()),
            events,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dataset_count(&self) -> usize {
        self.store.lock().map(|s| s.dataset_count()).unwrap_or(0)
    }

    /// Handle one request; CPU-bound, call from a blocking context
    pub fn handle(&self, request: NodeRequest) -> NodeResponse {
        let request_name = request.name();
        let response = self.dispatch(request);
        if let NodeResponse::Error { kind, message } = &response {
            if *kind == NodeErrorKind::Internal {
                self.events.record(EventKind::RequestFailed {
                    request: request_name.to_string(),
                    reason: message.clone(),
                });
            }
        }
        response
    }

    fn dispatch(&self, request: NodeRequest) -> NodeResponse {
        match request {
            NodeRequest::Ping => NodeResponse::Pong {
                name: self.name.clone(),
            },
            NodeRequest::ParseShard {
                dataset,
                segments,
                setup,
            } => {
                let started = Instant::now();
                let parsed = match parse_segments(&segments, &setup) {
                    Ok(parsed) => parsed,
                    Err(failure) => {
                        warn!("Node {} failed to parse {}: {}", self.id, dataset, failure);
                        self.events.record(EventKind::ParseFailed {
                            dataset,
                            reason: failure.to_string(),
                        });
                        let kind = match failure {
                            ParseFailure::Io { .. } => NodeErrorKind::Io,
                            _ => NodeErrorKind::Parse,
                        };
                        return NodeResponse::error(kind, failure.to_string());
                    }
                };
                let parse_ms = started.elapsed().as_millis() as u64;
                if parsed.non_numeric > 0 {
                    self.events.record(EventKind::NonNumericCells {
                        dataset: dataset.clone(),
                        count: parsed.non_numeric,
                    });
                }
                let rows = parsed.shard.rows();
                let columns = parsed.shard.column_count();
                let chunks = parsed.shard.chunk_count();
                if let Err(e) = self.with_store(|store| store.stage(&dataset, parsed.shard)) {
                    return store_error(e);
                }
                debug!(
                    "Node {} staged {} rows x {} columns of {} in {}ms",
                    self.id, rows, columns, dataset, parse_ms
                );
                self.events.record(EventKind::ShardParsed {
                    dataset,
                    rows,
                    parse_ms,
                });
                NodeResponse::ShardParsed {
                    rows,
                    columns,
                    chunks,
                    parse_ms,
                }
            }
            NodeRequest::CommitDataset { dataset } => {
                match self.with_store(|store| store.commit(&dataset)) {
                    Ok(()) => {
                        self.events.record(EventKind::DatasetCommitted { dataset });
                        NodeResponse::Ack
                    }
                    Err(e) => store_error(e),
                }
            }
            NodeRequest::DropDataset { dataset } => {
                let dropped = self
                    .store
                    .lock()
                    .map(|mut store| store.drop_dataset(&dataset))
                    .unwrap_or(false);
                if dropped {
                    self.events.record(EventKind::DatasetDropped { dataset });
                }
                NodeResponse::Ack
            }
            NodeRequest::PartialReduce {
                dataset,
                column,
                op,
            } => {
                // Reduce a snapshot outside the store lock
                let result = self
                    .with_store(|store| store.shard(&dataset))
                    .and_then(|shard| shard.partial(column, op));
                match result {
                    Ok(partial) => NodeResponse::Partial { column, partial },
                    Err(e) => {
                        self.events.record(EventKind::ReduceFailed {
                            dataset,
                            column,
                            reason: e.to_string(),
                        });
                        store_error(e)
                    }
                }
            }
            NodeRequest::Inspect { dataset } => {
                match self.with_store(|store| store.shard(&dataset)) {
                    Ok(shard) => NodeResponse::Inspection {
                        summary: shard.summary(),
                    },
                    Err(e) => store_error(e),
                }
            }
            NodeRequest::DrainEvents => NodeResponse::Events {
                events: self.events.drain(),
            },
            NodeRequest::Shutdown => {
                let dropped = self
                    .store
                    .lock()
                    .map(|mut store| store.drop_prefix(""))
                    .unwrap_or(0);
                debug!("Node {} shutting down, dropped {} datasets", self.id, dropped);
                self.events.record(EventKind::Shutdown);
                NodeResponse::Ack
            }
        }
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut ShardStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        match self.store.lock() {
            Ok(mut store) => f(&mut store),
            // A panic mid-request leaves the store usable; recover it
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

fn store_error(error: StoreError) -> NodeResponse {
    let kind = match error {
        StoreError::UnknownDataset(_) => NodeErrorKind::UnknownDataset,
        StoreError::AlreadyExists(_) => NodeErrorKind::AlreadyExists,
        StoreError::ColumnOutOfRange { .. } => NodeErrorKind::ColumnOutOfRange,
        StoreError::RaggedRow { .. } => NodeErrorKind::Parse,
        StoreError::NotStaged(_) => NodeErrorKind::Internal,
    };
    NodeResponse::error(kind, error.to_string())
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
