//! Structured per-node events
//!
//! Every node records what it does as typed events. In-process nodes forward
//! them straight onto the cluster's broadcast channel; remote nodes buffer
//! them until the coordinator drains the buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::cluster::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    NodeStarted { name: String },
    ShardParsed { dataset: String, rows: usize, parse_ms: u64 },
    ParseFailed { dataset: String, reason: String },
    NonNumericCells { dataset: String, count: usize },
    DatasetCommitted { dataset: String },
    DatasetDropped { dataset: String },
    ReduceFailed { dataset: String, column: usize, reason: String },
    RequestFailed { request: String, reason: String },
    Unreachable { reason: String },
    Shutdown,
}

impl EventKind {
    pub fn severity(&self) -> Severity {
        match self {
            EventKind::ParseFailed { .. }
            | EventKind::ReduceFailed { .. }
            | EventKind::RequestFailed { .. }
            | EventKind::Unreachable { .. } => Severity::Error,
            EventKind::NonNumericCells { .. } => Severity::Warn,
            _ => Severity::Info,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            EventKind::NodeStarted { name } => format!("node '{}' started", name),
            EventKind::ShardParsed {
                dataset,
                rows,
                parse_ms,
            } => format!("parsed {} rows of {} in {}ms", rows, dataset, parse_ms),
            EventKind::ParseFailed { dataset, reason } => {
                format!("parse of {} failed: {}", dataset, reason)
            }
            EventKind::NonNumericCells { dataset, count } => {
                format!("{} non-numeric cells in {} read as NA", count, dataset)
            }
            EventKind::DatasetCommitted { dataset } => format!("committed {}", dataset),
            EventKind::DatasetDropped { dataset } => format!("dropped {}", dataset),
            EventKind::ReduceFailed {
                dataset,
                column,
                reason,
            } => format!("reduction of {} column {} failed: {}", dataset, column, reason),
            EventKind::RequestFailed { request, reason } => {
                format!("{} request failed: {}", request, reason)
            }
            EventKind::Unreachable { reason } => format!("node unreachable: {}", reason),
            EventKind::Shutdown => "shut down".to_string(),
        }
    }
}

/// One structured event emitted by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub node: NodeId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl NodeEvent {
    pub fn new(node: NodeId, seq: u64, kind: EventKind) -> Self {
        Self {
            node,
            seq,
            timestamp: Utc::now(),
            severity: kind.severity(),
            kind,
        }
    }
}

enum Sink {
    Forward(broadcast::Sender<NodeEvent>),
    Buffer(Mutex<Vec<NodeEvent>>),
}

/// Event recorder owned by one worker
pub struct EventLog {
    node: NodeId,
    seq: AtomicU64,
    sink: Sink,
}

impl EventLog {
    /// Publish events straight onto a cluster channel
    pub fn forwarding(node: NodeId, sender: broadcast::Sender<NodeEvent>) -> Self {
        Self {
            node,
            seq: AtomicU64::new(0),
            sink: Sink::Forward(sender),
        }
    }

    /// Hold events until drained
    pub fn buffered(node: NodeId) -> Self {
        Self {
            node,
            seq: AtomicU64::new(0),
            sink: Sink::Buffer(Mutex::new(Vec::new())),
        }
    }

    pub fn record(&self, kind: EventKind) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = NodeEvent::new(self.node, seq, kind);
        match &self.sink {
            // No subscribers is fine
            Sink::Forward(sender) => {
                let _ = sender.send(event);
            }
            Sink::Buffer(buffer) => {
                if let Ok(mut events) = buffer.lock() {
                    events.push(event);
                }
            }
        }
    }

    /// Take buffered events; forwarding logs have none
    pub fn drain(&self) -> Vec<NodeEvent> {
        match &self.sink {
            Sink::Forward(_) => Vec::new(),
            Sink::Buffer(buffer) => buffer
                .lock()
                .map(|mut events| std::mem::take(&mut *events))
                .unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.sink {
            Sink::Forward(_) => "forward",
            Sink::Buffer(_) => "buffer",
        };
        f.debug_struct("EventLog")
            .field("node", &self.node)
            .field("mode", &mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_log_drains_in_order() {
        let log = EventLog::buffered(NodeId(2));
        log.record(EventKind::DatasetCommitted {
            dataset: "s/cA".to_string(),
        });
        log.record(EventKind::Shutdown);
        let events = log.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[1].seq, 1);
        assert_eq!(events[1].node, NodeId(2));
        assert!(log.drain().is_empty());
    }

    #[test]
    fn test_forwarding_log_publishes() {
        let (tx, mut rx) = broadcast::channel(8);
        let log = EventLog::forwarding(NodeId(0), tx);
        log.record(EventKind::ReduceFailed {
            dataset: "s/cA".to_string(),
            column: 3,
            reason: "boom".to_string(),
        });
        let event = rx.try_recv().unwrap();
        assert_eq!(event.severity, Severity::Error);
        assert!(log.drain().is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let event = NodeEvent::new(
            NodeId(1),
            7,
            EventKind::NonNumericCells {
                dataset: "s/cA".to_string(),
                count: 4,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "non_numeric_cells");
        assert_eq!(json["severity"], "warn");
        let back: NodeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
