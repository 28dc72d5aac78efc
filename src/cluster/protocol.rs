//! Coordinator/worker message types
//!
//! The same enums travel over in-process channels and, as newline-delimited
//! JSON, over TCP.

use serde::{Deserialize, Serialize};

use super::NodeId;
use crate::error::HarnessError;
use crate::health::NodeEvent;
use crate::import::{FileSegment, ParseSetup};
use crate::reduce::{Partial, ReduceOp};
use crate::store::ShardSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeRequest {
    Ping,
    ParseShard {
        dataset: String,
        segments: Vec<FileSegment>,
        setup: ParseSetup,
    },
    CommitDataset {
        dataset: String,
    },
    DropDataset {
        dataset: String,
    },
    PartialReduce {
        dataset: String,
        column: usize,
        op: ReduceOp,
    },
    Inspect {
        dataset: String,
    },
    DrainEvents,
    /// Drop every dataset and stop serving
    Shutdown,
}

impl NodeRequest {
    pub fn name(&self) -> &'static str {
        match self {
            NodeRequest::Ping => "ping",
            NodeRequest::ParseShard { .. } => "parse_shard",
            NodeRequest::CommitDataset { .. } => "commit_dataset",
            NodeRequest::DropDataset { .. } => "drop_dataset",
            NodeRequest::PartialReduce { .. } => "partial_reduce",
            NodeRequest::Inspect { .. } => "inspect",
            NodeRequest::DrainEvents => "drain_events",
            NodeRequest::Shutdown => "shutdown",
        }
    }
}

/// One message on a TCP connection; a reply carries its request's id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame<T> {
    pub id: u64,
    pub message: T,
}

/// Class of a failure the node reported while staying healthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorKind {
    UnknownDataset,
    AlreadyExists,
    ColumnOutOfRange,
    Parse,
    Io,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeResponse {
    Pong {
        name: String,
    },
    ShardParsed {
        rows: usize,
        columns: usize,
        chunks: usize,
        parse_ms: u64,
    },
    Ack,
    Partial {
        column: usize,
        partial: Partial,
    },
    Inspection {
        summary: ShardSummary,
    },
    Events {
        events: Vec<NodeEvent>,
    },
    Error {
        kind: NodeErrorKind,
        message: String,
    },
}

impl NodeResponse {
    pub fn error(kind: NodeErrorKind, message: impl Into<String>) -> Self {
        NodeResponse::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeResponse::Pong { .. } => "pong",
            NodeResponse::ShardParsed { .. } => "shard_parsed",
            NodeResponse::Ack => "ack",
            NodeResponse::Partial { .. } => "partial",
            NodeResponse::Inspection { .. } => "inspection",
            NodeResponse::Events { .. } => "events",
            NodeResponse::Error { .. } => "error",
        }
    }

    /// Turn a response that was not the expected one into an error
    pub fn into_error(self, node: NodeId, dataset: &str) -> HarnessError {
        match self {
            NodeResponse::Error { kind, message } => match kind {
                NodeErrorKind::Parse | NodeErrorKind::Io => HarnessError::Parse {
                    key: dataset.to_string(),
                    node,
                    reason: message,
                },
                NodeErrorKind::UnknownDataset => HarnessError::UnknownDataset {
                    key: dataset.to_string(),
                    state: format!("missing on node {}: {}", node, message),
                },
                _ => HarnessError::node_failure(node, message),
            },
            other => HarnessError::node_failure(
                node,
                format!("unexpected '{}' response", other.kind_name()),
            ),
        }
    }
}
