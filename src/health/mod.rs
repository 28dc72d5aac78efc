//! Cluster health monitoring over the structured event stream

pub mod events;

pub use events::{EventKind, EventLog, NodeEvent, Severity};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

use crate::cluster::{ClusterHandle, NodeId};
use crate::error::{HarnessError, Result};

/// An event that fails a verification run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    /// `None` for problems with the event stream itself
    pub node: Option<NodeId>,
    pub severity: Severity,
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Anomaly {
    fn from_event(event: &NodeEvent) -> Self {
        let kind = serde_json::to_value(&event.kind)
            .ok()
            .and_then(|v| v.get("kind").and_then(|k| k.as_str()).map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            node: Some(event.node),
            severity: event.severity,
            kind,
            message: event.kind.describe(),
            timestamp: event.timestamp,
        }
    }

    fn lagged(missed: u64) -> Self {
        Self {
            node: None,
            severity: Severity::Error,
            kind: "events_lost".to_string(),
            message: format!("{} events were dropped before they could be checked", missed),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "node {}: {}", node, self.message),
            None => write!(f, "cluster: {}", self.message),
        }
    }
}

/// Subscribes to a cluster's events and reports anomalies since the last check
pub struct HealthMonitor {
    receiver: broadcast::Receiver<NodeEvent>,
    strict: bool,
}

impl HealthMonitor {
    /// Start watching; only events published after this call are seen
    pub fn attach(cluster: &ClusterHandle, strict: bool) -> Self {
        Self {
            receiver: cluster.subscribe(),
            strict,
        }
    }

    fn is_anomalous(&self, severity: Severity) -> bool {
        severity == Severity::Error || (self.strict && severity == Severity::Warn)
    }

    /// Drain all events published since the previous check
    pub async fn check_for_anomalies(&mut self, cluster: &ClusterHandle) -> Vec<Anomaly> {
        cluster.flush_events().await;

        let mut anomalies = Vec::new();
        let mut seen = 0usize;
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    seen += 1;
                    if self.is_anomalous(event.severity) {
                        anomalies.push(Anomaly::from_event(&event));
                    } else if event.severity == Severity::Warn {
                        warn!("Node {}: {}", event.node, event.kind.describe());
                    }
                }
                Err(TryRecvError::Lagged(missed)) => anomalies.push(Anomaly::lagged(missed)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if anomalies.is_empty() {
            info!("Health check passed ({} events)", seen);
        } else {
            for anomaly in &anomalies {
                warn!("Anomaly: {}", anomaly);
            }
        }
        anomalies
    }

    /// Fail with `Anomalies` if the check finds anything
    pub async fn ensure_healthy(&mut self, cluster: &ClusterHandle) -> Result<()> {
        let anomalies = self.check_for_anomalies(cluster).await;
        if anomalies.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Anomalies { anomalies })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::build;
    use crate::config::ClusterConfig;

    #[tokio::test]
    async fn test_error_events_become_anomalies() {
        let cluster = build(&ClusterConfig::default()).await.unwrap();
        let mut monitor = HealthMonitor::attach(&cluster, false);
        assert!(monitor.check_for_anomalies(&cluster).await.is_empty());

        cluster.publish(
            NodeId(1),
            EventKind::ReduceFailed {
                dataset: "s/cA".to_string(),
                column: 4,
                reason: "column out of range".to_string(),
            },
        );
        cluster.publish(
            NodeId(0),
            EventKind::NonNumericCells {
                dataset: "s/cA".to_string(),
                count: 2,
            },
        );
        let anomalies = monitor.check_for_anomalies(&cluster).await;
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].node, Some(NodeId(1)));
        assert_eq!(anomalies[0].kind, "reduce_failed");
        assert!(anomalies[0].to_string().starts_with("node 1:"));

        // Already consumed
        assert!(monitor.ensure_healthy(&cluster).await.is_ok());
        cluster.teardown().await;
    }

    #[tokio::test]
    async fn test_strict_mode_promotes_warnings() {
        let cluster = build(&ClusterConfig::default()).await.unwrap();
        let mut monitor = HealthMonitor::attach(&cluster, true);
        cluster.publish(
            NodeId(0),
            EventKind::NonNumericCells {
                dataset: "s/cA".to_string(),
                count: 2,
            },
        );
        let err = monitor.ensure_healthy(&cluster).await.unwrap_err();
        assert!(matches!(err, HarnessError::Anomalies { .. }));
        cluster.teardown().await;
    }

    #[tokio::test]
    async fn test_lagging_subscriber_reports_lost_events() {
        let config = ClusterConfig {
            event_buffer: 16,
            ..ClusterConfig::default()
        };
        let cluster = build(&config).await.unwrap();
        let mut monitor = HealthMonitor::attach(&cluster, false);
        for _ in 0..40 {
            cluster.publish(NodeId(0), EventKind::Shutdown);
        }
        let anomalies = monitor.check_for_anomalies(&cluster).await;
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, "events_lost");
        cluster.teardown().await;
    }
}
