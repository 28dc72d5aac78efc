use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::parser::{first_line, split_file, FileSegment, ParseSetup};
use super::{DatasetMetadata, PartitionInfo};
use crate::cluster::{ClusterHandle, NodeId, NodeRequest, NodeResponse};
use crate::config::ImportOptions;
use crate::error::{HarnessError, Result};
use crate::keys::{KeyRegistry, Reservation, StagedSource};

/// Coordinator side of a partitioned import
pub struct Importer {
    registry: Arc<KeyRegistry>,
    options: ImportOptions,
}

/// Upper bound on dropping staged shards after a failed import
const CLEANUP_GRACE: Duration = Duration::from_secs(5);

struct ShardReport {
    node: NodeId,
    rows: usize,
    columns: usize,
    chunks: usize,
}

/// A failed fan-out and the nodes that had not answered when it failed
struct FanOutFailure {
    error: HarnessError,
    unanswered: Vec<NodeId>,
}

impl From<HarnessError> for FanOutFailure {
    fn from(error: HarnessError) -> Self {
        Self {
            error,
            unanswered: Vec::new(),
        }
    }
}

impl Importer {
    pub fn new(registry: Arc<KeyRegistry>, options: ImportOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Import `source` under `key`, visible only once every node has parsed its share
    ///
    /// `timeout` bounds parsing and commit together; cleanup after a failure
    /// gets a short grace period on top. On timeout or any node failure the
    /// staged shards are dropped and the key is poisoned; it cannot be
    /// imported again in this session.
    pub async fn import(
        &self,
        cluster: &ClusterHandle,
        source: StagedSource,
        key: &str,
        timeout: Duration,
    ) -> Result<DatasetMetadata> {
        cluster.ensure_operational()?;
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let grace = timeout.min(CLEANUP_GRACE);
        let reservation = self.registry.reserve(key, source)?;

        let plan = match self.plan(&reservation, cluster.size()) {
            Ok(plan) => plan,
            Err(e) => return Err(self.abandon(cluster, reservation, e.into(), grace).await),
        };
        let (setup, assignments) = plan;
        info!(
            "Importing {} files as '{}' on {} nodes ({:?} separated, header: {}, {} columns)",
            reservation.files().len(),
            key,
            cluster.size(),
            setup.separator,
            setup.has_header,
            setup.column_count
        );

        let reports = match self
            .parse_everywhere(cluster, &reservation, &setup, assignments, deadline, timeout)
            .await
        {
            Ok(reports) => reports,
            Err(failure) => return Err(self.abandon(cluster, reservation, failure, grace).await),
        };

        if let Some(bad) = reports
            .iter()
            .find(|r| r.rows > 0 && r.columns != setup.column_count)
        {
            let e = HarnessError::Parse {
                key: key.to_string(),
                node: bad.node,
                reason: format!(
                    "shard has {} columns, expected {}",
                    bad.columns, setup.column_count
                ),
            };
            return Err(self.abandon(cluster, reservation, e.into(), grace).await);
        }

        if let Err(failure) = self
            .commit_everywhere(cluster, &reservation, deadline, timeout)
            .await
        {
            return Err(self.abandon(cluster, reservation, failure, grace).await);
        }

        let qualified = reservation.qualified().to_string();
        let metadata = DatasetMetadata {
            key: key.to_string(),
            row_count: reports.iter().map(|r| r.rows).sum(),
            column_count: setup.column_count,
            parse_time_ms: started.elapsed().as_millis() as u64,
            partitions: reports
                .iter()
                .enumerate()
                .map(|(partition, r)| PartitionInfo {
                    partition,
                    node: r.node,
                    shard_key: qualified.clone(),
                    rows: r.rows,
                    chunks: r.chunks,
                })
                .collect(),
        };
        info!(
            "Imported '{}': {} rows x {} columns in {}ms",
            key, metadata.row_count, metadata.column_count, metadata.parse_time_ms
        );
        self.registry.commit(reservation, metadata.clone());
        Ok(metadata)
    }

    /// Sniff the first file and cut every file into one range per node
    fn plan(
        &self,
        reservation: &Reservation,
        nodes: usize,
    ) -> Result<(ParseSetup, Vec<Vec<FileSegment>>)> {
        let files = reservation.files();
        let first = files
            .first()
            .ok_or_else(|| HarnessError::internal("staged source has no files"))?;
        let line = first_line(first).map_err(|e| HarnessError::io(first, e))?;
        let setup = ParseSetup::sniff(
            &line,
            self.options.separator,
            self.options.header,
            self.options.chunk_rows,
        );

        let mut assignments = vec![Vec::new(); nodes];
        for file in files {
            let len = std::fs::metadata(file)
                .map_err(|e| HarnessError::io(file, e))?
                .len();
            for (node, segment) in split_file(file, len, nodes).into_iter().enumerate() {
                assignments[node].push(segment);
            }
        }
        Ok((setup, assignments))
    }

    async fn parse_everywhere(
        &self,
        cluster: &ClusterHandle,
        reservation: &Reservation,
        setup: &ParseSetup,
        assignments: Vec<Vec<FileSegment>>,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> std::result::Result<Vec<ShardReport>, FanOutFailure> {
        let key = reservation.key();
        let total = assignments.len();
        let mut pending: FuturesUnordered<_> = assignments
            .into_iter()
            .enumerate()
            .map(|(index, segments)| {
                let node = NodeId(index);
                let request = NodeRequest::ParseShard {
                    dataset: reservation.qualified().to_string(),
                    segments,
                    setup: setup.clone(),
                };
                async move { (node, cluster.call(node, request).await) }
            })
            .collect();

        let mut answered = BTreeSet::new();
        let mut reports = Vec::with_capacity(total);
        let outcome = tokio::time::timeout_at(deadline, async {
            while let Some((node, result)) = pending.next().await {
                answered.insert(node);
                match result? {
                    NodeResponse::ShardParsed {
                        rows,
                        columns,
                        chunks,
                        parse_ms,
                    } => {
                        debug!(
                            "Node {} parsed {} rows of '{}' in {}ms",
                            node, rows, key, parse_ms
                        );
                        reports.push(ShardReport {
                            node,
                            rows,
                            columns,
                            chunks,
                        });
                    }
                    other => return Err(other.into_error(node, key)),
                }
            }
            Ok::<(), HarnessError>(())
        })
        .await;

        let error = match outcome {
            Ok(Ok(())) => {
                reports.sort_by_key(|r| r.node);
                return Ok(reports);
            }
            Ok(Err(e)) => e.with_location(key, None),
            Err(_) => HarnessError::ImportTimeout {
                key: key.to_string(),
                timeout,
                completed: reports.len(),
                total,
            },
        };
        Err(FanOutFailure {
            error,
            unanswered: unanswered(cluster, &answered),
        })
    }

    /// Make the staged shards readable on every node
    async fn commit_everywhere(
        &self,
        cluster: &ClusterHandle,
        reservation: &Reservation,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> std::result::Result<(), FanOutFailure> {
        let key = reservation.key();
        let mut pending: FuturesUnordered<_> = cluster
            .node_ids()
            .map(|node| {
                let request = NodeRequest::CommitDataset {
                    dataset: reservation.qualified().to_string(),
                };
                async move { (node, cluster.call(node, request).await) }
            })
            .collect();

        let mut answered = BTreeSet::new();
        let outcome = tokio::time::timeout_at(deadline, async {
            while let Some((node, result)) = pending.next().await {
                answered.insert(node);
                match result {
                    Ok(NodeResponse::Ack) => {}
                    Ok(other) => return Err(other.into_error(node, key)),
                    Err(e) => return Err(e.with_location(key, None)),
                }
            }
            Ok::<(), HarnessError>(())
        })
        .await;

        let error = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => HarnessError::ImportTimeout {
                key: key.to_string(),
                timeout,
                completed: answered.len(),
                total: cluster.size(),
            },
        };
        Err(FanOutFailure {
            error,
            unanswered: unanswered(cluster, &answered),
        })
    }

    /// Best-effort cleanup after a failed import; returns the original error
    ///
    /// Nodes that never answered are skipped: they may still be busy with
    /// the abandoned request, and the poisoned key keeps whatever they stage
    /// later unreachable until shutdown.
    async fn abandon(
        &self,
        cluster: &ClusterHandle,
        reservation: Reservation,
        failure: FanOutFailure,
        grace: Duration,
    ) -> HarnessError {
        let FanOutFailure { error, unanswered } = failure;
        warn!("Import of '{}' failed: {}", reservation.key(), error);
        if !unanswered.is_empty() {
            warn!(
                "Nodes {:?} did not answer; their staged shards of '{}' are left until shutdown",
                unanswered,
                reservation.key()
            );
        }

        let down = cluster.down_nodes();
        if !cluster.is_torn_down() {
            let dataset = reservation.qualified().to_string();
            let drops = cluster
                .node_ids()
                .filter(|id| !down.contains(id) && !unanswered.contains(id))
                .map(|node| {
                    let request = NodeRequest::DropDataset {
                        dataset: dataset.clone(),
                    };
                    async move {
                        if let Err(e) = cluster.call(node, request).await {
                            debug!("Could not drop staged shard on node {}: {}", node, e);
                        }
                    }
                });
            if tokio::time::timeout(grace, join_all(drops)).await.is_err() {
                warn!(
                    "Cleanup of '{}' did not finish within {:?}",
                    reservation.key(),
                    grace
                );
            }
        }
        self.registry.poison(reservation, error.to_string());
        error
    }
}

fn unanswered(cluster: &ClusterHandle, answered: &BTreeSet<NodeId>) -> Vec<NodeId> {
    cluster
        .node_ids()
        .filter(|node| !answered.contains(node))
        .collect()
}
