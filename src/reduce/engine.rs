use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::partial::{Combine, Partial};
use super::results::ColumnResultVector;
use super::scalar::Scalar;
use super::spec::ReductionSpec;
use crate::cluster::{ClusterHandle, NodeRequest, NodeResponse};
use crate::error::{HarnessError, Result};
use crate::keys::{KeyRegistry, ResultScope};

/// Evaluates typed reductions column by column across the cluster
pub struct ReductionEngine {
    registry: Arc<KeyRegistry>,
    max_in_flight: usize,
}

impl ReductionEngine {
    pub fn new(registry: Arc<KeyRegistry>, max_in_flight: usize) -> Self {
        Self {
            registry,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Clear the result namespace; the scope authorizes one reduction
    pub fn zero_reset(&self) -> ResultScope {
        self.registry.zero_reset()
    }

    /// Reduce every column position in `[min_col, max_col)` of `key`
    ///
    /// Every node reduces its shard of the column; partials are folded in
    /// node order, so the result never depends on completion order. A node
    /// failure fails the whole call, as does running past `timeout`.
    #[allow(clippy::too_many_arguments)]
    pub async fn reduce_columns(
        &self,
        cluster: &ClusterHandle,
        key: &str,
        spec: ReductionSpec,
        min_col: usize,
        max_col: usize,
        scope: ResultScope,
        timeout: Duration,
    ) -> Result<ColumnResultVector> {
        self.registry.check_scope(&scope)?;
        cluster.ensure_operational()?;
        let metadata = self.registry.dataset(key)?;
        validate_range(key, &spec, min_col, max_col, metadata.column_count)?;

        if min_col == max_col {
            return Ok(ColumnResultVector::new(key, spec, min_col, Vec::new()));
        }

        let dataset = self.registry.qualified(key);
        let total = max_col - min_col;
        debug!(
            "Reducing {} over columns [{}, {}) of '{}' on {} nodes",
            spec,
            min_col,
            max_col,
            key,
            cluster.size()
        );

        let mut columns = stream::iter(min_col..max_col)
            .map(|position| {
                let dataset = dataset.as_str();
                async move {
                    let column = spec.column.resolve(position);
                    let partial = reduce_one(cluster, dataset, key, column, spec).await;
                    (position, column, partial)
                }
            })
            .buffer_unordered(self.max_in_flight);

        let mut completed = 0;
        let outcome = tokio::time::timeout(timeout, async {
            while let Some((position, column, partial)) = columns.next().await {
                let value = partial.map_err(|e| e.with_location(key, Some(column)))?;
                self.registry.write_result(&scope, position, value)?;
                completed += 1;
            }
            Ok::<(), HarnessError>(())
        })
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(HarnessError::ReductionTimeout {
                    key: key.to_string(),
                    timeout,
                    completed,
                    total,
                })
            }
        }

        let values = self.registry.read_results(&scope, min_col..max_col)?;
        info!("Reduced {} over {} columns of '{}'", spec, values.len(), key);
        Ok(ColumnResultVector::new(key, spec, min_col, values))
    }

    /// One zero reset and one reduction per spec, in order
    pub async fn submit(
        &self,
        cluster: &ClusterHandle,
        key: &str,
        specs: &[ReductionSpec],
        min_col: usize,
        max_col: usize,
        timeout: Duration,
    ) -> Result<Vec<ColumnResultVector>> {
        let mut vectors = Vec::with_capacity(specs.len());
        for spec in specs {
            let scope = self.zero_reset();
            vectors.push(
                self.reduce_columns(cluster, key, *spec, min_col, max_col, scope, timeout)
                    .await?,
            );
        }
        Ok(vectors)
    }
}

fn validate_range(
    key: &str,
    spec: &ReductionSpec,
    min_col: usize,
    max_col: usize,
    column_count: usize,
) -> Result<()> {
    let out_of_range = || HarnessError::ColumnRange {
        key: key.to_string(),
        min_col,
        max_col,
        column_count,
    };
    if min_col > max_col || max_col > column_count {
        return Err(out_of_range());
    }
    if min_col < max_col && spec.column.resolve(min_col) >= column_count {
        return Err(out_of_range());
    }
    Ok(())
}

/// Fan one column out to every node and fold the partials in node order
async fn reduce_one(
    cluster: &ClusterHandle,
    dataset: &str,
    key: &str,
    column: usize,
    spec: ReductionSpec,
) -> Result<Scalar> {
    let calls = cluster.node_ids().map(|node| {
        let request = NodeRequest::PartialReduce {
            dataset: dataset.to_string(),
            column,
            op: spec.op,
        };
        async move { (node, cluster.call(node, request).await) }
    });

    let mut partials = Vec::with_capacity(cluster.size());
    for (node, result) in join_all(calls).await {
        match result? {
            NodeResponse::Partial {
                column: answered,
                partial,
            } if answered == column && partial.op() == spec.op => partials.push(partial),
            NodeResponse::Partial { .. } => {
                return Err(HarnessError::node_failure(
                    node,
                    format!(
                        "answered with a partial for a different column or operator than {}",
                        spec
                    ),
                ))
            }
            other => return Err(other.into_error(node, key)),
        }
    }
    Ok(Partial::identity(spec.op).combine_all(partials).finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduce::ColumnSelector;
    use crate::reduce::ReduceOp;

    #[test]
    fn test_range_validation() {
        let spec = ReductionSpec::sum_each();
        assert!(validate_range("k", &spec, 0, 55, 55).is_ok());
        assert!(validate_range("k", &spec, 55, 55, 55).is_ok());
        assert!(validate_range("k", &spec, 3, 2, 55).is_err());
        assert!(validate_range("k", &spec, 0, 56, 55).is_err());
        assert!(validate_range("k", &spec, 60, 60, 55).is_err());

        let fixed = ReductionSpec::new(ReduceOp::Sum, ColumnSelector::Fixed(55));
        assert!(validate_range("k", &fixed, 0, 1, 55).is_err());
        // Empty ranges never read the fixed column
        assert!(validate_range("k", &fixed, 0, 0, 55).is_ok());
    }
}
