use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use super::report::{DatasetReport, ExpressionReport, RunReport};
use super::session::Session;
use crate::cluster::{with_cluster, ClusterHandle, Provisioner};
use crate::config::{DatasetEntry, HarnessConfig};
use crate::error::{HarnessError, Result};
use crate::health::HealthMonitor;
use crate::reduce::ColumnResultVector;
use crate::verify::Verifier;

/// Drives the full import, reduce, verify and health loop for one config
pub struct HarnessRunner {
    config: HarnessConfig,
    report_path: Option<PathBuf>,
}

impl HarnessRunner {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            report_path: None,
        }
    }

    /// Also write the JSON report here, whether the run passes or not
    pub fn with_report(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run against the cluster described by the configuration
    pub async fn run(&self) -> Result<RunReport> {
        self.run_with(&self.config.cluster).await
    }

    /// Run against a cluster from `provisioner`; it is torn down on every exit path
    pub async fn run_with<P: Provisioner + ?Sized>(&self, provisioner: &P) -> Result<RunReport> {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        let plan = sample_datasets(&self.config.datasets, self.config.sample, seed);
        info!(
            "Verifying {} of {} datasets (seed {})",
            plan.len(),
            self.config.datasets.len(),
            seed
        );

        let mut report = RunReport::new(seed);
        let plan = plan.as_slice();
        let report_mut = &mut report;
        let result = with_cluster(provisioner, move |cluster| {
            self.run_session(cluster, plan, report_mut)
        })
        .await;
        report.finish(&result);
        info!("{}", report.summary());

        if let Some(path) = &self.report_path {
            if let Err(e) = report.write(path) {
                // A failed run's error matters more than its report
                if result.is_ok() {
                    return Err(e);
                }
                error!("Could not write report to {}: {}", path.display(), e);
            }
        }
        result.map(|()| report)
    }

    async fn run_session(
        &self,
        cluster: ClusterHandle,
        plan: &[&DatasetEntry],
        report: &mut RunReport,
    ) -> Result<()> {
        let session = Session::new(
            cluster.clone(),
            self.config.import.clone(),
            self.config.max_in_flight,
        );
        report.session = Some(session.id());
        report.nodes = cluster.size();

        let mut monitor = HealthMonitor::attach(&cluster, self.config.verification.strict_health);
        let verifier = Verifier::new(self.config.verification.tolerance);
        let mut baselines = Vec::with_capacity(self.config.expressions.len());

        for (cycle, entry) in plan.iter().enumerate() {
            info!(
                "Cycle {}/{}: '{}' from {} (x{})",
                cycle + 1,
                plan.len(),
                entry.key,
                entry.file,
                entry.multiplier
            );
            let outcome = self
                .run_cycle(&session, entry, &verifier, &mut baselines, report)
                .await;

            // Runs even after a failed cycle so the report shows what the nodes saw
            let anomalies = monitor.check_for_anomalies(&cluster).await;
            report.anomalies.extend(anomalies.iter().cloned());
            outcome?;
            if !anomalies.is_empty() {
                return Err(HarnessError::Anomalies { anomalies });
            }

            if !self.config.keep_datasets {
                session.drop_dataset(&entry.key).await?;
            }
        }
        Ok(())
    }

    async fn run_cycle(
        &self,
        session: &Session,
        entry: &DatasetEntry,
        verifier: &Verifier,
        baselines: &mut Vec<(ColumnResultVector, f64)>,
        report: &mut RunReport,
    ) -> Result<()> {
        let metadata = session
            .import(
                &self.config.import_folder,
                &entry.file,
                &entry.key,
                self.config.import_timeout,
            )
            .await?;
        let summary = session.inspect(&entry.key).await?;
        info!(
            "'{}' holds {} rows x {} columns ({} NA cells), parsed in {}ms",
            entry.key,
            summary.rows,
            metadata.column_count,
            summary.na_total(),
            metadata.parse_time_ms
        );

        let max_col = self.config.columns.max.unwrap_or(metadata.column_count);
        report
            .datasets
            .push(DatasetReport::new(entry, metadata, &summary));

        let vectors = session
            .engine()
            .submit(
                session.cluster(),
                &entry.key,
                &self.config.expressions,
                self.config.columns.min,
                max_col,
                entry.timeout,
            )
            .await?;

        for (index, vector) in vectors.into_iter().enumerate() {
            let multiplier = vector.spec.op.effective_multiplier(entry.multiplier);
            let mut expression = ExpressionReport::new(&vector, multiplier);
            debug!(
                "{} over '{}': {}",
                vector.spec,
                entry.key,
                vector
                    .values
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let checked = match baselines.get(index) {
                None => {
                    baselines.push((vector, multiplier));
                    Ok(())
                }
                Some((base, base_multiplier)) => verifier
                    .verify_scaling(&[(base.clone(), *base_multiplier), (vector, multiplier)])
                    .map(|mut scaling| {
                        expression.relation = scaling.relations.pop();
                    }),
            };

            if let Some(dataset) = report.datasets.last_mut() {
                dataset.expressions.push(expression);
            }
            if let Err(e) = checked {
                warn!("Verification of '{}' failed: {}", entry.key, e);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Pick `sample` datasets at random, keeping their configured order
fn sample_datasets(
    datasets: &[DatasetEntry],
    sample: Option<usize>,
    seed: u64,
) -> Vec<&DatasetEntry> {
    match sample {
        Some(amount) if amount < datasets.len() => {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut picked = rand::seq::index::sample(&mut rng, datasets.len(), amount).into_vec();
            picked.sort_unstable();
            picked.into_iter().map(|index| &datasets[index]).collect()
        }
        _ => datasets.iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entries(count: usize) -> Vec<DatasetEntry> {
        (0..count)
            .map(|i| DatasetEntry {
                file: format!("d{}.csv", i),
                key: format!("c{}", i),
                timeout: Duration::from_secs(5),
                multiplier: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_sampling_is_seeded_and_ordered() {
        let datasets = entries(10);
        let first: Vec<&str> = sample_datasets(&datasets, Some(4), 42)
            .iter()
            .map(|d| d.key.as_str())
            .collect();
        let second: Vec<&str> = sample_datasets(&datasets, Some(4), 42)
            .iter()
            .map(|d| d.key.as_str())
            .collect();
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort_by_key(|k| k[1..].parse::<usize>().unwrap());
        assert_eq!(first, sorted);
    }

    #[test]
    fn test_sampling_keeps_everything_when_not_limited() {
        let datasets = entries(3);
        assert_eq!(sample_datasets(&datasets, None, 1).len(), 3);
        assert_eq!(sample_datasets(&datasets, Some(5), 1).len(), 3);
    }
}
