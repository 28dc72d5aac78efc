//! Node crashes, timeouts and teardown guarantees

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{base_rows, rows_to_csv, Harness, TestContextBuilder};
use sumcheck::cluster::{with_cluster, Provisioner};
use sumcheck::config::DatasetEntry;
use sumcheck::harness::HarnessRunner;
use sumcheck::reduce::ReductionSpec;
use sumcheck::testing::ScriptedCluster;
use sumcheck::HarnessError;

#[tokio::test]
async fn test_crash_mid_reduction_fails_with_node_failure() {
    let csv = rows_to_csv(&base_rows());
    let datasets = TestContextBuilder::new().with_file("d.csv", &csv).build();

    // Node 1 answers two column reductions, then drops off
    let scripted = ScriptedCluster::new(3).with_crash_after_reductions(1, 2);
    let seen = with_cluster(&scripted, |cluster| async move {
        let harness = Harness::on(cluster.clone());
        harness.import(datasets.path(), "d.csv", "cA").await?;
        let err = harness.sums("cA").await.unwrap_err();
        Ok::<_, HarnessError>((cluster, err))
    })
    .await;

    let (cluster, err) = seen.unwrap();
    match err {
        HarnessError::NodeFailure {
            node,
            dataset,
            column,
            ..
        } => {
            assert_eq!(node.0, 1);
            assert_eq!(dataset.as_deref(), Some("cA"));
            assert!(column.is_some());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(cluster.teardown_count(), 1);
    assert!(cluster.is_torn_down());
    // The crashed node is not asked to shut down
    assert_eq!(scripted.shutdown_count(), 2);
}

#[tokio::test]
async fn test_degraded_cluster_refuses_work() {
    let csv = rows_to_csv(&base_rows());
    let datasets = TestContextBuilder::new().with_file("d.csv", &csv).build();
    let scripted = ScriptedCluster::new(2).with_crash_after_reductions(0, 0);
    let cluster = scripted.provision().await.unwrap();
    let harness = Harness::on(cluster.clone());

    harness.import(datasets.path(), "d.csv", "cA").await.unwrap();
    assert!(harness.sums("cA").await.is_err());

    let err = harness.import(datasets.path(), "d.csv", "cB").await.unwrap_err();
    assert!(matches!(err, HarnessError::ClusterDegraded { .. }));
    assert!(err.requires_rebuild());
    cluster.teardown().await;
}

#[tokio::test]
async fn test_runner_tears_down_once_after_crash() {
    let csv = rows_to_csv(&base_rows());
    let datasets = TestContextBuilder::new().with_file("d.csv", &csv).build();
    let config = datasets.config(vec![
        DatasetEntry::new("d.csv", "cA"),
        DatasetEntry::new("d.csv", "cB"),
    ]);

    let scripted = ScriptedCluster::new(3).with_crash_after_reductions(2, 4);
    let err = HarnessRunner::new(config)
        .run_with(&scripted)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::NodeFailure { .. }));
    assert_eq!(scripted.provision_count(), 1);
    assert_eq!(scripted.shutdown_count(), 2);
}

#[tokio::test]
async fn test_import_timeout_poisons_key() {
    let csv = rows_to_csv(&base_rows());
    let datasets = TestContextBuilder::new().with_file("d.csv", &csv).build();
    let scripted = ScriptedCluster::new(2).with_delay(1, Duration::from_millis(500));
    let cluster = scripted.provision().await.unwrap();
    let harness = Harness::on(cluster.clone());

    let source = harness.registry.stage(datasets.path(), "d.csv").unwrap();
    let err = harness
        .importer
        .import(&cluster, source, "cA", Duration::from_millis(50))
        .await
        .unwrap_err();
    match &err {
        HarnessError::ImportTimeout {
            key,
            completed,
            total,
            ..
        } => {
            assert_eq!(key, "cA");
            assert_eq!(*total, 2);
            assert!(*completed < 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());

    assert!(matches!(
        harness.registry.dataset("cA"),
        Err(HarnessError::UnknownDataset { .. })
    ));
    let err = harness.import(datasets.path(), "d.csv", "cA").await.unwrap_err();
    assert!(matches!(err, HarnessError::DuplicateKey { .. }));
    cluster.teardown().await;
}

#[tokio::test]
async fn test_import_timeout_does_not_wait_for_stalled_node() {
    let csv = rows_to_csv(&base_rows());
    let datasets = TestContextBuilder::new().with_file("d.csv", &csv).build();
    let scripted = ScriptedCluster::new(2)
        .with_request_delay(1, "parse_shard", Duration::from_secs(3))
        .with_request_delay(1, "drop_dataset", Duration::from_secs(3));
    let cluster = scripted.provision().await.unwrap();
    let harness = Harness::on(cluster.clone());

    let source = harness.registry.stage(datasets.path(), "d.csv").unwrap();
    let started = Instant::now();
    let err = harness
        .importer
        .import(&cluster, source, "cA", Duration::from_millis(50))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, HarnessError::ImportTimeout { .. }), "{err}");
    assert!(elapsed < Duration::from_secs(1), "import took {elapsed:?}");
    cluster.teardown().await;
}

#[tokio::test]
async fn test_hung_commit_is_bounded_by_import_timeout() {
    let csv = rows_to_csv(&base_rows());
    let datasets = TestContextBuilder::new().with_file("d.csv", &csv).build();
    let scripted = ScriptedCluster::new(2)
        .with_request_delay(1, "commit_dataset", Duration::from_secs(3))
        .with_request_delay(1, "drop_dataset", Duration::from_secs(3));
    let cluster = scripted.provision().await.unwrap();
    let harness = Harness::on(cluster.clone());

    let source = harness.registry.stage(datasets.path(), "d.csv").unwrap();
    let started = Instant::now();
    let err = harness
        .importer
        .import(&cluster, source, "cA", Duration::from_millis(500))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    match &err {
        HarnessError::ImportTimeout {
            key,
            completed,
            total,
            ..
        } => {
            assert_eq!(key, "cA");
            assert_eq!(*total, 2);
            assert!(*completed < 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(elapsed < Duration::from_secs(2), "import took {elapsed:?}");

    // Node 0 committed before the timeout; its shard must not become visible
    assert!(matches!(
        harness.registry.dataset("cA"),
        Err(HarnessError::UnknownDataset { .. })
    ));
    let err = harness.import(datasets.path(), "d.csv", "cA").await.unwrap_err();
    assert!(matches!(err, HarnessError::DuplicateKey { .. }));
    cluster.teardown().await;
}

#[tokio::test]
async fn test_reduction_timeout_returns_no_vector() {
    let csv = rows_to_csv(&base_rows());
    let datasets = TestContextBuilder::new().with_file("d.csv", &csv).build();
    let scripted = ScriptedCluster::new(2).with_delay(0, Duration::from_millis(200));
    let cluster = scripted.provision().await.unwrap();
    let harness = Harness::on(cluster.clone());
    harness.import(datasets.path(), "d.csv", "cA").await.unwrap();

    let scope = harness.engine.zero_reset();
    let err = harness
        .engine
        .reduce_columns(
            &cluster,
            "cA",
            ReductionSpec::sum_each(),
            0,
            3,
            scope,
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::ReductionTimeout { total: 3, .. }
    ));
    cluster.teardown().await;
}

#[tokio::test]
async fn test_unreachable_node_fails_before_body() {
    let scripted = ScriptedCluster::new(2).with_unreachable(0);
    let ran = AtomicBool::new(false);
    let result = with_cluster(&scripted, |_cluster| async {
        ran.store(true, Ordering::SeqCst);
        Ok(())
    })
    .await;
    assert!(matches!(result, Err(HarnessError::Provision { .. })));
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_panic_in_body_still_tears_down() {
    let scripted = Arc::new(ScriptedCluster::new(3));
    let task = {
        let scripted = scripted.clone();
        tokio::spawn(async move {
            with_cluster(scripted.as_ref(), |cluster| async move {
                if cluster.size() == 3 {
                    panic!("assertion failed inside the session");
                }
                Ok(())
            })
            .await
        })
    };
    let joined = task.await;
    assert!(joined.unwrap_err().is_panic());
    assert_eq!(scripted.shutdown_count(), 3);
}
