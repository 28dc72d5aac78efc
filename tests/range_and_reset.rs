//! Column ranges, zero resets and reduction submission

mod common;

use common::{base_rows, rows_to_csv, Harness, TestContextBuilder, TIMEOUT};
use sumcheck::keys::ResultKey;
use sumcheck::reduce::{ColumnSelector, ReduceOp, ReductionSpec, Scalar};
use sumcheck::HarnessError;

async fn imported() -> (Harness, sumcheck::testing::TestDatasets) {
    let datasets = TestContextBuilder::new()
        .with_file("d.csv", &rows_to_csv(&base_rows()))
        .build();
    let harness = Harness::local(2).await;
    harness.import(datasets.path(), "d.csv", "cA").await.unwrap();
    (harness, datasets)
}

#[tokio::test]
async fn test_empty_range_returns_empty_vector() {
    let (harness, _datasets) = imported().await;
    let scope = harness.engine.zero_reset();
    let vector = harness
        .engine
        .reduce_columns(&harness.cluster, "cA", ReductionSpec::sum_each(), 2, 2, scope, TIMEOUT)
        .await
        .unwrap();
    assert!(vector.is_empty());
    assert_eq!(vector.min_col, 2);
    harness.cluster.teardown().await;
}

#[tokio::test]
async fn test_out_of_range_columns_rejected() {
    let (harness, _datasets) = imported().await;
    for (min, max) in [(4, 4), (0, 4), (2, 1)] {
        let scope = harness.engine.zero_reset();
        let err = harness
            .engine
            .reduce_columns(
                &harness.cluster,
                "cA",
                ReductionSpec::sum_each(),
                min,
                max,
                scope,
                TIMEOUT,
            )
            .await
            .unwrap_err();
        match err {
            HarnessError::ColumnRange {
                min_col,
                max_col,
                column_count,
                ..
            } => {
                assert_eq!((min_col, max_col, column_count), (min, max, 3));
            }
            other => panic!("unexpected error for [{min}, {max}): {other}"),
        }
    }
    harness.cluster.teardown().await;
}

#[tokio::test]
async fn test_sub_range_is_indexed_by_column() {
    let (harness, _datasets) = imported().await;
    let scope = harness.engine.zero_reset();
    let vector = harness
        .engine
        .reduce_columns(&harness.cluster, "cA", ReductionSpec::sum_each(), 1, 3, scope, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(vector.get(1), Some(&Scalar::from_int(5)));
    assert_eq!(vector.get(2), Some(&Scalar::from_int(13)));
    assert_eq!(vector.get(0), None);
    // Results were stored under their column's key
    assert_eq!(
        harness.registry.result(&ResultKey::column(2)),
        Some(Scalar::from_int(13))
    );
    harness.cluster.teardown().await;
}

#[tokio::test]
async fn test_zero_reset_is_idempotent() {
    let (harness, _datasets) = imported().await;
    harness.engine.zero_reset();
    let first = harness.registry.result_count();
    let scope = harness.engine.zero_reset();
    assert_eq!(harness.registry.result_count(), first);
    assert_eq!(
        harness.registry.result(&ResultKey::column(0)),
        Some(Scalar::zero())
    );

    let vector = harness
        .engine
        .reduce_columns(&harness.cluster, "cA", ReductionSpec::sum_each(), 0, 3, scope, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(vector.values[0], Scalar::from_int(179));
    harness.cluster.teardown().await;
}

#[tokio::test]
async fn test_stale_scope_is_rejected() {
    let (harness, _datasets) = imported().await;
    let stale = harness.engine.zero_reset();
    let _fresh = harness.engine.zero_reset();
    let err = harness
        .engine
        .reduce_columns(&harness.cluster, "cA", ReductionSpec::sum_each(), 0, 3, stale, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::StaleResultScope { .. }));
    harness.cluster.teardown().await;
}

#[tokio::test]
async fn test_submit_returns_one_vector_per_spec() {
    let (harness, _datasets) = imported().await;
    let specs = [
        ReductionSpec::sum_each(),
        ReductionSpec::sum_of(0),
        ReductionSpec::new(ReduceOp::Min, ColumnSelector::Each),
    ];
    let vectors = harness
        .engine
        .submit(&harness.cluster, "cA", &specs, 0, 3, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[1].values, vec![Scalar::from_int(179); 3]);
    assert_eq!(
        vectors[2].values,
        vec![Scalar::from_int(9), Scalar::from_int(-2), Scalar::from_int(-5)]
    );
    harness.cluster.teardown().await;
}

#[tokio::test]
async fn test_unknown_dataset() {
    let (harness, _datasets) = imported().await;
    let scope = harness.engine.zero_reset();
    let err = harness
        .engine
        .reduce_columns(&harness.cluster, "nope", ReductionSpec::sum_each(), 0, 1, scope, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::UnknownDataset { .. }));
    harness.cluster.teardown().await;
}
