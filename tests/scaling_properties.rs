//! Property: reduce(D x m)[c] == m x reduce(D)[c]

mod common;

use proptest::prelude::*;

use common::{rows_to_csv, Harness, TestContextBuilder};
use sumcheck::reduce::{Decimal, Scalar};
use sumcheck::verify::verify_scaling;

fn scaled(value: &Scalar, m: usize) -> Scalar {
    match value {
        Scalar::Exact(d) => Scalar::Exact(d.checked_mul_int(m as i128).unwrap()),
        other => *other,
    }
}

/// Import `csv` and its `m`-fold replica, return both sum vectors
fn reduce_pair(csv: &str, m: usize, nodes: usize) -> (Vec<Scalar>, Vec<Scalar>, bool) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let datasets = TestContextBuilder::new()
            .with_scaled("d.csv", csv, m)
            .build();
        let harness = Harness::local(nodes).await;
        harness.import(datasets.path(), "d.csv", "base").await.unwrap();
        harness
            .import(datasets.path(), &common::scaled_name("d.csv", m), "scaled")
            .await
            .unwrap();
        let base = harness.sums("base").await.unwrap();
        let replica = harness.sums("scaled").await.unwrap();
        let verified = verify_scaling(&[(base.clone(), 1.0), (replica.clone(), m as f64)]).is_ok();
        harness.cluster.teardown().await;
        (base.values, replica.values, verified)
    })
}

fn table() -> impl Strategy<Value = Vec<Vec<i64>>> {
    (1usize..5).prop_flat_map(|columns| {
        prop::collection::vec(
            prop::collection::vec(-1_000_000_000i64..1_000_000_000, columns),
            1..40,
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_integer_columns_scale(rows in table(), m in 1usize..5, nodes in 1usize..5) {
        let (base, replica, verified) = reduce_pair(&rows_to_csv(&rows), m, nodes);
        prop_assert_eq!(base.len(), replica.len());
        for (b, r) in base.iter().zip(&replica) {
            prop_assert_eq!(&scaled(b, m), r);
        }
        prop_assert!(verified);

        // Against a direct sum of the table
        for (column, b) in base.iter().enumerate() {
            let direct: i128 = rows.iter().map(|row| row[column] as i128).sum();
            prop_assert_eq!(b, &Scalar::from_int(direct));
        }
    }

    #[test]
    fn prop_decimal_columns_scale(
        cents in prop::collection::vec(-10_000_000i64..10_000_000, 1..40),
        m in 1usize..5,
    ) {
        let csv: String = cents
            .iter()
            .map(|c| format!("{}\n", Decimal::new(*c as i128, -2)))
            .collect();
        let (base, replica, verified) = reduce_pair(&csv, m, 3);
        let direct: i128 = cents.iter().map(|c| *c as i128).sum();
        prop_assert_eq!(&base[0], &Scalar::Exact(Decimal::new(direct, -2)));
        prop_assert_eq!(&replica[0], &scaled(&base[0], m));
        prop_assert!(verified);
    }
}
