//! Results never depend on which node answers first

mod common;

use std::time::Duration;

use common::{rows_to_csv, Harness, TestContextBuilder};
use sumcheck::cluster::{NodeId, Provisioner};
use sumcheck::testing::ScriptedCluster;

fn dataset() -> String {
    let rows: Vec<Vec<i64>> = (0..60)
        .map(|i| vec![i * 7 - 100, (i % 5) * 1_000_003, -i])
        .collect();
    rows_to_csv(&rows) + "0.125,-3.5,17.75\n"
}

async fn sums_on(scripted: &ScriptedCluster, folder: &std::path::Path) -> Vec<String> {
    let cluster = scripted.provision().await.unwrap();
    let harness = Harness::on(cluster.clone());
    harness.import(folder, "d.csv", "cA").await.unwrap();
    let vector = harness.sums("cA").await.unwrap();
    cluster.teardown().await;
    vector.values.iter().map(|v| v.to_string()).collect()
}

#[tokio::test]
async fn test_permuted_completion_order_yields_identical_vectors() {
    let datasets = TestContextBuilder::new()
        .with_file("d.csv", &dataset())
        .build();

    let prompt = ScriptedCluster::new(3);
    let reversed = ScriptedCluster::new(3)
        .with_delay(0, Duration::from_millis(60))
        .with_delay(1, Duration::from_millis(30));

    let expected = sums_on(&prompt, datasets.path()).await;
    let observed = sums_on(&reversed, datasets.path()).await;
    assert_eq!(expected, observed);

    // With delays the last node finished first
    let completions = reversed.completions();
    assert_eq!(completions.len(), 9);
    assert_eq!(completions[0], NodeId(2));
    assert_eq!(completions.last(), Some(&NodeId(0)));
}

#[tokio::test]
async fn test_node_count_does_not_change_results() {
    let datasets = TestContextBuilder::new()
        .with_file("d.csv", &dataset())
        .build();
    let one = sums_on(&ScriptedCluster::new(1), datasets.path()).await;
    let four = sums_on(&ScriptedCluster::new(4), datasets.path()).await;
    let seven = sums_on(&ScriptedCluster::new(7), datasets.path()).await;
    assert_eq!(one, four);
    assert_eq!(four, seven);
}
