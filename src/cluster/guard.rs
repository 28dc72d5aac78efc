//! Guaranteed cluster teardown
//!
//! `with_cluster` tears the cluster down on every exit path of its body,
//! including errors and panics.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

use super::{ClusterHandle, Provisioner};
use crate::error::Result;

/// Provision a cluster, run `body` against it, then always tear it down
pub async fn with_cluster<P, F, Fut, T>(provisioner: &P, body: F) -> Result<T>
where
    P: Provisioner + ?Sized,
    F: FnOnce(ClusterHandle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let cluster = provisioner.provision().await?;
    let outcome = AssertUnwindSafe(body(cluster.clone())).catch_unwind().await;
    cluster.teardown().await;

    match outcome {
        Ok(result) => {
            if let Err(e) = &result {
                error!("Cluster session failed: {}", e);
            }
            result
        }
        Err(panic) => {
            error!("Cluster session panicked; cluster was torn down");
            std::panic::resume_unwind(panic)
        }
    }
}
