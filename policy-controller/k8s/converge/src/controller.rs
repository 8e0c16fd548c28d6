use crate::{converge, ControllerMetrics, Error};
use ahash::AHashMap as HashMap;
use authpolicy_controller_core::{Pass, ResourceId};
use authpolicy_controller_k8s_api::Store;
use std::time::Duration;
use tokio::sync::mpsc;

/// Runs convergence passes one at a time as they are received.
///
/// Failed passes are requeued after a backoff. A requeued pass is dropped if
/// a newer pass for the same policy has been seen in the meantime.
pub struct Controller<S> {
    store: S,
    passes: mpsc::Receiver<Pass>,
    requeue: mpsc::WeakSender<Pass>,

    /// The newest generation seen for each policy that may still have
    /// artifacts.
    latest: HashMap<ResourceId, u64>,

    /// The newest generation of a policy that was removed from `latest`. An
    /// untracked policy's pass at or below it predates the removal.
    forgotten: u64,

    timeout: Duration,
    backoff: Duration,
    metrics: ControllerMetrics,
}

impl<S: Store> Controller<S> {
    pub fn new(
        store: S,
        tx: &mpsc::Sender<Pass>,
        passes: mpsc::Receiver<Pass>,
        timeout: Duration,
        backoff: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            store,
            passes,
            requeue: tx.downgrade(),
            latest: HashMap::new(),
            forgotten: 0,
            timeout,
            backoff,
            metrics,
        }
    }

    pub async fn run(mut self) {
        while let Some(pass) = self.passes.recv().await {
            self.process(pass).await;
        }
        tracing::debug!("Pass channel closed");
    }

    async fn process(&mut self, pass: Pass) {
        let id = ResourceId::of(&*pass.policy);
        let latest = self.latest.get(&id).copied().unwrap_or(self.forgotten);
        if latest > pass.generation {
            tracing::debug!(policy = %id, generation = pass.generation, latest, "Dropping stale pass");
            self.metrics.dropped_stale();
            return;
        }
        self.latest.insert(id.clone(), pass.generation);

        let result = match tokio::time::timeout(self.timeout, converge(&self.store, &pass)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.timeout)),
        };

        match result {
            Ok(report) => {
                tracing::debug!(policy = %id, generation = pass.generation, writes = report.changes().count(), "Converged");
                self.metrics.succeeded(&report);

                // A policy without a target or gateways has no artifacts left.
                if pass.target.is_none() && pass.gateways.in_scope().next().is_none() {
                    self.latest.remove(&id);
                    self.forgotten = self.forgotten.max(pass.generation);
                }
            }
            Err(error) => {
                self.metrics.failed(&error);
                if error.is_retryable() {
                    tracing::warn!(policy = %id, %error, backoff = ?self.backoff, "Pass failed; retrying");
                    self.retry(pass);
                } else {
                    tracing::error!(policy = %id, %error, "Pass failed");
                }
            }
        }
    }

    fn retry(&self, pass: Pass) {
        let Some(tx) = self.requeue.upgrade() else {
            return;
        };
        self.metrics.retried();
        let backoff = self.backoff;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            if tx.send(pass).await.is_err() {
                tracing::debug!("Controller stopped before retry");
            }
        });
    }
}
