//! Background lease renewal.
//!
//! Every open path must be renewed each lease period or the cluster
//! reclaims it. One worker per store client renews the whole registered
//! set in a single RPC per round. The set lock is held across the
//! renewal send, so a concurrent add or remove lands fully before or
//! fully after any given round. Renewal failure is fatal to the worker
//! only: callers keep running and must watch [`LeaseWorker::is_alive`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strand_rpc::LeaseService;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::ClientResult;

/// Background task renewing path leases on the advertised cadence.
pub struct LeaseWorker {
    /// Registered paths, shared with the renewal loop.
    paths: Arc<Mutex<BTreeSet<String>>>,
    /// Stop signal for the loop.
    stop: watch::Sender<bool>,
    /// Join handle, taken by [`LeaseWorker::stop`].
    task: Mutex<Option<JoinHandle<()>>>,
    /// Cleared when the loop exits, for any reason.
    alive: Arc<AtomicBool>,
}

impl LeaseWorker {
    /// Probes the lease service for its period and starts the renewal
    /// loop.
    ///
    /// The probe is an empty renewal: it renews nothing but returns the
    /// service's advertised lease period. `fallback_period` is used if
    /// the service advertises none.
    ///
    /// # Errors
    /// Returns an error if the probe fails.
    pub async fn start(
        lease: Arc<dyn LeaseService>,
        fallback_period: Duration,
    ) -> ClientResult<Self> {
        let period = match lease.renew_leases(&[]).await? {
            ack if ack.lease_period_ms > 0 => Duration::from_millis(ack.lease_period_ms),
            _ => fallback_period,
        };
        debug!(?period, "starting lease renewal worker");

        let paths = Arc::new(Mutex::new(BTreeSet::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            lease,
            Arc::clone(&paths),
            stop_rx,
            period,
            Arc::clone(&alive),
        ));
        Ok(Self {
            paths,
            stop,
            task: Mutex::new(Some(task)),
            alive,
        })
    }

    /// Registers a path for renewal. Idempotent.
    pub async fn add_path(&self, path: &str) {
        let mut paths = self.paths.lock().await;
        if paths.insert(path.to_string()) {
            debug!(path, "registered path for lease renewal");
        }
    }

    /// Deregisters a path.
    pub async fn remove_path(&self, path: &str) {
        let mut paths = self.paths.lock().await;
        if paths.remove(path) {
            debug!(path, "deregistered path from lease renewal");
        }
    }

    /// Deregisters every path with the given string prefix.
    pub async fn remove_paths_with_prefix(&self, prefix: &str) {
        let mut paths = self.paths.lock().await;
        let before = paths.len();
        paths.retain(|path| !path.starts_with(prefix));
        let removed = before - paths.len();
        if removed > 0 {
            debug!(prefix, removed, "deregistered paths from lease renewal");
        }
    }

    /// Atomically replaces one registered path with another. No-op if
    /// the old path was not registered.
    pub async fn rename_path(&self, old_path: &str, new_path: &str) {
        let mut paths = self.paths.lock().await;
        if paths.remove(old_path) {
            paths.insert(new_path.to_string());
            debug!(old_path, new_path, "renamed path in lease renewal set");
        }
    }

    /// Whether the path is currently registered.
    pub async fn has_path(&self, path: &str) -> bool {
        self.paths.lock().await.contains(path)
    }

    /// Whether the renewal loop is still running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Signals the loop to stop and waits for it to exit. Idempotent;
    /// no final renewal is sent.
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(%error, "lease worker task failed");
            }
        }
    }
}

async fn run_loop(
    lease: Arc<dyn LeaseService>,
    paths: Arc<Mutex<BTreeSet<String>>>,
    mut stop_rx: watch::Receiver<bool>,
    mut period: Duration,
    alive: Arc<AtomicBool>,
) {
    loop {
        let started = Instant::now();
        {
            let paths = paths.lock().await;
            if !paths.is_empty() {
                let snapshot: Vec<String> = paths.iter().cloned().collect();
                match lease.renew_leases(&snapshot).await {
                    Ok(ack) => {
                        if ack.renewed != u64::try_from(snapshot.len()).unwrap_or(u64::MAX) {
                            warn!(
                                requested = snapshot.len(),
                                renewed = ack.renewed,
                                "lease service renewed fewer paths than requested"
                            );
                        }
                        if ack.lease_period_ms > 0 {
                            let advertised = Duration::from_millis(ack.lease_period_ms);
                            if advertised != period {
                                info!(?period, ?advertised, "lease period changed");
                                period = advertised;
                            }
                        }
                    }
                    Err(error) => {
                        error!(%error, "lease renewal failed, stopping renewals");
                        alive.store(false, Ordering::Release);
                        return;
                    }
                }
            }
        }

        let sleep_for = remaining_sleep(period, started.elapsed());
        tokio::select! {
            changed = stop_rx.changed() => {
                // A dropped sender means the owner is gone; treat it as
                // a stop.
                if changed.is_err() || *stop_rx.borrow() {
                    alive.store(false, Ordering::Release);
                    return;
                }
            }
            () = tokio::time::sleep(sleep_for) => {}
        }
    }
}

/// Time until the next renewal: the period minus what this round took,
/// never negative.
fn remaining_sleep(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_rpc::{CreateOptions, DirectoryService, SimulatedCluster};

    #[test]
    fn test_remaining_sleep_is_clamped() {
        let period = Duration::from_millis(100);
        assert_eq!(
            remaining_sleep(period, Duration::from_millis(30)),
            Duration::from_millis(70)
        );
        assert_eq!(remaining_sleep(period, period), Duration::ZERO);
        assert_eq!(
            remaining_sleep(period, Duration::from_millis(150)),
            Duration::ZERO
        );
    }

    async fn cluster_with_path(period_ms: u64) -> SimulatedCluster {
        let cluster = SimulatedCluster::with_lease_period(period_ms);
        cluster
            .create("/data", &CreateOptions::default())
            .await
            .unwrap();
        cluster
    }

    #[tokio::test]
    async fn test_worker_renews_registered_paths() {
        let cluster = cluster_with_path(25).await;
        let worker = LeaseWorker::start(Arc::new(cluster.clone()), Duration::from_secs(10))
            .await
            .unwrap();

        worker.add_path("/data").await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let rounds = cluster.renewal_log();
        assert!(rounds.len() >= 2, "expected several rounds, got {rounds:?}");
        for round in &rounds {
            assert_eq!(round, &vec!["/data".to_string()]);
        }
        assert!(worker.is_alive());

        worker.stop().await;
        assert!(!worker.is_alive());
        let frozen = cluster.renewal_log().len();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cluster.renewal_log().len(), frozen);
    }

    #[tokio::test]
    async fn test_duplicate_registration_renews_once() {
        let cluster = cluster_with_path(25).await;
        let worker = LeaseWorker::start(Arc::new(cluster.clone()), Duration::from_secs(10))
            .await
            .unwrap();

        worker.add_path("/data").await;
        worker.add_path("/data").await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        worker.stop().await;

        let rounds = cluster.renewal_log();
        assert!(!rounds.is_empty());
        for round in &rounds {
            assert_eq!(round.iter().filter(|p| *p == "/data").count(), 1);
        }
    }

    #[tokio::test]
    async fn test_renewal_failure_is_fatal_to_the_worker() {
        let cluster = cluster_with_path(25).await;
        let worker = LeaseWorker::start(Arc::new(cluster.clone()), Duration::from_secs(10))
            .await
            .unwrap();

        worker.add_path("/data").await;
        cluster.set_fail_renewals(true);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!worker.is_alive());

        // The loop is gone; clearing the fault brings nothing back.
        cluster.set_fail_renewals(false);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cluster.renewal_log().is_empty());

        worker.stop().await;
    }

    #[tokio::test]
    async fn test_startup_probe_failure_surfaces() {
        let cluster = cluster_with_path(25).await;
        cluster.fail_next_renewal();

        let result = LeaseWorker::start(Arc::new(cluster), Duration::from_secs(10)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_set_edits_are_atomic() {
        let cluster = cluster_with_path(25).await;
        let worker = LeaseWorker::start(Arc::new(cluster.clone()), Duration::from_secs(10))
            .await
            .unwrap();

        worker.add_path("/a/b").await;
        worker.add_path("/a/c").await;
        worker.add_path("/x").await;

        worker.remove_paths_with_prefix("/a").await;
        assert!(!worker.has_path("/a/b").await);
        assert!(!worker.has_path("/a/c").await);
        assert!(worker.has_path("/x").await);

        worker.rename_path("/x", "/y").await;
        assert!(!worker.has_path("/x").await);
        assert!(worker.has_path("/y").await);

        // Renaming an unregistered path registers nothing.
        worker.rename_path("/ghost", "/z").await;
        assert!(!worker.has_path("/z").await);

        worker.stop().await;
        worker.stop().await;
    }
}
