//! TTL Eviction Task
//!
//! Background task that periodically deletes entries whose TTL has elapsed.
//!
//! The sweeper works directly on the [`FileStore`] and [`EvictionRegistry`];
//! it never takes the store facade's lock. Concurrent client operations are
//! coordinated through the advisory file locks only.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::store::{EvictionRegistry, FileStore};

// == Sweep Report ==
/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Registrations examined
    pub scanned: usize,
    /// Entries deleted because their TTL elapsed
    pub evicted: usize,
    /// Registrations dropped because the entry was already gone
    pub pruned: usize,
    /// Entries that could not be checked or deleted
    pub failed: usize,
}

enum Outcome {
    Evicted,
    Absent,
    Pending,
}

// == Sweep Expired ==
/// Runs a single sweep pass.
///
/// Snapshots the registry, deletes every entry whose TTL has elapsed and
/// finally removes the handled keys from the registry. A failure on one key
/// is logged and the pass continues with the next; the failed key stays
/// registered and is retried on the next pass.
pub async fn sweep_expired(files: &FileStore, registry: &EvictionRegistry) -> SweepReport {
    let snapshot = registry.snapshot().await;
    let now = Utc::now();

    let mut report = SweepReport {
        scanned: snapshot.len(),
        ..SweepReport::default()
    };
    let mut done = Vec::new();

    for (key, registration) in snapshot {
        match evict_if_expired(files, &key, registration.ttl_secs, now).await {
            Ok(Outcome::Evicted) => {
                report.evicted += 1;
                done.push((key, registration));
            }
            Ok(Outcome::Absent) => {
                debug!(key = %key, "Entry already removed, dropping TTL registration");
                report.pruned += 1;
                done.push((key, registration));
            }
            Ok(Outcome::Pending) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to evict entry");
                report.failed += 1;
            }
        }
    }

    registry.prune(&done).await;
    report
}

async fn evict_if_expired(
    files: &FileStore,
    key: &str,
    ttl_secs: u64,
    now: DateTime<Utc>,
) -> Result<Outcome> {
    let meta = match files.meta(key).await {
        Ok(meta) => meta,
        Err(e) if is_not_found(&e) => return Ok(Outcome::Absent),
        Err(e) => return Err(e),
    };

    if !meta.is_expired(ttl_secs, now) {
        return Ok(Outcome::Pending);
    }

    // The entry may have been deleted, or deleted and created again, since
    // its metadata was read; only the entry that was checked is removed.
    match files.delete_if_created_at(key, meta.created_at).await {
        Ok(true) => Ok(Outcome::Evicted),
        Ok(false) => Ok(Outcome::Absent),
        Err(e) if is_not_found(&e) => Ok(Outcome::Absent),
        Err(e) => Err(e),
    }
}

fn is_not_found(err: &StoreError) -> bool {
    matches!(err, StoreError::Io(e) if e.kind() == io::ErrorKind::NotFound)
}

// == Eviction Handle ==
/// Cancellation handle for a running eviction task.
///
/// Dropping the handle also stops the task, after any pass in progress.
#[derive(Debug)]
pub struct EvictionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EvictionHandle {
    /// Asks the task to stop without waiting for it.
    pub fn signal_stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stops the task and waits for it to finish.
    pub async fn stop(self) {
        self.signal_stop();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Eviction task ended abnormally");
        }
    }

    /// Returns true once the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawns a background task that sweeps expired entries every `period`.
///
/// The first pass runs immediately. A zero period is raised to one
/// millisecond.
///
/// # Arguments
/// * `files` - Shared file store to delete from
/// * `registry` - Shared TTL registry to scan and prune
/// * `period` - Interval between sweep passes
///
/// # Returns
/// An [`EvictionHandle`] used to stop the task during shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_eviction_task(files.clone(), registry.clone(), Duration::from_secs(2));
/// // Later, during shutdown:
/// handle.stop().await;
/// ```
pub fn spawn_eviction_task(
    files: Arc<FileStore>,
    registry: Arc<EvictionRegistry>,
    period: Duration,
) -> EvictionHandle {
    let period = period.max(Duration::from_millis(1));
    let (shutdown, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(
            "Starting TTL eviction task with interval of {} ms",
            period.as_millis()
        );

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = sweep_expired(&files, &registry).await;

                    if report.evicted > 0 || report.failed > 0 {
                        info!(
                            evicted = report.evicted,
                            pruned = report.pruned,
                            failed = report.failed,
                            "TTL eviction pass finished"
                        );
                    } else {
                        debug!(
                            scanned = report.scanned,
                            pruned = report.pruned,
                            "TTL eviction: no expired entries found"
                        );
                    }
                }
                changed = stop_rx.changed() => {
                    // Sender dropped or stop requested
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("TTL eviction task stopped");
    });

    EvictionHandle { shutdown, task }
}
