// Batch resolution - keys evaluated on blocking workers
//
// Keys are independent, so each one is resolved on its own blocking task with at
// most `workers` in flight. Output order is key order. Cancellation stops new keys
// from starting; keys already running finish and are kept.

use crate::error::{FusionError, FusionResult};
use crate::fusion::{ResolvedRecord, Resolver};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of one batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub rule_set: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<ResolvedRecord>,
    pub cancelled: bool,
    /// Keys never started because the run was cancelled
    pub unprocessed: Vec<String>,
}

impl BatchOutcome {
    pub fn unresolved_count(&self) -> usize {
        self.records.iter().map(|r| r.unresolved().count()).sum()
    }

    pub fn conflicting_count(&self) -> usize {
        self.records.iter().filter(|r| r.has_conflicts()).count()
    }
}

impl Resolver {
    /// Resolve every known key
    pub async fn resolve_batch(
        &self,
        cancel: CancellationToken,
        workers: usize,
    ) -> FusionResult<BatchOutcome> {
        self.resolve_keys(self.keys(), cancel, workers).await
    }

    /// Resolve `keys` in the given order
    pub async fn resolve_keys(
        &self,
        keys: Vec<String>,
        cancel: CancellationToken,
        workers: usize,
    ) -> FusionResult<BatchOutcome> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let total = keys.len();
        let workers = workers.max(1);

        info!(
            run_id = %run_id,
            keys = total,
            workers,
            rule_set = %self.rules().fingerprint(),
            "Batch resolution started"
        );

        let completed = Arc::new(AtomicUsize::new(0));

        let results: Vec<(String, Option<Result<ResolvedRecord, FusionError>>)> =
            stream::iter(keys.into_iter())
                .map(|key| {
                    let resolver = self.clone();
                    let cancel = cancel.clone();
                    let completed = Arc::clone(&completed);

                    async move {
                        // Checked when the key is scheduled, not while it runs
                        if cancel.is_cancelled() {
                            return (key, None);
                        }

                        let task_key = key.clone();
                        let result = tokio::task::spawn_blocking(move || resolver.resolve(&task_key))
                            .await
                            .map_err(|e| FusionError::Worker(e.to_string()));

                        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                        if done % 1000 == 0 || done == total {
                            debug!(
                                run_id = %run_id,
                                progress = format!("{}/{}", done, total),
                                "Batch progress"
                            );
                        }

                        (key, Some(result))
                    }
                })
                .buffered(workers)
                .collect()
                .await;

        let mut records = Vec::with_capacity(results.len());
        let mut unprocessed = Vec::new();
        for (key, result) in results {
            match result {
                Some(record) => records.push(record?),
                None => unprocessed.push(key),
            }
        }

        let outcome = BatchOutcome {
            run_id,
            rule_set: self.rules().fingerprint().to_string(),
            started_at,
            finished_at: Utc::now(),
            cancelled: !unprocessed.is_empty(),
            records,
            unprocessed,
        };

        info!(
            run_id = %run_id,
            resolved = outcome.records.len(),
            unprocessed = outcome.unprocessed.len(),
            unresolved_attributes = outcome.unresolved_count(),
            conflicting_records = outcome.conflicting_count(),
            cancelled = outcome.cancelled,
            elapsed_ms = (outcome.finished_at - outcome.started_at).num_milliseconds(),
            "Batch resolution finished"
        );

        Ok(outcome)
    }
}
