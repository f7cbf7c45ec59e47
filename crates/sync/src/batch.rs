//! Checkpointed bulk re-verification of handle bindings

use crate::errors::{Result, SyncError};
use atgraph_resolver::{CallLimiter, HandleVerifier, Verdict};
use atgraph_storage::{Store, VerifyUpdate};
use atgraph_types::{Checkpoint, Did, SyncStage, VerifyState};
use chrono::Duration;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome summary of one batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub examined: usize,
    pub updated: usize,
    pub valid: usize,
    pub invalid: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Tuning knobs for the batch resolver
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub lease_owner: String,
    pub lease_ttl: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            lease_owner: format!("batch-{}", std::process::id()),
            lease_ttl: Duration::minutes(30),
        }
    }
}

enum Outcome {
    Update(VerifyUpdate),
    Skipped,
    Failed,
}

/// Checkpointed bulk re-verification over the full key set
pub struct BatchResolver {
    store: Arc<dyn Store>,
    verifier: Arc<HandleVerifier>,
    limiter: Arc<CallLimiter>,
    config: BatchConfig,
}

impl BatchResolver {
    pub fn new(
        store: Arc<dyn Store>,
        verifier: Arc<HandleVerifier>,
        limiter: Arc<CallLimiter>,
        config: BatchConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            limiter,
            config,
        }
    }

    /// Re-verify every stored binding in stable key order.
    ///
    /// Crash-safe at batch granularity: each batch's updates and the
    /// checkpoint advance to its last key commit together, so a restart
    /// redoes at most one batch. Holding the stage lease keeps two runs
    /// from interleaving.
    pub async fn run(&self, resume: bool) -> Result<BatchReport> {
        let stage = SyncStage::HandleSync;
        if !self
            .store
            .try_acquire_lease(stage, &self.config.lease_owner, self.config.lease_ttl)?
        {
            return Err(SyncError::LeaseHeld { stage });
        }
        let result = self.run_locked(resume).await;
        if let Err(e) = self.store.release_lease(stage, &self.config.lease_owner) {
            warn!(error = %e, "failed to release handle-sync lease");
        }
        result
    }

    async fn run_locked(&self, resume: bool) -> Result<BatchReport> {
        let dids = self.store.all_dids()?;
        let mut checkpoint = if resume {
            self.store.checkpoint(SyncStage::HandleSync)?
        } else {
            None
        };
        let start = match &checkpoint {
            Some(cp) => match dids.binary_search(&Did::new(cp.cursor.as_str())) {
                Ok(index) => index + 1,
                Err(_) => {
                    warn!(
                        cursor = %cp.cursor,
                        "checkpoint key absent from current set, restarting from the beginning"
                    );
                    0
                }
            },
            None => 0,
        };

        let mut report = BatchReport::default();
        for batch in dids[start..].chunks(self.config.batch_size.max(1)) {
            let outcomes = join_all(batch.iter().map(|did| self.verify_one(did))).await;
            let mut updates = Vec::new();
            for outcome in outcomes {
                report.examined += 1;
                match outcome {
                    Outcome::Update(update) => {
                        match update.state {
                            VerifyState::Valid => report.valid += 1,
                            VerifyState::Invalid => report.invalid += 1,
                            VerifyState::Unverified => {}
                        }
                        updates.push(update);
                    }
                    Outcome::Skipped => report.skipped += 1,
                    Outcome::Failed => report.failed += 1,
                }
            }

            let Some(last) = batch.last() else { break };
            let next = match &checkpoint {
                Some(cp) => cp.advanced(last.as_str()),
                None => Checkpoint::new(SyncStage::HandleSync, last.as_str()),
            };
            self.limiter.acquire().await;
            report.updated += self.store.commit_batch(&updates, &next)?;
            checkpoint = Some(next);
        }

        self.store.clear_checkpoint(SyncStage::HandleSync)?;
        info!(
            examined = report.examined,
            updated = report.updated,
            valid = report.valid,
            invalid = report.invalid,
            skipped = report.skipped,
            failed = report.failed,
            "handle re-verification complete"
        );
        Ok(report)
    }

    async fn verify_one(&self, did: &Did) -> Outcome {
        let record = match self.store.get_identity(did) {
            Ok(Some(record)) => record,
            Ok(None) => return Outcome::Skipped,
            Err(e) => {
                warn!(%did, error = %e, "failed to load identity, leaving it untouched");
                return Outcome::Failed;
            }
        };
        let Some(handle) = record.handle else {
            return Outcome::Skipped;
        };
        let state = match self.verifier.verify(did, &handle).await {
            Verdict::Valid => VerifyState::Valid,
            Verdict::Invalid => VerifyState::Invalid,
        };
        Outcome::Update(VerifyUpdate {
            did: did.clone(),
            state,
        })
    }
}
