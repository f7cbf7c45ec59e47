//! Persistence layer for the atgraph pipeline
//!
//! Identities, block edges, checkpoints and job leases live in sled trees
//! with JSON values. Page and batch commits write their records and the
//! advanced checkpoint in a single transaction, so a checkpoint never
//! reflects uncommitted progress and no reader observes a partial batch.

use atgraph_types::{
    BlockEdge, Checkpoint, Did, IdentityRecord, Lease, NormalizedIdentity, SyncStage, VerifyState,
};
use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Transactional, Tree};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("corrupt key in tree {tree}")]
    CorruptKey { tree: &'static str },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Verification outcome to apply to one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyUpdate {
    pub did: Did,
    pub state: VerifyState,
}

/// Abstract store consumed by the sync jobs
pub trait Store: Send + Sync {
    /// Insert or refresh a single identity. Returns true when the DID was
    /// seen for the first time.
    fn upsert_identity(&self, incoming: &NormalizedIdentity) -> Result<bool>;
    fn get_identity(&self, did: &Did) -> Result<Option<IdentityRecord>>;
    fn identity_count(&self) -> Result<u64>;
    /// All known DIDs in stable sorted order.
    fn all_dids(&self) -> Result<Vec<Did>>;
    /// Explicit removal; returns true when a record existed.
    fn purge_identity(&self, did: &Did) -> Result<bool>;

    /// Upsert a feed page and advance the directory cursor in one commit.
    /// Returns the number of newly created identities.
    fn commit_page(&self, identities: &[NormalizedIdentity], checkpoint: &Checkpoint)
        -> Result<usize>;
    /// Apply a batch of verification outcomes and advance the handle-sync
    /// checkpoint in one commit. Returns the number of records whose state
    /// actually changed.
    fn commit_batch(&self, updates: &[VerifyUpdate], checkpoint: &Checkpoint) -> Result<usize>;

    fn append_block_edge(&self, edge: &BlockEdge) -> Result<()>;
    fn block_edges_from(&self, source: &Did) -> Result<Vec<BlockEdge>>;

    fn checkpoint(&self, stage: SyncStage) -> Result<Option<Checkpoint>>;
    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
    fn clear_checkpoint(&self, stage: SyncStage) -> Result<()>;

    /// Exclusive run guard. Returns false when another live owner holds the
    /// stage; an expired lease is reclaimed.
    fn try_acquire_lease(&self, stage: SyncStage, owner: &str, ttl: Duration) -> Result<bool>;
    /// Owner-checked release; releasing someone else's lease is a no-op.
    fn release_lease(&self, stage: SyncStage, owner: &str) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

/// Merge an incoming feed record into the stored one.
///
/// A changed handle drops the record back to unverified: the new binding
/// must be re-verified before it is trusted. Reprocessing an unchanged
/// record is a no-op, which is what makes page replay after a crash safe.
fn merge_identity(
    existing: Option<IdentityRecord>,
    incoming: &NormalizedIdentity,
) -> (IdentityRecord, bool) {
    match existing {
        None => (
            IdentityRecord {
                did: incoming.did.clone(),
                handle: incoming.handle.clone(),
                pds_endpoint: incoming.pds_endpoint.clone(),
                created_at: incoming.created_at,
                verified: VerifyState::Unverified,
            },
            true,
        ),
        Some(mut record) => {
            if record.handle != incoming.handle {
                record.handle = incoming.handle.clone();
                record.verified = VerifyState::Unverified;
            }
            record.pds_endpoint = incoming.pds_endpoint.clone();
            (record, false)
        }
    }
}

fn edge_key(edge: &BlockEdge) -> Vec<u8> {
    format!(
        "{}\x00{}\x00{}",
        edge.source.as_str(),
        edge.observed_at.to_rfc3339(),
        edge.target.as_str()
    )
    .into_bytes()
}

fn abort(e: serde_json::Error) -> ConflictableTransactionError<StorageError> {
    ConflictableTransactionError::Abort(StorageError::Serialization(e))
}

fn unwrap_txn(e: TransactionError<StorageError>) -> StorageError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::Database(e),
    }
}

/// Sled-backed implementation
pub struct SledStore {
    db: sled::Db,
    identities: Tree,
    block_edges: Tree,
    checkpoints: Tree,
    leases: Tree,
}

impl SledStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let identities = db.open_tree("identities")?;
        let block_edges = db.open_tree("block_edges")?;
        let checkpoints = db.open_tree("checkpoints")?;
        let leases = db.open_tree("leases")?;

        Ok(Self {
            db,
            identities,
            block_edges,
            checkpoints,
            leases,
        })
    }
}

impl Store for SledStore {
    fn upsert_identity(&self, incoming: &NormalizedIdentity) -> Result<bool> {
        let key = incoming.did.as_str().as_bytes();
        let existing = self
            .identities
            .get(key)?
            .map(|v| serde_json::from_slice::<IdentityRecord>(&v))
            .transpose()?;
        let (merged, created) = merge_identity(existing, incoming);
        self.identities.insert(key, serde_json::to_vec(&merged)?)?;
        Ok(created)
    }

    fn get_identity(&self, did: &Did) -> Result<Option<IdentityRecord>> {
        self.identities
            .get(did.as_str().as_bytes())?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn identity_count(&self) -> Result<u64> {
        Ok(self.identities.len() as u64)
    }

    fn all_dids(&self) -> Result<Vec<Did>> {
        let mut dids = Vec::new();
        for item in self.identities.iter() {
            let (key, _) = item?;
            let did = std::str::from_utf8(&key)
                .map_err(|_| StorageError::CorruptKey { tree: "identities" })?;
            dids.push(Did::new(did));
        }
        Ok(dids)
    }

    fn purge_identity(&self, did: &Did) -> Result<bool> {
        Ok(self.identities.remove(did.as_str().as_bytes())?.is_some())
    }

    fn commit_page(
        &self,
        identities: &[NormalizedIdentity],
        checkpoint: &Checkpoint,
    ) -> Result<usize> {
        (&self.identities, &self.checkpoints)
            .transaction(|(ids, cps): &(TransactionalTree, TransactionalTree)| {
                let mut created = 0usize;
                for incoming in identities {
                    let key = incoming.did.as_str().as_bytes();
                    let existing = match ids.get(key)? {
                        Some(v) => {
                            Some(serde_json::from_slice::<IdentityRecord>(&v).map_err(abort)?)
                        }
                        None => None,
                    };
                    let (merged, is_new) = merge_identity(existing, incoming);
                    ids.insert(key, serde_json::to_vec(&merged).map_err(abort)?)?;
                    if is_new {
                        created += 1;
                    }
                }
                cps.insert(
                    checkpoint.stage.as_str().as_bytes(),
                    serde_json::to_vec(checkpoint).map_err(abort)?,
                )?;
                Ok(created)
            })
            .map_err(unwrap_txn)
    }

    fn commit_batch(&self, updates: &[VerifyUpdate], checkpoint: &Checkpoint) -> Result<usize> {
        (&self.identities, &self.checkpoints)
            .transaction(|(ids, cps): &(TransactionalTree, TransactionalTree)| {
                let mut changed = 0usize;
                for update in updates {
                    let key = update.did.as_str().as_bytes();
                    // A record purged mid-run is simply skipped.
                    let Some(bytes) = ids.get(key)? else {
                        continue;
                    };
                    let mut record: IdentityRecord =
                        serde_json::from_slice(&bytes).map_err(abort)?;
                    if record.verified != update.state {
                        record.verified = update.state;
                        ids.insert(key, serde_json::to_vec(&record).map_err(abort)?)?;
                        changed += 1;
                    }
                }
                cps.insert(
                    checkpoint.stage.as_str().as_bytes(),
                    serde_json::to_vec(checkpoint).map_err(abort)?,
                )?;
                Ok(changed)
            })
            .map_err(unwrap_txn)
    }

    fn append_block_edge(&self, edge: &BlockEdge) -> Result<()> {
        self.block_edges
            .insert(edge_key(edge), serde_json::to_vec(edge)?)?;
        Ok(())
    }

    fn block_edges_from(&self, source: &Did) -> Result<Vec<BlockEdge>> {
        let prefix = format!("{}\x00", source.as_str());
        let mut edges = Vec::new();
        for item in self.block_edges.scan_prefix(prefix.as_bytes()) {
            let (_, v) = item?;
            edges.push(serde_json::from_slice(&v)?);
        }
        Ok(edges)
    }

    fn checkpoint(&self, stage: SyncStage) -> Result<Option<Checkpoint>> {
        self.checkpoints
            .get(stage.as_str().as_bytes())?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints.insert(
            checkpoint.stage.as_str().as_bytes(),
            serde_json::to_vec(checkpoint)?,
        )?;
        Ok(())
    }

    fn clear_checkpoint(&self, stage: SyncStage) -> Result<()> {
        self.checkpoints.remove(stage.as_str().as_bytes())?;
        Ok(())
    }

    fn try_acquire_lease(&self, stage: SyncStage, owner: &str, ttl: Duration) -> Result<bool> {
        let key = stage.as_str().as_bytes();
        let current = self.leases.get(key)?;
        if let Some(bytes) = &current {
            let lease: Lease = serde_json::from_slice(bytes)?;
            if !lease.is_expired() && lease.owner != owner {
                return Ok(false);
            }
        }
        let fresh = serde_json::to_vec(&Lease::new(owner, ttl))?;
        match self.leases.compare_and_swap(key, current, Some(fresh))? {
            Ok(()) => Ok(true),
            // Lost the race to another acquirer.
            Err(_) => Ok(false),
        }
    }

    fn release_lease(&self, stage: SyncStage, owner: &str) -> Result<()> {
        let key = stage.as_str().as_bytes();
        if let Some(bytes) = self.leases.get(key)? {
            let lease: Lease = serde_json::from_slice(&bytes)?;
            if lease.owner == owner {
                self.leases.remove(key)?;
            } else {
                tracing::warn!(stage = %stage, owner, holder = %lease.owner,
                    "refusing to release lease held by another owner");
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// In-memory implementation for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    identities: RwLock<BTreeMap<String, IdentityRecord>>,
    block_edges: RwLock<Vec<BlockEdge>>,
    checkpoints: RwLock<HashMap<SyncStage, Checkpoint>>,
    leases: RwLock<HashMap<SyncStage, Lease>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn upsert_identity(&self, incoming: &NormalizedIdentity) -> Result<bool> {
        let mut identities = self.identities.write();
        let existing = identities.get(incoming.did.as_str()).cloned();
        let (merged, created) = merge_identity(existing, incoming);
        identities.insert(incoming.did.as_str().to_string(), merged);
        Ok(created)
    }

    fn get_identity(&self, did: &Did) -> Result<Option<IdentityRecord>> {
        Ok(self.identities.read().get(did.as_str()).cloned())
    }

    fn identity_count(&self) -> Result<u64> {
        Ok(self.identities.read().len() as u64)
    }

    fn all_dids(&self) -> Result<Vec<Did>> {
        Ok(self
            .identities
            .read()
            .keys()
            .map(|key| Did::new(key.as_str()))
            .collect())
    }

    fn purge_identity(&self, did: &Did) -> Result<bool> {
        Ok(self.identities.write().remove(did.as_str()).is_some())
    }

    fn commit_page(
        &self,
        identities: &[NormalizedIdentity],
        checkpoint: &Checkpoint,
    ) -> Result<usize> {
        let mut stored = self.identities.write();
        let mut checkpoints = self.checkpoints.write();
        let mut created = 0usize;
        for incoming in identities {
            let existing = stored.get(incoming.did.as_str()).cloned();
            let (merged, is_new) = merge_identity(existing, incoming);
            stored.insert(incoming.did.as_str().to_string(), merged);
            if is_new {
                created += 1;
            }
        }
        checkpoints.insert(checkpoint.stage, checkpoint.clone());
        Ok(created)
    }

    fn commit_batch(&self, updates: &[VerifyUpdate], checkpoint: &Checkpoint) -> Result<usize> {
        let mut stored = self.identities.write();
        let mut checkpoints = self.checkpoints.write();
        let mut changed = 0usize;
        for update in updates {
            if let Some(record) = stored.get_mut(update.did.as_str()) {
                if record.verified != update.state {
                    record.verified = update.state;
                    changed += 1;
                }
            }
        }
        checkpoints.insert(checkpoint.stage, checkpoint.clone());
        Ok(changed)
    }

    fn append_block_edge(&self, edge: &BlockEdge) -> Result<()> {
        self.block_edges.write().push(edge.clone());
        Ok(())
    }

    fn block_edges_from(&self, source: &Did) -> Result<Vec<BlockEdge>> {
        Ok(self
            .block_edges
            .read()
            .iter()
            .filter(|e| e.source == *source)
            .cloned()
            .collect())
    }

    fn checkpoint(&self, stage: SyncStage) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.read().get(&stage).cloned())
    }

    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .insert(checkpoint.stage, checkpoint.clone());
        Ok(())
    }

    fn clear_checkpoint(&self, stage: SyncStage) -> Result<()> {
        self.checkpoints.write().remove(&stage);
        Ok(())
    }

    fn try_acquire_lease(&self, stage: SyncStage, owner: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self.leases.write();
        if let Some(lease) = leases.get(&stage) {
            if !lease.is_expired() && lease.owner != owner {
                return Ok(false);
            }
        }
        leases.insert(stage, Lease::new(owner, ttl));
        Ok(true)
    }

    fn release_lease(&self, stage: SyncStage, owner: &str) -> Result<()> {
        let mut leases = self.leases.write();
        if leases.get(&stage).is_some_and(|l| l.owner == owner) {
            leases.remove(&stage);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
