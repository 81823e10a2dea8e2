//! Storage module for persisting harvest state
//!
//! This module handles:
//! - The in-memory entity store of the current run, indexed by entity id
//! - Loading and saving the store as a state artifact
//! - Run identifiers and the artifact layout on disk

mod snapshot;

pub use snapshot::{write_atomic, RunId, SnapshotLayout};

use crate::state::{AttemptOutcome, EntityId, EntityRecord, FetchStatus, RawEntity, RetryPolicy};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Snapshot not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Corrupt snapshot {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Invalid attempt on entity {id}: status {status} after {attempts} attempts")]
    InvalidTransition {
        id: EntityId,
        status: FetchStatus,
        attempts: u32,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// All entities of one run and their fetch state
///
/// The entity set is fixed when the store is created; only
/// [`EntityStore::upsert_attempt`] mutates it afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityStore {
    entities: HashMap<EntityId, EntityRecord>,
}

impl EntityStore {
    /// Builds a store of pending entities from a fresh listing
    ///
    /// Duplicate ids keep their first occurrence.
    pub fn initialize(listing: Vec<RawEntity>) -> Self {
        let mut entities = HashMap::with_capacity(listing.len());

        for raw in listing {
            let id = raw.id;
            if entities.contains_key(&id) {
                tracing::warn!("Listing contains duplicate entity {}, keeping the first", id);
                continue;
            }
            entities.insert(id, EntityRecord::pending(raw));
        }

        Self { entities }
    }

    /// Builds a store from persisted records, rejecting duplicates and
    /// records that break the state invariants
    pub fn from_records(records: Vec<EntityRecord>) -> Result<Self, String> {
        let mut entities = HashMap::with_capacity(records.len());

        for record in records {
            record.check_invariants()?;
            let id = record.id;
            if entities.insert(id, record).is_some() {
                return Err(format!("duplicate entity {}", id));
            }
        }

        Ok(Self { entities })
    }

    /// Loads a store from a state artifact
    ///
    /// # Returns
    ///
    /// * `Ok(EntityStore)` - The persisted store
    /// * `Err(StorageError::NotFound)` - No artifact at `path`
    /// * `Err(StorageError::Corrupt)` - The artifact could not be parsed or is inconsistent
    pub fn load(path: &Path) -> StorageResult<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let records: Vec<EntityRecord> =
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Self::from_records(records).map_err(|reason| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Serializes the store as a JSON array sorted by id
    pub fn to_json(&self) -> StorageResult<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(&self.records_sorted())?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Atomically writes the store to a state artifact
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        write_atomic(path, &self.to_json()?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&id)
    }

    /// Iterates over all records in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    /// All records ordered by id
    pub fn records_sorted(&self) -> Vec<&EntityRecord> {
        let mut records: Vec<&EntityRecord> = self.entities.values().collect();
        records.sort_by_key(|record| record.id);
        records
    }

    /// Records exactly one attempt on an entity
    ///
    /// The entity must be pending, or failed with attempts left under `policy`.
    /// Anything else is rejected and the store is left untouched.
    pub fn upsert_attempt(
        &mut self,
        id: EntityId,
        outcome: AttemptOutcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(StorageError::EntityNotFound(id))?;

        if !policy.is_retry_eligible(entity) {
            return Err(StorageError::InvalidTransition {
                id,
                status: entity.fetch_status,
                attempts: entity.attempts,
            });
        }

        entity.apply_attempt(outcome, now);
        Ok(())
    }

    /// Ids of all retry-eligible entities, never-attempted first
    ///
    /// Ordered by attempt count, then id.
    pub fn work_queue(&self, policy: &RetryPolicy) -> Vec<EntityId> {
        let mut queue: Vec<(u32, EntityId)> = self
            .entities
            .values()
            .filter(|entity| policy.is_retry_eligible(entity))
            .map(|entity| (entity.attempts, entity.id))
            .collect();
        queue.sort_unstable();
        queue.into_iter().map(|(_, id)| id).collect()
    }
}
