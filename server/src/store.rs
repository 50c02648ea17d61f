//! # Credential Store
//!
//! The durable per-account state and the seam the confirmation protocol
//! talks through. The protocol only ever needs four operations: lookup,
//! create, and two version-guarded mutations. Both mutations compare the
//! expected version and apply in a single atomic step per record, so two
//! concurrent confirmations of the same snapshot can never both win.
//!
//! Production uses Redis ([`crate::database::RedisStore`]); tests use the
//! in-memory [`MemoryStore`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Durable per-account state.
///
/// `version` only ever increases. It is the sole source of truth for whether
/// a previously issued confirmation token is still current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub email: String,
    pub display_name: String,
    pub credential_hash: String,
    pub verified: bool,
    pub version: u64,
}

impl CredentialRecord {
    /// A fresh, unverified account at version 0.
    pub fn new(email: &str, display_name: &str, credential_hash: &str) -> Self {
        Self {
            email: email.to_string(),
            display_name: display_name.to_string(),
            credential_hash: credential_hash.to_string(),
            verified: false,
            version: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists")]
    AlreadyExists,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Result of a version-guarded mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The record's verified flag was already set (signup verification only).
    AlreadyVerified,
    /// The live version no longer matches the token's snapshot.
    VersionMismatch,
    Missing,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Create a record. Fails with [`StoreError::AlreadyExists`] if the
    /// identity is already present.
    async fn create(&self, record: CredentialRecord) -> Result<(), StoreError>;

    /// Overwrite the pending display name and credential hash of an existing
    /// record and bump its version, invalidating any outstanding token.
    /// Returns the new version, or `None` if the record is gone.
    async fn supersede_pending(
        &self,
        email: &str,
        display_name: &str,
        credential_hash: &str,
    ) -> Result<Option<u64>, StoreError>;

    /// Atomically set the verified flag if the version still matches.
    /// Does not bump the version.
    async fn mark_verified(
        &self,
        email: &str,
        expected_version: u64,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Atomically install a new credential hash and bump the version if the
    /// version still matches.
    async fn replace_credential(
        &self,
        email: &str,
        expected_version: u64,
        new_hash: &str,
    ) -> Result<UpdateOutcome, StoreError>;
}

/// Mutex-guarded map, used by tests and local runs without Redis.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, CredentialRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let records = self.records.lock().unwrap();
        Ok(records.get(email).cloned())
    }

    async fn create(&self, record: CredentialRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.email) {
            return Err(StoreError::AlreadyExists);
        }
        records.insert(record.email.clone(), record);
        Ok(())
    }

    async fn supersede_pending(
        &self,
        email: &str,
        display_name: &str,
        credential_hash: &str,
    ) -> Result<Option<u64>, StoreError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(email) else {
            return Ok(None);
        };
        record.display_name = display_name.to_string();
        record.credential_hash = credential_hash.to_string();
        record.version += 1;
        Ok(Some(record.version))
    }

    async fn mark_verified(
        &self,
        email: &str,
        expected_version: u64,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(email) else {
            return Ok(UpdateOutcome::Missing);
        };
        if record.verified {
            return Ok(UpdateOutcome::AlreadyVerified);
        }
        if record.version != expected_version {
            return Ok(UpdateOutcome::VersionMismatch);
        }
        record.verified = true;
        Ok(UpdateOutcome::Applied)
    }

    async fn replace_credential(
        &self,
        email: &str,
        expected_version: u64,
        new_hash: &str,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(email) else {
            return Ok(UpdateOutcome::Missing);
        };
        if record.version != expected_version {
            return Ok(UpdateOutcome::VersionMismatch);
        }
        record.credential_hash = new_hash.to_string();
        record.version += 1;
        Ok(UpdateOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn create_then_find() {
        let store = MemoryStore::new();
        store
            .create(CredentialRecord::new("a@x.com", "a", "hash"))
            .await
            .unwrap();

        let record = store.find("a@x.com").await.unwrap().unwrap();
        assert_eq!(record.version, 0);
        assert!(!record.verified);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = MemoryStore::new();
        store
            .create(CredentialRecord::new("a@x.com", "a", "hash"))
            .await
            .unwrap();

        let err = store
            .create(CredentialRecord::new("a@x.com", "b", "other"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn supersede_bumps_version_and_overwrites() {
        let store = MemoryStore::new();
        store
            .create(CredentialRecord::new("a@x.com", "a", "hash"))
            .await
            .unwrap();

        let version = store
            .supersede_pending("a@x.com", "b", "hash2")
            .await
            .unwrap();
        assert_eq!(version, Some(1));

        let record = store.find("a@x.com").await.unwrap().unwrap();
        assert_eq!(record.display_name, "b");
        assert_eq!(record.credential_hash, "hash2");
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn mark_verified_respects_version_and_flag() {
        let store = MemoryStore::new();
        store
            .create(CredentialRecord::new("a@x.com", "a", "hash"))
            .await
            .unwrap();

        assert_eq!(
            store.mark_verified("a@x.com", 5).await.unwrap(),
            UpdateOutcome::VersionMismatch
        );
        assert_eq!(
            store.mark_verified("a@x.com", 0).await.unwrap(),
            UpdateOutcome::Applied
        );
        // Second attempt reports the flag, not the version.
        assert_eq!(
            store.mark_verified("a@x.com", 0).await.unwrap(),
            UpdateOutcome::AlreadyVerified
        );
        assert_eq!(
            store.mark_verified("missing@x.com", 0).await.unwrap(),
            UpdateOutcome::Missing
        );
    }

    #[tokio::test]
    async fn replace_credential_bumps_version_once() {
        let store = MemoryStore::new();
        store
            .create(CredentialRecord::new("a@x.com", "a", "hash"))
            .await
            .unwrap();

        assert_eq!(
            store.replace_credential("a@x.com", 0, "new").await.unwrap(),
            UpdateOutcome::Applied
        );
        let record = store.find("a@x.com").await.unwrap().unwrap();
        assert_eq!(record.credential_hash, "new");
        assert_eq!(record.version, 1);

        // The old snapshot is now dead.
        assert_eq!(
            store
                .replace_credential("a@x.com", 0, "newer")
                .await
                .unwrap(),
            UpdateOutcome::VersionMismatch
        );
    }

    #[tokio::test]
    async fn racing_replacements_apply_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(CredentialRecord::new("a@x.com", "a", "hash"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..2 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .replace_credential("a@x.com", 0, &format!("hash-{i}"))
                    .await
                    .unwrap()
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let applied = outcomes
            .iter()
            .filter(|o| **o == UpdateOutcome::Applied)
            .count();
        let mismatched = outcomes
            .iter()
            .filter(|o| **o == UpdateOutcome::VersionMismatch)
            .count();
        assert_eq!((applied, mismatched), (1, 1));

        let record = store.find("a@x.com").await.unwrap().unwrap();
        assert_eq!(record.version, 1);
    }
}
