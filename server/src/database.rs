//! # Redis
//!
//! RAM database backing the credential store.
//!
//! Each account is one Redis hash under `account:{email}` with the fields
//! `display_name`, `credential_hash`, `verified` (0/1) and `version`.
//!
//! ## Requirements
//!
//! - O(1) lookup by email
//! - Single-record atomic compare-and-set on the version counter
//!
//! ## Implementation
//!
//! The version-guarded mutations run as Lua scripts so the compare and the
//! write happen in one step on the server. Redis executes scripts serially
//! per node, which gives us the per-record serialization the confirmation
//! protocol needs without any client-side locking.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, Script};

use crate::store::{CredentialRecord, CredentialStore, StoreError, UpdateOutcome};

pub async fn init_redis(redis_url: &str) -> ConnectionManager {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url).expect("Invalid Redis URL");

    client
        .get_connection_manager_with_config(config)
        .await
        .expect("Failed to connect to Redis")
}

fn account_key(email: &str) -> String {
    format!("account:{email}")
}

pub struct RedisStore {
    connection: ConnectionManager,
    create: Script,
    supersede: Script,
    verify: Script,
    replace: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            create: Script::new(
                r#"
                if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
                redis.call('HSET', KEYS[1],
                    'display_name', ARGV[1],
                    'credential_hash', ARGV[2],
                    'verified', ARGV[3],
                    'version', ARGV[4])
                return 1
                "#,
            ),
            supersede: Script::new(
                r#"
                if redis.call('EXISTS', KEYS[1]) == 0 then return -1 end
                redis.call('HSET', KEYS[1],
                    'display_name', ARGV[1],
                    'credential_hash', ARGV[2])
                return redis.call('HINCRBY', KEYS[1], 'version', 1)
                "#,
            ),
            verify: Script::new(
                r#"
                if redis.call('EXISTS', KEYS[1]) == 0 then return 'missing' end
                if redis.call('HGET', KEYS[1], 'verified') == '1' then return 'already' end
                if redis.call('HGET', KEYS[1], 'version') ~= ARGV[1] then return 'mismatch' end
                redis.call('HSET', KEYS[1], 'verified', '1')
                return 'ok'
                "#,
            ),
            replace: Script::new(
                r#"
                if redis.call('EXISTS', KEYS[1]) == 0 then return 'missing' end
                if redis.call('HGET', KEYS[1], 'version') ~= ARGV[1] then return 'mismatch' end
                redis.call('HSET', KEYS[1], 'credential_hash', ARGV[2])
                redis.call('HINCRBY', KEYS[1], 'version', 1)
                return 'ok'
                "#,
            ),
        }
    }
}

fn backend_err(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn parse_status(status: &str) -> Result<UpdateOutcome, StoreError> {
    match status {
        "ok" => Ok(UpdateOutcome::Applied),
        "already" => Ok(UpdateOutcome::AlreadyVerified),
        "mismatch" => Ok(UpdateOutcome::VersionMismatch),
        "missing" => Ok(UpdateOutcome::Missing),
        other => Err(StoreError::Backend(format!(
            "unexpected script status: {other}"
        ))),
    }
}

fn record_from_fields(
    email: &str,
    fields: HashMap<String, String>,
) -> Result<Option<CredentialRecord>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let field = |name: &str| {
        fields
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::Backend(format!("account hash missing field: {name}")))
    };

    let version = field("version")?
        .parse::<u64>()
        .map_err(|e| StoreError::Backend(format!("bad version field: {e}")))?;

    Ok(Some(CredentialRecord {
        email: email.to_string(),
        display_name: field("display_name")?,
        credential_hash: field("credential_hash")?,
        verified: field("verified")? == "1",
        version,
    }))
}

#[async_trait]
impl CredentialStore for RedisStore {
    async fn find(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let mut connection = self.connection.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(account_key(email))
            .query_async(&mut connection)
            .await
            .map_err(backend_err)?;

        record_from_fields(email, fields)
    }

    async fn create(&self, record: CredentialRecord) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let created: i64 = self
            .create
            .key(account_key(&record.email))
            .arg(&record.display_name)
            .arg(&record.credential_hash)
            .arg(if record.verified { "1" } else { "0" })
            .arg(record.version)
            .invoke_async(&mut connection)
            .await
            .map_err(backend_err)?;

        if created == 0 {
            return Err(StoreError::AlreadyExists);
        }
        Ok(())
    }

    async fn supersede_pending(
        &self,
        email: &str,
        display_name: &str,
        credential_hash: &str,
    ) -> Result<Option<u64>, StoreError> {
        let mut connection = self.connection.clone();
        let version: i64 = self
            .supersede
            .key(account_key(email))
            .arg(display_name)
            .arg(credential_hash)
            .invoke_async(&mut connection)
            .await
            .map_err(backend_err)?;

        if version < 0 {
            return Ok(None);
        }
        Ok(Some(version as u64))
    }

    async fn mark_verified(
        &self,
        email: &str,
        expected_version: u64,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut connection = self.connection.clone();
        let status: String = self
            .verify
            .key(account_key(email))
            .arg(expected_version)
            .invoke_async(&mut connection)
            .await
            .map_err(backend_err)?;

        parse_status(&status)
    }

    async fn replace_credential(
        &self,
        email: &str,
        expected_version: u64,
        new_hash: &str,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut connection = self.connection.clone();
        let status: String = self
            .replace
            .key(account_key(email))
            .arg(expected_version)
            .arg(new_hash)
            .invoke_async(&mut connection)
            .await
            .map_err(backend_err)?;

        parse_status(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_from_fields_maps_hash() {
        let fields = HashMap::from([
            ("display_name".to_string(), "someone".to_string()),
            ("credential_hash".to_string(), "$argon2$x".to_string()),
            ("verified".to_string(), "1".to_string()),
            ("version".to_string(), "4".to_string()),
        ]);

        let record = record_from_fields("a@x.com", fields).unwrap().unwrap();
        assert_eq!(record.email, "a@x.com");
        assert!(record.verified);
        assert_eq!(record.version, 4);
    }

    #[test]
    fn empty_hash_is_missing_record() {
        assert_eq!(record_from_fields("a@x.com", HashMap::new()).unwrap(), None);
    }

    #[test]
    fn corrupt_version_is_a_backend_error() {
        let fields = HashMap::from([
            ("display_name".to_string(), "someone".to_string()),
            ("credential_hash".to_string(), "$argon2$x".to_string()),
            ("verified".to_string(), "0".to_string()),
            ("version".to_string(), "not-a-number".to_string()),
        ]);

        assert!(record_from_fields("a@x.com", fields).is_err());
    }
}
