//! # Confirmation Protocol
//!
//! Issues and resolves the emailed confirmation links that gate account
//! verification and password resets.
//!
//! The browser session that submits a signup or reset never sees the click:
//! the link may be opened on another device entirely. Completion is
//! therefore recorded purely as a state transition on the credential record
//! (the verified flag, or a version bump), which the submitting session
//! discovers through the status queries at the bottom of this module.
//!
//! ## Supersession
//!
//! Every token snapshots the record's version counter at issuance. A
//! re-signup bumps the counter immediately, killing the earlier pending
//! link. A reset does not bump until the click, so two pending resets race
//! and exactly one wins; the version compare-and-set in the store decides.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use thiserror::Error;
use tracing::{info, warn};

use crate::mailer::{reset_email, verification_email, MailError, Mailer};
use crate::store::{CredentialRecord, CredentialStore, StoreError, UpdateOutcome};
use crate::token::{ConfirmAction, ConfirmClaims, SessionClaims, TokenCodec};

/// Signup links gate account creation, so they stay short-lived.
pub const SIGNUP_TOKEN_TTL_SECS: i64 = 20 * 60;
pub const RESET_TOKEN_TTL_SECS: i64 = 10 * 60;
pub const SESSION_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("User already exists. Please login.")]
    AlreadyVerified,

    #[error("Old password cannot be used. Please choose a new password.")]
    SameCredential,

    #[error("credential hashing failed: {0}")]
    Hash(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] MailError),
}

/// Terminal result of one resolution attempt. Each maps 1:1 to a distinct
/// confirmation view; none may be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Verified,
    AlreadyVerified,
    Superseded,
    ResetComplete,
    InvalidOrExpired,
    InvalidLink,
}

#[derive(Debug)]
pub struct SignupIssued {
    pub token: String,
}

/// Acknowledgment of a reset request. `version` is present only when a
/// record exists; the caller seeds its poll session with it. A missing
/// record still acknowledges with success shape, revealing nothing.
#[derive(Debug)]
pub struct ResetIssued {
    pub version: Option<u64>,
}

pub fn hash_secret(secret: &str) -> Result<String, IssueError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IssueError::Hash(e.to_string()))
}

pub fn secret_matches(secret: &str, credential_hash: &str) -> bool {
    PasswordHash::new(credential_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub struct Confirmations {
    store: Arc<dyn CredentialStore>,
    mailer: Arc<dyn Mailer>,
    codec: TokenCodec,
    public_url: String,
}

impl Confirmations {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        mailer: Arc<dyn Mailer>,
        codec: TokenCodec,
        public_url: &str,
    ) -> Self {
        Self {
            store,
            mailer,
            codec,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create or supersede a pending signup and email the verification link.
    ///
    /// Re-signup on an unverified record overwrites the pending name and
    /// credential in place and bumps the version, so the earlier link dies.
    /// A dispatch failure propagates but does not roll the bump back.
    pub async fn issue_signup(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
    ) -> Result<SignupIssued, IssueError> {
        let credential_hash = hash_secret(password)?;

        let version = match self.store.find(email).await? {
            Some(record) if record.verified => return Err(IssueError::AlreadyVerified),
            Some(_) => {
                match self
                    .store
                    .supersede_pending(email, display_name, &credential_hash)
                    .await?
                {
                    Some(version) => version,
                    // Record vanished between lookup and overwrite; start over.
                    None => {
                        self.store
                            .create(CredentialRecord::new(email, display_name, &credential_hash))
                            .await?;
                        0
                    }
                }
            }
            None => {
                self.store
                    .create(CredentialRecord::new(email, display_name, &credential_hash))
                    .await?;
                0
            }
        };

        let claims = ConfirmClaims::verify_signup(email, version, SIGNUP_TOKEN_TTL_SECS);
        let token = self.codec.issue(&claims);
        let url = format!("{}/api/auth/verify?token={token}", self.public_url);

        let (subject, body) = verification_email(&url);
        self.mailer.deliver(email, subject, &body).await?;

        info!(email, version, "signup confirmation issued");
        Ok(SignupIssued { token })
    }

    /// Stage a password reset and email the confirmation link.
    ///
    /// The version is snapshotted, not bumped; the bump happens only when
    /// the link is clicked. An unknown identity gets the same success-shaped
    /// acknowledgment as a known one, minus the version seed.
    pub async fn issue_reset(
        &self,
        email: &str,
        new_password: &str,
    ) -> Result<ResetIssued, IssueError> {
        let Some(record) = self.store.find(email).await? else {
            info!("reset requested for unknown identity");
            return Ok(ResetIssued { version: None });
        };

        if secret_matches(new_password, &record.credential_hash) {
            return Err(IssueError::SameCredential);
        }

        let pending_hash = hash_secret(new_password)?;
        let claims =
            ConfirmClaims::confirm_reset(email, record.version, &pending_hash, RESET_TOKEN_TTL_SECS);
        let token = self.codec.issue(&claims);
        let url = format!("{}/api/auth/verify-reset?token={token}", self.public_url);

        let (subject, body) = reset_email(&url);
        self.mailer.deliver(email, subject, &body).await?;

        info!(email, version = record.version, "reset confirmation issued");
        Ok(ResetIssued {
            version: Some(record.version),
        })
    }

    /// Resolve a clicked confirmation link against current record state.
    ///
    /// Parse failures and version mismatches are terminal for this attempt;
    /// the store's compare-and-set guarantees a given snapshot applies at
    /// most once even under concurrent clicks.
    pub async fn resolve(&self, token: &str) -> Result<ResolveOutcome, StoreError> {
        let Ok(claims) = self.codec.parse::<ConfirmClaims>(token) else {
            return Ok(ResolveOutcome::InvalidOrExpired);
        };

        match claims.action {
            ConfirmAction::VerifySignup => {
                let outcome = self
                    .store
                    .mark_verified(&claims.email, claims.version)
                    .await?;
                Ok(match outcome {
                    UpdateOutcome::Applied => {
                        info!(email = claims.email, "account verified");
                        ResolveOutcome::Verified
                    }
                    UpdateOutcome::AlreadyVerified => ResolveOutcome::AlreadyVerified,
                    UpdateOutcome::VersionMismatch => ResolveOutcome::Superseded,
                    UpdateOutcome::Missing => ResolveOutcome::InvalidLink,
                })
            }
            ConfirmAction::ConfirmReset => {
                let Some(pending_hash) = claims.pending_hash else {
                    // Signed but structurally wrong for this action.
                    warn!(email = claims.email, "reset token without pending hash");
                    return Ok(ResolveOutcome::InvalidOrExpired);
                };
                let outcome = self
                    .store
                    .replace_credential(&claims.email, claims.version, &pending_hash)
                    .await?;
                Ok(match outcome {
                    UpdateOutcome::Applied => {
                        info!(email = claims.email, "password reset confirmed");
                        ResolveOutcome::ResetComplete
                    }
                    UpdateOutcome::VersionMismatch | UpdateOutcome::AlreadyVerified => {
                        ResolveOutcome::Superseded
                    }
                    UpdateOutcome::Missing => ResolveOutcome::InvalidLink,
                })
            }
        }
    }

    /// Verify a password against a verified account and mint a session token.
    /// Unknown, unverified and wrong-password all collapse to `None`.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<String>, StoreError> {
        let Some(record) = self.store.find(email).await? else {
            return Ok(None);
        };
        if !record.verified || !secret_matches(password, &record.credential_hash) {
            return Ok(None);
        }

        let claims = SessionClaims::new(email, SESSION_TTL_SECS);
        Ok(Some(self.codec.issue(&claims)))
    }

    /// Signup poll probe: has the identity been verified?
    pub async fn is_verified(&self, email: &str) -> Result<Option<bool>, StoreError> {
        Ok(self
            .store
            .find(email)
            .await?
            .map(|record| record.verified))
    }

    /// Reset poll probe: has exactly the expected single increment landed?
    ///
    /// Reports confirmed once `current == observed + 1`. If a second reset
    /// is issued before the first is clicked, the first caller's observed
    /// version can be left behind and its poll never resolves; callers fall
    /// back to the deadline. Kept as-is.
    pub async fn reset_confirmed(
        &self,
        email: &str,
        observed_version: u64,
    ) -> Result<Option<bool>, StoreError> {
        Ok(self
            .store
            .find(email)
            .await?
            .map(|record| record.version == observed_version + 1))
    }
}
