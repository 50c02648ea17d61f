//! # Confirmation Tokens
//!
//! Signed, expiring payloads embedded in emailed confirmation links.
//!
//! Wire form is `base64url(json claims) + "." + base64url(hmac-sha256)`,
//! unpadded, so the token survives being pasted into a URL query string.
//! Tokens are never persisted, everything needed to act on one is inside
//! the payload itself.
//!
//! `parse` collapses a bad signature, a malformed payload, and an expired
//! token into the single [`InvalidToken`] signal so callers cannot be used
//! as an oracle for which check failed.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Which privileged action a confirmation token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmAction {
    VerifySignup,
    ConfirmReset,
}

/// Claims carried by a confirmation link.
///
/// `version` is the account's version counter at issuance time. Any token
/// whose snapshot no longer matches the live record is inert, regardless of
/// signature or expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmClaims {
    pub action: ConfirmAction,
    pub email: String,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_hash: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl ConfirmClaims {
    pub fn verify_signup(email: &str, version: u64, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            action: ConfirmAction::VerifySignup,
            email: email.to_string(),
            version,
            pending_hash: None,
            iat: now,
            exp: now + ttl_secs,
        }
    }

    pub fn confirm_reset(email: &str, version: u64, pending_hash: &str, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            action: ConfirmAction::ConfirmReset,
            email: email.to_string(),
            version,
            pending_hash: Some(pending_hash.to_string()),
            iat: now,
            exp: now + ttl_secs,
        }
    }
}

/// Claims for a logged-in session, distinct from confirmation claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn new(email: &str, ttl_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: email.to_string(),
            iat: now,
            exp: now + ttl_secs,
        }
    }
}

/// Anything the codec can parse must carry an expiry.
pub trait Expires {
    fn expires_at(&self) -> i64;
}

impl Expires for ConfirmClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

impl Expires for SessionClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

/// Opaque parse failure. Deliberately carries no cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidToken;

/// Signs and verifies token payloads with a process-wide secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn issue<T: Serialize>(&self, claims: &T) -> String {
        let payload = serde_json::to_vec(claims).expect("claims serialize to JSON");
        let payload_b64 = URL_SAFE_NO_PAD.encode(&payload);

        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload_b64.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{payload_b64}.{sig_b64}")
    }

    pub fn parse<T: DeserializeOwned + Expires>(&self, token: &str) -> Result<T, InvalidToken> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(InvalidToken)?;
        if sig_b64.contains('.') {
            return Err(InvalidToken);
        }

        let sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| InvalidToken)?;
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&sig).map_err(|_| InvalidToken)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| InvalidToken)?;
        let claims: T = serde_json::from_slice(&payload).map_err(|_| InvalidToken)?;

        if Utc::now().timestamp() > claims.expires_at() {
            return Err(InvalidToken);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(*b"test-secret-test-secret-test-sec")
    }

    #[test]
    fn round_trip_signup_claims() {
        let claims = ConfirmClaims::verify_signup("a@x.com", 3, 20 * 60);
        let token = codec().issue(&claims);

        let parsed: ConfirmClaims = codec().parse(&token).unwrap();
        assert_eq!(parsed.action, ConfirmAction::VerifySignup);
        assert_eq!(parsed.email, "a@x.com");
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.pending_hash, None);
    }

    #[test]
    fn round_trip_reset_claims_carries_pending_hash() {
        let claims =
            ConfirmClaims::confirm_reset("a@x.com", 7, "$argon2$x", 10 * 60);
        let token = codec().issue(&claims);

        let parsed: ConfirmClaims = codec().parse(&token).unwrap();
        assert_eq!(parsed.action, ConfirmAction::ConfirmReset);
        assert_eq!(parsed.version, 7);
        assert_eq!(parsed.pending_hash.as_deref(), Some("$argon2$x"));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let claims = ConfirmClaims::verify_signup("a@x.com", 0, 20 * 60);
        let token = codec().issue(&claims);

        let (payload_b64, sig_b64) = token.split_once('.').unwrap();
        let mut payload = URL_SAFE_NO_PAD.decode(payload_b64).unwrap();
        let text = String::from_utf8(payload.clone()).unwrap();
        payload = text.replace("\"version\":0", "\"version\":1").into_bytes();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), sig_b64);

        assert_eq!(
            codec().parse::<ConfirmClaims>(&forged).unwrap_err(),
            InvalidToken
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let claims = ConfirmClaims::verify_signup("a@x.com", 0, 20 * 60);
        let token = codec().issue(&claims);

        let other = TokenCodec::new(*b"other-secret-other-secret-other-");
        assert!(other.parse::<ConfirmClaims>(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = ConfirmClaims::verify_signup("a@x.com", 0, -1);
        let token = codec().issue(&claims);

        assert!(codec().parse::<ConfirmClaims>(&token).is_err());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for garbage in ["", "no-dot", "a.b.c", "!!!.???", "only-one-part."] {
            assert!(codec().parse::<ConfirmClaims>(garbage).is_err(), "{garbage}");
        }
    }

    #[test]
    fn token_is_url_safe() {
        let claims = ConfirmClaims::confirm_reset(
            "someone+tag@example.com",
            42,
            "$argon2id$v=19$m=19456,t=2,p=1$abc$def",
            10 * 60,
        );
        let token = codec().issue(&claims);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        );
    }
}
