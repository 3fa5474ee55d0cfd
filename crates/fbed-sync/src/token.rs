//! Short-lived claims tokens signed with a shared secret.
//!
//! Wire form: `base64url(json claims) "." base64url(mac)`, where the MAC is a
//! keyed BLAKE3 hash of the encoded claims under a key derived from the
//! secret. A fresh token is minted for every request attempt.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use fbed_core::{FbedError, FbedResult};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const KEY_CONTEXT: &str = "fbed 2026-01-01 peer request token v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issued at, unix seconds
    pub iat: u64,
    /// Expires at, unix seconds
    pub exp: u64,
    pub nonce: String,
}

pub struct TokenIssuer {
    key: [u8; 32],
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &SecretString, ttl: Duration) -> Self {
        TokenIssuer {
            key: blake3::derive_key(KEY_CONTEXT, secret.expose_secret().as_bytes()),
            ttl,
        }
    }

    /// Lifetime of one minute per retry, so a token outlives the backoff
    /// of the call it was minted for.
    pub fn for_retries(secret: &SecretString, retry: u32) -> Self {
        Self::new(secret, Duration::from_secs(60 * u64::from(retry.max(1))))
    }

    pub fn issue(&self) -> String {
        self.issue_at(SystemTime::now())
    }

    pub fn issue_at(&self, now: SystemTime) -> String {
        let iat = unix_secs(now);
        let claims = Claims {
            iat,
            exp: iat + self.ttl.as_secs(),
            nonce: uuid::Uuid::new_v4().to_string(),
        };
        // Claims always serialize
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let payload = URL_SAFE_NO_PAD.encode(json);
        let mac = blake3::keyed_hash(&self.key, payload.as_bytes());
        format!("{payload}.{}", URL_SAFE_NO_PAD.encode(mac.as_bytes()))
    }

    pub fn verify(&self, token: &str) -> FbedResult<Claims> {
        self.verify_at(token, SystemTime::now())
    }

    pub fn verify_at(&self, token: &str, now: SystemTime) -> FbedResult<Claims> {
        let (payload, mac) = token
            .split_once('.')
            .ok_or_else(|| FbedError::Token("malformed token".into()))?;

        let mac = URL_SAFE_NO_PAD
            .decode(mac)
            .map_err(|e| FbedError::Token(format!("mac encoding: {e}")))?;
        let mac: [u8; 32] = mac
            .try_into()
            .map_err(|_| FbedError::Token("mac length".into()))?;
        // Hash equality is constant time
        if blake3::Hash::from(mac) != blake3::keyed_hash(&self.key, payload.as_bytes()) {
            return Err(FbedError::Token("bad signature".into()));
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| FbedError::Token(format!("claims encoding: {e}")))?;
        let claims: Claims = serde_json::from_slice(&json)
            .map_err(|e| FbedError::Token(format!("claims: {e}")))?;

        let now = unix_secs(now);
        if now < claims.iat {
            return Err(FbedError::Token("issued in the future".into()));
        }
        if now > claims.exp {
            return Err(FbedError::Token("expired".into()));
        }
        Ok(claims)
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
