//! Signed cookie support.
//!
//! Token layout produced by [`HmacCookieSigner`]:
//!
//! ```text
//! {"uuid":"…","key_id":"service1>service2"}.<timestamp>.<signature>
//! ```
//!
//! `timestamp` is the big-endian unix time in seconds (leading zero bytes
//! dropped) and `signature` is HMAC-SHA256 over everything before the last
//! dot, both base64url encoded without padding. The receiver looks up the
//! key by the embedded `key_id`.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::SigningError;

type HmacSha256 = Hmac<Sha256>;

/// Produces an opaque signed token for a cookie payload.
pub trait CookieSigner: Send + Sync {
    fn sign(
        &self,
        payload: &Value,
        key_id: &str,
        signing_key: &str,
    ) -> Result<String, SigningError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HmacCookieSigner;

impl HmacCookieSigner {
    pub(crate) fn sign_at(
        &self,
        payload: &Value,
        key_id: &str,
        signing_key: &str,
        unix_secs: u64,
    ) -> Result<String, SigningError> {
        if signing_key.is_empty() {
            return Err(SigningError::EmptyKey);
        }
        let Value::Object(fields) = payload else {
            return Err(SigningError::PayloadNotObject);
        };

        let mut fields = fields.clone();
        fields.insert("key_id".to_owned(), Value::String(key_id.to_owned()));
        let body = serde_json::to_string(&Value::Object(fields))?;

        let timestamp = unix_secs.to_be_bytes();
        let first = timestamp
            .iter()
            .position(|byte| *byte != 0)
            .unwrap_or(timestamp.len() - 1);
        let value = format!("{body}.{}", URL_SAFE_NO_PAD.encode(&timestamp[first..]));

        let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes())
            .map_err(|err| SigningError::Other(err.to_string()))?;
        mac.update(value.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{value}.{signature}"))
    }
}

impl CookieSigner for HmacCookieSigner {
    fn sign(
        &self,
        payload: &Value,
        key_id: &str,
        signing_key: &str,
    ) -> Result<String, SigningError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        self.sign_at(payload, key_id, signing_key, now)
    }
}
