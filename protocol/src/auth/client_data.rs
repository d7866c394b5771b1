//! # Client Data
//!
//! The structure that actually gets signed. Never the bare challenge: the
//! signature covers the challenge, the origin that asked for it, and when it
//! was answered, so a response can't be replayed to a different site or
//! held back for later.
//!
//! ## Canonical form
//!
//! Compact JSON, keys in exactly this order, timestamp in Unix milliseconds:
//!
//! ```text
//! {"challenge":"<base64>","origin":"https://example.org","timestamp":1700000000000}
//! ```
//!
//! That's what `JSON.stringify` emits for the same object on the browser
//! side. Verifiers hash the bytes they *received*, never a re-serialization,
//! so a formatting difference can only ever cause a rejection, not a bypass.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::AuthError;
use crate::crypto::sha256;

/// `{challenge, origin, timestamp}`. Field order is the serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientData {
    pub challenge: String,
    pub origin: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ClientData {
    /// Client data stamped with the current time.
    pub fn new(challenge: impl Into<String>, origin: impl Into<String>) -> Self {
        Self::at(challenge, origin, now_millis())
    }

    /// Client data with an explicit timestamp.
    pub fn at(challenge: impl Into<String>, origin: impl Into<String>, timestamp: i64) -> Self {
        Self {
            challenge: challenge.into(),
            origin: origin.into(),
            timestamp,
        }
    }

    /// The canonical serialization. These bytes are what get hashed.
    pub fn to_json(&self) -> String {
        // A struct of two strings and an integer can't fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse received client data.
    pub fn parse(json: &str) -> Result<Self, AuthError> {
        serde_json::from_str(json).map_err(|e| AuthError::MalformedPayload(e.to_string()))
    }

    /// Reject timestamps older than `max_age` or further than `max_skew` in
    /// the future, relative to `now_ms`.
    pub fn check_freshness(
        &self,
        now_ms: i64,
        max_age: Duration,
        max_skew: Duration,
    ) -> Result<(), AuthError> {
        // The timestamp is whatever the signer chose; saturate instead of
        // overflowing on extreme values.
        let age_ms = now_ms.saturating_sub(self.timestamp);
        let too_old = age_ms > max_age.as_millis() as i64;
        let too_new = age_ms.saturating_neg() > max_skew.as_millis() as i64;
        if too_old || too_new {
            return Err(AuthError::Stale {
                timestamp_ms: self.timestamp,
                age_ms,
            });
        }
        Ok(())
    }
}

/// SHA-256 over a serialized client data payload.
pub fn client_data_digest(client_data_json: &str) -> [u8; 32] {
    sha256(client_data_json.as_bytes())
}

/// Wall clock in Unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_order() {
        let data = ClientData::at("Y2hhbA==", "https://rp.example", 1_700_000_000_000);
        assert_eq!(
            data.to_json(),
            r#"{"challenge":"Y2hhbA==","origin":"https://rp.example","timestamp":1700000000000}"#
        );
    }

    #[test]
    fn parse_roundtrip() {
        let data = ClientData::new("c", "https://o");
        assert_eq!(ClientData::parse(&data.to_json()).unwrap(), data);
    }

    #[test]
    fn parse_rejects_missing_fields() {
        assert!(matches!(
            ClientData::parse(r#"{"challenge":"c","origin":"o"}"#),
            Err(AuthError::MalformedPayload(_))
        ));
        assert!(ClientData::parse("not json").is_err());
    }

    #[test]
    fn freshness_window() {
        let max_age = Duration::from_secs(120);
        let skew = Duration::from_secs(30);
        let now = 1_000_000_000;
        let at = |offset_ms: i64| ClientData::at("c", "o", now - offset_ms);

        assert!(at(0).check_freshness(now, max_age, skew).is_ok());
        assert!(at(119_000).check_freshness(now, max_age, skew).is_ok());
        assert!(at(-29_000).check_freshness(now, max_age, skew).is_ok());
        assert!(matches!(
            at(121_000).check_freshness(now, max_age, skew),
            Err(AuthError::Stale { .. })
        ));
        assert!(matches!(
            at(-31_000).check_freshness(now, max_age, skew),
            Err(AuthError::Stale { .. })
        ));
    }

    #[test]
    fn extreme_timestamps_are_stale_not_overflow() {
        let max_age = Duration::from_secs(120);
        let skew = Duration::from_secs(30);
        for now in [0, 1_700_000_000_000, i64::MAX, i64::MIN] {
            for timestamp in [i64::MIN, i64::MAX] {
                if now == timestamp {
                    continue;
                }
                let data = ClientData::at("c", "o", timestamp);
                assert!(
                    matches!(
                        data.check_freshness(now, max_age, skew),
                        Err(AuthError::Stale { .. })
                    ),
                    "now={now} timestamp={timestamp}"
                );
            }
        }
    }
}
