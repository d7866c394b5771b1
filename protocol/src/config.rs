//! # Protocol Configuration & Constants
//!
//! Every magic number in WebSign lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Some of these values are load-bearing forever: the fingerprint version and
//! the storage keys are baked into every identity a user has ever created.
//! Changing them silently orphans people's keys, so don't.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::identity::storage::{KeyValueStorage, StorageError};

// ---------------------------------------------------------------------------
// Storage Keys
// ---------------------------------------------------------------------------

/// Well-known storage key holding the persisted identity collection.
pub const IDENTITIES_KEY: &str = "webSignAuthIdentities";

/// Well-known storage key holding the user's TURN server preference.
pub const TURN_SERVER_KEY: &str = "webSignAuthTurnServer";

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// Fingerprint derivation version. Version 1 is base-58 over the full
/// 32-byte SHA-256 digest of the compressed public key. Bumping this breaks
/// every previously issued identity address.
pub const FINGERPRINT_VERSION: u8 = 1;

/// Number of digest bytes that go into a fingerprint.
pub const FINGERPRINT_DIGEST_LENGTH: usize = 32;

/// The Bitcoin base-58 alphabet. No `0`, `O`, `I` or `l`.
pub const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Shortest vanity prefix a caller may ask for.
pub const MIN_PREFIX_LENGTH: usize = 1;

/// Longest vanity prefix a caller may ask for. Every extra character
/// multiplies the expected search time by 58.
pub const MAX_PREFIX_LENGTH: usize = 3;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// secp256k1 ECDSA over a SHA-256 prehash of the client data.
pub const SIGNING_ALGORITHM: &str = "secp256k1-ecdsa-sha256";

/// Secret key length in bytes.
pub const SECRET_KEY_LENGTH: usize = 32;

/// Compressed SEC1 public key length in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 33;

/// Compact (r || s) signature length in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Size of a relying-party challenge nonce.
pub const CHALLENGE_LENGTH: usize = 32;

/// Credential type tag on the wire, mirroring WebAuthn.
pub const CREDENTIAL_TYPE: &str = "public-key";

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Upper bound on ICE candidate gathering. Restrictive networks can stall
/// gathering forever; a partial description beats hanging.
pub const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(1);

/// Whole-session bound. After this the session fails with `Timeout`.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Oldest client data a verifier accepts.
pub const MAX_CLIENT_DATA_AGE: Duration = Duration::from_secs(120);

/// How far in the future a client data timestamp may be before we call it
/// forged. Clocks drift; they don't drift by minutes.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(30);

/// How often a relying party repeats its request until the identity
/// provider answers. A freshly opened popup may not be listening yet.
pub const REQUEST_RESEND_INTERVAL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

/// Relay endpoint used when nothing else is configured.
pub const DEFAULT_SIGNAL_ENDPOINT: &str = "ws://127.0.0.1:9750/signal";

/// Default relay listening port.
pub const DEFAULT_RELAY_PORT: u16 = 9750;

/// Default metrics (Prometheus) port for the relay.
pub const DEFAULT_METRICS_PORT: u16 = 9751;

/// Random bytes in a rendezvous channel id.
pub const CHANNEL_ID_LENGTH: usize = 16;

/// Random bytes in an initiator's ephemeral reply topic.
pub const PEER_ID_LENGTH: usize = 16;

/// Label of the one data channel a peer link carries.
pub const DATA_CHANNEL_LABEL: &str = "dataChannel";

/// Relay error text meaning "nobody created that mailbox".
pub const TOPIC_NOT_FOUND: &str = "Topic not found";

/// Relay notice to a topic's remaining subscribers when its owner leaves.
pub const TOPIC_CLOSED: &str = "Topic closed";

/// Public STUN servers used out of the box.
pub const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:freestun.net:3479",
    "stun:stun.cloudflare.com:3478",
];

// ---------------------------------------------------------------------------
// RTC Configuration
// ---------------------------------------------------------------------------

/// A single STUN or TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A credential-less STUN entry.
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// ICE configuration handed to the RTC backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS
                .iter()
                .map(|url| IceServer::stun(*url))
                .collect(),
        }
    }
}

impl RtcConfig {
    /// Defaults plus whatever TURN relay the user configured.
    pub fn with_turn(setting: &TurnServerSetting) -> Self {
        let mut config = Self::default();
        if let TurnServerSetting::Turn {
            url,
            username,
            password,
        } = setting
        {
            config.ice_servers.push(IceServer {
                urls: vec![url.clone()],
                username: Some(username.clone()),
                credential: Some(password.clone()),
            });
        }
        config
    }
}

/// The user's TURN preference, persisted next to the identities.
///
/// `None` is never written: it's represented by the key being absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TurnServerSetting {
    None,
    Turn {
        url: String,
        username: String,
        password: String,
    },
}

impl TurnServerSetting {
    /// Read the persisted setting, defaulting to `None` when absent.
    pub fn load(storage: &dyn KeyValueStorage) -> Result<Self, StorageError> {
        match storage.get(TURN_SERVER_KEY)? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| StorageError::Corrupted(e.to_string()))
            }
            None => Ok(Self::None),
        }
    }

    /// Persist the setting. `None` clears the key.
    pub fn save(&self, storage: &dyn KeyValueStorage) -> Result<(), StorageError> {
        match self {
            Self::None => storage.remove(TURN_SERVER_KEY),
            other => {
                let raw = serde_json::to_string(other)
                    .map_err(|e| StorageError::Corrupted(e.to_string()))?;
                storage.set(TURN_SERVER_KEY, &raw)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session Configuration
// ---------------------------------------------------------------------------

/// Knobs for one authentication session and the peer links it creates.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling relay.
    pub relay_endpoint: String,
    /// ICE servers for peer links.
    pub rtc: RtcConfig,
    /// Bound on ICE gathering per description.
    pub ice_gather_timeout: Duration,
    /// Bound on the whole session.
    pub session_timeout: Duration,
    /// Oldest client data a verifier accepts.
    pub max_client_data_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_endpoint: DEFAULT_SIGNAL_ENDPOINT.to_string(),
            rtc: RtcConfig::default(),
            ice_gather_timeout: ICE_GATHER_TIMEOUT,
            session_timeout: SESSION_TIMEOUT,
            max_client_data_age: MAX_CLIENT_DATA_AGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::storage::MemoryStorage;

    #[test]
    fn base58_alphabet_excludes_ambiguous_characters() {
        assert_eq!(BASE58_ALPHABET.len(), 58);
        for c in ['0', 'O', 'I', 'l'] {
            assert!(!BASE58_ALPHABET.contains(c));
        }
    }

    #[test]
    fn timing_constants_sanity() {
        assert!(ICE_GATHER_TIMEOUT < SESSION_TIMEOUT);
        assert!(MAX_CLOCK_SKEW < MAX_CLIENT_DATA_AGE);
    }

    #[test]
    fn default_rtc_config_has_stun_only() {
        let config = RtcConfig::default();
        assert_eq!(config.ice_servers.len(), DEFAULT_STUN_SERVERS.len());
        assert!(config.ice_servers.iter().all(|s| s.username.is_none()));
    }

    #[test]
    fn turn_setting_appends_relay() {
        let setting = TurnServerSetting::Turn {
            url: "turn:turn.example.org:3478".into(),
            username: "free".into(),
            password: "free".into(),
        };
        let config = RtcConfig::with_turn(&setting);
        let last = config.ice_servers.last().unwrap();
        assert_eq!(last.urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(last.credential.as_deref(), Some("free"));
    }

    #[test]
    fn turn_setting_none_is_key_absence() {
        let storage = MemoryStorage::new();
        let setting = TurnServerSetting::Turn {
            url: "turn:a".into(),
            username: "u".into(),
            password: "p".into(),
        };
        setting.save(&storage).unwrap();
        assert!(storage.get(TURN_SERVER_KEY).unwrap().is_some());
        assert_eq!(TurnServerSetting::load(&storage).unwrap(), setting);

        TurnServerSetting::None.save(&storage).unwrap();
        assert!(storage.get(TURN_SERVER_KEY).unwrap().is_none());
        assert_eq!(
            TurnServerSetting::load(&storage).unwrap(),
            TurnServerSetting::None
        );
    }
}
