//! Tunables for the session manager, the interactive channel and SSH.
//!
//! Every option type implements `Default` with the values the pool is meant
//! to run with, and derives serde + `JsonSchema` so an embedding application
//! can load them from its own configuration. Durations are plain integer
//! seconds or milliseconds.
//!
//! The algorithm lists at the bottom feed russh's `Preferred` negotiation
//! order for each [`CipherPolicy`].

use std::borrow::Cow;
use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{Preferred, cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Options for a [`SessionManager`](crate::session::SessionManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ManagerOptions {
    /// Seconds since last use after which a cached session is evicted.
    pub idle_threshold_secs: u64,

    /// Seconds between two sweep cycles.
    pub sweep_interval_secs: u64,

    /// Upper bound for dialing and authenticating a new connection.
    pub dial_timeout_secs: u64,

    /// Grace wait while draining the login banner and the pagination echo.
    pub init_timeout_ms: u64,

    /// Options applied to every session the manager creates.
    pub session: SessionOptions,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 10 * 60,
            sweep_interval_secs: 30,
            dial_timeout_secs: 20,
            init_timeout_ms: 1000,
            session: SessionOptions::default(),
        }
    }
}

impl ManagerOptions {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // A zero period would make `tokio::time::interval` panic.
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

/// Options for a single [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SessionOptions {
    /// Quiet timeout used by `execute_and_read`.
    pub exec_timeout_ms: u64,

    /// Grace wait of the liveness probe run before a cached session is reused.
    pub probe_timeout_ms: u64,

    /// Capacity of the command queue drained by the writer task.
    pub command_queue_capacity: usize,

    /// Capacity of the output chunk queue fed by the reader task.
    pub output_queue_capacity: usize,

    pub pty: PtyOptions,

    pub read_timing: ReadTiming,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            exec_timeout_ms: 2000,
            probe_timeout_ms: 2000,
            command_queue_capacity: 1024,
            output_queue_capacity: 1024,
            pty: PtyOptions::default(),
            read_timing: ReadTiming::default(),
        }
    }
}

impl SessionOptions {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Pseudo-terminal requested for every shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PtyOptions {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    /// Whether the device should echo input back.
    pub echo: bool,
    /// Terminal input and output speed in baud.
    pub speed: u32,
}

impl Default for PtyOptions {
    fn default() -> Self {
        Self {
            term: "vt100".to_string(),
            cols: 80,
            rows: 40,
            echo: true,
            speed: 14400,
        }
    }
}

/// Polling parameters of the quiescence and expectation reads.
///
/// The `timeout` argument of each read sets the grace unit; these values set
/// how often the output queue is checked and how many rounds a read may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReadTiming {
    /// Sleep before every check of the output queue.
    pub poll_interval_ms: u64,

    /// Consecutive silent rounds after which a quiet read returns.
    pub quiet_rounds: u32,

    /// Grace sleep after a silent round of a quiet read, in multiples of its timeout.
    pub quiet_grace_factor: u32,

    /// Round cap of a quiet read.
    pub max_quiet_polls: u32,

    /// Round cap of an expectation read.
    pub max_expect_polls: u32,
}

impl Default for ReadTiming {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            quiet_rounds: 3,
            quiet_grace_factor: 10,
            max_quiet_polls: 3000,
            max_expect_polls: 300,
        }
    }
}

impl ReadTiming {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// SSH algorithm policy used when dialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CipherPolicy {
    /// Modern algorithms first, CBC ciphers and SHA-1 key exchange still
    /// offered for older switch firmware.
    #[default]
    Compatible,
    /// Modern algorithms only.
    Modern,
}

impl CipherPolicy {
    pub fn preferred(&self) -> Preferred {
        match self {
            CipherPolicy::Compatible => Preferred {
                kex: Cow::Borrowed(COMPATIBLE_KEX_ORDER),
                key: Cow::Borrowed(COMPATIBLE_KEY_TYPES),
                cipher: Cow::Borrowed(COMPATIBLE_CIPHERS),
                mac: Cow::Borrowed(COMPATIBLE_MAC_ALGORITHMS),
                compression: Cow::Borrowed(COMPRESSION_ALGORITHMS),
            },
            CipherPolicy::Modern => Preferred {
                kex: Cow::Borrowed(MODERN_KEX_ORDER),
                key: Cow::Borrowed(MODERN_KEY_TYPES),
                cipher: Cow::Borrowed(MODERN_CIPHERS),
                mac: Cow::Borrowed(MODERN_MAC_ALGORITHMS),
                compression: Cow::Borrowed(COMPRESSION_ALGORITHMS),
            },
        }
    }
}

/// How the SSH server host key is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept any host key.
    #[default]
    AcceptAny,
    /// Check against the user's default known_hosts file.
    KnownHosts,
}

/// Options for [`SshTransport`](crate::transport::SshTransport).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SshOptions {
    pub cipher_policy: CipherPolicy,
    pub host_key_policy: HostKeyPolicy,
    /// Seconds without traffic after which russh drops the connection.
    /// `None` keeps idle shells open until the pool evicts them.
    pub inactivity_timeout_secs: Option<u64>,
}

const MODERN_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

const COMPATIBLE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_GEX_SHA1,
    kex::DH_G1_SHA1,
];

/// CTR and GCM modes first; CBC kept for switches that offer nothing else.
const COMPATIBLE_CIPHERS: &[cipher::Name] = &[
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::CHACHA20_POLY1305,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
];

const MODERN_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

const MODERN_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

const COMPATIBLE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

const COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

const MODERN_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

const COMPATIBLE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pool_behaviour() {
        let options = ManagerOptions::default();
        assert_eq!(options.idle_threshold(), Duration::from_secs(600));
        assert_eq!(options.sweep_interval(), Duration::from_secs(30));
        assert_eq!(options.session.exec_timeout(), Duration::from_secs(2));
        assert_eq!(options.session.read_timing.quiet_rounds, 3);
        assert_eq!(options.session.read_timing.max_expect_polls, 300);
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let options: ManagerOptions =
            serde_json::from_str(r#"{"idle_threshold_secs":60,"session":{"pty":{"cols":132}}}"#)
                .expect("parse options");

        assert_eq!(options.idle_threshold_secs, 60);
        assert_eq!(options.sweep_interval_secs, 30);
        assert_eq!(options.session.pty.cols, 132);
        assert_eq!(options.session.pty.term, "vt100");
    }

    #[test]
    fn zero_sweep_interval_is_clamped() {
        let options = ManagerOptions {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(options.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn modern_policy_drops_cbc_and_sha1() {
        let preferred = CipherPolicy::Modern.preferred();

        assert!(!preferred.cipher.contains(&cipher::AES_128_CBC));
        assert!(!preferred.kex.contains(&kex::DH_G1_SHA1));
        assert!(!preferred.mac.contains(&mac::HMAC_SHA1));
    }

    #[test]
    fn compatible_policy_keeps_legacy_algorithms() {
        let preferred = CipherPolicy::Compatible.preferred();

        assert!(preferred.cipher.contains(&cipher::AES_128_CBC));
        assert!(preferred.kex.contains(&kex::DH_G1_SHA1));
        assert!(preferred.cipher.iter().all(|alg| *alg != cipher::NONE));
    }

    #[test]
    fn policies_use_snake_case_names() {
        let json = serde_json::to_string(&SshOptions::default()).expect("serialize");
        assert!(json.contains("\"compatible\""));
        assert!(json.contains("\"accept_any\""));
    }
}
