//! Device addressing and credentials.
//!
//! A [`SessionConfig`] names one device login: who logs in, with which secret,
//! at which IPv4 address and port, and which vendor's console to expect. The
//! [`SessionKey`] derived from it is what the session cache is indexed by.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::ConnectError;
use crate::templates::Vendor;

/// Immutable login parameters for one device.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    user: String,
    secret: String,
    host: String,
    port: u16,
    vendor: Vendor,
}

impl SessionConfig {
    /// Validates and builds a configuration.
    ///
    /// All fields but `vendor` are required. `port` is given as text and must
    /// parse as a non-zero `u16`; `host` must be a dotted-quad IPv4 literal.
    pub fn new(
        user: impl Into<String>,
        secret: impl Into<String>,
        host: impl Into<String>,
        port: impl AsRef<str>,
        vendor: impl AsRef<str>,
    ) -> Result<Self, ConnectError> {
        let user = user.into();
        let secret = secret.into();
        let host = host.into();
        let port = port.as_ref();

        if user.is_empty() || secret.is_empty() || host.is_empty() || port.is_empty() {
            return Err(ConnectError::InvalidConfig("config empty".to_string()));
        }

        validate_ipv4(&host)?;

        let port = match port.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => {
                return Err(ConnectError::InvalidConfig(format!(
                    "port '{port}' is not in the range from 1 to 65535"
                )));
            }
        };

        Ok(Self {
            user,
            secret,
            host,
            port,
            vendor: Vendor::from(vendor.as_ref()),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn vendor(&self) -> &Vendor {
        &self.vendor
    }

    /// `host:port` as dialed.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Cache identity of this login.
    ///
    /// The vendor is not part of the key: two configurations that differ only
    /// in vendor share one cached session.
    pub fn session_key(&self) -> SessionKey {
        let digest = Sha256::digest(self.secret.as_bytes());
        let secret_hex = digest
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();
        SessionKey(format!(
            "{}_{}_{}:{}",
            self.user, secret_hex, self.host, self.port
        ))
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vendor", &self.vendor)
            .finish()
    }
}

/// Deterministic cache key: user, SHA-256 of the secret, and `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_ipv4(ip: &str) -> Result<(), ConnectError> {
    let parts = ip.split('.').collect::<Vec<_>>();
    if parts.len() != 4 {
        return Err(ConnectError::InvalidConfig(format!(
            "'{ip}' is not in IPv4 format"
        )));
    }

    for part in parts {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConnectError::InvalidConfig(format!(
                "part '{part}' of '{ip}' is not a number"
            )));
        }
        match part.parse::<u16>() {
            Ok(n) if n <= 255 => {}
            _ => {
                return Err(ConnectError::InvalidConfig(format!(
                    "part '{part}' of '{ip}' is not in the range from 0 to 255"
                )));
            }
        }
    }

    Ok(())
}
