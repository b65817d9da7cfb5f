//! Vendor initialization table.
//!
//! Every new session is initialized once: the vendor's pagination-disable
//! command is sent so long outputs are not interrupted by `--More--`, and the
//! resulting echo and prompt are drained. Prompt terminators are the same for
//! every supported vendor.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use log::debug;
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};

use crate::session::Session;
use crate::transport::Connection;

/// Characters a device prompt ends with once it is ready for input.
pub const PROMPT_TERMINATORS: &[&str] = &["#", ">", "]"];

/// Vendor identifiers with a built-in pagination command.
pub const BUILTIN_VENDORS: &[&str] = &["huawei", "h3c", "cisco"];

/// Device vendor, parsed case-insensitively from its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Vendor {
    Huawei,
    H3c,
    Cisco,
    /// Any vendor without a built-in template. Initialization is a no-op.
    Other(String),
}

impl Vendor {
    pub fn as_str(&self) -> &str {
        match self {
            Vendor::Huawei => "huawei",
            Vendor::H3c => "h3c",
            Vendor::Cisco => "cisco",
            Vendor::Other(name) => name,
        }
    }

    /// Command that disables output paging, if the vendor has one.
    pub fn pagination_command(&self) -> Option<&'static str> {
        match self {
            Vendor::Huawei => Some("screen-length 0 temporary"),
            Vendor::H3c => Some("screen-length disable"),
            Vendor::Cisco => Some("terminal length 0"),
            Vendor::Other(_) => None,
        }
    }
}

impl From<&str> for Vendor {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "huawei" => Vendor::Huawei,
            "h3c" => Vendor::H3c,
            "cisco" => Vendor::Cisco,
            _ => Vendor::Other(value.to_string()),
        }
    }
}

impl From<String> for Vendor {
    fn from(value: String) -> Self {
        Vendor::from(value.as_str())
    }
}

impl From<Vendor> for String {
    fn from(value: Vendor) -> Self {
        value.as_str().to_string()
    }
}

/// Vendors are identifiers in configuration, so the schema is a plain string.
impl JsonSchema for Vendor {
    fn schema_name() -> Cow<'static, str> {
        "Vendor".into()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        String::json_schema(generator)
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disables pagination on a fresh session.
///
/// Sends the vendor's pagination command and waits once for a prompt
/// terminator. Returns the drained output, or `None` without touching the
/// session for vendors without a template.
pub async fn initialize<C: Connection>(session: &Session<C>, timeout: Duration) -> Option<String> {
    let command = session.vendor().pagination_command()?;

    debug!("{} Disabling pagination: {}", session.key(), command);
    if let Err(e) = session.write_commands(&[command]).await {
        debug!("{} Failed to send pagination command: {}", session.key(), e);
        return None;
    }

    Some(session.read_until_expected(timeout, PROMPT_TERMINATORS).await)
}
