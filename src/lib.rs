//! # netpool - Pooled Interactive Sessions for Network Devices
//!
//! `netpool` keeps interactive SSH shells to switches and routers open and
//! hands them out on demand. A caller asks the [`session::SessionManager`] for
//! a session by credentials and address; the manager either reuses a cached
//! shell that still answers with a prompt, or dials a new one, disables
//! pagination for the device vendor and caches it.
//!
//! Device consoles have no framing: the end of a reply is inferred either from
//! a prompt terminator (`#`, `>`, `]`) showing up or from the output going
//! quiet for long enough.
//!
//! ## Features
//!
//! - **Connection Pooling**: one cached shell per login, evicted after 10 minutes idle
//! - **Per-Device Locking**: concurrent requests for the same device never dial twice
//! - **Quiescence Reads**: silence-based and prompt-based reply detection
//! - **Vendor Initialization**: pagination is disabled on Huawei, H3C and Cisco devices
//! - **Pluggable Transport**: SSH over russh, or a scripted in-memory device for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netpool::device::SessionConfig;
//! use netpool::session::MANAGER;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new("admin", "password", "192.168.1.1", "22", "cisco")?;
//!
//!     let session = MANAGER.get_session(&config).await?;
//!     let output = session.execute_and_read(&["show version"]).await?;
//!
//!     println!("Command output: {}", output);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::SessionManager`] - Session cache, per-key locking and idle sweep
//! - [`session::Session`] - Interactive shell over one transport connection
//! - [`templates`] - Vendor pagination commands and prompt terminators
//! - [`transport`] - Transport seam, SSH implementation and scripted device
//! - [`error::ConnectError`] - Error types for configuration and connection failures
//! - [`config`] - Manager options, read timings and SSH algorithm policies

pub mod config;
pub mod device;
pub mod error;
pub mod session;
pub mod templates;
pub mod transport;
