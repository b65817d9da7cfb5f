//! Transport seam between the session layer and the remote shell.
//!
//! A [`Transport`] dials a device and returns an authenticated
//! [`Connection`]. The session layer only ever asks a connection for a
//! pseudo-terminal with its raw byte streams, and to close. Dialing,
//! authentication and cipher negotiation stay behind this seam.
//!
//! - [`SshTransport`] - SSH over `async-ssh2-tokio` / `russh`
//! - [`ScriptedTransport`] - in-memory device console for tests

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::PtyOptions;
use crate::device::SessionConfig;
use crate::error::ConnectError;

mod scripted;
mod ssh;

pub use scripted::{DeviceScript, ScriptedConnection, ScriptedTransport};
pub use ssh::{SshConnection, SshTransport};

/// Dials devices.
pub trait Transport: Send + Sync + 'static {
    type Conn: Connection;

    /// Connects and authenticates within `timeout`.
    ///
    /// Authentication failures and timeouts are reported as
    /// [`ConnectError::ConnectFailed`].
    fn dial(
        &self,
        config: &SessionConfig,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Conn, ConnectError>> + Send;
}

/// One authenticated connection to a device.
pub trait Connection: Send + Sync + 'static {
    /// Stream feeding the shell's input.
    type Writer: AsyncWrite + Send + Unpin + 'static;
    /// Stream carrying the shell's output.
    type Reader: AsyncRead + Send + Unpin + 'static;

    /// Requests a pseudo-terminal and an interactive shell, and hands back
    /// its write and read streams. Called once per connection.
    fn open_pseudo_terminal(
        &mut self,
        pty: &PtyOptions,
    ) -> impl Future<Output = Result<(Self::Writer, Self::Reader), ConnectError>> + Send;

    /// Tears the connection down.
    fn close(&self) -> impl Future<Output = Result<(), ConnectError>> + Send;

    /// Whether the connection is known to be gone.
    fn is_closed(&self) -> bool {
        false
    }
}
