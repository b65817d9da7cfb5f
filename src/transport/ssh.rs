//! SSH transport over `async-ssh2-tokio` and `russh`.

use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::debug;
use russh::client::Msg;
use russh::{ChannelStream, Pty};
use tokio::io::{ReadHalf, WriteHalf};

use super::{Connection, Transport};
use crate::config::{HostKeyPolicy, PtyOptions, SshOptions};
use crate::device::SessionConfig;
use crate::error::ConnectError;

/// Dials devices over SSH with password authentication.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    fn server_check(&self) -> ServerCheckMethod {
        match self.options.host_key_policy {
            HostKeyPolicy::AcceptAny => ServerCheckMethod::NoCheck,
            HostKeyPolicy::KnownHosts => ServerCheckMethod::DefaultKnownHostsFile,
        }
    }
}

impl Transport for SshTransport {
    type Conn = SshConnection;

    async fn dial(
        &self,
        config: &SessionConfig,
        timeout: Duration,
    ) -> Result<SshConnection, ConnectError> {
        let addr = config.address();
        debug!("Begin connect to {}", addr);

        let ssh_config = Config {
            preferred: self.options.cipher_policy.preferred(),
            inactivity_timeout: self.options.inactivity_timeout_secs.map(Duration::from_secs),
            ..Default::default()
        };

        let connect = Client::connect_with_config(
            (config.host().to_string(), config.port()),
            config.user(),
            AuthMethod::with_password(config.secret()),
            self.server_check(),
            ssh_config,
        );

        let client = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| {
                ConnectError::connect_failed(&addr, format!("dial timed out after {timeout:?}"))
            })?
            .map_err(|e| ConnectError::connect_failed(&addr, e))?;
        debug!("{} TCP connection successful", addr);

        Ok(SshConnection { client, addr })
    }
}

/// An authenticated SSH client connection.
pub struct SshConnection {
    client: Client,
    addr: String,
}

impl Connection for SshConnection {
    type Writer = WriteHalf<ChannelStream<Msg>>;
    type Reader = ReadHalf<ChannelStream<Msg>>;

    async fn open_pseudo_terminal(
        &mut self,
        pty: &PtyOptions,
    ) -> Result<(Self::Writer, Self::Reader), ConnectError> {
        let channel = self
            .client
            .get_channel()
            .await
            .map_err(|e| ConnectError::connect_failed(&self.addr, e))?;

        let modes = [
            (Pty::ECHO, u32::from(pty.echo)),
            (Pty::TTY_OP_ISPEED, pty.speed),
            (Pty::TTY_OP_OSPEED, pty.speed),
        ];
        channel
            .request_pty(false, &pty.term, pty.cols, pty.rows, 0, 0, &modes)
            .await
            .map_err(|e| ConnectError::connect_failed(&self.addr, e))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| ConnectError::connect_failed(&self.addr, e))?;
        debug!("{} Shell request successful", self.addr);

        let (reader, writer) = tokio::io::split(channel.into_stream());
        Ok((writer, reader))
    }

    async fn close(&self) -> Result<(), ConnectError> {
        if self.client.is_closed() {
            return Ok(());
        }
        self.client
            .disconnect()
            .await
            .map_err(|e| ConnectError::TransportLost(format!("{}: {}", self.addr, e)))
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}
