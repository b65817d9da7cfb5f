//! In-memory device console for exercising sessions without a network.
//!
//! A [`ScriptedTransport`] hands out connections backed by
//! `tokio::io::duplex`. Behind each one a small task plays the device: it
//! writes the banner when the shell opens, then answers every received line
//! from the [`DeviceScript`], falling back to the prompt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{Notify, watch};

use super::{Connection, Transport};
use crate::config::PtyOptions;
use crate::device::SessionConfig;
use crate::error::ConnectError;

const DUPLEX_BUFFER_SIZE: usize = 64 * 1024;

/// What the scripted device prints.
#[derive(Debug, Clone)]
pub struct DeviceScript {
    banner: String,
    prompt: String,
    replies: HashMap<String, String>,
}

impl DeviceScript {
    /// A device answering every line with `prompt`.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            banner: String::new(),
            prompt: prompt.into(),
            replies: HashMap::new(),
        }
    }

    /// Text written as soon as the shell opens.
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    /// Text written when `command` is received, instead of the prompt.
    pub fn reply(mut self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.replies.insert(command.into(), output.into());
        self
    }

    fn answer(&self, line: &str) -> &str {
        self.replies.get(line).map_or(self.prompt.as_str(), String::as_str)
    }
}

struct ScriptedState {
    script: DeviceScript,
    dial_delay: Duration,
    refuse: AtomicBool,
    muted: AtomicBool,
    dials: AtomicUsize,
    closes: AtomicUsize,
    received: Mutex<Vec<String>>,
    severed: watch::Sender<u64>,
}

/// Transport whose connections talk to a scripted device.
///
/// Clones share the same device and counters.
#[derive(Clone)]
pub struct ScriptedTransport {
    state: Arc<ScriptedState>,
}

impl ScriptedTransport {
    pub fn new(script: DeviceScript) -> Self {
        Self::with_dial_delay(script, Duration::ZERO)
    }

    /// Every dial sleeps `delay` before connecting.
    pub fn with_dial_delay(script: DeviceScript, delay: Duration) -> Self {
        let (severed, _) = watch::channel(0);
        Self {
            state: Arc::new(ScriptedState {
                script,
                dial_delay: delay,
                refuse: AtomicBool::new(false),
                muted: AtomicBool::new(false),
                dials: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                received: Mutex::new(Vec::new()),
                severed,
            }),
        }
    }

    /// Makes subsequent dials fail with [`ConnectError::ConnectFailed`].
    pub fn refuse_dials(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Devices keep reading input but stop answering. The banner of new
    /// connections is still written.
    pub fn mute(&self, muted: bool) {
        self.state.muted.store(muted, Ordering::SeqCst);
    }

    /// Drops every connection opened so far from the device side.
    pub fn sever_all(&self) {
        self.state.severed.send_modify(|generation| *generation += 1);
    }

    /// Number of dial attempts, refused ones included.
    pub fn dials(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    /// Number of connections closed through [`Connection::close`].
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Every line the devices received, in arrival order.
    pub fn received(&self) -> Vec<String> {
        self.state
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for ScriptedTransport {
    type Conn = ScriptedConnection;

    async fn dial(
        &self,
        config: &SessionConfig,
        _timeout: Duration,
    ) -> Result<ScriptedConnection, ConnectError> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);
        if !self.state.dial_delay.is_zero() {
            tokio::time::sleep(self.state.dial_delay).await;
        }
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(ConnectError::connect_failed(
                config.address(),
                "connection refused",
            ));
        }
        debug!("Scripted connection to {}", config.address());
        Ok(ScriptedConnection {
            state: self.state.clone(),
            hangup: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        })
    }
}

/// Client side of a scripted device connection.
pub struct ScriptedConnection {
    state: Arc<ScriptedState>,
    hangup: Arc<Notify>,
    closed: AtomicBool,
}

impl Connection for ScriptedConnection {
    type Writer = WriteHalf<DuplexStream>;
    type Reader = ReadHalf<DuplexStream>;

    async fn open_pseudo_terminal(
        &mut self,
        _pty: &PtyOptions,
    ) -> Result<(Self::Writer, Self::Reader), ConnectError> {
        let (client, device) = tokio::io::duplex(DUPLEX_BUFFER_SIZE);
        tokio::spawn(run_device(
            self.state.clone(),
            device,
            self.state.severed.subscribe(),
            self.hangup.clone(),
        ));
        let (reader, writer) = tokio::io::split(client);
        Ok((writer, reader))
    }

    async fn close(&self) -> Result<(), ConnectError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            self.hangup.notify_one();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn run_device(
    state: Arc<ScriptedState>,
    device: DuplexStream,
    mut severed: watch::Receiver<u64>,
    hangup: Arc<Notify>,
) {
    let (read, mut write) = tokio::io::split(device);
    let mut lines = BufReader::new(read).lines();

    if !state.script.banner.is_empty()
        && write.write_all(state.script.banner.as_bytes()).await.is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            _ = severed.changed() => break,
            _ = hangup.notified() => break,
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim_end_matches('\r').to_string();
                trace!("Scripted device received {:?}", line);
                state
                    .received
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(line.clone());

                if state.muted.load(Ordering::SeqCst) {
                    continue;
                }
                let answer = state.script.answer(&line).to_string();
                if write.write_all(answer.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Scripted device hung up.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn config() -> SessionConfig {
        SessionConfig::new("admin", "secret", "10.0.0.1", "22", "cisco").expect("config")
    }

    #[tokio::test]
    async fn device_writes_banner_and_answers_lines() {
        let transport = ScriptedTransport::new(
            DeviceScript::new("sw#")
                .banner("welcome\nsw#")
                .reply("show clock", "12:00\nsw#"),
        );
        let mut conn = transport
            .dial(&config(), Duration::from_secs(1))
            .await
            .expect("dial");
        let (mut writer, mut reader) = conn
            .open_pseudo_terminal(&PtyOptions::default())
            .await
            .expect("pty");

        let mut buf = vec![0u8; 64];
        let n = reader.read(&mut buf).await.expect("read banner");
        assert_eq!(&buf[..n], b"welcome\nsw#");

        writer.write_all(b"show clock\n").await.expect("write");
        let n = reader.read(&mut buf).await.expect("read reply");
        assert_eq!(&buf[..n], b"12:00\nsw#");

        writer.write_all(b"\n").await.expect("write");
        let n = reader.read(&mut buf).await.expect("read prompt");
        assert_eq!(&buf[..n], b"sw#");

        assert_eq!(transport.received(), vec!["show clock".to_string(), String::new()]);
    }

    #[tokio::test]
    async fn refused_dial_reports_connect_failed() {
        let transport = ScriptedTransport::new(DeviceScript::new("sw#"));
        transport.refuse_dials(true);

        let result = transport.dial(&config(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ConnectError::ConnectFailed { .. })));
        assert_eq!(transport.dials(), 1);
    }

    #[tokio::test]
    async fn sever_and_close_end_the_device() {
        let transport = ScriptedTransport::new(DeviceScript::new("sw#"));

        let mut severed = transport.dial(&config(), Duration::ZERO).await.expect("dial");
        let (_w1, mut r1) = severed
            .open_pseudo_terminal(&PtyOptions::default())
            .await
            .expect("pty");
        transport.sever_all();
        let mut buf = vec![0u8; 8];
        assert_eq!(r1.read(&mut buf).await.expect("eof"), 0);

        let mut closed = transport.dial(&config(), Duration::ZERO).await.expect("dial");
        let (_w2, mut r2) = closed
            .open_pseudo_terminal(&PtyOptions::default())
            .await
            .expect("pty");
        closed.close().await.expect("close");
        closed.close().await.expect("close again");
        assert_eq!(r2.read(&mut buf).await.expect("eof"), 0);
        assert!(closed.is_closed());
        assert_eq!(transport.closes(), 1);
    }
}
