use super::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::sleep;

const READ_BUFFER_SIZE: usize = 64 * 1024;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl<C: Connection> Session<C> {
    /// Opens a shell on `conn` and starts the writer and reader tasks.
    ///
    /// Returns as soon as both tasks run; the login banner is left in the
    /// output queue. On failure the connection is closed.
    pub async fn create(
        mut conn: C,
        vendor: Vendor,
        key: SessionKey,
        on_close: Option<OnClose>,
        options: SessionOptions,
    ) -> Result<Self, ConnectError> {
        let (mut writer, mut reader) = match conn.open_pseudo_terminal(&options.pty).await {
            Ok(streams) => streams,
            Err(e) => {
                debug!("{} Failed to open shell: {}", key, e);
                if let Err(close_err) = conn.close().await {
                    debug!("{} Failed to close connection: {}", key, close_err);
                }
                return Err(e);
            }
        };

        let (command_tx, mut command_rx) =
            mpsc::channel::<String>(options.command_queue_capacity.max(1));
        let (output_tx, output_rx) = mpsc::channel::<String>(options.output_queue_capacity.max(1));
        let lost = Arc::new(AtomicBool::new(false));

        let writer_key = key.clone();
        let writer_lost = lost.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let line = format!("{command}\n");
                let written = match writer.write_all(line.as_bytes()).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    debug!("{} Failed to send data to shell: {:?}", writer_key, e);
                    writer_lost.store(true, Ordering::SeqCst);
                    break;
                }
            }
            debug!("{} Writer task ended.", writer_key);
        });

        let reader_key = key.clone();
        let reader_lost = lost.clone();
        let reader_task = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!("{} Shell sent EOF.", reader_key);
                        break;
                    }
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        trace!("{} {:?}", reader_key, chunk);
                        if output_tx.send(chunk).await.is_err() {
                            debug!("{} Shell output receiver dropped.", reader_key);
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("{} Failed to read from shell: {:?}", reader_key, e);
                        break;
                    }
                }
            }
            reader_lost.store(true, Ordering::SeqCst);
            debug!("{} Reader task ended.", reader_key);
        });

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!("{} Session {} created", key, id);

        Ok(Self {
            id,
            key,
            vendor,
            options,
            conn: Arc::new(conn),
            last_used: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            lost,
            commands: Mutex::new(Some(command_tx)),
            output: tokio::sync::Mutex::new(output_rx),
            tasks: Mutex::new(vec![writer_task, reader_task]),
            on_close: Mutex::new(on_close),
        })
    }

    /// Process-unique id of this session.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn vendor(&self) -> &Vendor {
        &self.vendor
    }

    /// Whether the session is neither closed nor known to have lost its transport.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && !self.lost.load(Ordering::SeqCst)
            && !self.conn.is_closed()
    }

    /// Marks the session as used now.
    pub fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the session was last used.
    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Queues commands for the writer task, in order. Each is sent followed
    /// by a newline. Waits while the queue is full.
    pub async fn write_commands<S: AsRef<str>>(&self, commands: &[S]) -> Result<(), ConnectError> {
        let sender = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ConnectError::SessionClosed)?;

        for command in commands {
            let command = command.as_ref();
            debug!("{} Write command: {:?}", self.key, command);
            if sender.send(command.to_string()).await.is_err() {
                return Err(ConnectError::TransportLost(format!(
                    "{} writer stopped",
                    self.key
                )));
            }
        }
        Ok(())
    }

    /// Reads until the output has been quiet for a while.
    ///
    /// After every silent poll the idleness counter drops by one and the read
    /// sleeps `timeout` times the grace factor; new output resets the
    /// counter. Returns once the counter reaches zero, the shell is gone, or
    /// the round cap is hit. Meant for long dumps with no reliable prompt.
    pub async fn read_until_quiet(&self, timeout: Duration) -> String {
        let timing = &self.options.read_timing;
        debug!("{} read_until_quiet <wait timeout = {}ms>", self.key, timeout.as_millis());

        let grace = timeout.saturating_mul(timing.quiet_grace_factor);
        let mut rx = self.output.lock().await;
        let mut output = String::new();
        let mut idle = timing.quiet_rounds;

        for _ in 0..timing.max_quiet_polls {
            sleep(timing.poll_interval()).await;
            let (data, disconnected) = drain(&mut rx);
            if !data.is_empty() {
                output.push_str(&data);
                idle = timing.quiet_rounds;
                continue;
            }
            if disconnected {
                break;
            }

            idle = idle.saturating_sub(1);
            trace!("{} read_until_quiet: idle countdown {}", self.key, idle);
            if idle == 0 {
                break;
            }
            sleep(grace).await;
        }
        output
    }

    /// Reads until the output contains one of `terminators`.
    ///
    /// Terminators are checked after each silent poll. Without a match the
    /// read waits `timeout` once; a second consecutive silent poll without a
    /// match returns what was accumulated. Callers cannot tell from the result
    /// whether a terminator was reached.
    pub async fn read_until_expected<S: AsRef<str>>(
        &self,
        timeout: Duration,
        terminators: &[S],
    ) -> String {
        let timing = &self.options.read_timing;
        debug!("{} read_until_expected <wait timeout = {}ms>", self.key, timeout.as_millis());

        let mut rx = self.output.lock().await;
        let mut output = String::new();
        let mut waited = false;

        for _ in 0..timing.max_expect_polls {
            sleep(timing.poll_interval()).await;
            let (data, disconnected) = drain(&mut rx);
            if !data.is_empty() {
                output.push_str(&data);
                waited = false;
                continue;
            }

            if terminators.iter().any(|t| output.contains(t.as_ref())) {
                return output;
            }
            if waited || disconnected {
                break;
            }
            trace!("{} read_until_expected: delay for timeout", self.key);
            sleep(timeout).await;
            waited = true;
        }
        output
    }

    /// Sends commands and reads the reply until the output goes quiet.
    pub async fn execute_and_read<S: AsRef<str>>(
        &self,
        commands: &[S],
    ) -> Result<String, ConnectError> {
        self.touch();
        self.write_commands(commands).await?;
        let output = self.read_until_quiet(self.options.exec_timeout()).await;
        self.touch();
        Ok(output)
    }

    /// Like [`execute_and_read`](Session::execute_and_read), then closes the
    /// session whatever the outcome.
    pub async fn execute_and_close<S: AsRef<str>>(
        &self,
        commands: &[S],
    ) -> Result<String, ConnectError> {
        let result = self.execute_and_read(commands).await;
        self.close().await;
        result
    }

    /// Probes the shell with a bare newline and reports whether a prompt
    /// terminator came back.
    pub async fn check_liveness(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        if self.write_commands(&[""]).await.is_err() {
            return false;
        }
        let result = self
            .read_until_expected(self.options.probe_timeout(), PROMPT_TERMINATORS)
            .await;
        PROMPT_TERMINATORS.iter().any(|t| result.contains(t))
    }

    /// Closes the transport, deregisters from the manager and stops both
    /// tasks. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("{} Closing session {}...", self.key, self.id);

        if let Err(e) = self.conn.close().await {
            warn!("{} Close transport err: {}", self.key, e);
        }

        let on_close = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(on_close) = on_close {
            on_close(&self.key, self.id);
        }

        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // A read in progress keeps the receiver; it ends once the reader task is gone.
        if let Ok(mut rx) = self.output.try_lock() {
            rx.close();
        }
        for task in self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
        debug!("{} Session {} closed", self.key, self.id);
    }
}

impl<C: Connection> Drop for Session<C> {
    /// Stops both tasks. A session dropped without [`close`](Session::close)
    /// also has its connection closed on the current runtime, if any.
    fn drop(&mut self) {
        for task in self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
        if *self.closed.get_mut() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("{} Session {} dropped outside a runtime", self.key, self.id);
            return;
        };
        debug!("{} Session {} dropped while open", self.key, self.id);
        let conn = self.conn.clone();
        let key = self.key.clone();
        runtime.spawn(async move {
            if let Err(e) = conn.close().await {
                warn!("{} Close transport err: {}", key, e);
            }
        });
    }
}

/// Takes every buffered chunk. Also reports whether the reader side is gone.
fn drain(rx: &mut Receiver<String>) -> (String, bool) {
    let mut output = String::new();
    loop {
        match rx.try_recv() {
            Ok(chunk) => output.push_str(&chunk),
            Err(TryRecvError::Empty) => return (output, false),
            Err(TryRecvError::Disconnected) => return (output, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PtyOptions, ReadTiming};
    use crate::transport::{DeviceScript, ScriptedTransport};
    use std::sync::atomic::AtomicUsize;
    use tokio::io::DuplexStream;

    fn config() -> SessionConfig {
        SessionConfig::new("admin", "secret", "10.0.0.1", "22", "cisco").expect("config")
    }

    async fn open(
        transport: &ScriptedTransport,
        on_close: Option<OnClose>,
    ) -> Session<crate::transport::ScriptedConnection> {
        let config = config();
        let conn = transport
            .dial(&config, Duration::from_secs(1))
            .await
            .expect("dial");
        Session::create(
            conn,
            config.vendor().clone(),
            config.session_key(),
            on_close,
            SessionOptions::default(),
        )
        .await
        .expect("create session")
    }

    /// Shell over bare pipes. The test plays the device on the far ends.
    struct RawShell {
        streams: Option<(DuplexStream, DuplexStream)>,
    }

    impl Connection for RawShell {
        type Writer = DuplexStream;
        type Reader = DuplexStream;

        async fn open_pseudo_terminal(
            &mut self,
            _pty: &PtyOptions,
        ) -> Result<(DuplexStream, DuplexStream), ConnectError> {
            self.streams.take().ok_or(ConnectError::SessionClosed)
        }

        async fn close(&self) -> Result<(), ConnectError> {
            Ok(())
        }
    }

    /// Returns the session with the device's input and output ends.
    async fn open_raw(
        input_buffer: usize,
        options: SessionOptions,
    ) -> (Session<RawShell>, DuplexStream, DuplexStream) {
        let (writer, device_input) = tokio::io::duplex(input_buffer);
        let (device_output, reader) = tokio::io::duplex(64 * 1024);
        let shell = RawShell {
            streams: Some((writer, reader)),
        };
        let config = config();
        let session = Session::create(
            shell,
            config.vendor().clone(),
            config.session_key(),
            None,
            options,
        )
        .await
        .expect("create session");
        (session, device_input, device_output)
    }

    /// Logs a line without any prompt terminator every 50ms.
    fn chatter(mut device_output: DuplexStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(50)).await;
                let line = b"%LINK-3-UPDOWN: Interface Gi0/1, changed state to down\n";
                if device_output.write_all(line).await.is_err() {
                    break;
                }
            }
        })
    }

    fn timing(read_timing: ReadTiming) -> SessionOptions {
        SessionOptions {
            read_timing,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn expected_read_returns_as_soon_as_prompt_appears() {
        let transport =
            ScriptedTransport::new(DeviceScript::new("sw#").banner("login successful#"));
        let session = open(&transport, None).await;

        let started = Instant::now();
        let output = session
            .read_until_expected(Duration::from_secs(5), PROMPT_TERMINATORS)
            .await;

        assert_eq!(output, "login successful#");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expected_read_gives_up_after_one_grace_wait() {
        let transport = ScriptedTransport::new(DeviceScript::new("").banner("Password expired"));
        let session = open(&transport, None).await;

        let started = Instant::now();
        let output = session
            .read_until_expected(Duration::from_secs(5), PROMPT_TERMINATORS)
            .await;

        assert_eq!(output, "Password expired");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_read_returns_dump_without_prompt() {
        let dump =
            "sysname core-01\ninterface Vlan-interface1\n ip address 10.0.0.1 255.255.255.0\nreturn\n";
        let transport = ScriptedTransport::new(
            DeviceScript::new("<core-01>")
                .banner("<core-01>")
                .reply("display current-configuration", dump),
        );
        let session = open(&transport, None).await;
        session
            .read_until_expected(Duration::from_secs(1), PROMPT_TERMINATORS)
            .await;

        let output = session
            .execute_and_read(&["display current-configuration"])
            .await
            .expect("execute");

        assert_eq!(output, dump);
        assert!(PROMPT_TERMINATORS.iter().all(|t| !output.contains(t)));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_read_waits_out_the_idle_countdown() {
        let transport = ScriptedTransport::new(DeviceScript::new("sw#"));
        let session = open(&transport, None).await;

        let started = Instant::now();
        let output = session.read_until_quiet(Duration::from_secs(1)).await;

        assert!(output.is_empty());
        // Three silent polls, with a 10x grace sleep after the first two.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_and_read_returns_command_output() {
        let transport = ScriptedTransport::new(
            DeviceScript::new("#")
                .banner("login successful#")
                .reply("show version", "Version 1.0\n#"),
        );
        let session = open(&transport, None).await;

        let output = session
            .execute_and_read(&["show version"])
            .await
            .expect("execute");

        assert!(output.contains("Version 1.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn commands_reach_the_device_in_order() {
        let transport = ScriptedTransport::new(DeviceScript::new("sw#"));
        let session = open(&transport, None).await;

        session
            .write_commands(&["system-view", "vlan 10", "quit"])
            .await
            .expect("write");
        session.read_until_quiet(Duration::from_millis(100)).await;

        assert_eq!(transport.received(), vec!["system-view", "vlan 10", "quit"]);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_follows_the_transport() {
        let transport = ScriptedTransport::new(DeviceScript::new("sw>"));
        let session = open(&transport, None).await;
        assert!(session.check_liveness().await);

        transport.mute(true);
        assert!(!session.check_liveness().await);

        transport.mute(false);
        transport.sever_all();
        session.read_until_quiet(Duration::from_millis(100)).await;
        assert!(!session.is_open());
        assert!(!session.check_liveness().await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_twice_deregisters_once() {
        let transport = ScriptedTransport::new(DeviceScript::new("sw#"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let session = open(
            &transport,
            Some(Box::new(move |_key: &SessionKey, _id: u64| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .await;

        session.close().await;
        session.close().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.closes(), 1);
        assert!(!session.is_open());
        assert!(matches!(
            session.write_commands(&["show clock"]).await,
            Err(ConnectError::SessionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_and_close_always_closes() {
        let transport = ScriptedTransport::new(
            DeviceScript::new("sw#").reply("show clock", "12:00:00 UTC\nsw#"),
        );
        let session = open(&transport, None).await;

        let output = session
            .execute_and_close(&["show clock"])
            .await
            .expect("execute");

        assert!(output.contains("12:00:00 UTC"));
        assert!(!session.is_open());
        assert_eq!(transport.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn write_waits_while_command_queue_is_full() {
        let options = SessionOptions {
            command_queue_capacity: 1,
            ..Default::default()
        };
        let (session, mut device_input, _device_output) = open_raw(1, options).await;

        // The writer holds the first command, the queue the second.
        let blocked = tokio::time::timeout(
            Duration::from_secs(5),
            session.write_commands(&["system-view", "vlan 10", "quit"]),
        )
        .await;
        assert!(blocked.is_err());

        let device = tokio::spawn(async move {
            let mut seen = Vec::new();
            let mut buf = [0u8; 64];
            while !seen.ends_with(b"quit\n") {
                let n = device_input.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            String::from_utf8(seen).expect("utf-8")
        });
        session
            .write_commands(&["quit"])
            .await
            .expect("write after drain");

        assert_eq!(device.await.expect("join"), "system-view\nvlan 10\nquit\n");
    }

    #[tokio::test(start_paused = true)]
    async fn expected_read_stops_at_round_cap() {
        let options = timing(ReadTiming {
            max_expect_polls: 5,
            ..Default::default()
        });
        let (session, _device_input, device_output) = open_raw(1024, options).await;
        let device = chatter(device_output);

        let started = Instant::now();
        let output = session
            .read_until_expected(Duration::from_secs(5), PROMPT_TERMINATORS)
            .await;
        let elapsed = started.elapsed();
        device.abort();

        assert!(output.contains("changed state to down"));
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_read_stops_at_round_cap() {
        let options = timing(ReadTiming {
            max_quiet_polls: 8,
            ..Default::default()
        });
        let (session, _device_input, device_output) = open_raw(1024, options).await;
        let device = chatter(device_output);

        let started = Instant::now();
        let output = session.read_until_quiet(Duration::from_secs(1)).await;
        let elapsed = started.elapsed();
        device.abort();

        assert!(output.contains("changed state to down"));
        assert!(elapsed >= Duration::from_millis(800));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_an_open_session_closes_its_connection() {
        let transport = ScriptedTransport::new(DeviceScript::new("sw#"));
        let session = open(&transport, None).await;

        drop(session);
        sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.closes(), 1);
    }
}
