use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};
use netpool::config::ManagerOptions;
use netpool::device::SessionConfig;
use netpool::session::SessionManager;
use netpool::transport::{DeviceScript, ScriptedTransport};

/// Keeps every warning emitted by the crate.
struct Capture(Mutex<Vec<String>>);

impl Log for Capture {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.0
                .lock()
                .unwrap()
                .push(format!("{} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

#[tokio::test(start_paused = true)]
async fn failed_establish_is_logged_as_warning() {
    log::set_logger(&CAPTURE).expect("install logger");
    log::set_max_level(LevelFilter::Warn);

    let transport = ScriptedTransport::new(DeviceScript::new("#"));
    transport.refuse_dials(true);
    let manager = SessionManager::with_transport(transport, ManagerOptions::default());
    let config =
        SessionConfig::new("gpmadmin", "secret", "10.3.1.10", "22", "cisco").expect("config");

    assert!(manager.get_session(&config).await.is_err());

    let records = CAPTURE.0.lock().unwrap().clone();
    assert!(
        records
            .iter()
            .any(|r| r.starts_with("WARN") && r.contains("Failed to establish session")),
        "{records:?}"
    );
}
