//! Drives a session manager against a scripted in-memory device.

use std::time::Duration;

use netpool::config::{ManagerOptions, SessionOptions};
use netpool::device::SessionConfig;
use netpool::session::SessionManager;
use netpool::transport::{DeviceScript, ScriptedTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let script = DeviceScript::new("<core-01>")
        .banner("Info: The max number of VTY users is 5.\n<core-01>")
        .reply(
            "display version",
            "Huawei Versatile Routing Platform Software\nVRP (R) software, Version 5.170\n<core-01>",
        );
    let transport = ScriptedTransport::new(script);

    let options = ManagerOptions {
        session: SessionOptions {
            exec_timeout_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    let manager = SessionManager::with_transport(transport.clone(), options);

    let config = SessionConfig::new("admin", "admin@123", "192.168.1.1", "22", "huawei")?;
    let session = manager.get_session(&config).await?;
    let output = tokio::time::timeout(
        Duration::from_secs(30),
        session.execute_and_read(&["display version"]),
    )
    .await??;

    println!("{output}");
    println!("device received: {:?}", transport.received());
    Ok(())
}
