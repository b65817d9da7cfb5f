//! Runs commands on a real device through the global session manager.
//!
//! ```text
//! cargo run --example show_version -- 10.3.1.10 22 admin password cisco "show version"
//! ```

use std::env;

use anyhow::{Context, bail};
use netpool::device::SessionConfig;
use netpool::session::MANAGER;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.len() < 6 {
        bail!("usage: show_version <host> <port> <user> <password> <vendor> <command>...");
    }
    let (host, port, user, password, vendor) = (&args[0], &args[1], &args[2], &args[3], &args[4]);
    let commands = &args[5..];

    let config = SessionConfig::new(user.as_str(), password.as_str(), host.as_str(), port, vendor)
        .context("invalid device config")?;

    let session = MANAGER
        .get_session(&config)
        .await
        .with_context(|| format!("connect to {}", config.address()))?;
    let output = session.execute_and_read(commands).await?;
    println!("{output}");

    // Reused from the cache, no second dial.
    let session = MANAGER.get_session(&config).await?;
    let output = session.execute_and_close(commands).await?;
    println!("{output}");

    Ok(())
}
