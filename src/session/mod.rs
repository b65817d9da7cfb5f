//! Session pooling and interactive command execution.
//!
//! This module turns a raw duplex shell stream into command/response
//! exchanges and caches the resulting sessions per device login.
//!
//! # Main Components
//!
//! - [`SessionManager`] - Session cache with per-key locking and idle sweep
//!   (singleton via `MANAGER`)
//! - [`Session`] - One interactive shell with its writer and reader tasks

use log::{debug, info, trace, warn};
use moka::future::Cache;
use once_cell::sync::{Lazy, OnceCell};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{ManagerOptions, SessionOptions};
use crate::device::{SessionConfig, SessionKey};
use crate::error::ConnectError;
use crate::templates::{self, PROMPT_TERMINATORS, Vendor};
use crate::transport::{Connection, SshTransport, Transport};

/// Global singleton session manager over SSH with default options.
pub static MANAGER: Lazy<SessionManager> = Lazy::new(SessionManager::new);

/// Deregistration capability handed to a session by its manager.
///
/// Called at most once, on close, with the session's key and id.
pub type OnClose = Box<dyn FnOnce(&SessionKey, u64) + Send>;

/// An interactive shell on one transport connection.
///
/// Output has no framing. Replies are read back either until a prompt
/// terminator shows up ([`read_until_expected`](Session::read_until_expected))
/// or until the output stays quiet ([`read_until_quiet`](Session::read_until_quiet)).
/// A session serves one caller at a time.
pub struct Session<C: Connection> {
    id: u64,
    key: SessionKey,
    vendor: Vendor,
    options: SessionOptions,
    conn: Arc<C>,

    last_used: Mutex<Instant>,
    closed: AtomicBool,

    /// Set by the reader or writer task once the transport stops carrying data.
    lost: Arc<AtomicBool>,

    /// Command queue drained by the writer task; `None` once closed.
    commands: Mutex<Option<Sender<String>>>,

    /// Output chunks pushed by the reader task.
    output: tokio::sync::Mutex<Receiver<String>>,

    tasks: Mutex<Vec<JoinHandle<()>>>,
    on_close: Mutex<Option<OnClose>>,
}

/// Session pool manager.
///
/// Caches one session per [`SessionKey`], serializes creation per key, and
/// evicts sessions idle for longer than the configured threshold (10 minutes
/// by default) from a background sweep task.
pub struct SessionManager<T: Transport = SshTransport> {
    inner: Arc<ManagerState<T>>,
}

struct ManagerState<T: Transport> {
    transport: T,
    options: ManagerOptions,
    store: Arc<SessionStore<T::Conn>>,
    sweeper: OnceCell<JoinHandle<()>>,
}

/// Session cache plus the per-key lock table.
struct SessionStore<C: Connection> {
    /// `None` marks a slot emptied by deregistration; the sweep prunes it.
    cache: RwLock<HashMap<SessionKey, Option<Arc<Session<C>>>>>,

    /// Lazily created per-key creation locks.
    locks: Cache<SessionKey, Arc<tokio::sync::Mutex<()>>>,
}

mod client;
mod manager;
mod sweep;
