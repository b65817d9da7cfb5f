use super::*;

/// Shortest time an unused per-key lock stays in the lock table.
const LOCK_MIN_IDLE: Duration = Duration::from_secs(60 * 60);

impl SessionManager {
    /// Creates a session manager over SSH with default options.
    pub fn new() -> Self {
        Self::with_transport(SshTransport::default(), ManagerOptions::default())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> SessionManager<T> {
    /// Creates a session manager dialing through `transport`.
    ///
    /// The idle sweep starts with the first [`get_session`](Self::get_session)
    /// call, so a manager can be built outside a runtime.
    pub fn with_transport(transport: T, options: ManagerOptions) -> Self {
        let locks = Cache::builder()
            .time_to_idle(options.idle_threshold().saturating_mul(2).max(LOCK_MIN_IDLE))
            .build();

        Self {
            inner: Arc::new(ManagerState {
                transport,
                options,
                store: Arc::new(SessionStore {
                    cache: RwLock::new(HashMap::new()),
                    locks,
                }),
                sweeper: OnceCell::new(),
            }),
        }
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Gets a cached session or creates a new one.
    ///
    /// The per-key lock is held for the whole lookup, probe and creation, so
    /// concurrent callers for one device end up sharing a single connection
    /// while other devices proceed in parallel. A cached session is reused
    /// only if it answers the liveness probe; otherwise it is closed and
    /// replaced. Dial and shell failures are returned as is, without retry.
    pub async fn get_session(
        &self,
        config: &SessionConfig,
    ) -> Result<Arc<Session<T::Conn>>, ConnectError> {
        self.ensure_sweeper();

        let key = config.session_key();
        let lock = self.inner.store.key_lock(&key).await;
        let _guard = lock.lock().await;

        if let Some(session) = self.inner.store.get(&key) {
            debug!("Cache hit: {}", key);
            if session.check_liveness().await {
                session.touch();
                return Ok(session);
            }
            debug!("Cached session {} failed liveness check, recreating", key);
            session.close().await;
        } else {
            debug!("Cache miss, creating new session for {}...", key);
        }

        let session = match self.inner.establish(config, key.clone()).await {
            Ok(session) => session,
            Err(e) => {
                warn!("{} Failed to establish session: {}", key, e);
                return Err(e);
            }
        };
        self.inner.store.insert(key.clone(), session.clone());
        debug!("New session for {} has been cached.", key);

        Ok(session)
    }

    /// Empties the cache slot of `key` and closes the session it held.
    ///
    /// Waits for the per-key lock, so a creation or probe in progress for
    /// the same device finishes first.
    pub async fn remove_session(&self, key: &SessionKey) {
        let lock = self.inner.store.key_lock(key).await;
        let _guard = lock.lock().await;

        if let Some(session) = self.inner.store.take(key) {
            debug!("{} Removing session {}", key, session.id());
            session.close().await;
        }
    }

    /// Number of cached sessions.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a session is cached under `key`.
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.inner.store.get(key).is_some()
    }

    /// Runs one sweep cycle now and returns the keys it evicted.
    pub async fn sweep_idle(&self) -> Vec<SessionKey> {
        self.inner.sweep_idle().await
    }

    fn ensure_sweeper(&self) {
        self.inner.sweeper.get_or_init(|| {
            sweep::spawn_sweeper(
                Arc::downgrade(&self.inner),
                self.inner.options.sweep_interval(),
            )
        });
    }
}

impl<T: Transport> ManagerState<T> {
    /// Dials, opens the shell, drains the banner and runs the vendor initializer.
    pub(super) async fn establish(
        &self,
        config: &SessionConfig,
        key: SessionKey,
    ) -> Result<Arc<Session<T::Conn>>, ConnectError> {
        let conn = self
            .transport
            .dial(config, self.options.dial_timeout())
            .await?;

        let session = Session::create(
            conn,
            config.vendor().clone(),
            key,
            Some(self.store.deregistration()),
            self.options.session.clone(),
        )
        .await?;

        let banner = session
            .read_until_expected(self.options.init_timeout(), PROMPT_TERMINATORS)
            .await;
        trace!("{} Login output: {:?}", session.key(), banner);

        if let Some(echo) = templates::initialize(&session, self.options.init_timeout()).await {
            trace!("{} Pagination output: {:?}", session.key(), echo);
        }

        Ok(Arc::new(session))
    }
}

impl<T: Transport> Drop for ManagerState<T> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get() {
            sweeper.abort();
        }
    }
}

impl<C: Connection> SessionStore<C> {
    pub(super) async fn key_lock(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .get_with(key.clone(), async { Arc::new(tokio::sync::Mutex::new(())) })
            .await
    }

    pub(super) fn get(&self, key: &SessionKey) -> Option<Arc<Session<C>>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(|entry| entry.clone())
    }

    pub(super) fn insert(&self, key: SessionKey, session: Arc<Session<C>>) {
        let previous = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Some(session));
        if let Some(Some(previous)) = previous
            && previous.is_open()
        {
            warn!("{} Replaced session {} that was still open", previous.key(), previous.id());
        }
    }

    /// Empties the slot of `key` and hands back what it held.
    fn take(&self, key: &SessionKey) -> Option<Arc<Session<C>>> {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
            .and_then(Option::take)
    }

    /// Empties the slot only if it still holds session `id`.
    fn deregister(&self, key: &SessionKey, id: u64) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        match cache.get_mut(key) {
            Some(entry) if entry.as_ref().is_some_and(|s| s.id() == id) => {
                *entry = None;
                debug!("{} Session {} removed from cache", key, id);
            }
            _ => trace!("{} Session {} no longer cached", key, id),
        }
    }

    /// Capability a session uses to remove itself on close. Does not keep
    /// the store alive.
    fn deregistration(self: &Arc<Self>) -> OnClose {
        let store = Arc::downgrade(self);
        Box::new(move |key: &SessionKey, id: u64| {
            if let Some(store) = store.upgrade() {
                store.deregister(key, id);
            }
        })
    }

    fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.is_some())
            .count()
    }
}
