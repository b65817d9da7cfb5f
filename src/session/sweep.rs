use super::*;
use tokio::time::MissedTickBehavior;

/// Starts the periodic idle sweep. The task ends once the manager is dropped.
pub(super) fn spawn_sweeper<T: Transport>(
    state: Weak<ManagerState<T>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(state) = state.upgrade() else {
                debug!("Session manager dropped, stopping sweeper.");
                break;
            };
            let evicted = state.sweep_idle().await;
            if !evicted.is_empty() {
                debug!("Sweep evicted {} idle sessions", evicted.len());
            }
        }
    })
}

impl<T: Transport> ManagerState<T> {
    /// One sweep cycle.
    ///
    /// Candidates are collected under the shared lock and emptied slots are
    /// pruned under the exclusive lock; closing happens with no cache lock
    /// held. A session whose per-key lock is taken is in use and skipped
    /// until the next cycle.
    pub(super) async fn sweep_idle(&self) -> Vec<SessionKey> {
        let threshold = self.options.idle_threshold();
        let (emptied, candidates) = self.store.idle_candidates(threshold);

        if !emptied.is_empty() {
            self.store.prune(&emptied);
        }

        self.evict_idle(candidates, threshold).await
    }

    /// Closes the candidates that are still cached, unlocked and idle.
    async fn evict_idle(
        &self,
        candidates: Vec<Arc<Session<T::Conn>>>,
        threshold: Duration,
    ) -> Vec<SessionKey> {
        let mut evicted = Vec::new();
        for session in candidates {
            let key = session.key().clone();
            let lock = self.store.key_lock(&key).await;
            let Ok(_guard) = lock.try_lock() else {
                debug!("{} Busy, skipping eviction this cycle", key);
                continue;
            };

            if !self.store.holds(&key, session.id()) {
                trace!("{} Session {} replaced since collection", key, session.id());
                continue;
            }
            let idle = session.idle_for();
            if idle <= threshold {
                continue;
            }
            info!("Evicting session {} <unused for {:?}>", key, idle);
            session.close().await;
            evicted.push(key);
        }
        evicted
    }
}

impl<C: Connection> SessionStore<C> {
    /// Emptied slots, and sessions idle for longer than `threshold`.
    fn idle_candidates(&self, threshold: Duration) -> (Vec<SessionKey>, Vec<Arc<Session<C>>>) {
        let cache = match self.cache.read() {
            Ok(cache) => cache,
            Err(poisoned) => {
                warn!("Session cache lock poisoned, sweeping anyway");
                poisoned.into_inner()
            }
        };

        let mut emptied = Vec::new();
        let mut candidates = Vec::new();
        for (key, entry) in cache.iter() {
            match entry {
                None => emptied.push(key.clone()),
                Some(session) if session.idle_for() > threshold => {
                    candidates.push(session.clone())
                }
                Some(_) => {}
            }
        }
        (emptied, candidates)
    }

    /// Whether the slot of `key` still holds session `id`.
    fn holds(&self, key: &SessionKey, id: u64) -> bool {
        self.get(key).is_some_and(|session| session.id() == id)
    }

    /// Drops slots that are still empty.
    fn prune(&self, keys: &[SessionKey]) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            if matches!(cache.get(key), Some(None)) {
                cache.remove(key);
            }
        }
        trace!("Pruned {} empty cache slots", keys.len());
    }
}
