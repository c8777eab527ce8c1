//! Presence tracking across devices and server processes.
//!
//! Two tiers: a process-local connection counter per user, and an optional
//! shared store (online set + per-user last-seen key with TTL). A user is
//! online while either tier says so. Offline transitions are delayed by a
//! grace window so a rapid reconnect does not flap, and a reaper removes
//! shared-store entries whose last-seen key expired.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PresenceConfig;
use crate::metrics::ServerMetrics;
use crate::protocol::UserId;

pub mod store;

pub use store::{InMemoryPresenceStore, PresenceStore};

/// Callback fired on an online or offline transition.
pub type TransitionCallback = Arc<dyn Fn(UserId) + Send + Sync>;

#[derive(Default)]
struct PresenceRecord {
    local_conn_count: u32,
    offline_notified: bool,
    pending_offline: Option<JoinHandle<()>>,
}

struct ListenerSet {
    /// Primary callbacks, invoked before the listener list.
    on_user_online: Option<TransitionCallback>,
    on_user_offline: Option<TransitionCallback>,
    listeners: Vec<(TransitionCallback, TransitionCallback)>,
}

/// Decides when a user is online or offline and emits each transition
/// exactly once.
pub struct PresenceManager {
    weak_self: Weak<Self>,
    cfg: PresenceConfig,
    store: Option<Arc<dyn PresenceStore>>,
    records: Mutex<HashMap<UserId, PresenceRecord>>,
    listeners: RwLock<ListenerSet>,
    offline_grace: RwLock<Duration>,
    reaper_interval: RwLock<Duration>,
    shutdown: CancellationToken,
    metrics: Arc<ServerMetrics>,
}

impl PresenceManager {
    pub fn new(
        cfg: PresenceConfig,
        store: Option<Arc<dyn PresenceStore>>,
        metrics: Arc<ServerMetrics>,
    ) -> Arc<Self> {
        let offline_grace = cfg.offline_grace();
        let reaper_interval = cfg.reaper_interval();
        Arc::new_cyclic(|weak_self| Self {
            weak_self: Weak::clone(weak_self),
            cfg,
            store,
            records: Mutex::new(HashMap::new()),
            listeners: RwLock::new(ListenerSet {
                on_user_online: None,
                on_user_offline: None,
                listeners: Vec::new(),
            }),
            offline_grace: RwLock::new(offline_grace),
            reaper_interval: RwLock::new(reaper_interval),
            shutdown: CancellationToken::new(),
            metrics,
        })
    }

    /// Install the primary transition callbacks, invoked before listeners.
    pub fn set_transition_callbacks(
        &self,
        on_online: TransitionCallback,
        on_offline: TransitionCallback,
    ) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.on_user_online = Some(on_online);
        listeners.on_user_offline = Some(on_offline);
    }

    /// Append a listener pair, invoked in registration order.
    pub fn add_listener(&self, on_online: TransitionCallback, on_offline: TransitionCallback) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .push((on_online, on_offline));
    }

    pub fn set_offline_grace_period(&self, grace: Duration) {
        *self.offline_grace.write().unwrap_or_else(|e| e.into_inner()) = grace;
    }

    pub fn set_reaper_interval(&self, interval: Duration) {
        *self
            .reaper_interval
            .write()
            .unwrap_or_else(|e| e.into_inner()) = interval;
    }

    /// Record a new connection for `user_id`.
    ///
    /// Cancels any pending offline timer, bumps the local counter, refreshes
    /// the shared store, and emits an online transition when the user was
    /// not previously online anywhere.
    pub async fn register(&self, user_id: UserId) {
        let was_local = {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let record = records.entry(user_id).or_default();
            if let Some(timer) = record.pending_offline.take() {
                timer.abort();
                self.metrics.increment_offline_suppressed();
            }
            let was_local = record.local_conn_count > 0;
            record.local_conn_count += 1;
            record.offline_notified = false;
            was_local
        };

        // Snapshot the shared tier before touch overwrites the last-seen key.
        let was_shared = if was_local {
            true
        } else {
            self.last_seen_exists(user_id).await
        };

        self.touch(user_id).await;

        if !was_local && !was_shared {
            self.emit_online(user_id);
        }
    }

    /// Record a dropped connection for `user_id`.
    ///
    /// When the last local connection goes away, a one-shot grace timer is
    /// armed; the offline transition fires only if nothing reconnects before
    /// it elapses.
    pub fn unregister(&self, user_id: UserId) {
        let arm_timer = {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let record = records.entry(user_id).or_default();
            record.local_conn_count = record.local_conn_count.saturating_sub(1);
            record.local_conn_count == 0
        };

        if !arm_timer {
            return;
        }

        let grace = *self.offline_grace.read().unwrap_or_else(|e| e.into_inner());
        let Some(manager) = self.weak_self.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            manager.finalize_offline(user_id).await;
        });

        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records.entry(user_id).or_default();
        if record.local_conn_count == 0 {
            if let Some(previous) = record.pending_offline.replace(handle) {
                previous.abort();
            }
        } else {
            // A reconnect landed while the timer was being armed.
            handle.abort();
        }
    }

    /// Refresh the shared-store mirror for an active user.
    pub async fn touch(&self, user_id: UserId) {
        let Some(store) = &self.store else {
            return;
        };

        let member = user_id.to_string();
        if let Err(err) = store.set_add(&self.cfg.online_set_key, &member).await {
            warn!(%user_id, error = %err, "Failed to add user to online set");
        }

        let timestamp = chrono::Utc::now().timestamp().to_string();
        if let Err(err) = store
            .put_with_ttl(
                &self.cfg.last_seen_key(user_id),
                &timestamp,
                self.cfg.last_seen_ttl(),
            )
            .await
        {
            warn!(%user_id, error = %err, "Failed to refresh last-seen key");
        }
    }

    /// Whether the user is online on this process or any other.
    pub async fn is_online(&self, user_id: UserId) -> bool {
        {
            let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            if records
                .get(&user_id)
                .is_some_and(|record| record.local_conn_count > 0)
            {
                return true;
            }
        }
        self.last_seen_exists(user_id).await
    }

    /// Union of shared-store members with a live last-seen key and locally
    /// connected users. Stale shared-store members are removed on the way.
    pub async fn get_online_user_ids(&self) -> Vec<UserId> {
        let mut online = BTreeSet::new();

        if let Some(store) = &self.store {
            match store.set_members(&self.cfg.online_set_key).await {
                Ok(members) => {
                    for member in members {
                        let Ok(user_id) = member.parse::<UserId>() else {
                            warn!(member = %member, "Discarding malformed online-set member");
                            continue;
                        };
                        if self.last_seen_exists(user_id).await {
                            online.insert(user_id);
                        } else if let Err(err) =
                            store.set_remove(&self.cfg.online_set_key, &member).await
                        {
                            warn!(%user_id, error = %err, "Failed to remove stale online-set member");
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Failed to enumerate online set");
                }
            }
        }

        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        for (user_id, record) in records.iter() {
            if record.local_conn_count > 0 {
                online.insert(*user_id);
            }
        }

        online.into_iter().collect()
    }

    /// Grace timer body: emits offline unless a reconnect or another
    /// process's refresh intervened.
    async fn finalize_offline(&self, user_id: UserId) {
        {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let Some(record) = records.get_mut(&user_id) else {
                return;
            };
            record.pending_offline = None;
            if record.local_conn_count > 0 {
                return;
            }
        }

        if let Some(store) = &self.store {
            // Another process may have refreshed the key during the grace.
            if self.last_seen_exists(user_id).await {
                debug!(%user_id, "Last-seen refreshed elsewhere, keeping user online");
                return;
            }
            if let Err(err) = store
                .set_remove(&self.cfg.online_set_key, &user_id.to_string())
                .await
            {
                warn!(%user_id, error = %err, "Failed to remove user from online set");
            }
        }

        self.emit_offline(user_id);
    }

    /// Start the reaper task. No-op without a shared store.
    pub fn start(&self) {
        if self.store.is_none() {
            return;
        }

        let Some(manager) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            loop {
                manager.reap_once().await;
                let interval = *manager
                    .reaper_interval
                    .read()
                    .unwrap_or_else(|e| e.into_inner());
                tokio::select! {
                    () = manager.shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
            debug!("Presence reaper stopped");
        });
    }

    /// One reconciliation pass over the shared online set.
    pub async fn reap_once(&self) {
        let Some(store) = &self.store else {
            return;
        };

        let members = match store.set_members(&self.cfg.online_set_key).await {
            Ok(members) => members,
            Err(err) => {
                warn!(error = %err, "Reaper failed to enumerate online set");
                return;
            }
        };

        for member in members {
            let Ok(user_id) = member.parse::<UserId>() else {
                continue;
            };
            if self.last_seen_exists(user_id).await {
                continue;
            }

            if let Err(err) = store.set_remove(&self.cfg.online_set_key, &member).await {
                warn!(%user_id, error = %err, "Reaper failed to remove stale member");
                continue;
            }
            self.metrics.increment_presence_reaped();

            let has_local = {
                let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
                records
                    .get(&user_id)
                    .is_some_and(|record| record.local_conn_count > 0)
            };
            if !has_local {
                self.emit_offline(user_id);
            }
        }
    }

    /// Stop the reaper and all pending grace timers. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        for record in records.values_mut() {
            if let Some(timer) = record.pending_offline.take() {
                timer.abort();
            }
        }
    }

    fn emit_online(&self, user_id: UserId) {
        {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records.entry(user_id).or_default().offline_notified = false;
        }
        self.metrics.increment_online_transitions();
        debug!(%user_id, "User online");

        let callbacks = self.collect_callbacks(true);
        for callback in callbacks {
            callback(user_id);
        }
    }

    fn emit_offline(&self, user_id: UserId) {
        {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            let record = records.entry(user_id).or_default();
            if record.offline_notified {
                return;
            }
            record.offline_notified = true;
        }
        self.metrics.increment_offline_transitions();
        debug!(%user_id, "User offline");

        let callbacks = self.collect_callbacks(false);
        for callback in callbacks {
            callback(user_id);
        }
    }

    fn collect_callbacks(&self, online: bool) -> Vec<TransitionCallback> {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        let primary = if online {
            listeners.on_user_online.clone()
        } else {
            listeners.on_user_offline.clone()
        };
        primary
            .into_iter()
            .chain(listeners.listeners.iter().map(|(on_online, on_offline)| {
                if online {
                    Arc::clone(on_online)
                } else {
                    Arc::clone(on_offline)
                }
            }))
            .collect()
    }

    async fn last_seen_exists(&self, user_id: UserId) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        match store.exists(&self.cfg.last_seen_key(user_id)).await {
            Ok(exists) => exists,
            Err(err) => {
                warn!(%user_id, error = %err, "Failed to query last-seen key");
                false
            }
        }
    }

    /// Test and introspection helper: whether the offline transition has
    /// been emitted for the user's current offline episode.
    pub fn offline_notified(&self, user_id: UserId) -> bool {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .is_some_and(|record| record.offline_notified)
    }

    /// Local connection count, ignoring the shared tier.
    pub fn local_connection_count(&self, user_id: UserId) -> u32 {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .map_or(0, |record| record.local_conn_count)
    }
}

impl Drop for PresenceManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
