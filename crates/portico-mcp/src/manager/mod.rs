//! Per-server connection lifecycle.
//!
//! Every configured server owns a [`Slot`] guarded by its own async mutex; operations
//! on different servers never contend. Transport I/O (open, handshake, list, close) is
//! always performed with the slot lock released, and results are applied only if the
//! slot's epoch is unchanged, so a disconnect or remove that races an in-flight attempt
//! wins deterministically.
//!
//! Lock order is the slot map first, then a slot; never the reverse.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::broker::ToolBroker;
use crate::classify::{ErrorRecord, create_error};
use crate::error::McpError;
use crate::history::{DEFAULT_HISTORY_CAPACITY, ErrorHistory};
use crate::server::ServerConfig;
use crate::state::{ConnectionState, StateEvent};
use crate::tool::{ToolDescriptor, ToolSnapshot};
use crate::transport::{DefaultTransportFactory, Transport, TransportFactory};

#[cfg(test)]
mod tests;

const STATE_EVENT_CAPACITY: usize = 256;

/// Timeouts and retry policy applied to every managed server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub max_auto_retries: u32,
    pub error_history_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            max_auto_retries: 5,
            error_history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl ManagerConfig {
    /// Delay before the automatic retry that follows the `failures`-th consecutive failure.
    #[must_use]
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

/// Outcome of [`ConnectionManager::test`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub server_id: String,
    pub success: bool,
    pub tool_count: usize,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

/// Outcome of [`ConnectionManager::sync_servers`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Ids whose configs failed validation; existing entries under these ids are kept.
    pub rejected: Vec<String>,
}

struct SlotState {
    config: ServerConfig,
    state: ConnectionState,
    epoch: u64,
    transport: Option<Arc<dyn Transport>>,
    tools: Arc<ToolSnapshot>,
    errors: ErrorHistory,
    consecutive_failures: u32,
    attempt: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
    removed: bool,
}

struct Slot {
    id: String,
    inner: Mutex<SlotState>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Slot {
    fn new(config: ServerConfig, history_capacity: usize) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            id: config.id.clone(),
            inner: Mutex::new(SlotState {
                tools: Arc::new(ToolSnapshot::empty(&config.id, 0)),
                config,
                state: ConnectionState::Disconnected,
                epoch: 0,
                transport: None,
                errors: ErrorHistory::with_capacity(history_capacity),
                consecutive_failures: 0,
                attempt: None,
                retry: None,
                removed: false,
            }),
            state_tx,
        }
    }
}

struct Shared {
    config: ManagerConfig,
    factory: Arc<dyn TransportFactory>,
    broker: Arc<ToolBroker>,
    slots: RwLock<HashMap<String, Arc<Slot>>>,
    events: broadcast::Sender<StateEvent>,
    generation: AtomicU64,
}

/// Owns the connection lifecycle of every configured server.
///
/// Cheap to clone; clones share the same servers.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_factory(config, Arc::new(DefaultTransportFactory))
    }

    #[must_use]
    pub fn with_factory(config: ManagerConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                factory,
                broker: Arc::new(ToolBroker::new()),
                slots: RwLock::new(HashMap::new()),
                events,
                generation: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn broker(&self) -> Arc<ToolBroker> {
        Arc::clone(&self.shared.broker)
    }

    #[must_use]
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateEvent> {
        self.shared.events.subscribe()
    }

    /// Register a server in the `disconnected` state.
    ///
    /// # Errors
    ///
    /// Returns `McpError::InvalidConfig` if validation fails, or
    /// `McpError::DuplicateServer` if the id is taken.
    pub async fn add_server(&self, config: ServerConfig) -> Result<(), McpError> {
        config.validate()?;
        let mut slots = self.shared.slots.write().await;
        if slots.contains_key(&config.id) {
            return Err(McpError::DuplicateServer {
                server_id: config.id,
            });
        }
        tracing::info!(
            server_id = %config.id,
            server_type = %config.server_type(),
            "server registered"
        );
        let slot = Slot::new(config, self.shared.config.error_history_capacity);
        slots.insert(slot.id.clone(), Arc::new(slot));
        Ok(())
    }

    /// Reconcile the managed set with the host's server list.
    ///
    /// New ids are added, ids missing from `configs` are removed, and servers whose
    /// type payload changed (or that became disabled) are torn down before their
    /// config is replaced. Nothing is connected here; see [`Self::connect_enabled`].
    pub async fn sync_servers(&self, configs: Vec<ServerConfig>) -> SyncStats {
        let mut stats = SyncStats::default();
        let mut wanted = HashSet::new();

        for config in configs {
            if !wanted.insert(config.id.clone()) {
                tracing::warn!(server_id = %config.id, "duplicate server id in list, skipping");
                stats.rejected.push(config.id);
                continue;
            }
            if let Err(e) = config.validate() {
                tracing::warn!(server_id = %config.id, "rejecting server config: {e}");
                stats.rejected.push(config.id);
                continue;
            }

            let existing = self.shared.slots.read().await.get(&config.id).cloned();
            let Some(slot) = existing else {
                let id = config.id.clone();
                match self.add_server(config).await {
                    Ok(()) => stats.added += 1,
                    Err(e) => {
                        tracing::warn!(server_id = %id, "failed to add server: {e}");
                        stats.rejected.push(id);
                    }
                }
                continue;
            };

            let mut st = slot.inner.lock().await;
            let old = &st.config;
            if old.kind == config.kind
                && old.name == config.name
                && old.enabled == config.enabled
                && old.registry_id == config.registry_id
            {
                stats.unchanged += 1;
                continue;
            }

            let needs_teardown = old.kind != config.kind || (old.enabled && !config.enabled);
            let transport = if needs_teardown && st.state != ConnectionState::Disconnected {
                self.shared.teardown(&slot, &mut st, false)
            } else {
                None
            };
            st.config = config;
            drop(st);
            stats.updated += 1;
            if let Some(transport) = transport {
                transport.close().await;
            }
        }

        let stale: Vec<String> = self
            .shared
            .slots
            .read()
            .await
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            if self.remove(&id).await.is_ok() {
                stats.removed += 1;
            }
        }

        tracing::info!(
            added = stats.added,
            updated = stats.updated,
            removed = stats.removed,
            unchanged = stats.unchanged,
            rejected = stats.rejected.len(),
            "server list synchronized"
        );
        stats
    }

    pub async fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.slots.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids.
    pub async fn config(&self, id: &str) -> Result<ServerConfig, McpError> {
        let slot = self.slot(id).await?;
        let st = slot.inner.lock().await;
        Ok(st.config.clone())
    }

    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids.
    pub async fn state(&self, id: &str) -> Result<ConnectionState, McpError> {
        let slot = self.slot(id).await?;
        let state = *slot.state_tx.borrow();
        Ok(state)
    }

    /// Current tool snapshot; empty unless the server is ready.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids.
    pub async fn tools(&self, id: &str) -> Result<Arc<ToolSnapshot>, McpError> {
        let slot = self.slot(id).await?;
        let st = slot.inner.lock().await;
        Ok(Arc::clone(&st.tools))
    }

    /// Recorded failures, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids.
    pub async fn error_history(&self, id: &str) -> Result<Vec<ErrorRecord>, McpError> {
        let slot = self.slot(id).await?;
        let st = slot.inner.lock().await;
        Ok(st.errors.to_vec())
    }

    /// Bring a server to `ready`.
    ///
    /// A server that is already connecting or handshaking is not reconnected; the
    /// call waits for the in-flight attempt instead. A ready server is returned as is.
    /// Failures are reported through the returned `error` state and the error history.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids.
    pub async fn connect(&self, id: &str) -> Result<ConnectionState, McpError> {
        let slot = self.slot(id).await?;
        let mut rx = {
            let mut st = slot.inner.lock().await;
            if st.removed {
                return Err(not_found(id));
            }
            if st.state.is_ready() {
                return Ok(st.state);
            }
            if !st.state.is_in_progress() {
                self.shared.begin_attempt(&slot, &mut st)?;
            }
            slot.state_tx.subscribe()
        };

        let settled = rx
            .wait_for(|state| !state.is_in_progress())
            .await
            .map_err(|_| McpError::Cancelled {
                server_id: id.to_owned(),
            })?;
        Ok(*settled)
    }

    /// Connect every enabled server concurrently.
    pub async fn connect_enabled(&self) -> Vec<(String, Result<ConnectionState, McpError>)> {
        let mut ids = Vec::new();
        for slot in self.shared.slots.read().await.values() {
            if slot.inner.lock().await.config.enabled {
                ids.push(slot.id.clone());
            }
        }

        let mut join_set = JoinSet::new();
        for id in ids {
            let manager = self.clone();
            join_set.spawn(async move {
                let result = manager.connect(&id).await;
                (id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(e) => tracing::warn!("server connect task failed: {e}"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Update the in-memory `enabled` flag and connect or disconnect accordingly.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<ConnectionState, McpError> {
        {
            let slot = self.slot(id).await?;
            let mut st = slot.inner.lock().await;
            st.config.enabled = enabled;
            st.config.updated_at = Utc::now();
        }
        if enabled {
            self.connect(id).await
        } else {
            self.disconnect(id).await?;
            Ok(ConnectionState::Disconnected)
        }
    }

    /// Cancel any in-flight attempt or pending retry and close the transport.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids.
    pub async fn disconnect(&self, id: &str) -> Result<(), McpError> {
        let slot = self.slot(id).await?;
        let mut st = slot.inner.lock().await;
        if st.removed {
            return Err(not_found(id));
        }
        let transport = self.shared.teardown(&slot, &mut st, false);
        drop(st);
        if let Some(transport) = transport {
            transport.close().await;
        }
        Ok(())
    }

    /// Tear the server down from any state and forget its config.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids.
    pub async fn remove(&self, id: &str) -> Result<(), McpError> {
        let slot = self
            .shared
            .slots
            .write()
            .await
            .remove(id)
            .ok_or_else(|| not_found(id))?;

        let mut st = slot.inner.lock().await;
        st.removed = true;
        let transport = self.shared.teardown(&slot, &mut st, true);
        drop(st);
        self.shared.broker.forget(id);
        if let Some(transport) = transport {
            transport.close().await;
        }
        tracing::info!(server_id = id, "server removed");
        Ok(())
    }

    /// Probe a server without changing its state.
    ///
    /// A ready server is probed over its live transport; any other server gets a
    /// throwaway connection that is closed afterwards.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids. Probe failures are reported
    /// in the [`TestReport`].
    pub async fn test(&self, id: &str) -> Result<TestReport, McpError> {
        let slot = self.slot(id).await?;
        let (state, live, config) = {
            let st = slot.inner.lock().await;
            (st.state, st.transport.clone(), st.config.clone())
        };

        let started = Instant::now();
        let outcome = match live {
            Some(transport) if state.is_ready() => self.shared.list_tools(id, &transport).await,
            _ => self.shared.probe(&config).await,
        };
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let report = match outcome {
            Ok(tools) => TestReport {
                server_id: id.to_owned(),
                success: true,
                tool_count: tools.len(),
                latency_ms,
                error: None,
            },
            Err(e) => TestReport {
                server_id: id.to_owned(),
                success: false,
                tool_count: 0,
                latency_ms,
                error: Some(create_error(&e, id, None)),
            },
        };
        tracing::info!(
            server_id = id,
            success = report.success,
            tools = report.tool_count,
            latency_ms,
            "server test finished"
        );
        Ok(report)
    }

    /// Re-list tools on a ready server and replace its snapshot.
    ///
    /// A failed refresh is a failed health check: the server moves to `error`.
    ///
    /// # Errors
    ///
    /// Returns `McpError::InvalidState` unless the server is ready, the refresh
    /// failure itself, or `McpError::Cancelled` if the server was disconnected
    /// while the refresh was in flight.
    pub async fn refresh_tools(&self, id: &str) -> Result<Arc<ToolSnapshot>, McpError> {
        let slot = self.slot(id).await?;
        let (transport, epoch) = self.live_transport(&slot, "refresh tools on").await?;

        let result = self.shared.list_tools(id, &transport).await;

        let mut st = slot.inner.lock().await;
        if st.epoch != epoch || !st.state.is_ready() {
            return Err(McpError::Cancelled {
                server_id: id.to_owned(),
            });
        }
        match result {
            Ok(tools) => {
                self.shared.replace_tools(&mut st, id, tools);
                self.shared
                    .transition(&slot, &mut st, ConnectionState::Ready)?;
                tracing::info!(server_id = id, tools = st.tools.len(), "tools refreshed");
                Ok(Arc::clone(&st.tools))
            }
            Err(e) => {
                let transport = self.shared.record_failure(&slot, &mut st, &e);
                drop(st);
                if let Some(transport) = transport {
                    transport.close().await;
                }
                Err(e)
            }
        }
    }

    /// Ping a ready server; a failed ping moves it to `error`.
    ///
    /// Servers that are not ready are left alone and their state is returned.
    ///
    /// # Errors
    ///
    /// Returns `McpError::ServerNotFound` for unknown ids.
    pub async fn check_health(&self, id: &str) -> Result<ConnectionState, McpError> {
        let slot = self.slot(id).await?;
        let (transport, epoch) = match self.live_transport(&slot, "check health of").await {
            Ok(live) => live,
            Err(McpError::InvalidState { state, .. }) => return Ok(state),
            Err(e) => return Err(e),
        };

        let deadline = self.shared.config.handshake_timeout;
        let result = match tokio::time::timeout(deadline, transport.ping()).await {
            Ok(result) => result,
            Err(_) => Err(self.shared.timeout_error(id, "health check")),
        };

        let mut st = slot.inner.lock().await;
        if st.epoch != epoch {
            return Ok(st.state);
        }
        if let Err(e) = result {
            let transport = self.shared.record_failure(&slot, &mut st, &e);
            drop(st);
            if let Some(transport) = transport {
                transport.close().await;
            }
            return Ok(ConnectionState::Error);
        }
        Ok(st.state)
    }

    /// Disconnect every server. Configs stay registered.
    pub async fn shutdown(&self) {
        for id in self.server_ids().await {
            if let Err(e) = self.disconnect(&id).await {
                tracing::debug!(server_id = %id, "skipping shutdown: {e}");
            }
        }
        tracing::info!("connection manager shut down");
    }

    async fn slot(&self, id: &str) -> Result<Arc<Slot>, McpError> {
        self.shared
            .slots
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn live_transport(
        &self,
        slot: &Slot,
        operation: &'static str,
    ) -> Result<(Arc<dyn Transport>, u64), McpError> {
        let st = slot.inner.lock().await;
        if st.removed {
            return Err(not_found(&slot.id));
        }
        match (&st.transport, st.state.is_ready()) {
            (Some(transport), true) => Ok((Arc::clone(transport), st.epoch)),
            _ => Err(McpError::InvalidState {
                server_id: slot.id.clone(),
                state: st.state,
                operation,
            }),
        }
    }
}

fn not_found(id: &str) -> McpError {
    McpError::ServerNotFound {
        server_id: id.to_owned(),
    }
}

impl Shared {
    fn transition(
        &self,
        slot: &Slot,
        st: &mut SlotState,
        to: ConnectionState,
    ) -> Result<(), McpError> {
        let from = st.state;
        if !from.can_transition_to(to) {
            tracing::warn!(server_id = %slot.id, %from, %to, "rejected state transition");
            return Err(McpError::InvalidTransition {
                server_id: slot.id.clone(),
                from,
                to,
            });
        }
        st.state = to;
        slot.state_tx.send_replace(to);
        if from != to {
            tracing::info!(server_id = %slot.id, %from, %to, "server state changed");
            // No receivers is fine.
            let _ = self.events.send(StateEvent {
                server_id: slot.id.clone(),
                from,
                to,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    fn replace_tools(&self, st: &mut SlotState, id: &str, tools: Vec<ToolDescriptor>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(ToolSnapshot::new(id, generation, tools));
        st.tools = Arc::clone(&snapshot);
        self.broker.publish(snapshot);
    }

    fn clear_tools(&self, st: &mut SlotState, id: &str) {
        if !st.tools.is_empty() {
            self.replace_tools(st, id, Vec::new());
        }
    }

    fn timeout_error(&self, id: &str, operation: &'static str) -> McpError {
        let limit = if operation == "connect" {
            self.config.connect_timeout
        } else {
            self.config.handshake_timeout
        };
        McpError::Timeout {
            server_id: id.to_owned(),
            operation,
            timeout: limit,
        }
    }

    async fn open(&self, config: &ServerConfig) -> Result<Arc<dyn Transport>, McpError> {
        config.validate()?;
        match tokio::time::timeout(self.config.connect_timeout, self.factory.open(config)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(&config.id, "connect")),
        }
    }

    async fn handshake(
        &self,
        id: &str,
        transport: &Arc<dyn Transport>,
    ) -> Result<Vec<ToolDescriptor>, McpError> {
        match tokio::time::timeout(self.config.handshake_timeout, transport.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(id, "handshake")),
        }
    }

    async fn list_tools(
        &self,
        id: &str,
        transport: &Arc<dyn Transport>,
    ) -> Result<Vec<ToolDescriptor>, McpError> {
        match tokio::time::timeout(self.config.handshake_timeout, transport.list_tools()).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(id, "tool refresh")),
        }
    }

    /// Open, handshake, and close a throwaway transport.
    async fn probe(&self, config: &ServerConfig) -> Result<Vec<ToolDescriptor>, McpError> {
        let transport = self.open(config).await?;
        let result = self.handshake(&config.id, &transport).await;
        transport.close().await;
        result
    }

    /// Start a fresh attempt. Caller holds the slot lock and has checked that no
    /// attempt is in progress.
    fn begin_attempt(
        self: &Arc<Self>,
        slot: &Arc<Slot>,
        st: &mut SlotState,
    ) -> Result<(), McpError> {
        if let Some(retry) = st.retry.take() {
            retry.abort();
        }
        if let Some(previous) = st.attempt.take() {
            previous.abort();
        }
        self.transition(slot, st, ConnectionState::Connecting)?;
        st.epoch += 1;
        let epoch = st.epoch;
        let config = st.config.clone();

        let shared = Arc::clone(self);
        let slot = Arc::clone(slot);
        st.attempt = Some(tokio::spawn(async move {
            shared.run_attempt(slot, epoch, config).await;
        }));
        Ok(())
    }

    async fn run_attempt(self: Arc<Self>, slot: Arc<Slot>, epoch: u64, config: ServerConfig) {
        let id = slot.id.as_str();
        tracing::debug!(server_id = id, epoch, "connection attempt started");

        let transport = match self.open(&config).await {
            Ok(transport) => transport,
            Err(e) => {
                self.fail_attempt(&slot, epoch, &e).await;
                return;
            }
        };

        {
            let mut st = slot.inner.lock().await;
            if st.epoch != epoch || st.removed {
                drop(st);
                tracing::debug!(server_id = id, epoch, "discarding stale transport");
                transport.close().await;
                return;
            }
            st.transport = Some(Arc::clone(&transport));
            if let Err(e) = self.transition(&slot, &mut st, ConnectionState::Handshaking) {
                let stale = self.record_failure(&slot, &mut st, &e);
                drop(st);
                if let Some(stale) = stale {
                    stale.close().await;
                }
                return;
            }
        }

        let result = self.handshake(id, &transport).await;

        let mut st = slot.inner.lock().await;
        if st.epoch != epoch || st.removed {
            // Whoever bumped the epoch already took and closed the transport.
            tracing::debug!(server_id = id, epoch, "discarding stale handshake result");
            return;
        }
        match result {
            Ok(tools) => {
                st.consecutive_failures = 0;
                self.replace_tools(&mut st, id, tools);
                if let Err(e) = self.transition(&slot, &mut st, ConnectionState::Ready) {
                    tracing::warn!(server_id = id, "handshake completed in unexpected state: {e}");
                    return;
                }
                tracing::info!(server_id = id, tools = st.tools.len(), "server ready");
            }
            Err(e) => {
                let transport = self.record_failure(&slot, &mut st, &e);
                drop(st);
                if let Some(transport) = transport {
                    transport.close().await;
                }
            }
        }
    }

    async fn fail_attempt(self: &Arc<Self>, slot: &Arc<Slot>, epoch: u64, error: &McpError) {
        let mut st = slot.inner.lock().await;
        if st.epoch != epoch || st.removed {
            tracing::debug!(server_id = %slot.id, epoch, "discarding stale failure: {error}");
            return;
        }
        let transport = self.record_failure(slot, &mut st, error);
        drop(st);
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    /// Record `error`, move the server to `error`, and schedule an automatic retry if
    /// the failure class allows one. Returns the transport to close once the slot lock
    /// is released.
    fn record_failure(
        self: &Arc<Self>,
        slot: &Arc<Slot>,
        st: &mut SlotState,
        error: &McpError,
    ) -> Option<Arc<dyn Transport>> {
        let classification = error.classification();
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        let details = serde_json::json!({
            "state": st.state.as_str(),
            "consecutiveFailures": st.consecutive_failures,
        });
        st.errors.push(create_error(error, &slot.id, Some(details)));

        let transport = st.transport.take();
        self.clear_tools(st, &slot.id);
        if st.state != ConnectionState::Error
            && let Err(e) = self.transition(slot, st, ConnectionState::Error)
        {
            tracing::warn!(server_id = %slot.id, "cannot record failure: {e}");
        }

        tracing::warn!(
            server_id = %slot.id,
            error_type = %classification.error_type,
            failures = st.consecutive_failures,
            "server failed: {error}"
        );

        if classification.should_auto_retry()
            && st.consecutive_failures <= self.config.max_auto_retries
        {
            let delay = self.config.retry_delay(st.consecutive_failures);
            let epoch = st.epoch;
            let shared = Arc::clone(self);
            let retry_slot = Arc::clone(slot);
            tracing::info!(
                server_id = %slot.id,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling automatic retry"
            );
            st.retry = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.retry_now(&retry_slot, epoch).await;
            }));
        }
        transport
    }

    async fn retry_now(self: &Arc<Self>, slot: &Arc<Slot>, epoch: u64) {
        let mut st = slot.inner.lock().await;
        if st.epoch != epoch || st.removed || st.state != ConnectionState::Error {
            return;
        }
        // Our own handle; dropping it detaches instead of aborting this task.
        st.retry = None;
        tracing::info!(server_id = %slot.id, attempt = st.consecutive_failures + 1, "retrying");
        if let Err(e) = self.begin_attempt(slot, &mut st) {
            tracing::warn!(server_id = %slot.id, "automatic retry failed to start: {e}");
        }
    }

    /// Cancel everything in flight and move to `disconnected`. Returns the transport to
    /// close once the slot lock is released.
    fn teardown(
        &self,
        slot: &Slot,
        st: &mut SlotState,
        always_publish: bool,
    ) -> Option<Arc<dyn Transport>> {
        st.epoch += 1;
        if let Some(attempt) = st.attempt.take() {
            attempt.abort();
        }
        if let Some(retry) = st.retry.take() {
            retry.abort();
        }
        st.consecutive_failures = 0;
        let transport = st.transport.take();
        if always_publish {
            self.replace_tools(st, &slot.id, Vec::new());
        } else {
            self.clear_tools(st, &slot.id);
        }
        if let Err(e) = self.transition(slot, st, ConnectionState::Disconnected) {
            tracing::warn!(server_id = %slot.id, "teardown transition failed: {e}");
        }
        transport
    }
}
