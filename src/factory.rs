// Builds adapters and keeps a bounded, per-channel pool of them keyed by
// their exact credentials

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    adapter::ChannelAdapter,
    channels::build_adapter,
    config::{ChannelConfig, Credentials},
    error::{ChannelError, Result},
    logger::LogSink,
    types::{ChannelKind, ConnectionHealth, ConnectionStatus, ConnectionTestResult},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    pub pooling_enabled: bool,
    pub max_instances_per_channel: usize,
    pub idle_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
    // Deep-merged over the built-in defaults of the named channel
    pub channel_overrides: BTreeMap<String, Value>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            pooling_enabled: true,
            max_instances_per_channel: 5,
            idle_timeout_ms: 30 * 60 * 1_000,
            cleanup_interval_ms: 5 * 60 * 1_000,
            channel_overrides: BTreeMap::new(),
        }
    }
}

impl FactoryConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: FactoryConfig = serde_json::from_str(raw)
            .map_err(|e| ChannelError::validation("factory", format!("Invalid factory config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_instances_per_channel == 0 {
            return Err(ChannelError::validation(
                "max_instances_per_channel",
                "Pool size must be at least 1",
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(ChannelError::validation(
                "cleanup_interval_ms",
                "Cleanup interval must be positive",
            ));
        }
        for (name, value) in &self.channel_overrides {
            name.parse::<ChannelKind>()?;
            if !value.is_object() {
                return Err(ChannelError::validation(
                    format!("channel_overrides.{name}"),
                    "Channel override must be a JSON object",
                ));
            }
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    fn override_for(&self, channel: ChannelKind) -> Option<&Value> {
        self.channel_overrides
            .iter()
            .find(|(name, _)| name.parse::<ChannelKind>().ok() == Some(channel))
            .map(|(_, value)| value)
    }
}

struct PooledChannel {
    adapter: Arc<dyn ChannelAdapter>,
    // cheap pre-filter; `credentials` decides
    fingerprint: String,
    credentials: Credentials,
    created_at: DateTime<Utc>,
    last_used: Instant,
    // Recency order for eviction; Instant ties on coarse clocks
    last_used_seq: u64,
    usage_count: u64,
}

impl PooledChannel {
    fn matches(&self, fingerprint: &str, credentials: &Credentials) -> bool {
        self.fingerprint == fingerprint && self.credentials == *credentials
    }

    fn instance_id(&self) -> Uuid {
        self.adapter.executor().instance_id()
    }

    fn touch(&mut self, seq: u64) -> Arc<dyn ChannelAdapter> {
        self.last_used = Instant::now();
        self.last_used_seq = seq;
        self.usage_count += 1;
        Arc::clone(&self.adapter)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveChannelInfo {
    pub channel: ChannelKind,
    pub instance_id: Uuid,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub idle_ms: u64,
    pub usage_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHealthReport {
    pub channel: ChannelKind,
    pub instance_id: Uuid,
    pub connection_test: ConnectionTestResult,
    pub health: ConnectionHealth,
}

pub struct ChannelFactory {
    config: FactoryConfig,
    pools: DashMap<ChannelKind, Vec<PooledChannel>>,
    sinks: Vec<Arc<dyn LogSink>>,
    clock: AtomicU64,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelFactory {
    pub fn new(config: FactoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pools: DashMap::new(),
            sinks: Vec::new(),
            clock: AtomicU64::new(0),
            cleanup_task: Mutex::new(None),
        })
    }

    // Every adapter built afterwards logs to this sink as well
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn supported_channels(&self) -> &'static [ChannelKind] {
        &ChannelKind::ALL
    }

    fn next_seq(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the pooled adapter for `(name, credentials)` or builds a new
    /// one. `custom` is merged over the factory overrides and only applies
    /// when a new instance is built.
    pub async fn create_channel(
        &self,
        name: &str,
        credentials: Credentials,
        custom: Option<Value>,
    ) -> Result<Arc<dyn ChannelAdapter>> {
        let channel: ChannelKind = name.parse()?;

        if self.config.pooling_enabled {
            if let Some(adapter) = self.checkout(channel, &credentials) {
                tracing::debug!(%channel, "reusing pooled channel instance");
                return Ok(adapter);
            }
        }

        let mut overrides = Vec::with_capacity(2);
        if let Some(value) = self.config.override_for(channel) {
            overrides.push(value);
        }
        if let Some(value) = custom.as_ref() {
            overrides.push(value);
        }
        let config = ChannelConfig::merged(channel, credentials.clone(), &overrides)?;
        let adapter = build_adapter(config, self.sinks.clone())?;

        if !self.config.pooling_enabled {
            tracing::info!(%channel, instance = %adapter.executor().instance_id(), "created unpooled channel instance");
            return Ok(adapter);
        }

        let (adapter, evicted) = self.admit(channel, credentials, adapter);
        for stale in evicted {
            tracing::info!(%channel, instance = %stale.executor().instance_id(), "evicting least recently used channel instance");
            disconnect_quietly(stale).await;
        }
        Ok(adapter)
    }

    /// The pooled adapter for these credentials, if one exists.
    pub fn get_channel(&self, name: &str, credentials: &Credentials) -> Result<Option<Arc<dyn ChannelAdapter>>> {
        let channel: ChannelKind = name.parse()?;
        Ok(self.checkout(channel, credentials))
    }

    pub async fn test_channel_connection(
        &self,
        name: &str,
        credentials: Credentials,
    ) -> Result<ConnectionTestResult> {
        let adapter = self.create_channel(name, credentials, None).await?;
        Ok(adapter.test_connection().await)
    }

    pub fn active_channels(&self) -> Vec<ActiveChannelInfo> {
        let mut active: Vec<ActiveChannelInfo> = self
            .pools
            .iter()
            .flat_map(|pool| {
                let channel = *pool.key();
                pool.value()
                    .iter()
                    .map(|entry| ActiveChannelInfo {
                        channel,
                        instance_id: entry.instance_id(),
                        status: entry.adapter.executor().connection_status().status,
                        created_at: entry.created_at,
                        idle_ms: entry.last_used.elapsed().as_millis() as u64,
                        usage_count: entry.usage_count,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        active.sort_by(|a, b| a.channel.cmp(&b.channel).then(a.created_at.cmp(&b.created_at)));
        active
    }

    // Tests every pooled instance concurrently
    pub async fn channel_health_status(&self) -> Vec<ChannelHealthReport> {
        let adapters = self.pooled_adapters();
        let checks = adapters.iter().map(|adapter| adapter.test_connection());
        let results = join_all(checks).await;

        adapters
            .iter()
            .zip(results)
            .map(|(adapter, connection_test)| ChannelHealthReport {
                channel: adapter.channel(),
                instance_id: adapter.executor().instance_id(),
                connection_test,
                health: adapter.get_connection_status(),
            })
            .collect()
    }

    /// Drops `instance` from the pool and disconnects it. `false` when it
    /// was not pooled.
    pub async fn remove_channel(&self, name: &str, instance: &Arc<dyn ChannelAdapter>) -> Result<bool> {
        let channel: ChannelKind = name.parse()?;
        let instance_id = instance.executor().instance_id();

        let removed = self.pools.get_mut(&channel).and_then(|mut pool| {
            let index = pool.iter().position(|entry| entry.instance_id() == instance_id)?;
            Some(pool.remove(index).adapter)
        });

        match removed {
            Some(adapter) => {
                tracing::info!(%channel, instance = %instance_id, "removed channel instance");
                disconnect_quietly(adapter).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Disconnects and forgets every instance that has been idle longer than
    /// the configured timeout. Returns how many were removed.
    pub async fn cleanup_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let mut expired = Vec::new();

        for mut pool in self.pools.iter_mut() {
            let (keep, stale): (Vec<_>, Vec<_>) = std::mem::take(pool.value_mut())
                .into_iter()
                .partition(|entry| entry.last_used.elapsed() <= idle_timeout);
            *pool.value_mut() = keep;
            expired.extend(stale.into_iter().map(|entry| entry.adapter));
        }

        let count = expired.len();
        if count > 0 {
            tracing::info!(count, "cleaning up idle channel instances");
        }
        join_all(expired.into_iter().map(disconnect_quietly)).await;
        count
    }

    /// Spawns the periodic idle sweep. The task stops on its own once the
    /// factory is dropped. Calling this twice keeps the first task.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let mut slot = self.cleanup_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let factory: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(strong) = factory.upgrade() else {
                    break;
                };
                strong.cleanup_idle().await;
            }
        }));
    }

    /// Stops the sweep and disconnects every pooled instance.
    pub async fn shutdown(&self) {
        if let Some(task) = self.cleanup_task.lock().take() {
            task.abort();
        }

        let mut drained = Vec::new();
        for mut pool in self.pools.iter_mut() {
            drained.extend(pool.value_mut().drain(..).map(|entry| entry.adapter));
        }
        self.pools.clear();

        tracing::info!(count = drained.len(), "shutting down channel factory");
        join_all(drained.into_iter().map(disconnect_quietly)).await;
    }

    fn checkout(&self, channel: ChannelKind, credentials: &Credentials) -> Option<Arc<dyn ChannelAdapter>> {
        let fingerprint = credentials.fingerprint();
        let mut pool = self.pools.get_mut(&channel)?;
        let seq = self.next_seq();
        pool.iter_mut()
            .find(|entry| entry.matches(&fingerprint, credentials))
            .map(|entry| entry.touch(seq))
    }

    // Inserts under the channel's shard lock, evicting LRU entries first. A
    // concurrent create that won the race is returned instead of `adapter`.
    fn admit(
        &self,
        channel: ChannelKind,
        credentials: Credentials,
        adapter: Arc<dyn ChannelAdapter>,
    ) -> (Arc<dyn ChannelAdapter>, Vec<Arc<dyn ChannelAdapter>>) {
        let fingerprint = credentials.fingerprint();
        let seq = self.next_seq();
        let mut pool = self.pools.entry(channel).or_default();

        if let Some(existing) = pool.iter_mut().find(|entry| entry.matches(&fingerprint, &credentials)) {
            return (existing.touch(seq), Vec::new());
        }

        let mut evicted = Vec::new();
        while pool.len() >= self.config.max_instances_per_channel {
            let lru = pool
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| entry.last_used_seq)
                .map(|(index, _)| index);
            match lru {
                Some(index) => evicted.push(pool.swap_remove(index).adapter),
                None => break,
            }
        }

        tracing::info!(%channel, instance = %adapter.executor().instance_id(), "pooled new channel instance");
        pool.push(PooledChannel {
            adapter: Arc::clone(&adapter),
            fingerprint,
            credentials,
            created_at: Utc::now(),
            last_used: Instant::now(),
            last_used_seq: seq,
            usage_count: 1,
        });

        (adapter, evicted)
    }

    fn pooled_adapters(&self) -> Vec<Arc<dyn ChannelAdapter>> {
        self.pools
            .iter()
            .flat_map(|pool| {
                pool.value()
                    .iter()
                    .map(|entry| Arc::clone(&entry.adapter))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl Drop for ChannelFactory {
    fn drop(&mut self) {
        if let Some(task) = self.cleanup_task.get_mut().take() {
            task.abort();
        }
    }
}

async fn disconnect_quietly(adapter: Arc<dyn ChannelAdapter>) {
    if let Err(err) = adapter.disconnect().await {
        tracing::warn!(channel = %adapter.channel(), "disconnect failed: {err}");
    }
}
