//! Session pool: ephemeral command sessions and persistent event sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdp_wire::{CdpChannel, DebugEndpoint};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::HostError;

const EPHEMERAL_TTL: Duration = Duration::from_secs(30);

struct EphemeralEntry {
    channel: Arc<CdpChannel>,
    last_used: Instant,
}

/// Two tables keyed by target id.
///
/// Ephemeral sessions back one tool invocation and are cached briefly so a
/// burst of calls against the same tab reuses one socket. Persistent sessions
/// are created only on explicit request (the interception engine and the
/// WebSocket recorder are the only callers) and exactly one exists per
/// `(target, purpose)` pair.
pub struct SessionManager {
    endpoint: DebugEndpoint,
    ephemeral: Mutex<HashMap<String, EphemeralEntry>>,
    persistent: DashMap<(String, String), Arc<CdpChannel>>,
}

impl SessionManager {
    pub fn new(endpoint: DebugEndpoint) -> Self {
        Self {
            endpoint,
            ephemeral: Mutex::new(HashMap::new()),
            persistent: DashMap::new(),
        }
    }

    /// Checkout an ephemeral session for a target, reusing a cached live one.
    pub async fn ephemeral(&self, target_id: &str) -> Result<Arc<CdpChannel>, HostError> {
        let mut cache = self.ephemeral.lock().await;
        cache.retain(|_, entry| {
            entry.channel.is_alive() && entry.last_used.elapsed() < EPHEMERAL_TTL
        });

        if let Some(entry) = cache.get_mut(target_id) {
            entry.last_used = Instant::now();
            return Ok(entry.channel.clone());
        }

        let channel = Arc::new(CdpChannel::connect(&self.endpoint.page_ws_url(target_id)).await?);
        cache.insert(
            target_id.to_string(),
            EphemeralEntry {
                channel: channel.clone(),
                last_used: Instant::now(),
            },
        );
        debug!(target: "browser-host", target_id, "ephemeral session opened");
        Ok(channel)
    }

    /// Idempotent: closing a target with no cached session is a no-op.
    pub async fn close_ephemeral(&self, target_id: &str) {
        if let Some(entry) = self.ephemeral.lock().await.remove(target_id) {
            entry.channel.close();
        }
    }

    /// Get or create the persistent session for `(target, purpose)`.
    pub async fn persistent(
        &self,
        target_id: &str,
        purpose: &str,
    ) -> Result<Arc<CdpChannel>, HostError> {
        let key = (target_id.to_string(), purpose.to_string());
        if let Some(existing) = self.persistent.get(&key) {
            if existing.is_alive() {
                return Ok(existing.clone());
            }
        }
        let channel = Arc::new(CdpChannel::connect(&self.endpoint.page_ws_url(target_id)).await?);
        info!(target: "browser-host", target_id, purpose, "persistent session opened");
        self.persistent.insert(key, channel.clone());
        Ok(channel)
    }

    pub fn persistent_exists(&self, target_id: &str, purpose: &str) -> bool {
        self.persistent
            .get(&(target_id.to_string(), purpose.to_string()))
            .map(|c| c.is_alive())
            .unwrap_or(false)
    }

    pub fn close_persistent(&self, target_id: &str, purpose: &str) {
        if let Some((_, channel)) = self
            .persistent
            .remove(&(target_id.to_string(), purpose.to_string()))
        {
            channel.close();
            info!(target: "browser-host", target_id, purpose, "persistent session closed");
        }
    }

    pub fn persistent_count(&self) -> usize {
        self.persistent.len()
    }

    /// Drop every session. Used on instance teardown.
    pub async fn clear(&self) {
        for entry in self.ephemeral.lock().await.drain() {
            entry.1.channel.close();
        }
        for entry in self.persistent.iter() {
            entry.value().close();
        }
        self.persistent.clear();
    }
}
