//! Live source registry: the pool of currently-known stream urls plus a
//! periodic reaper that destroys dead ones (C9, spec §4.9).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::edge::OriginBalancer;
use crate::source::{LiveSource, StreamRequest};

/// `vhost/app/stream` tuple, the registry's lookup key.
pub type StreamUrl = String;

pub fn stream_url(vhost: &str, app: &str, stream: &str) -> StreamUrl {
    format!("{vhost}/{app}/{stream}")
}

/// Per-stream summary for the debug control plane (`http/handlers.rs`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamSnapshot {
    pub url: StreamUrl,
    pub source_id: String,
    pub is_publishing: bool,
    pub consumer_count: usize,
}

/// Shared pool of `LiveSource`s, keyed by stream url.
pub struct Registry {
    sources: DashMap<StreamUrl, Arc<LiveSource>>,
    /// One round-robin origin balancer per vhost, shared across every
    /// stream-url's ingester so the counter advances across streams
    /// (spec §8 E5) instead of resetting per ingest.
    origin_balancers: DashMap<String, Arc<OriginBalancer>>,
    config: ServerConfig,
}

impl Registry {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            sources: DashMap::new(),
            origin_balancers: DashMap::new(),
            config,
        }
    }

    /// Looks up (or lazily creates) the shared origin balancer for `vhost`.
    pub fn origin_balancer(&self, vhost: &str) -> Arc<OriginBalancer> {
        if let Some(existing) = self.origin_balancers.get(vhost) {
            return existing.clone();
        }
        let origins = self
            .config
            .vhost(vhost)
            .map(|v| v.edge.origins.clone())
            .unwrap_or_default();
        self.origin_balancers
            .entry(vhost.to_string())
            .or_insert_with(|| Arc::new(OriginBalancer::new(origins)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Look up an existing source without creating one.
    pub fn fetch(&self, url: &str) -> Option<Arc<LiveSource>> {
        self.sources.get(url).map(|r| r.clone())
    }

    /// Look up or create a source for `request`. The new source is inserted
    /// into the map before `initialize()` runs so a concurrent caller
    /// landing on the same stream-url can observe it immediately (spec §5,
    /// registry atomicity).
    pub fn fetch_or_create(&self, request: StreamRequest) -> Arc<LiveSource> {
        let url = stream_url(&request.vhost, &request.app, &request.stream);
        if let Some(existing) = self.sources.get(&url) {
            existing.update_auth(&request);
            return existing.clone();
        }

        let vhost_cfg = self
            .config
            .vhost(&request.vhost)
            .cloned()
            .unwrap_or_default();
        let source = Arc::new(LiveSource::new(request, vhost_cfg));
        let inserted = self
            .sources
            .entry(url)
            .or_insert_with(|| source.clone())
            .clone();
        // initialize() never yields (spec §5 registry contract) so running
        // it after the map insert, outside the entry-API closure, is safe.
        inserted.initialize();
        inserted
    }

    /// Debug-endpoint snapshot: url plus the handful of fields worth
    /// surfacing without exposing `LiveSource` internals over HTTP.
    pub fn snapshot(&self) -> Vec<StreamSnapshot> {
        self.sources
            .iter()
            .map(|entry| {
                let source = entry.value();
                StreamSnapshot {
                    url: entry.key().clone(),
                    source_id: source.source_id().to_string(),
                    is_publishing: source.is_publishing(),
                    consumer_count: source.consumer_count(),
                }
            })
            .collect()
    }

    /// Call `dispose()` on every source — releases output resources but
    /// keeps the source alive for reuse.
    pub fn dispose(&self) {
        for entry in self.sources.iter() {
            entry.value().dispose();
        }
    }

    /// One reap pass: drive `cycle()` on every source and erase dead ones.
    pub fn reap_once(&self, now_ms: i64) {
        let mut dead = Vec::new();
        for entry in self.sources.iter() {
            entry.value().cycle(now_ms);
            if entry.value().stream_is_dead(now_ms) {
                dead.push(entry.key().clone());
            }
        }
        for url in dead {
            self.sources.remove(&url);
        }
    }

    /// Spawn the periodic reaper task (every 1s, per spec §4.9).
    pub fn spawn_reaper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                let now_ms = chrono::Utc::now().timestamp_millis();
                self.reap_once(now_ms);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StreamRequest;

    fn request() -> StreamRequest {
        StreamRequest {
            vhost: "__defaultVhost__".to_string(),
            app: "live".to_string(),
            stream: "test".to_string(),
            params: Default::default(),
        }
    }

    #[test]
    fn fetch_or_create_is_idempotent() {
        let reg = Registry::new(ServerConfig::default());
        let a = reg.fetch_or_create(request());
        let b = reg.fetch_or_create(request());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn fetch_without_create_returns_none_for_unknown() {
        let reg = Registry::new(ServerConfig::default());
        assert!(reg.fetch("__defaultVhost__/live/test").is_none());
    }

    #[test]
    fn origin_balancer_is_shared_across_stream_urls() {
        let mut config = ServerConfig::default();
        config.vhosts[0].edge.origins = vec!["o1:1935".to_string(), "o2:1935".to_string(), "o3:1935".to_string()];
        let reg = Registry::new(config);

        let first = reg.origin_balancer("__defaultVhost__").select().unwrap();
        let second = reg.origin_balancer("__defaultVhost__").select().unwrap();
        let third = reg.origin_balancer("__defaultVhost__").select().unwrap();
        assert_eq!(first.host, "o1");
        assert_eq!(second.host, "o2");
        assert_eq!(third.host, "o3");
    }

    #[test]
    fn reap_erases_dead_sources() {
        let reg = Registry::new(ServerConfig::default());
        reg.fetch_or_create(request());
        assert_eq!(reg.len(), 1);
        // no publisher, no consumers: dead once the grace period elapses.
        reg.reap_once(i64::MAX);
        assert_eq!(reg.len(), 0);
    }
}
