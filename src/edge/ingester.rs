//! Round-robin origin selection and the upstream pull loop (C10, spec
//! §4.10 "Ingester").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::EdgeConfig;
use crate::edge::upstream::{SelectedOrigin, Upstream, UpstreamMessage};
use crate::error::{CoreError, Result};
use crate::source::{LiveSource, StreamRequest};

/// Round-robins over a vhost's configured origin servers.
pub struct OriginBalancer {
    origins: Vec<String>,
    next: AtomicUsize,
}

impl OriginBalancer {
    pub fn new(origins: Vec<String>) -> Self {
        Self {
            origins,
            next: AtomicUsize::new(0),
        }
    }

    /// `host[:port]` strings parsed into a `SelectedOrigin`, default port
    /// 1935 (RTMP) when unspecified.
    pub fn select(&self) -> Option<SelectedOrigin> {
        if self.origins.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::SeqCst) % self.origins.len();
        let raw = &self.origins[idx];
        let (host, port) = match raw.rsplit_once(':') {
            Some((h, p)) => (h.to_string(), p.parse().unwrap_or(1935)),
            None => (raw.clone(), 1935),
        };
        Some(SelectedOrigin { host, port })
    }
}

/// Pulls media from the selected origin and feeds decoded packets into
/// `source`, restarting on RTMP redirect, exiting to `Init` on any other
/// error (spec §4.10). `balancer` is shared across every stream on the
/// vhost (spec §8 E5: "the round-robin counter advances across
/// stream-urls") — callers must not construct a fresh one per ingest.
pub async fn run(
    edge_cfg: &EdgeConfig,
    balancer: &OriginBalancer,
    request: StreamRequest,
    source: Arc<LiveSource>,
    mut upstream: Box<dyn Upstream>,
) -> Result<()> {
    let mut request = request;
    if let Some(transform) = &edge_cfg.transform_vhost {
        request.vhost = transform.clone();
    }

    let mut pending_redirect: Option<SelectedOrigin> = None;
    loop {
        let origin = match pending_redirect.take() {
            Some(o) => o,
            None => balancer
                .select()
                .ok_or_else(|| CoreError::UpstreamConnect("no origins configured".to_string()))?,
        };
        upstream.connect(&request, &origin).await?;
        upstream.set_recv_timeout_ms(edge_cfg.stream_timeout_ms);

        loop {
            match upstream.recv_message().await {
                Ok(UpstreamMessage::Audio(pkt)) => source.on_audio(pkt),
                Ok(UpstreamMessage::Video(pkt)) => source.on_video(pkt),
                Ok(UpstreamMessage::MetaData(pkt)) => source.on_meta_data(pkt, false, false),
                Ok(UpstreamMessage::Redirect(url)) => {
                    upstream.close().await;
                    tracing::info!(url, "ingester following RTMP redirect");
                    pending_redirect = parse_host_port(&url);
                    break;
                }
                Err(err) => {
                    upstream.close().await;
                    return Err(err);
                }
            }
        }
    }
}

/// Best-effort `host[:port]` extraction from an `rtmp://host:port/...`
/// redirect target.
fn parse_host_port(url: &str) -> Option<SelectedOrigin> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let authority = without_scheme.split('/').next()?;
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(1935)),
        None => (authority.to_string(), 1935),
    };
    Some(SelectedOrigin { host, port })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_through_all_origins() {
        let balancer = OriginBalancer::new(vec![
            "a.example:1935".to_string(),
            "b.example:1936".to_string(),
        ]);
        let first = balancer.select().unwrap();
        let second = balancer.select().unwrap();
        let third = balancer.select().unwrap();
        assert_eq!(first.host, "a.example");
        assert_eq!(second.host, "b.example");
        assert_eq!(third.host, "a.example");
    }

    #[test]
    fn defaults_to_rtmp_port_when_unspecified() {
        let balancer = OriginBalancer::new(vec!["origin.example".to_string()]);
        let origin = balancer.select().unwrap();
        assert_eq!(origin.port, 1935);
    }

    #[test]
    fn empty_origin_list_selects_nothing() {
        let balancer = OriginBalancer::new(vec![]);
        assert!(balancer.select().is_none());
    }

    #[test]
    fn redirect_url_parses_host_and_port() {
        let origin = parse_host_port("rtmp://redirect.example:19350/live/stream").unwrap();
        assert_eq!(origin.host, "redirect.example");
        assert_eq!(origin.port, 19350);
    }
}
