//! Live source (C8, spec §4.8): the central per-stream orchestrator wiring
//! jitter, caches, mix queue, hub and consumers together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::VhostConfig;
use crate::consumer::Consumer;
use crate::gop_cache::GopCache;
use crate::hub::Hub;
use crate::meta_cache::MetaCache;
use crate::mix_queue::MixQueue;
use crate::packet::MediaPacket;

/// Dead-stream grace period after the last publisher/consumer left (spec
/// §4.8 `stream_is_dead`).
const DEAD_STREAM_GRACE_MS: i64 = 3_000;

/// vhost/app/stream plus connection params — the request descriptor a
/// source is keyed and authorized by.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub vhost: String,
    pub app: String,
    pub stream: String,
    pub params: HashMap<String, String>,
}

/// Receives fully-reassembled frames from a protocol bridge (C13) so the
/// live source can mirror RTC/SRT input back out as RTMP-shaped packets,
/// and so the source can push its own packets out to bridges.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, pkt: &MediaPacket);
}

/// Vets a publish/play attempt before the source admits it (SPEC_FULL §2).
pub trait SecurityCheck: Send + Sync {
    fn allow_publish(&self, request: &StreamRequest) -> bool;
    fn allow_play(&self, request: &StreamRequest) -> bool;
}

/// Bounded non-monotonic-timestamp warning counter: logs once per
/// `LOG_THRESHOLD` occurrences instead of flooding on a noisy publisher
/// (SPEC_FULL §2).
#[derive(Debug, Default)]
struct MonotonicGuard {
    last_ts: i64,
    seen_first: bool,
    violations: u64,
}

const MONOTONIC_LOG_THRESHOLD: u64 = 64;

impl MonotonicGuard {
    fn check(&mut self, stream: &str, ts: i64) {
        if self.seen_first && ts < self.last_ts {
            self.violations += 1;
            if self.violations % MONOTONIC_LOG_THRESHOLD == 0 {
                tracing::warn!(
                    stream,
                    violations = self.violations,
                    "publisher timestamps are not monotonic"
                );
            }
        }
        self.seen_first = true;
        self.last_ts = ts;
    }
}

pub struct LiveSource {
    request: Mutex<StreamRequest>,
    vhost_cfg: VhostConfig,

    meta_cache: Mutex<MetaCache>,
    gop_cache: Mutex<GopCache>,
    mix_queue: Mutex<MixQueue>,
    monotonic: Mutex<MonotonicGuard>,

    hub: Option<Hub>,
    bridge: Mutex<Option<Arc<dyn FrameSink>>>,
    security: Mutex<Option<Arc<dyn SecurityCheck>>>,

    consumers: Mutex<Vec<Arc<Mutex<Consumer>>>>,

    can_publish: AtomicBool,
    atc: AtomicBool,
    forward_mirror: AtomicBool,
    mix_correct: AtomicBool,

    source_id: Mutex<Uuid>,
    previous_source_id: Mutex<Option<Uuid>>,

    die_at_ms: AtomicI64,
    last_packet_at_ms: AtomicI64,
    published_at_ms: AtomicI64,
    monotonic_increase: AtomicBool,
    sequence_header_bytes_seen: AtomicU64,
}

impl LiveSource {
    pub fn new(request: StreamRequest, vhost_cfg: VhostConfig) -> Self {
        let hub = if vhost_cfg.edge.is_edge {
            None
        } else {
            Some(Hub::new(vhost_cfg.hls_on_error))
        };
        let mix_correct = vhost_cfg.mix_correct;
        let atc = vhost_cfg.atc;
        Self {
            request: Mutex::new(request),
            mix_queue: Mutex::new(MixQueue::new(vhost_cfg.mix_queue_max_size_ms)),
            gop_cache: Mutex::new(GopCache::new(
                vhost_cfg.gop_cache.enabled,
                vhost_cfg.gop_cache.max_frames,
                vhost_cfg.gop_cache.max_bytes,
            )),
            meta_cache: Mutex::new(MetaCache::new()),
            monotonic: Mutex::new(MonotonicGuard::default()),
            hub,
            bridge: Mutex::new(None),
            security: Mutex::new(None),
            consumers: Mutex::new(Vec::new()),
            can_publish: AtomicBool::new(true),
            atc: AtomicBool::new(atc),
            forward_mirror: AtomicBool::new(false),
            mix_correct: AtomicBool::new(mix_correct),
            source_id: Mutex::new(Uuid::new_v4()),
            previous_source_id: Mutex::new(None),
            die_at_ms: AtomicI64::new(0),
            last_packet_at_ms: AtomicI64::new(0),
            published_at_ms: AtomicI64::new(0),
            monotonic_increase: AtomicBool::new(true),
            sequence_header_bytes_seen: AtomicU64::new(0),
            vhost_cfg,
        }
    }

    /// Registry contract: must not yield. Only sets up local fields.
    pub fn initialize(&self) {
        // source_id is already assigned in `new`; nothing here blocks.
    }

    pub fn source_id(&self) -> Uuid {
        *self.source_id.lock()
    }

    pub fn update_auth(&self, request: &StreamRequest) {
        *self.request.lock() = request.clone();
    }

    pub fn set_bridge(&self, bridge: Arc<dyn FrameSink>) {
        *self.bridge.lock() = Some(bridge);
    }

    pub fn set_security_check(&self, check: Arc<dyn SecurityCheck>) {
        *self.security.lock() = Some(check);
    }

    pub fn hub(&self) -> Option<&Hub> {
        self.hub.as_ref()
    }

    /// The `{meta_cache_read}` capability from spec §9's back-reference
    /// design note: lets a DVR segment plan re-feed cached metadata and
    /// sequence headers into a freshly opened fragment without the plan
    /// holding a cyclic reference back through the hub.
    pub fn meta_snapshot(&self) -> (Option<MediaPacket>, Option<MediaPacket>, Option<MediaPacket>) {
        let meta = self.meta_cache.lock();
        (
            meta.metadata().cloned(),
            meta.audio_sh().cloned(),
            meta.video_sh().cloned(),
        )
    }

    /// Admits a new consumer unless the security check rejects the play
    /// request (SPEC_FULL §2, `SecurityCheck::allow_play`). Returns `false`
    /// if the consumer was refused.
    pub fn add_consumer(&self, consumer: Arc<Mutex<Consumer>>) -> bool {
        let request = self.request.lock().clone();
        if let Some(check) = self.security.lock().as_ref() {
            if !check.allow_play(&request) {
                return false;
            }
        }
        self.consumers.lock().push(consumer);
        true
    }

    pub fn remove_dead_consumers(&self, keep: &[Arc<Mutex<Consumer>>]) {
        let mut consumers = self.consumers.lock();
        consumers.retain(|c| keep.iter().any(|k| Arc::ptr_eq(c, k)));
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().len()
    }

    pub fn can_publish(&self) -> bool {
        self.can_publish.load(Ordering::SeqCst)
    }

    pub fn is_publishing(&self) -> bool {
        !self.can_publish()
    }

    pub fn request_snapshot(&self) -> StreamRequest {
        self.request.lock().clone()
    }

    /// Prime a newly joined consumer: metadata + SH (retimed to GOP start
    /// under ATC), then GOP replay (spec §4.8 `consumer_dumps`, E4).
    pub fn consumer_dumps(
        &self,
        consumer: &Arc<Mutex<Consumer>>,
        send_sh: bool,
        send_metadata: bool,
        send_gop: bool,
    ) {
        let gop = self.gop_cache.lock();
        let meta = self.meta_cache.lock();
        let mut c = consumer.lock();

        if self.atc.load(Ordering::SeqCst) && !gop.is_empty() {
            let gop_start = gop.packets()[0].timestamp;
            meta.dumps_retimed(&mut c, gop_start, send_metadata, send_sh);
        } else {
            meta.dumps(&mut c, send_metadata, send_sh);
        }
        if send_gop {
            gop.dump(&mut c);
        }
    }

    /// Exclusive publish entry: §4.8 `on_publish`.
    pub fn on_publish(&self) -> bool {
        let request = self.request.lock().clone();
        if let Some(check) = self.security.lock().as_ref() {
            if !check.allow_publish(&request) {
                return false;
            }
        }
        self.can_publish.store(false, Ordering::SeqCst);
        self.mix_queue.lock().reset();
        self.meta_cache.lock().reset();
        self.monotonic_increase.store(true, Ordering::SeqCst);
        *self.monotonic.lock() = MonotonicGuard::default();
        self.published_at_ms.store(0, Ordering::SeqCst);
        self.die_at_ms.store(0, Ordering::SeqCst);

        if let Some(hub) = &self.hub {
            hub.on_publish();
        }
        if let Some(bridge) = self.bridge.lock().as_ref() {
            // Bridges observe publish via the next frame; no explicit hook
            // beyond being wired.
            let _ = bridge;
        }
        // can_publish is intentionally left false here: a racing second
        // publisher must be rejected until `on_unpublish` finishes (spec §9
        // open question — the re-entrance ordering is by design).
        true
    }

    /// §4.8 `on_unpublish`: notify hub first, clear GOP (not meta), rotate
    /// SH generation, then set `can_publish = true` LAST.
    pub fn on_unpublish(&self, now_ms: i64) {
        if let Some(hub) = &self.hub {
            hub.on_unpublish();
        }
        self.gop_cache.lock().flush();
        self.meta_cache.lock().rotate_on_unpublish();
        *self.previous_source_id.lock() = Some(*self.source_id.lock());
        self.die_at_ms.store(now_ms, Ordering::SeqCst);
        self.can_publish.store(true, Ordering::SeqCst);
    }

    pub fn dispose(&self) {
        self.gop_cache.lock().flush();
        self.consumers.lock().clear();
    }

    pub fn cycle(&self, now_ms: i64) {
        if let Some(hub) = &self.hub {
            hub.cycle();
        }
        let _ = now_ms;
    }

    /// `stream_is_dead`: no publisher, no consumers, grace period elapsed
    /// since `die_at_ms` (the original compares directly against the same
    /// field's epoch-zero default, with no "has it ever been set" guard —
    /// a source that was created but never published is just as dead as
    /// one that unpublished a long time ago).
    pub fn stream_is_dead(&self, now_ms: i64) -> bool {
        let die_at = self.die_at_ms.load(Ordering::SeqCst);
        self.can_publish.load(Ordering::SeqCst)
            && self.consumers.lock().is_empty()
            && now_ms > die_at + DEAD_STREAM_GRACE_MS + self.vhost_cfg.hub_cleanup_delay_ms
    }

    pub fn publisher_timed_out(&self, now_ms: i64) -> bool {
        let last = self.last_packet_at_ms.load(Ordering::SeqCst);
        if last == 0 {
            let since_publish = now_ms - self.published_at_ms.load(Ordering::SeqCst);
            since_publish > self.vhost_cfg.publish_1st_pkt_timeout_ms as i64
        } else {
            now_ms - last > self.vhost_cfg.publish_normal_timeout_ms as i64
        }
    }

    /// On `onMetaData`: update meta cache, auto-enable ATC/forward mirror
    /// from the "bravo" flags, fan out to consumers then the hub.
    pub fn on_meta_data(&self, mut pkt: MediaPacket, bravo_atc: bool, bravo_forward: bool) {
        self.touch();
        if self.vhost_cfg.atc_auto && bravo_atc {
            self.atc.store(true, Ordering::SeqCst);
        }
        if bravo_forward {
            self.forward_mirror.store(true, Ordering::SeqCst);
        }
        pkt.is_sequence_header = false;
        self.meta_cache.lock().update_data(pkt.copy());
        // Mirrors the sequence-header dedup policy: once reduce_sequence_header
        // is on, metadata re-fan-out to consumers is always dropped (spec §4.8
        // step 4, "fan out to consumers (unless dedup)"); the hub still gets it.
        if !self.vhost_cfg.reduce_sequence_header {
            for consumer in self.consumers.lock().iter() {
                consumer.lock().enqueue(pkt.copy());
            }
        }
        if let Some(hub) = &self.hub {
            hub.on_meta_data(&pkt);
        }
    }

    pub fn on_audio(&self, pkt: MediaPacket) {
        self.ingest(pkt, false);
    }

    pub fn on_video(&self, pkt: MediaPacket) {
        self.ingest(pkt, true);
    }

    fn ingest(&self, pkt: MediaPacket, is_video: bool) {
        self.touch();
        self.monotonic
            .lock()
            .check(&self.request.lock().stream, pkt.timestamp);

        if self.mix_correct.load(Ordering::SeqCst) {
            self.mix_queue.lock().push(pkt);
            loop {
                let popped = self.mix_queue.lock().pop();
                match popped {
                    Some(p) => {
                        if p.is_video() {
                            self.imp(p, true);
                        } else {
                            self.imp(p, false);
                        }
                    }
                    None => break,
                }
            }
        } else {
            self.imp(pkt, is_video);
        }
    }

    fn imp(&self, pkt: MediaPacket, is_video: bool) {
        if is_video
            && !pkt
                .video_codec
                .map(|c| c.is_cacheable())
                .unwrap_or(false)
            && !pkt.is_sequence_header
        {
            return;
        }

        if pkt.is_sequence_header {
            let is_dup = {
                let meta = self.meta_cache.lock();
                let prior = if is_video {
                    meta.previous_video_sh()
                } else {
                    meta.previous_audio_sh()
                };
                prior.map(|p| p.payload == pkt.payload).unwrap_or(false)
            };
            if is_video {
                self.meta_cache.lock().update_vsh(pkt.copy());
            } else {
                self.meta_cache.lock().update_ash(pkt.copy());
            }
            self.sequence_header_bytes_seen
                .fetch_add(pkt.size() as u64, Ordering::Relaxed);
            if self.vhost_cfg.reduce_sequence_header && is_dup {
                return;
            }
        }

        if let Some(hub) = &self.hub {
            let cached_sh = {
                let meta = self.meta_cache.lock();
                if is_video {
                    meta.video_sh().cloned()
                } else {
                    meta.audio_sh().cloned()
                }
            };
            let result = if is_video {
                hub.on_video(&pkt, cached_sh.as_ref())
            } else {
                hub.on_audio(&pkt, cached_sh.as_ref())
            };
            if result.is_err() {
                tracing::warn!("hard-fatal sink error on publish, continuing fan-out");
            }
        }
        if let Some(bridge) = self.bridge.lock().as_ref() {
            bridge.on_frame(&pkt);
        }

        for consumer in self.consumers.lock().iter() {
            consumer.lock().enqueue(pkt.copy());
        }

        self.gop_cache.lock().cache(&pkt);

        if self.atc.load(Ordering::SeqCst) {
            let mut meta = self.meta_cache.lock();
            if let Some(a) = meta.audio_sh().cloned() {
                meta.update_ash(a.with_timestamp(pkt.timestamp));
            }
            if let Some(v) = meta.video_sh().cloned() {
                meta.update_vsh(v.with_timestamp(pkt.timestamp));
            }
        }
    }

    fn touch(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.last_packet_at_ms.store(now_ms, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::VideoCodec;
    use bytes::Bytes;

    fn request() -> StreamRequest {
        StreamRequest {
            vhost: "__defaultVhost__".to_string(),
            app: "live".to_string(),
            stream: "test".to_string(),
            params: HashMap::new(),
        }
    }

    #[test]
    fn never_published_source_is_reapable_after_grace_period() {
        let src = LiveSource::new(request(), VhostConfig::default());
        assert!(!src.stream_is_dead(0));
        assert!(src.stream_is_dead(DEAD_STREAM_GRACE_MS + 1));
    }

    #[test]
    fn stream_is_dead_requires_grace_period() {
        let src = LiveSource::new(request(), VhostConfig::default());
        src.on_publish();
        src.on_unpublish(1_000);
        assert!(!src.stream_is_dead(1_500));
        assert!(src.stream_is_dead(1_000 + 3_000 + 1));
    }

    #[test]
    fn publish_blocks_concurrent_publish_until_unpublish_completes() {
        let src = LiveSource::new(request(), VhostConfig::default());
        assert!(src.can_publish());
        src.on_publish();
        assert!(!src.can_publish());
        src.on_unpublish(0);
        assert!(src.can_publish());
    }

    #[test]
    fn video_keyframe_is_cached_after_ingest() {
        let src = LiveSource::new(request(), VhostConfig::default());
        src.on_publish();
        let mut pkt = MediaPacket::video(Bytes::from_static(b"v"), 0, 1, VideoCodec::H264);
        pkt.is_keyframe = true;
        src.on_video(pkt);
        assert_eq!(src.gop_cache.lock().len(), 1);
    }

    #[test]
    fn non_cacheable_codec_is_rejected_before_fan_out() {
        let src = LiveSource::new(request(), VhostConfig::default());
        src.on_publish();
        let pkt = MediaPacket::video(Bytes::from_static(b"v"), 0, 1, VideoCodec::Other);
        src.on_video(pkt);
        assert_eq!(src.gop_cache.lock().len(), 0);
    }

    #[test]
    fn security_check_can_refuse_publish() {
        struct DenyAll;
        impl SecurityCheck for DenyAll {
            fn allow_publish(&self, _r: &StreamRequest) -> bool {
                false
            }
            fn allow_play(&self, _r: &StreamRequest) -> bool {
                false
            }
        }
        let src = LiveSource::new(request(), VhostConfig::default());
        src.set_security_check(Arc::new(DenyAll));
        assert!(!src.on_publish());
    }

    #[test]
    fn security_check_can_refuse_play() {
        struct DenyAll;
        impl SecurityCheck for DenyAll {
            fn allow_publish(&self, _r: &StreamRequest) -> bool {
                true
            }
            fn allow_play(&self, _r: &StreamRequest) -> bool {
                false
            }
        }
        let src = LiveSource::new(request(), VhostConfig::default());
        src.set_security_check(Arc::new(DenyAll));
        let consumer = Arc::new(Mutex::new(Consumer::new(&VhostConfig::default())));
        assert!(!src.add_consumer(consumer));
        assert_eq!(src.consumer_count(), 0);
    }
}
