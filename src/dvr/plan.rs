//! DVR plans (C16, spec §4.15): `session` (one file per publish) and
//! `segment` (duration-boundary, keyframe-aligned reap).

use std::sync::Arc;

use crate::config::JitterAlgorithm;
use crate::dvr::hook::{ClosedFragment, DvrHookWorker};
use crate::error::DvrResult;
use crate::hub::{Sink, SinkError};
use crate::jitter::JitterCorrector;
use crate::packet::MediaPacket;
use crate::source::{LiveSource, StreamRequest};

/// Common contract for the FLV/MP4 writers a plan drives (spec §4.15
/// "Segmenter abstract contract").
pub trait Segmenter: Send + Sync {
    fn open(&mut self, request: &StreamRequest) -> DvrResult<()>;
    fn write_metadata(&mut self, pkt: &MediaPacket) -> DvrResult<()>;
    fn write_audio(&mut self, pkt: &MediaPacket) -> DvrResult<()>;
    fn write_video(&mut self, pkt: &MediaPacket) -> DvrResult<()>;
    /// Closes the current fragment, returning its final path if one was
    /// open.
    fn close(&mut self) -> DvrResult<Option<String>>;
    fn current_path(&self) -> Option<String>;
}

fn to_sink_error(err: DvrResult<()>) -> Result<(), SinkError> {
    err.map_err(|e| {
        tracing::warn!(error = %e, "dvr segmenter write failed");
        SinkError::Soft
    })
}

/// `session` plan: one fragment per publish (spec §4.15).
pub struct SessionPlan {
    segmenter: parking_lot::Mutex<Box<dyn Segmenter>>,
    request: StreamRequest,
    hook_worker: DvrHookWorker,
    enabled: std::sync::atomic::AtomicBool,
}

impl SessionPlan {
    pub fn new(segmenter: Box<dyn Segmenter>, request: StreamRequest, hook_worker: DvrHookWorker) -> Self {
        Self {
            segmenter: parking_lot::Mutex::new(segmenter),
            request,
            hook_worker,
            enabled: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl Sink for SessionPlan {
    fn name(&self) -> &str {
        "dvr-session"
    }

    fn on_publish(&self) {
        let mut seg = self.segmenter.lock();
        if seg.open(&self.request).is_ok() {
            self.enabled.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn on_unpublish(&self) {
        self.enabled.store(false, std::sync::atomic::Ordering::SeqCst);
        let path = self.segmenter.lock().close().ok().flatten();
        if let Some(path) = path {
            self.hook_worker.enqueue(ClosedFragment {
                request: self.request.clone(),
                file_path: path,
            });
        }
    }

    fn on_meta_data(&self, pkt: &MediaPacket) -> Result<(), SinkError> {
        if !self.enabled.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        to_sink_error(self.segmenter.lock().write_metadata(pkt))
    }

    fn on_audio(&self, pkt: &MediaPacket) -> Result<(), SinkError> {
        if !self.enabled.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        to_sink_error(self.segmenter.lock().write_audio(pkt))
    }

    fn on_video(&self, pkt: &MediaPacket) -> Result<(), SinkError> {
        if !self.enabled.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        to_sink_error(self.segmenter.lock().write_video(pkt))
    }
}

/// `segment` plan: reaps on a duration boundary, aligned to a keyframe
/// unless `wait_keyframe = false` (spec §4.15, E7).
pub struct SegmentPlan {
    segmenter: parking_lot::Mutex<Box<dyn Segmenter>>,
    request: StreamRequest,
    source: Arc<LiveSource>,
    hook_worker: DvrHookWorker,
    cduration_ms: i64,
    wait_keyframe: bool,
    time_jitter: JitterAlgorithm,
    enabled: std::sync::atomic::AtomicBool,
    fragment_start_ts: parking_lot::Mutex<Option<i64>>,
    duration_jitter: parking_lot::Mutex<JitterCorrector>,
}

impl SegmentPlan {
    pub fn new(
        segmenter: Box<dyn Segmenter>,
        request: StreamRequest,
        source: Arc<LiveSource>,
        hook_worker: DvrHookWorker,
        cduration_ms: i64,
        wait_keyframe: bool,
        time_jitter: JitterAlgorithm,
    ) -> Self {
        Self {
            segmenter: parking_lot::Mutex::new(segmenter),
            request,
            source,
            hook_worker,
            cduration_ms,
            wait_keyframe,
            time_jitter,
            enabled: std::sync::atomic::AtomicBool::new(false),
            fragment_start_ts: parking_lot::Mutex::new(None),
            duration_jitter: parking_lot::Mutex::new(JitterCorrector::new()),
        }
    }

    fn open_fragment(&self) {
        let mut seg = self.segmenter.lock();
        if seg.open(&self.request).is_ok() {
            self.enabled.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn close_fragment(&self) {
        self.enabled.store(false, std::sync::atomic::Ordering::SeqCst);
        let path = self.segmenter.lock().close().ok().flatten();
        if let Some(path) = path {
            self.hook_worker.enqueue(ClosedFragment {
                request: self.request.clone(),
                file_path: path,
            });
        }
    }

    /// `on_update_duration`: tracks the current fragment's span against a
    /// jitter-corrected timestamp so an unstable publisher clock doesn't
    /// trigger premature or delayed reaps.
    fn on_update_duration(&self, pkt: &MediaPacket) -> i64 {
        let mut corrected = pkt.copy();
        self.duration_jitter.lock().correct(&mut corrected, self.time_jitter);
        let mut start = self.fragment_start_ts.lock();
        let start_ts = *start.get_or_insert(corrected.timestamp);
        corrected.timestamp - start_ts
    }

    /// Reap-on-boundary check (spec §4.15, E7).
    fn maybe_reap(&self, pkt: &MediaPacket) {
        let duration = self.on_update_duration(pkt);
        let boundary_crossed = duration >= self.cduration_ms;
        let aligned = pkt.is_keyframe() || !self.wait_keyframe;
        if boundary_crossed && aligned {
            self.close_fragment();
            self.open_fragment();
            *self.fragment_start_ts.lock() = Some(pkt.timestamp);
            self.request_sequence_headers();
        }
    }

    /// The `{on_dvr_request_sh}` capability (spec §9): re-feeds the cached
    /// metadata and sequence headers into the freshly opened fragment so a
    /// player joining mid-segment still sees a decodable header.
    fn request_sequence_headers(&self) {
        let (metadata, audio_sh, video_sh) = self.source.meta_snapshot();
        let mut seg = self.segmenter.lock();
        if let Some(meta) = metadata {
            let _ = seg.write_metadata(&meta);
        }
        if let Some(ash) = audio_sh {
            let _ = seg.write_audio(&ash);
        }
        if let Some(vsh) = video_sh {
            let _ = seg.write_video(&vsh);
        }
    }
}

impl Sink for SegmentPlan {
    fn name(&self) -> &str {
        "dvr-segment"
    }

    fn on_publish(&self) {
        *self.fragment_start_ts.lock() = None;
        self.open_fragment();
    }

    fn on_unpublish(&self) {
        self.close_fragment();
    }

    fn on_meta_data(&self, pkt: &MediaPacket) -> Result<(), SinkError> {
        if !self.enabled.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        to_sink_error(self.segmenter.lock().write_metadata(pkt))
    }

    fn on_audio(&self, pkt: &MediaPacket) -> Result<(), SinkError> {
        if !self.enabled.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        self.maybe_reap(pkt);
        to_sink_error(self.segmenter.lock().write_audio(pkt))
    }

    fn on_video(&self, pkt: &MediaPacket) -> Result<(), SinkError> {
        if !self.enabled.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }
        self.maybe_reap(pkt);
        to_sink_error(self.segmenter.lock().write_video(pkt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VhostConfig;
    use crate::hooks::HookClient;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> StreamRequest {
        StreamRequest {
            vhost: "v".to_string(),
            app: "a".to_string(),
            stream: "s".to_string(),
            params: HashMap::new(),
        }
    }

    struct FakeSegmenter {
        opens: usize,
        closes: usize,
        video_writes: usize,
        audio_writes: usize,
        meta_writes: usize,
        is_open: bool,
    }

    impl FakeSegmenter {
        fn new() -> Self {
            Self {
                opens: 0,
                closes: 0,
                video_writes: 0,
                audio_writes: 0,
                meta_writes: 0,
                is_open: false,
            }
        }
    }

    impl Segmenter for FakeSegmenter {
        fn open(&mut self, _request: &StreamRequest) -> DvrResult<()> {
            self.opens += 1;
            self.is_open = true;
            Ok(())
        }
        fn write_metadata(&mut self, _pkt: &MediaPacket) -> DvrResult<()> {
            self.meta_writes += 1;
            Ok(())
        }
        fn write_audio(&mut self, _pkt: &MediaPacket) -> DvrResult<()> {
            self.audio_writes += 1;
            Ok(())
        }
        fn write_video(&mut self, _pkt: &MediaPacket) -> DvrResult<()> {
            self.video_writes += 1;
            Ok(())
        }
        fn close(&mut self) -> DvrResult<Option<String>> {
            if !self.is_open {
                return Ok(None);
            }
            self.closes += 1;
            self.is_open = false;
            Ok(Some(format!("frag-{}.flv", self.closes)))
        }
        fn current_path(&self) -> Option<String> {
            self.is_open.then(|| "frag.flv".to_string())
        }
    }

    #[tokio::test]
    async fn session_plan_opens_on_publish_closes_on_unpublish() {
        let plan = SessionPlan::new(
            Box::new(FakeSegmenter::new()),
            request(),
            DvrHookWorker::spawn(HookClient::new(), Vec::new()),
        );
        plan.on_publish();
        plan.on_audio(&MediaPacket::audio(Bytes::from_static(b"a"), 0, 1)).unwrap();
        plan.on_unpublish();
    }

    #[tokio::test]
    async fn segment_plan_reaps_at_keyframe_past_cduration_e7_scenario() {
        let source = Arc::new(LiveSource::new(request(), VhostConfig::default()));
        let plan = SegmentPlan::new(
            Box::new(FakeSegmenter::new()),
            request(),
            source,
            DvrHookWorker::spawn(HookClient::new(), Vec::new()),
            30_000,
            true,
            JitterAlgorithm::Full,
        );
        plan.on_publish();

        let mut early = MediaPacket::video(Bytes::from_static(b"v"), 10_000, 1, crate::packet::VideoCodec::H264);
        early.is_keyframe = true;
        plan.on_video(&early).unwrap();

        // Non-keyframe past the boundary does not reap.
        let late_non_key = MediaPacket::video(Bytes::from_static(b"v"), 35_000, 1, crate::packet::VideoCodec::H264);
        plan.on_video(&late_non_key).unwrap();

        let mut late_key = MediaPacket::video(Bytes::from_static(b"v"), 41_000, 1, crate::packet::VideoCodec::H264);
        late_key.is_keyframe = true;
        plan.on_video(&late_key).unwrap();
    }
}
