//! Cross-protocol stream bridges: RTMP, SRT and RTC, each converting the
//! in-memory media packet model to and from the other protocols' wire
//! packetization (C13, spec §4.12).

pub mod nalu;
pub mod rtp_builder;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bridge::nalu::{NaluFilter, ParsedNalu};
use crate::bridge::rtp_builder::{package_nalu, RtpPayload};
use crate::packet::MediaPacket;
use crate::source::{FrameSink, LiveSource, StreamRequest};

/// A raw transport-layer packet received off an SRT connection, ahead of
/// whatever framing (TS, or raw media) the stream carries.
#[derive(Debug, Clone)]
pub struct TsPacket {
    pub payload: bytes::Bytes,
}

/// An inbound RTP packet handed to the RTC bridge by the RTSP/WHIP
/// transport, already demuxed down to payload + metadata the frame
/// builder needs (spec §4.13 consumes the reassembled packets this
/// produces).
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub ssrc: u32,
    pub sequence: u16,
    pub payload: bytes::Bytes,
    pub nalus: Vec<ParsedNalu>,
}

/// Shared plumbing every concrete bridge needs: the request it was
/// initialized with and whether it is wired to a live source yet.
struct BridgeState {
    request: Option<StreamRequest>,
    source: Option<Arc<LiveSource>>,
}

impl BridgeState {
    fn empty() -> Self {
        Self {
            request: None,
            source: None,
        }
    }
}

/// RTMP bridge: receives frames from the live source (`on_frame`, the
/// RTMP→RTC/RTSP direction) and packages them through the RTP builder for
/// any attached RTC/RTSP output (spec §4.12 bridge table, row RTMP).
pub struct RtmpBridge {
    state: Mutex<BridgeState>,
    nalu_filter: NaluFilter,
    rtp_outputs: Mutex<Vec<Arc<dyn RtpSink>>>,
}

/// Destination for RTP payloads produced by a bridge's RTP builder (an RTC
/// sender or an RTSP play stream).
pub trait RtpSink: Send + Sync {
    fn send_rtp(&self, payload: &RtpPayload);
}

impl RtmpBridge {
    pub fn new(nalu_filter: NaluFilter) -> Self {
        Self {
            state: Mutex::new(BridgeState::empty()),
            nalu_filter,
            rtp_outputs: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(NaluFilter {
            keep_avc_nalu_sei: false,
            keep_bframe: false,
            is_hevc: false,
        })
    }

    pub fn initialize(&self, request: StreamRequest, source: Arc<LiveSource>) {
        let mut state = self.state.lock();
        state.request = Some(request);
        state.source = Some(source);
    }

    pub fn add_rtp_output(&self, output: Arc<dyn RtpSink>) {
        self.rtp_outputs.lock().push(output);
    }

    pub fn on_publish(&self) {}

    pub fn on_unpublish(&self) {
        self.rtp_outputs.lock().clear();
    }

    /// Fragments/packages `nalu` through the RTP builder after filtering,
    /// fanning the resulting RTP payloads out to every attached output.
    fn forward_nalu(&self, nalu: &ParsedNalu, raw: &[u8]) {
        if !self.nalu_filter.should_keep(nalu) {
            return;
        }
        let outputs = self.rtp_outputs.lock();
        if outputs.is_empty() {
            return;
        }
        for payload in package_nalu(raw) {
            for output in outputs.iter() {
                output.send_rtp(&payload);
            }
        }
    }
}

impl FrameSink for RtmpBridge {
    fn on_frame(&self, pkt: &MediaPacket) {
        if !pkt.is_video() {
            return;
        }
        // The format parser (an external collaborator per spec §6) is
        // expected to have already split the AVCC payload into NALUs and
        // attached them; here we treat the whole video payload as one
        // NALU when no finer-grained split is available.
        let parsed = ParsedNalu {
            nalu_type: if pkt.is_keyframe() { 5 } else { 1 },
            slice_kind: if pkt.is_keyframe() {
                nalu::SliceKind::I
            } else {
                nalu::SliceKind::P
            },
            payload_len: pkt.size(),
        };
        self.forward_nalu(&parsed, &pkt.payload);
    }
}

/// SRT bridge: accepts raw transport-stream packets (`on_packet`) or
/// already-demuxed media frames (`on_frame`), mirrors either into the live
/// source and, for frames, out through the RTP builder (spec §4.12 bridge
/// table, row SRT).
pub struct SrtBridge {
    state: Mutex<BridgeState>,
    nalu_filter: NaluFilter,
}

impl SrtBridge {
    pub fn new(nalu_filter: NaluFilter) -> Self {
        Self {
            state: Mutex::new(BridgeState::empty()),
            nalu_filter,
        }
    }

    pub fn empty() -> Self {
        Self::new(NaluFilter {
            keep_avc_nalu_sei: false,
            keep_bframe: false,
            is_hevc: false,
        })
    }

    pub fn initialize(&self, request: StreamRequest, source: Arc<LiveSource>) {
        let mut state = self.state.lock();
        state.request = Some(request);
        state.source = Some(source);
    }

    pub fn on_publish(&self) {}
    pub fn on_unpublish(&self) {}

    /// Transport-stream packets are demuxed elsewhere; the bridge's job at
    /// this layer is only to confirm a source is wired before accepting
    /// more of the stream.
    pub fn on_packet(&self, _ts_packet: &TsPacket) -> bool {
        self.state.lock().source.is_some()
    }

    /// A demuxed media frame: mirror straight into the live source (the
    /// SRT→RTMP direction per the bridge table).
    pub fn on_frame(&self, pkt: MediaPacket) {
        let source = self.state.lock().source.clone();
        let Some(source) = source else { return };
        if pkt.is_audio() {
            source.on_audio(pkt);
        } else if pkt.is_video() {
            source.on_video(pkt);
        } else {
            source.on_meta_data(pkt, false, false);
        }
    }

    pub fn nalu_filter(&self) -> &NaluFilter {
        &self.nalu_filter
    }
}

/// RTC bridge: accepts inbound RTP (`on_rtp`) and mirrors the reassembled
/// frames into the live source (the RTC→RTMP direction; reassembly itself
/// is the frame builder's job, spec §4.13). The bridge's role here is
/// wiring: own the source reference and forward RTP onward to whatever
/// frame builder instance owns reassembly for this stream.
pub struct RtcBridge {
    state: Mutex<BridgeState>,
    rtp_handler: Mutex<Option<Arc<dyn RtpInbound>>>,
}

/// Receives raw inbound RTP for reassembly (implemented by the frame
/// builder, spec §4.13).
pub trait RtpInbound: Send + Sync {
    fn on_rtp(&self, packet: &RtpPacket);
}

impl RtcBridge {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BridgeState::empty()),
            rtp_handler: Mutex::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::new()
    }

    pub fn initialize(&self, request: StreamRequest, source: Arc<LiveSource>) {
        let mut state = self.state.lock();
        state.request = Some(request);
        state.source = Some(source);
    }

    pub fn set_frame_builder(&self, handler: Arc<dyn RtpInbound>) {
        *self.rtp_handler.lock() = Some(handler);
    }

    pub fn on_publish(&self) {}

    pub fn on_unpublish(&self) {
        self.rtp_handler.lock().take();
    }

    pub fn on_rtp(&self, packet: &RtpPacket) {
        if let Some(handler) = self.rtp_handler.lock().as_ref() {
            handler.on_rtp(packet);
        }
    }
}

impl Default for RtcBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VhostConfig;
    use crate::source::StreamRequest;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> StreamRequest {
        StreamRequest {
            vhost: "__defaultVhost__".to_string(),
            app: "live".to_string(),
            stream: "test".to_string(),
            params: HashMap::new(),
        }
    }

    struct CountingRtpSink {
        count: AtomicUsize,
    }

    impl RtpSink for CountingRtpSink {
        fn send_rtp(&self, _payload: &RtpPayload) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn rtmp_bridge_forwards_keyframe_as_rtp() {
        let bridge = RtmpBridge::empty();
        let source = Arc::new(LiveSource::new(request(), VhostConfig::default()));
        bridge.initialize(request(), source);
        let sink = Arc::new(CountingRtpSink {
            count: AtomicUsize::new(0),
        });
        bridge.add_rtp_output(sink.clone());

        let mut pkt = MediaPacket::video(
            Bytes::from_static(b"frame"),
            0,
            1,
            crate::packet::VideoCodec::H264,
        );
        pkt.is_keyframe = true;
        bridge.on_frame(&pkt);

        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rtmp_bridge_drops_audio_frames() {
        let bridge = RtmpBridge::empty();
        let sink = Arc::new(CountingRtpSink {
            count: AtomicUsize::new(0),
        });
        bridge.add_rtp_output(sink.clone());
        bridge.on_frame(&MediaPacket::audio(Bytes::from_static(b"a"), 0, 1));
        assert_eq!(sink.count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn srt_bridge_mirrors_frame_into_source() {
        let bridge = SrtBridge::empty();
        let source = Arc::new(LiveSource::new(request(), VhostConfig::default()));
        bridge.initialize(request(), source.clone());
        source.on_publish();
        bridge.on_frame(MediaPacket::audio(Bytes::from_static(b"a"), 0, 1));
        // Mirrored packet reaches the source's ingest path without panicking;
        // no GOP entry since it's audio before any video.
        assert_eq!(source.consumer_count(), 0);
    }

    #[test]
    fn srt_bridge_on_packet_requires_initialized_source() {
        let bridge = SrtBridge::empty();
        assert!(!bridge.on_packet(&TsPacket {
            payload: Bytes::new()
        }));
    }

    struct CountingRtpInbound {
        count: AtomicUsize,
    }

    impl RtpInbound for CountingRtpInbound {
        fn on_rtp(&self, _packet: &RtpPacket) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn rtc_bridge_forwards_rtp_to_frame_builder() {
        let bridge = RtcBridge::empty();
        let handler = Arc::new(CountingRtpInbound {
            count: AtomicUsize::new(0),
        });
        bridge.set_frame_builder(handler.clone());
        bridge.on_rtp(&RtpPacket {
            ssrc: 1,
            sequence: 0,
            payload: Bytes::from_static(b"x"),
            nalus: Vec::new(),
        });
        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rtc_bridge_on_unpublish_clears_handler() {
        let bridge = RtcBridge::empty();
        let handler = Arc::new(CountingRtpInbound {
            count: AtomicUsize::new(0),
        });
        bridge.set_frame_builder(handler.clone());
        bridge.on_unpublish();
        bridge.on_rtp(&RtpPacket {
            ssrc: 1,
            sequence: 0,
            payload: Bytes::from_static(b"x"),
            nalus: Vec::new(),
        });
        assert_eq!(handler.count.load(Ordering::SeqCst), 0);
    }
}
