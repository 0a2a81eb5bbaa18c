//! The canonical media unit passed through the live-streaming core.
//!
//! Mirrors the teacher's `bytes::Bytes`-backed cache entries: the payload is
//! a refcounted immutable byte slice so `MediaPacket::copy` is O(1) (spec §9,
//! option (b) — "faithful; recommended for high fan-out").

use bytes::Bytes;

/// Tag distinguishing the three kinds of packet the core fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Audio,
    Video,
    Script,
}

impl MessageType {
    pub fn is_av(self) -> bool {
        matches!(self, MessageType::Audio | MessageType::Video)
    }
}

/// Video codec identified by the upstream format parser (an external
/// collaborator per spec §6 — this crate only consumes the resulting id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    Hevc,
    Other,
}

impl VideoCodec {
    pub fn is_cacheable(self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::Hevc)
    }
}

/// A single media packet: audio, video or a script (metadata) message.
///
/// Once enqueued into any consumer queue a packet is treated as immutable —
/// callers that need to retime it must produce a new packet via
/// [`MediaPacket::with_timestamp`] rather than mutate in place.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub payload: Bytes,
    pub timestamp: i64,
    pub stream_id: u64,
    pub message_type: MessageType,
    /// Wall-synchronized timestamp in milliseconds; `None` means "no sync".
    pub avsync_time: Option<i64>,
    /// Set by the caller when this video packet is a keyframe; meaningless
    /// for audio/script packets.
    pub is_keyframe: bool,
    /// Set when this packet carries a codec sequence header (AAC
    /// AudioSpecificConfig / H.264 SPS+PPS / H.265 VPS+SPS+PPS).
    pub is_sequence_header: bool,
    pub video_codec: Option<VideoCodec>,
}

impl MediaPacket {
    pub fn new(message_type: MessageType, payload: Bytes, timestamp: i64, stream_id: u64) -> Self {
        Self {
            payload,
            timestamp,
            stream_id,
            message_type,
            avsync_time: None,
            is_keyframe: false,
            is_sequence_header: false,
            video_codec: None,
        }
    }

    pub fn audio(payload: Bytes, timestamp: i64, stream_id: u64) -> Self {
        Self::new(MessageType::Audio, payload, timestamp, stream_id)
    }

    pub fn video(payload: Bytes, timestamp: i64, stream_id: u64, codec: VideoCodec) -> Self {
        let mut pkt = Self::new(MessageType::Video, payload, timestamp, stream_id);
        pkt.video_codec = Some(codec);
        pkt
    }

    pub fn script(payload: Bytes, timestamp: i64, stream_id: u64) -> Self {
        Self::new(MessageType::Script, payload, timestamp, stream_id)
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn is_audio(&self) -> bool {
        self.message_type == MessageType::Audio
    }

    pub fn is_video(&self) -> bool {
        self.message_type == MessageType::Video
    }

    pub fn is_script(&self) -> bool {
        self.message_type == MessageType::Script
    }

    pub fn is_keyframe(&self) -> bool {
        self.message_type == MessageType::Video && self.is_keyframe
    }

    /// O(1) clone — `Bytes` is refcounted, matching the original core's
    /// shared-buffer `copy()`.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn with_timestamp(&self, timestamp: i64) -> Self {
        let mut pkt = self.clone();
        pkt.timestamp = timestamp;
        pkt
    }
}
