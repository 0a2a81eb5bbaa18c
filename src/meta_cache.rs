//! Cached metadata and sequence headers used to prime new consumers (C4,
//! spec §4.4).

use crate::consumer::Consumer;
use crate::packet::MediaPacket;

/// Holds the current `onMetaData`/audio-SH/video-SH packets plus the prior
/// SH generation, so `on_unpublish` can rotate without losing history.
#[derive(Debug, Default)]
pub struct MetaCache {
    metadata: Option<MediaPacket>,
    audio_sh: Option<MediaPacket>,
    video_sh: Option<MediaPacket>,
    previous_audio_sh: Option<MediaPacket>,
    previous_video_sh: Option<MediaPacket>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self) -> Option<&MediaPacket> {
        self.metadata.as_ref()
    }

    pub fn audio_sh(&self) -> Option<&MediaPacket> {
        self.audio_sh.as_ref()
    }

    pub fn video_sh(&self) -> Option<&MediaPacket> {
        self.video_sh.as_ref()
    }

    /// The audio SH from the previous publish generation, kept across
    /// `reset`/`on_publish` so an identical re-publish can be detected and
    /// suppressed (spec §3).
    pub fn previous_audio_sh(&self) -> Option<&MediaPacket> {
        self.previous_audio_sh.as_ref()
    }

    pub fn previous_video_sh(&self) -> Option<&MediaPacket> {
        self.previous_video_sh.as_ref()
    }

    /// Store a re-encoded metadata packet. The server-identity fields are
    /// the core's own responsibility; `duration` is stripped because a live
    /// stream has none.
    pub fn update_data(&mut self, pkt: MediaPacket) {
        self.metadata = Some(pkt);
    }

    pub fn update_ash(&mut self, pkt: MediaPacket) {
        if let Some(prev) = self.audio_sh.take() {
            self.previous_audio_sh = Some(prev);
        }
        self.audio_sh = Some(pkt);
    }

    pub fn update_vsh(&mut self, pkt: MediaPacket) {
        if let Some(prev) = self.video_sh.take() {
            self.previous_video_sh = Some(prev);
        }
        self.video_sh = Some(pkt);
    }

    /// Move current SHs into the previous-generation slots without
    /// installing a new one — called from `on_unpublish` (§4.8).
    pub fn rotate_on_unpublish(&mut self) {
        if let Some(a) = self.audio_sh.take() {
            self.previous_audio_sh = Some(a);
        }
        if let Some(v) = self.video_sh.take() {
            self.previous_video_sh = Some(v);
        }
    }

    /// Clears the current metadata/SH generation for a fresh publish, but
    /// keeps `previous_audio_sh`/`previous_video_sh` intact — they survive
    /// across `on_publish` so re-publish dedup can still compare against
    /// the stream's last-known SH (spec §3; matches the original's
    /// `meta_->clear()`, which only frees the current generation).
    pub fn reset(&mut self) {
        self.metadata = None;
        self.audio_sh = None;
        self.video_sh = None;
    }

    /// Prime `consumer` with metadata then audio SH then video SH, in that
    /// order (audio first so HLS muxers can detect the codec immediately).
    /// `send_metadata`/`send_sh` gate each half independently.
    pub fn dumps(&self, consumer: &mut Consumer, send_metadata: bool, send_sh: bool) {
        if send_metadata {
            if let Some(m) = &self.metadata {
                consumer.enqueue(m.copy());
            }
        }
        if send_sh {
            if let Some(a) = &self.audio_sh {
                consumer.enqueue(a.copy());
            }
            if let Some(v) = &self.video_sh {
                consumer.enqueue(v.copy());
            }
        }
    }

    /// Retimestamp the cached metadata/SH copies to `ts` without mutating
    /// the cache itself — used when priming an ATC consumer from GOP start
    /// (spec §4.8 `consumer_dumps`).
    pub fn dumps_retimed(&self, consumer: &mut Consumer, ts: i64, send_metadata: bool, send_sh: bool) {
        if send_metadata {
            if let Some(m) = &self.metadata {
                consumer.enqueue(m.with_timestamp(ts));
            }
        }
        if send_sh {
            if let Some(a) = &self.audio_sh {
                consumer.enqueue(a.with_timestamp(ts));
            }
            if let Some(v) = &self.video_sh {
                consumer.enqueue(v.with_timestamp(ts));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VhostConfig;
    use bytes::Bytes;

    fn sh(kind: crate::packet::MessageType, ts: i64) -> MediaPacket {
        MediaPacket::new(kind, Bytes::from_static(b"sh"), ts, 1)
    }

    #[test]
    fn update_ash_preserves_previous_generation() {
        let mut mc = MetaCache::new();
        mc.update_ash(sh(crate::packet::MessageType::Audio, 0));
        mc.update_ash(sh(crate::packet::MessageType::Audio, 10));
        assert_eq!(mc.previous_audio_sh.as_ref().unwrap().timestamp, 0);
        assert_eq!(mc.audio_sh.as_ref().unwrap().timestamp, 10);
    }

    #[test]
    fn rotate_on_unpublish_clears_current_keeps_previous() {
        let mut mc = MetaCache::new();
        mc.update_ash(sh(crate::packet::MessageType::Audio, 0));
        mc.update_vsh(sh(crate::packet::MessageType::Video, 0));
        mc.rotate_on_unpublish();
        assert!(mc.audio_sh.is_none());
        assert!(mc.video_sh.is_none());
        assert!(mc.previous_audio_sh.is_some());
        assert!(mc.previous_video_sh.is_some());
    }

    #[test]
    fn dumps_e4_scenario_order() {
        let cfg = VhostConfig::default();
        let mut consumer = Consumer::new(&cfg);
        let mut mc = MetaCache::new();
        mc.update_data(MediaPacket::script(Bytes::from_static(b"M"), 0, 1));
        mc.update_ash(MediaPacket::audio(Bytes::from_static(b"A"), 0, 1));
        mc.update_vsh(MediaPacket::video(
            Bytes::from_static(b"V"),
            0,
            1,
            crate::packet::VideoCodec::H264,
        ));
        mc.dumps(&mut consumer, true, true);

        let mut out = Vec::new();
        consumer.dump_packets(10, &mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].payload, Bytes::from_static(b"M"));
        assert_eq!(out[1].payload, Bytes::from_static(b"A"));
        assert_eq!(out[2].payload, Bytes::from_static(b"V"));
    }
}
