//! Group-of-pictures cache for late-joining consumers (C3, spec §4.3).
//!
//! Sequence headers live in [`crate::meta_cache`], not here — this cache only
//! holds the actual audio/video payload packets since the last keyframe.

use crate::consumer::Consumer;
use crate::packet::MediaPacket;

/// Cached run of packets starting at a video keyframe.
#[derive(Debug)]
pub struct GopCache {
    enabled: bool,
    max_frames: usize,
    max_bytes: usize,
    packets: Vec<MediaPacket>,
    video_count: usize,
    pure_audio_count: usize,
    bytes: usize,
}

/// Pure-audio packets since the last video frame beyond which the cache is
/// flushed — an audio-only stream would otherwise grow unbounded.
const PURE_AUDIO_LIMIT: usize = 115;

impl GopCache {
    pub fn new(enabled: bool, max_frames: usize, max_bytes: usize) -> Self {
        Self {
            enabled,
            max_frames,
            max_bytes,
            packets: Vec::new(),
            video_count: 0,
            pure_audio_count: 0,
            bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packets(&self) -> &[MediaPacket] {
        &self.packets
    }

    /// Consider `pkt` for caching, applying the flush rules in order.
    pub fn cache(&mut self, pkt: &MediaPacket) {
        if !self.enabled {
            return;
        }
        if pkt.is_script() {
            return;
        }
        if pkt.is_video() {
            if !pkt
                .video_codec
                .map(|c| c.is_cacheable())
                .unwrap_or(false)
            {
                return;
            }
            self.video_count += 1;
            self.pure_audio_count = 0;
        } else if self.video_count == 0 {
            // Pure audio: no video has been cached yet in this GOP.
            return;
        } else {
            self.pure_audio_count += 1;
            if self.pure_audio_count > PURE_AUDIO_LIMIT {
                self.flush();
            }
        }

        if pkt.is_video() && pkt.is_keyframe() {
            self.flush();
            self.video_count = 1;
        }

        let copy = pkt.copy();
        self.bytes += copy.size();
        self.packets.push(copy);

        let frame_overflow = self.max_frames > 0 && self.packets.len() > self.max_frames;
        let byte_overflow = self.max_bytes > 0 && self.bytes > self.max_bytes;
        if frame_overflow || byte_overflow {
            self.flush();
        }
    }

    /// Drop every cached packet and reset the run counters.
    pub fn flush(&mut self) {
        self.packets.clear();
        self.video_count = 0;
        self.pure_audio_count = 0;
        self.bytes = 0;
    }

    /// Replay the cached run into `consumer`, preserving order.
    pub fn dump(&self, consumer: &mut Consumer) {
        for pkt in &self.packets {
            consumer.enqueue(pkt.copy());
        }
    }
}
