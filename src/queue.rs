//! Bounded FIFO of media packets with shrink-on-overflow (C2, spec §4.2).
//!
//! Players tolerate packet loss but cannot decode at all if sequence headers
//! vanish; the shrink policy trades fine-grained loss for codec continuity.

use std::collections::VecDeque;

use crate::packet::{MediaPacket, MessageType};

/// FIFO of media packets plus the book-keeping the shrink policy needs.
#[derive(Debug)]
pub struct MessageQueue {
    packets: VecDeque<MediaPacket>,
    /// `-1` until the first timestamp-advancing packet arrives.
    av_start_time: i64,
    av_end_time: i64,
    max_queue_size: i64,
    last_audio_sh: Option<MediaPacket>,
    last_video_sh: Option<MediaPacket>,
}

impl MessageQueue {
    pub fn new(max_queue_size: i64) -> Self {
        Self {
            packets: VecDeque::new(),
            av_start_time: -1,
            av_end_time: -1,
            max_queue_size,
            last_audio_sh: None,
            last_video_sh: None,
        }
    }

    pub fn set_queue_size(&mut self, max_queue_size: i64) {
        self.max_queue_size = max_queue_size;
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn av_start_time(&self) -> i64 {
        self.av_start_time
    }

    pub fn av_end_time(&self) -> i64 {
        self.av_end_time
    }

    /// Span of buffered audio/video, in the same unit as `max_queue_size`.
    pub fn duration(&self) -> i64 {
        if self.av_start_time < 0 || self.av_end_time < 0 {
            0
        } else {
            self.av_end_time - self.av_start_time
        }
    }

    /// Enqueue a packet, shrinking the queue if it has overflowed.
    /// Returns `true` if a shrink occurred (the caller's overflow flag).
    pub fn enqueue(&mut self, pkt: MediaPacket) -> bool {
        if pkt.is_sequence_header {
            match pkt.message_type {
                MessageType::Audio => self.last_audio_sh = Some(pkt.clone()),
                MessageType::Video => self.last_video_sh = Some(pkt.clone()),
                MessageType::Script => {}
            }
        }

        // Metadata packets with timestamp 0 do not advance av_end unless
        // av_end is still unset (spec §4.2 invariant).
        let advances = !(pkt.is_script() && pkt.timestamp == 0) || self.av_end_time < 0;
        if advances {
            if self.av_start_time < 0 {
                self.av_start_time = pkt.timestamp;
            }
            self.av_end_time = pkt.timestamp;
        }

        self.packets.push_back(pkt);

        let overflowed =
            self.max_queue_size > 0 && self.av_end_time - self.av_start_time > self.max_queue_size;
        if overflowed {
            self.shrink();
        }
        overflowed
    }

    /// Discard all packets except the most recent audio/video sequence
    /// headers, retimestamped to `av_end_time`; resets `av_start` to
    /// `av_end`.
    pub fn shrink(&mut self) {
        self.packets.clear();
        if let Some(sh) = &self.last_audio_sh {
            let mut retimed = sh.clone();
            retimed.timestamp = self.av_end_time;
            self.last_audio_sh = Some(retimed.clone());
            self.packets.push_back(retimed);
        }
        if let Some(sh) = &self.last_video_sh {
            let mut retimed = sh.clone();
            retimed.timestamp = self.av_end_time;
            self.last_video_sh = Some(retimed.clone());
            self.packets.push_back(retimed);
        }
        self.av_start_time = self.av_end_time;
    }

    /// Bulk drain up to `max` packets into `out`; leaves `av_start` at the
    /// last-dumped timestamp.
    pub fn dump_packets(&mut self, max: usize, out: &mut Vec<MediaPacket>) -> usize {
        let mut count = 0;
        while count < max {
            match self.packets.pop_front() {
                Some(pkt) => {
                    self.av_start_time = pkt.timestamp;
                    out.push(pkt);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Drain every packet currently queued.
    pub fn dump_all(&mut self, out: &mut Vec<MediaPacket>) -> usize {
        self.dump_packets(self.packets.len(), out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn audio_sh(ts: i64) -> MediaPacket {
        let mut p = MediaPacket::audio(Bytes::from_static(b"ash"), ts, 1);
        p.is_sequence_header = true;
        p
    }

    fn video_sh(ts: i64) -> MediaPacket {
        let mut p =
            MediaPacket::video(Bytes::from_static(b"vsh"), ts, 1, crate::packet::VideoCodec::H264);
        p.is_sequence_header = true;
        p
    }

    fn audio(ts: i64) -> MediaPacket {
        MediaPacket::audio(Bytes::from_static(b"a"), ts, 1)
    }

    #[test]
    fn shrink_preserves_sequence_headers_e3_scenario() {
        // spec §8 E3: max_queue_size = 1000ms. Every enqueue after the
        // headers lands more than 1000ms past the previous shrink point, so
        // each one triggers its own shrink and the queue never accumulates
        // more than the two sequence headers.
        let mut q = MessageQueue::new(1000);
        q.enqueue(audio_sh(0));
        q.enqueue(video_sh(0));
        for ts in [1100, 2200, 3300, 4400, 5000] {
            q.enqueue(audio(ts));
        }

        assert_eq!(q.len(), 2);
        let mut out = Vec::new();
        q.dump_all(&mut out);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|p| p.timestamp == 5000));
        assert!(out.iter().any(|p| p.is_audio()));
        assert!(out.iter().any(|p| p.is_video()));
        assert_eq!(q.av_start_time(), q.av_end_time());
    }

    #[test]
    fn shrink_bounds_span_even_under_dense_traffic() {
        // General form of the invariant: regardless of packet cadence the
        // queue never holds more than max_queue_size of span, because a
        // shrink fires as soon as the threshold is crossed.
        let mut q = MessageQueue::new(1000);
        q.enqueue(audio_sh(0));
        q.enqueue(video_sh(0));
        for i in 0..50 {
            q.enqueue(audio(i * 100));
        }
        q.enqueue(audio(5000));

        assert!(q.duration() <= 1000);
        let mut out = Vec::new();
        q.dump_all(&mut out);
        assert!(out.iter().any(|p| p.is_sequence_header && p.is_audio()));
        assert!(out.iter().any(|p| p.is_sequence_header && p.is_video()));
    }

    #[test]
    fn overflow_flag_set_on_shrink() {
        let mut q = MessageQueue::new(100);
        assert!(!q.enqueue(audio(0)));
        assert!(q.enqueue(audio(500)));
    }

    #[test]
    fn metadata_at_timestamp_zero_does_not_advance_av_end_after_start() {
        let mut q = MessageQueue::new(10_000);
        q.enqueue(audio(100));
        let meta = MediaPacket::script(Bytes::from_static(b"m"), 0, 1);
        q.enqueue(meta);
        assert_eq!(q.av_end_time(), 100);
    }

    #[test]
    fn unbounded_queue_never_shrinks() {
        let mut q = MessageQueue::new(0);
        for i in 0..1000 {
            assert!(!q.enqueue(audio(i * 1000)));
        }
        assert_eq!(q.len(), 1000);
    }
}
