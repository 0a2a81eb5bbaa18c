//! Timestamp-ordered audio/video reordering for publishers whose encoder
//! interleaves frames out of order (C5, spec §4.5).

use std::collections::BTreeMap;

use crate::packet::MediaPacket;

/// Packets below this count-of-one-kind-with-zero-of-the-other threshold are
/// held back, waiting for the other kind to catch up (spec §3).
const SOLO_KIND_THRESHOLD: usize = 10;

/// Bound on buffered span (spec §9 open question): continuous single-kind
/// input would otherwise flood this queue forever since the "mix OK"
/// predicate never fires without the other kind arriving.
#[derive(Debug)]
pub struct MixQueue {
    entries: BTreeMap<i64, Vec<MediaPacket>>,
    nb_videos: usize,
    nb_audios: usize,
    max_size_ms: i64,
}

impl MixQueue {
    pub fn new(max_size_ms: i64) -> Self {
        Self {
            entries: BTreeMap::new(),
            nb_videos: 0,
            nb_audios: 0,
            max_size_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, pkt: MediaPacket) {
        if pkt.is_video() {
            self.nb_videos += 1;
        } else if pkt.is_audio() {
            self.nb_audios += 1;
        }
        self.entries.entry(pkt.timestamp).or_default().push(pkt);
    }

    fn span(&self) -> i64 {
        match (self.entries.keys().next(), self.entries.keys().next_back()) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0,
        }
    }

    fn mix_ok(&self) -> bool {
        if self.nb_videos >= SOLO_KIND_THRESHOLD && self.nb_audios == 0 {
            return true;
        }
        if self.nb_audios >= SOLO_KIND_THRESHOLD && self.nb_videos == 0 {
            return true;
        }
        if self.nb_videos >= 1 && self.nb_audios >= 1 {
            return true;
        }
        self.max_size_ms > 0 && self.span() > self.max_size_ms
    }

    /// Pop the earliest packet once the mix-OK predicate holds, else `None`.
    pub fn pop(&mut self) -> Option<MediaPacket> {
        if !self.mix_ok() {
            return None;
        }
        let ts = *self.entries.keys().next()?;
        let bucket = self.entries.get_mut(&ts).unwrap();
        let pkt = bucket.remove(0);
        if bucket.is_empty() {
            self.entries.remove(&ts);
        }
        if pkt.is_video() {
            self.nb_videos -= 1;
        } else if pkt.is_audio() {
            self.nb_audios -= 1;
        }
        Some(pkt)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.nb_videos = 0;
        self.nb_audios = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::VideoCodec;
    use bytes::Bytes;

    fn video(ts: i64) -> MediaPacket {
        MediaPacket::video(Bytes::from_static(b"v"), ts, 1, VideoCodec::H264)
    }

    fn audio(ts: i64) -> MediaPacket {
        MediaPacket::audio(Bytes::from_static(b"a"), ts, 1)
    }

    #[test]
    fn one_of_each_emits_immediately() {
        let mut q = MixQueue::new(0);
        q.push(video(100));
        assert!(q.pop().is_none());
        q.push(audio(90));
        assert_eq!(q.pop().unwrap().timestamp, 90);
    }

    #[test]
    fn ten_pure_videos_emit_without_audio() {
        let mut q = MixQueue::new(0);
        for i in 0..9 {
            q.push(video(i));
            assert!(q.pop().is_none());
        }
        q.push(video(9));
        assert_eq!(q.pop().unwrap().timestamp, 0);
    }

    #[test]
    fn emits_earliest_timestamp_first() {
        let mut q = MixQueue::new(0);
        q.push(video(50));
        q.push(audio(10));
        q.push(video(30));
        assert_eq!(q.pop().unwrap().timestamp, 10);
        assert_eq!(q.pop().unwrap().timestamp, 30);
    }

    #[test]
    fn span_bound_forces_emission_under_sustained_single_kind() {
        let mut q = MixQueue::new(500);
        for i in 0..5 {
            q.push(video(i * 100));
            if i < 4 {
                assert!(q.pop().is_none());
            }
        }
        // span is now 400..800 once packet 5 pushed below; force it over 500
        q.push(video(600));
        assert!(q.pop().is_some());
    }

    #[test]
    fn reset_clears_counters_and_entries() {
        let mut q = MixQueue::new(0);
        q.push(video(0));
        q.push(audio(0));
        q.reset();
        assert!(q.is_empty());
        assert!(q.pop().is_none());
    }
}
