//! RTSP play stream (spec §4.14 "Play stream"): fans outbound RTP to
//! per-SSRC send tracks.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bridge::RtpPacket;

/// A send track: receives outbound RTP destined for one network writer.
pub trait SendTrack: Send + Sync {
    fn on_rtp(&self, packet: &RtpPacket);
}

/// 3-slot direct cache of recently used SSRC → track, falling back to the
/// full maps on miss (spec §4.14).
#[derive(Default)]
struct RecentTrackCache {
    slots: [Option<(u32, Arc<dyn SendTrack>)>; 3],
    next: usize,
}

impl RecentTrackCache {
    fn get(&self, ssrc: u32) -> Option<Arc<dyn SendTrack>> {
        self.slots
            .iter()
            .flatten()
            .find(|(s, _)| *s == ssrc)
            .map(|(_, t)| t.clone())
    }

    fn put(&mut self, ssrc: u32, track: Arc<dyn SendTrack>) {
        if let Some(slot) = self.slots.iter_mut().flatten().find(|(s, _)| *s == ssrc) {
            slot.1 = track;
            return;
        }
        self.slots[self.next] = Some((ssrc, track));
        self.next = (self.next + 1) % self.slots.len();
    }
}

pub struct PlayStream {
    audio_tracks: HashMap<u32, Arc<dyn SendTrack>>,
    video_tracks: HashMap<u32, Arc<dyn SendTrack>>,
    cache: RecentTrackCache,
    started: bool,
}

impl PlayStream {
    pub fn new() -> Self {
        Self {
            audio_tracks: HashMap::new(),
            video_tracks: HashMap::new(),
            cache: RecentTrackCache::default(),
            started: false,
        }
    }

    pub fn initialize(&mut self, audio: Vec<(u32, Arc<dyn SendTrack>)>, video: Vec<(u32, Arc<dyn SendTrack>)>) {
        self.audio_tracks = audio.into_iter().collect();
        self.video_tracks = video.into_iter().collect();
    }

    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Swaps SSRCs and payload-type numbers on the existing track objects
    /// without replacing them (spec §4.14 `on_stream_change`).
    pub fn on_stream_change(&mut self, new_audio_ssrc: Option<(u32, u32)>, new_video_ssrc: Option<(u32, u32)>) {
        if let Some((old, new)) = new_audio_ssrc {
            if let Some(track) = self.audio_tracks.remove(&old) {
                self.audio_tracks.insert(new, track);
            }
        }
        if let Some((old, new)) = new_video_ssrc {
            if let Some(track) = self.video_tracks.remove(&old) {
                self.video_tracks.insert(new, track);
            }
        }
    }

    /// Looks up the target track (cache → audio map → video map) and
    /// forwards; unknown SSRCs are dropped silently (spec §4.14).
    pub fn send_packet(&mut self, packet: RtpPacket) {
        if let Some(track) = self.cache.get(packet.ssrc) {
            track.on_rtp(&packet);
            return;
        }
        let track = self
            .audio_tracks
            .get(&packet.ssrc)
            .or_else(|| self.video_tracks.get(&packet.ssrc))
            .cloned();
        if let Some(track) = track {
            self.cache.put(packet.ssrc, track.clone());
            track.on_rtp(&packet);
        }
    }
}

impl Default for PlayStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTrack {
        count: AtomicUsize,
    }

    impl SendTrack for CountingTrack {
        fn on_rtp(&self, _packet: &RtpPacket) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pkt(ssrc: u32) -> RtpPacket {
        RtpPacket {
            ssrc,
            sequence: 0,
            payload: Bytes::from_static(b"x"),
            nalus: Vec::new(),
        }
    }

    #[test]
    fn send_packet_routes_to_matching_track() {
        let audio = Arc::new(CountingTrack {
            count: AtomicUsize::new(0),
        });
        let mut stream = PlayStream::new();
        stream.initialize(vec![(10, audio.clone())], vec![]);
        stream.send_packet(pkt(10));
        assert_eq!(audio.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_ssrc_is_dropped_silently() {
        let mut stream = PlayStream::new();
        stream.send_packet(pkt(999));
    }

    #[test]
    fn stream_change_swaps_ssrc_keeping_track_object() {
        let audio = Arc::new(CountingTrack {
            count: AtomicUsize::new(0),
        });
        let mut stream = PlayStream::new();
        stream.initialize(vec![(10, audio.clone())], vec![]);
        stream.on_stream_change(Some((10, 20)), None);
        stream.send_packet(pkt(20));
        assert_eq!(audio.count.load(Ordering::SeqCst), 1);
        stream.send_packet(pkt(10));
        assert_eq!(audio.count.load(Ordering::SeqCst), 1, "old ssrc no longer routes");
    }
}
