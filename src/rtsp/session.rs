//! RTSP per-connection session state machine (C15, spec §4.14): OPTIONS,
//! DESCRIBE, SETUP, PLAY, TEARDOWN.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::hooks::{HookClient, HookEvent};
use crate::registry::Registry;
use crate::rtsp::play_stream::{PlayStream, SendTrack};
use crate::rtsp::sdp::{build_sdp, TrackDescription};
use crate::source::StreamRequest;

/// One track announced at DESCRIBE time, keyed by SSRC and matched against
/// a RTSP `trackID` numeric suffix at SETUP (spec §4.14).
#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub ssrc: u32,
    pub description: TrackDescription,
}

/// UDP or TCP-interleaved destination for one track's outbound RTP,
/// created at SETUP.
pub enum NetworkWriter {
    Udp { remote_addr: String },
    Interleaved { channel: u8 },
}

pub struct RtspSession {
    pub id: Uuid,
    request: Option<StreamRequest>,
    tracks_by_ssrc: HashMap<u32, Track>,
    networks: HashMap<u32, NetworkWriter>,
    play_stream: Option<PlayStream>,
    last_alive_ms: i64,
    hook_client: HookClient,
    on_play_urls: Vec<String>,
}

impl RtspSession {
    pub fn new() -> Self {
        Self::with_hooks(HookClient::new(), Vec::new())
    }

    /// Builds a session that fires `on_play` against `on_play_urls` through
    /// `hook_client` once PLAY starts (spec §4.14).
    pub fn with_hooks(hook_client: HookClient, on_play_urls: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request: None,
            tracks_by_ssrc: HashMap::new(),
            networks: HashMap::new(),
            play_stream: None,
            last_alive_ms: 0,
            hook_client,
            on_play_urls,
        }
    }

    pub fn touch(&mut self, now_ms: i64) {
        self.last_alive_ms = now_ms;
    }

    pub fn is_timed_out(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms - self.last_alive_ms > timeout_ms
    }

    /// OPTIONS: list of supported methods.
    pub fn options(&self) -> &'static [&'static str] {
        &["OPTIONS", "DESCRIBE", "SETUP", "PLAY", "TEARDOWN"]
    }

    /// DESCRIBE: fetch-or-create the stream, build SDP from its track
    /// descriptions, remember tracks by SSRC.
    pub fn describe(
        &mut self,
        registry: &Registry,
        request: StreamRequest,
        tracks: Vec<Track>,
    ) -> String {
        let _source = registry.fetch_or_create(request.clone());
        self.request = Some(request.clone());
        self.tracks_by_ssrc = tracks.iter().map(|t| (t.ssrc, t.clone())).collect();
        let descriptions: Vec<TrackDescription> = tracks.iter().map(|t| t.description.clone()).collect();
        build_sdp(&request.stream, &descriptions)
    }

    /// SETUP: resolve `track_id` (the numeric `trackID` suffix, as a
    /// string, against `Track::id`) to its SSRC, install the network
    /// writer.
    pub fn setup(&mut self, track_id: &str, writer: NetworkWriter) -> Option<u32> {
        let ssrc = self
            .tracks_by_ssrc
            .values()
            .find(|t| t.id == track_id)
            .map(|t| t.ssrc)?;
        self.networks.insert(ssrc, writer);
        Some(ssrc)
    }

    /// PLAY: create and start the play stream, wiring every negotiated
    /// track as a send destination, then fire `on_play` (spec §4.14).
    pub async fn play(&mut self, send_tracks: Vec<(u32, Arc<dyn SendTrack>)>) -> bool {
        if send_tracks.is_empty() {
            return false;
        }
        let mut stream = PlayStream::new();
        let (audio, video): (Vec<_>, Vec<_>) = send_tracks
            .into_iter()
            .partition(|(ssrc, _)| self.is_audio_ssrc(*ssrc));
        stream.initialize(audio, video);
        stream.start();
        self.play_stream = Some(stream);
        if let Some(request) = &self.request {
            self.hook_client
                .fire(
                    &self.on_play_urls,
                    HookEvent::OnPlay,
                    &request.vhost,
                    &request.app,
                    &request.stream,
                    None,
                    Some(&self.id.to_string()),
                )
                .await;
        }
        true
    }

    fn is_audio_ssrc(&self, ssrc: u32) -> bool {
        matches!(
            self.tracks_by_ssrc.get(&ssrc).map(|t| &t.description),
            Some(TrackDescription::Aac { .. })
        )
    }

    /// TEARDOWN: stop and destroy the play stream.
    pub fn teardown(&mut self) {
        self.play_stream = None;
        self.networks.clear();
    }

    pub fn play_stream(&self) -> Option<&PlayStream> {
        self.play_stream.as_ref()
    }

    pub fn play_stream_mut(&mut self) -> Option<&mut PlayStream> {
        self.play_stream.as_mut()
    }
}

impl Default for RtspSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::rtsp::play_stream::SendTrack;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> StreamRequest {
        StreamRequest {
            vhost: "__defaultVhost__".to_string(),
            app: "live".to_string(),
            stream: "cam1".to_string(),
            params: StdHashMap::new(),
        }
    }

    fn tracks() -> Vec<Track> {
        vec![
            Track {
                id: "0".to_string(),
                ssrc: 100,
                description: TrackDescription::Aac {
                    payload_type: 97,
                    sample_rate: 48_000,
                    channels: 2,
                    config_hex: "1190".to_string(),
                },
            },
            Track {
                id: "1".to_string(),
                ssrc: 200,
                description: TrackDescription::H264 { payload_type: 96 },
            },
        ]
    }

    #[test]
    fn describe_returns_sdp_with_both_tracks() {
        let registry = Registry::new(ServerConfig::default());
        let mut session = RtspSession::new();
        let sdp = session.describe(&registry, request(), tracks());
        assert!(sdp.contains("m=audio "));
        assert!(sdp.contains("m=video "));
    }

    #[test]
    fn setup_resolves_track_id_to_ssrc() {
        let registry = Registry::new(ServerConfig::default());
        let mut session = RtspSession::new();
        session.describe(&registry, request(), tracks());
        let ssrc = session.setup("1", NetworkWriter::Udp { remote_addr: "1.2.3.4:5000".to_string() });
        assert_eq!(ssrc, Some(200));
    }

    #[test]
    fn setup_unknown_track_id_returns_none() {
        let registry = Registry::new(ServerConfig::default());
        let mut session = RtspSession::new();
        session.describe(&registry, request(), tracks());
        assert!(session.setup("9", NetworkWriter::Udp { remote_addr: "x".to_string() }).is_none());
    }

    struct CountingTrack {
        count: AtomicUsize,
    }

    impl SendTrack for CountingTrack {
        fn on_rtp(&self, _packet: &crate::bridge::RtpPacket) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn play_requires_at_least_one_track() {
        let mut session = RtspSession::new();
        assert!(!session.play(vec![]).await);
    }

    #[tokio::test]
    async fn play_then_teardown_clears_stream() {
        let registry = Registry::new(ServerConfig::default());
        let mut session = RtspSession::new();
        session.describe(&registry, request(), tracks());
        let track: Arc<dyn SendTrack> = Arc::new(CountingTrack {
            count: AtomicUsize::new(0),
        });
        assert!(session.play(vec![(200, track)]).await);
        assert!(session.play_stream().is_some());
        session.teardown();
        assert!(session.play_stream().is_none());
    }

    #[tokio::test]
    async fn play_fires_on_play_hook_with_no_urls_without_panicking() {
        let registry = Registry::new(ServerConfig::default());
        let mut session =
            RtspSession::with_hooks(HookClient::new(), vec!["http://127.0.0.1:0/on_play".to_string()]);
        session.describe(&registry, request(), tracks());
        let track: Arc<dyn SendTrack> = Arc::new(CountingTrack {
            count: AtomicUsize::new(0),
        });
        assert!(session.play(vec![(200, track)]).await);
    }

    #[test]
    fn idle_timeout_detection() {
        let mut session = RtspSession::new();
        session.touch(1_000);
        assert!(!session.is_timed_out(1_500, 1_000));
        assert!(session.is_timed_out(3_000, 1_000));
    }

    #[test]
    fn options_lists_supported_methods() {
        let session = RtspSession::new();
        assert!(session.options().contains(&"PLAY"));
        assert!(session.options().contains(&"TEARDOWN"));
    }
}
