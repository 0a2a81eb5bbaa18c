//! MP4 DVR segmenter (spec §4.15): the same `Segmenter` contract as the FLV
//! writer, backed by the `mp4` crate's progressive box writer instead of
//! hand-rolled tag framing.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::PathBuf;

use mp4::{AacConfig, AvcConfig, MediaConfig, Mp4Config, Mp4Sample, Mp4Writer, TrackConfig, TrackType};

use crate::dvr::plan::Segmenter;
use crate::error::{DvrError, DvrResult};
use crate::packet::{MediaPacket, VideoCodec};
use crate::source::StreamRequest;

const TIMESCALE: u32 = 1000;

fn expand_path(template: &str, request: &StreamRequest, timestamp_ms: i64) -> String {
    template
        .replace("[vhost]", &request.vhost)
        .replace("[app]", &request.app)
        .replace("[stream]", &request.stream)
        .replace("[timestamp]", &timestamp_ms.to_string())
}

struct OpenFragment<W: Write + Seek> {
    writer: Mp4Writer<W>,
    temp_path: PathBuf,
    final_path: PathBuf,
    audio_track_id: Option<u32>,
    video_track_id: Option<u32>,
    track_count: u32,
    last_audio_ts: i64,
    last_video_ts: i64,
}

/// Writes fragments using cached AVC/AAC sequence headers to size the moov
/// tracks; `write_metadata` is a no-op passthrough since track geometry is
/// derived from the sequence headers themselves, not the onMetaData packet
/// (an AMF0-shaped external collaborator format, out of scope per spec §1).
pub struct Mp4Segmenter {
    path_template: String,
    open: Option<OpenFragment<BufWriter<File>>>,
    pending_sps: Option<Vec<u8>>,
    pending_pps: Option<Vec<u8>>,
    aac_header_seen: bool,
}

impl Mp4Segmenter {
    pub fn new(path_template: String) -> Self {
        Self {
            path_template,
            open: None,
            pending_sps: None,
            pending_pps: None,
            aac_header_seen: false,
        }
    }

    fn ensure_video_track(&mut self, codec: VideoCodec) -> DvrResult<u32> {
        if codec != VideoCodec::H264 {
            return Err(DvrError::UnsupportedCodec(format!("{codec:?}")));
        }
        let (sps, pps) = match (&self.pending_sps, &self.pending_pps) {
            (Some(sps), Some(pps)) => (sps.clone(), pps.clone()),
            _ => return Err(DvrError::UnsupportedCodec("video track opened before SPS/PPS arrived".to_string())),
        };
        let frag = self.open.as_mut().expect("fragment open");
        if let Some(id) = frag.video_track_id {
            return Ok(id);
        }
        let config = TrackConfig {
            track_type: TrackType::Video,
            timescale: TIMESCALE,
            language: "und".to_string(),
            media_conf: MediaConfig::AvcConfig(AvcConfig {
                width: 0,
                height: 0,
                seq_param_set: sps,
                pic_param_set: pps,
            }),
        };
        frag.writer
            .add_track(&config)
            .map_err(|e| DvrError::Mp4(e.to_string()))?;
        frag.track_count += 1;
        let id = frag.track_count;
        frag.video_track_id = Some(id);
        Ok(id)
    }

    /// The `esds` box the `mp4` crate writes is built from these discrete
    /// fields, not from a raw AudioSpecificConfig blob; decoding the 2-byte
    /// AAC ASC into them is AMF/codec-parser territory out of scope per
    /// spec §1, so AAC-LC/48kHz/stereo is assumed — the common case for the
    /// RTC bridge's bootstrap header (E8).
    fn ensure_audio_track(&mut self) -> DvrResult<u32> {
        if !self.aac_header_seen {
            return Err(DvrError::UnsupportedCodec("audio track opened before AAC config arrived".to_string()));
        }
        let frag = self.open.as_mut().expect("fragment open");
        if let Some(id) = frag.audio_track_id {
            return Ok(id);
        }
        let config = TrackConfig {
            track_type: TrackType::Audio,
            timescale: TIMESCALE,
            language: "und".to_string(),
            media_conf: MediaConfig::AacConfig(AacConfig {
                bitrate: 0,
                profile: mp4::AudioObjectType::AacLowComplexity,
                freq_index: mp4::SampleFreqIndex::Freq48000,
                chan_conf: mp4::ChannelConfig::Stereo,
            }),
        };
        frag.writer
            .add_track(&config)
            .map_err(|e| DvrError::Mp4(e.to_string()))?;
        frag.track_count += 1;
        let id = frag.track_count;
        frag.audio_track_id = Some(id);
        Ok(id)
    }
}

impl Segmenter for Mp4Segmenter {
    fn open(&mut self, request: &StreamRequest) -> DvrResult<()> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let final_path = PathBuf::from(expand_path(&self.path_template, request, now_ms));
        let temp_path = final_path.with_extension("tmp");
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).map_err(|e| DvrError::OpenFragment {
                path: temp_path.display().to_string(),
                source: e,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| DvrError::OpenFragment {
                path: temp_path.display().to_string(),
                source: e,
            })?;
        let writer = Mp4Writer::write_start(
            BufWriter::new(file),
            &Mp4Config {
                major_brand: str::parse("isom").unwrap(),
                minor_version: 512,
                compatible_brands: vec![str::parse("isom").unwrap(), str::parse("mp42").unwrap()],
                timescale: TIMESCALE,
            },
        )
        .map_err(|e| DvrError::Mp4(e.to_string()))?;
        self.open = Some(OpenFragment {
            writer,
            temp_path,
            final_path,
            audio_track_id: None,
            video_track_id: None,
            track_count: 0,
            last_audio_ts: 0,
            last_video_ts: 0,
        });
        Ok(())
    }

    fn write_metadata(&mut self, _pkt: &MediaPacket) -> DvrResult<()> {
        Ok(())
    }

    fn write_audio(&mut self, pkt: &MediaPacket) -> DvrResult<()> {
        if pkt.is_sequence_header {
            self.aac_header_seen = true;
            return Ok(());
        }
        let track_id = self.ensure_audio_track()?;
        let frag = self.open.as_mut().expect("fragment open");
        let duration = (pkt.timestamp - frag.last_audio_ts).max(0) as u32;
        frag.last_audio_ts = pkt.timestamp;
        frag.writer
            .write_sample(
                track_id,
                &Mp4Sample {
                    start_time: pkt.timestamp.max(0) as u64,
                    duration,
                    rendering_offset: 0,
                    is_sync: true,
                    bytes: pkt.payload.clone(),
                },
            )
            .map_err(|e| DvrError::Mp4(e.to_string()))
    }

    fn write_video(&mut self, pkt: &MediaPacket) -> DvrResult<()> {
        if pkt.is_sequence_header {
            if let Some((sps, pps)) = split_avcc_sequence_header(&pkt.payload) {
                self.pending_sps = Some(sps);
                self.pending_pps = Some(pps);
            }
            return Ok(());
        }
        let codec = pkt.video_codec.unwrap_or(VideoCodec::H264);
        let track_id = self.ensure_video_track(codec)?;
        let frag = self.open.as_mut().expect("fragment open");
        let duration = (pkt.timestamp - frag.last_video_ts).max(0) as u32;
        frag.last_video_ts = pkt.timestamp;
        frag.writer
            .write_sample(
                track_id,
                &Mp4Sample {
                    start_time: pkt.timestamp.max(0) as u64,
                    duration,
                    rendering_offset: 0,
                    is_sync: pkt.is_keyframe(),
                    bytes: pkt.payload.clone(),
                },
            )
            .map_err(|e| DvrError::Mp4(e.to_string()))
    }

    fn close(&mut self) -> DvrResult<Option<String>> {
        let Some(mut frag) = self.open.take() else {
            return Ok(None);
        };
        frag.writer.write_end().map_err(|e| DvrError::Mp4(e.to_string()))?;
        fs::rename(&frag.temp_path, &frag.final_path)
            .map_err(|e| DvrError::RenameFragment(e.to_string()))?;
        Ok(Some(frag.final_path.display().to_string()))
    }

    fn current_path(&self) -> Option<String> {
        self.open.as_ref().map(|f| f.temp_path.display().to_string())
    }
}

/// Splits an AVCC-wrapped sequence header (VPS+SPS+PPS concatenation built
/// by the RTC frame builder) back into its SPS/PPS parts. Each part is
/// length-prefixed by a 4-byte big-endian size, matching `avcc_wrap`.
fn split_avcc_sequence_header(payload: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut offset = 0;
    let mut sps = None;
    let mut pps = None;
    while offset + 4 <= payload.len() {
        let len = u32::from_be_bytes(payload[offset..offset + 4].try_into().ok()?) as usize;
        offset += 4;
        if offset + len > payload.len() {
            break;
        }
        let part = &payload[offset..offset + len];
        offset += len;
        if part.is_empty() {
            continue;
        }
        match part[0] & 0x1F {
            7 => sps = Some(part.to_vec()),
            8 => pps = Some(part.to_vec()),
            _ => {}
        }
    }
    match (sps, pps) {
        (Some(sps), Some(pps)) => Some((sps, pps)),
        _ => None,
    }
}
