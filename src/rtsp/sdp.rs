//! SDP generation for RTSP DESCRIBE responses (spec §4.14, E6).

/// One track's codec description, independent of transport details.
#[derive(Debug, Clone)]
pub enum TrackDescription {
    Aac {
        payload_type: u8,
        sample_rate: u32,
        channels: u8,
        /// Hex-encoded AudioSpecificConfig, e.g. `"1190"`.
        config_hex: String,
    },
    H264 {
        payload_type: u8,
    },
    Hevc {
        payload_type: u8,
    },
}

/// Builds an `application/sdp` body describing `tracks` in order; track
/// index in the slice is the `trackID` used in SETUP/PLAY (spec §4.14 E6).
pub fn build_sdp(session_name: &str, tracks: &[TrackDescription]) -> String {
    let mut sdp = String::new();
    sdp.push_str("v=0\r\n");
    sdp.push_str("o=- 0 0 IN IP4 0.0.0.0\r\n");
    sdp.push_str(&format!("s={session_name}\r\n"));
    sdp.push_str("t=0 0\r\n");
    sdp.push_str("a=recvonly\r\n");

    for (id, track) in tracks.iter().enumerate() {
        match track {
            TrackDescription::Aac {
                payload_type,
                sample_rate,
                channels,
                config_hex,
            } => {
                sdp.push_str(&format!("m=audio 0 RTP/AVP {payload_type}\r\n"));
                sdp.push_str(&format!(
                    "a=rtpmap:{payload_type} MPEG4-GENERIC/{sample_rate}/{channels}\r\n"
                ));
                sdp.push_str(&format!(
                    "a=fmtp:{payload_type} streamtype=5;profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3;config={config_hex}\r\n"
                ));
                sdp.push_str(&format!("a=control:trackID={id}\r\n"));
            }
            TrackDescription::H264 { payload_type } => {
                sdp.push_str(&format!("m=video 0 RTP/AVP {payload_type}\r\n"));
                sdp.push_str(&format!("a=rtpmap:{payload_type} H264/90000\r\n"));
                sdp.push_str(&format!("a=control:trackID={id}\r\n"));
            }
            TrackDescription::Hevc { payload_type } => {
                sdp.push_str(&format!("m=video 0 RTP/AVP {payload_type}\r\n"));
                sdp.push_str(&format!("a=rtpmap:{payload_type} H265/90000\r\n"));
                sdp.push_str(&format!("a=control:trackID={id}\r\n"));
            }
        }
    }
    sdp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn e6_describe_sdp_scenario() {
        let tracks = vec![
            TrackDescription::Aac {
                payload_type: 97,
                sample_rate: 48_000,
                channels: 2,
                config_hex: "1190".to_string(),
            },
            TrackDescription::H264 { payload_type: 96 },
        ];
        let sdp = build_sdp("live", &tracks);

        assert!(sdp.contains("m=audio "));
        assert!(sdp.contains("a=rtpmap:97 MPEG4-GENERIC/48000/2\r\n"));
        assert!(sdp.contains("config=1190"));
        assert!(sdp.contains("streamtype=5"));
        assert!(sdp.contains("mode=AAC-hbr"));
        assert!(sdp.contains("m=video "));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains("a=control:trackID=0\r\n"));
        assert!(sdp.contains("a=control:trackID=1\r\n"));
        assert!(sdp.contains("a=recvonly\r\n"));
    }
}
