//! RTP builder: fragments or aggregates filtered NALUs into RTP payloads
//! for the RTMP/SRT → RTC direction (spec §4.12).

use bytes::{BufMut, Bytes, BytesMut};

/// NALUs at or below this size travel as a single RTP packet; larger ones
/// are split into FU-A fragments (spec §4.12).
pub const RTP_MAX_PAYLOAD_SIZE: usize = 1200;

const FU_A_INDICATOR_TYPE: u8 = 28;
const STAP_A_TYPE: u8 = 24;

/// One outbound RTP payload (header construction is the transport
/// collaborator's job; this builder only produces payload bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPayload {
    pub data: Bytes,
    pub marker: bool,
}

/// Fragments `nalu` into FU-A packets if it exceeds the max payload size,
/// otherwise emits it unchanged as a single packet.
pub fn package_nalu(nalu: &[u8]) -> Vec<RtpPayload> {
    if nalu.is_empty() {
        return Vec::new();
    }
    if nalu.len() <= RTP_MAX_PAYLOAD_SIZE {
        return vec![RtpPayload {
            data: Bytes::copy_from_slice(nalu),
            marker: true,
        }];
    }
    fragment_fu_a(nalu)
}

fn fragment_fu_a(nalu: &[u8]) -> Vec<RtpPayload> {
    let header_byte = nalu[0];
    let nal_type = header_byte & 0x1F;
    let nri = header_byte & 0x60;
    let fu_indicator = FU_A_INDICATOR_TYPE | nri;
    let payload = &nalu[1..];

    let chunk_size = RTP_MAX_PAYLOAD_SIZE - 2;
    let chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
    let total = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut fu_header = nal_type;
            if i == 0 {
                fu_header |= 0x80; // start bit
            }
            let is_last = i == total - 1;
            if is_last {
                fu_header |= 0x40; // end bit
            }
            let mut buf = BytesMut::with_capacity(2 + chunk.len());
            buf.put_u8(fu_indicator);
            buf.put_u8(fu_header);
            buf.put_slice(chunk);
            RtpPayload {
                data: buf.freeze(),
                marker: is_last,
            }
        })
        .collect()
}

/// Aggregates small NALUs into a single STAP-A payload (merge-nalus mode).
/// Each NALU is prefixed by its 2-byte big-endian length.
pub fn aggregate_stap_a(nalus: &[&[u8]]) -> Option<RtpPayload> {
    if nalus.len() < 2 {
        return None;
    }
    let max_nri = nalus
        .iter()
        .map(|n| n.first().copied().unwrap_or(0) & 0x60)
        .max()
        .unwrap_or(0);
    let mut buf = BytesMut::new();
    buf.put_u8(STAP_A_TYPE | max_nri);
    for nalu in nalus {
        buf.put_u16(nalu.len() as u16);
        buf.put_slice(nalu);
    }
    Some(RtpPayload {
        data: buf.freeze(),
        marker: true,
    })
}
