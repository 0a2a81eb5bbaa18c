//! NALU filtering for the RTMP/SRT → RTC direction (spec §4.12 "NALU
//! filter").

/// H.264 NAL unit types relevant to filtering decisions.
const NALU_TYPE_SEI: u8 = 6;
const NALU_TYPE_SPS: u8 = 7;
const NALU_TYPE_PPS: u8 = 8;
const NALU_TYPE_IDR: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    P,
    B,
    I,
    Unknown,
}

/// Decisions carried alongside a parsed video packet from the format
/// parser (an external collaborator per spec §6) — this module only
/// consumes the already-classified NALU.
#[derive(Debug, Clone)]
pub struct ParsedNalu {
    pub nalu_type: u8,
    pub slice_kind: SliceKind,
    pub payload_len: usize,
}

impl ParsedNalu {
    pub fn is_sei(&self) -> bool {
        self.nalu_type == NALU_TYPE_SEI
    }

    pub fn is_sps_pps(&self) -> bool {
        self.nalu_type == NALU_TYPE_SPS || self.nalu_type == NALU_TYPE_PPS
    }

    pub fn is_idr(&self) -> bool {
        self.nalu_type == NALU_TYPE_IDR
    }
}

/// Filters NALUs for the RTP builder: drops SEI unless configured to keep
/// them, drops B-slices unless configured to keep them, always preserves
/// SPS/PPS/VPS and IDR. HEVC never applies SEI filtering (spec §4.12).
pub struct NaluFilter {
    pub keep_avc_nalu_sei: bool,
    pub keep_bframe: bool,
    pub is_hevc: bool,
}

impl NaluFilter {
    pub fn should_keep(&self, nalu: &ParsedNalu) -> bool {
        if nalu.is_sps_pps() || nalu.is_idr() {
            return true;
        }
        if !self.is_hevc && !self.keep_avc_nalu_sei && nalu.is_sei() {
            return false;
        }
        if !self.keep_bframe && nalu.slice_kind == SliceKind::B {
            return false;
        }
        true
    }
}

/// Derives the `has_idr` output flag from the parsed video packet (spec
/// §4.12: "set from the parsed video packet's `has_idr` property").
pub fn has_idr(nalus: &[ParsedNalu]) -> bool {
    nalus.iter().any(|n| n.is_idr())
}
