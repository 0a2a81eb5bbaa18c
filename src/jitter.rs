//! Per-consumer timestamp jitter correction (C1, spec §4.1).
//!
//! Decoders on the consumer side require monotonically non-decreasing DTS;
//! upstream encoders occasionally emit small negative deltas or huge steps
//! which confuse players. The 250ms threshold is the empirical discontinuity
//! bound; the 10ms substitution keeps decoder pacing sane.

use crate::config::JitterAlgorithm;
use crate::packet::MediaPacket;

/// Boundary beyond which a timestamp delta is treated as a discontinuity
/// rather than normal jitter (spec §3, §8 boundary behaviour: exactly ±250ms
/// is still valid — the check is a strict inequality).
const DISCONTINUITY_THRESHOLD_MS: i64 = 250;
/// Delta substituted for a detected discontinuity.
const DISCONTINUITY_SUBSTITUTE_MS: i64 = 10;

/// Per-consumer jitter correction state.
#[derive(Debug, Clone, Copy)]
pub struct JitterCorrector {
    /// `-1` until the first packet has been corrected (FULL mode state).
    last_pkt_correct_time: i64,
    /// Last *input* timestamp seen (FULL mode) or the first input timestamp
    /// (ZERO mode uses this as the subtracted baseline).
    last_pkt_time: i64,
    first_seen: bool,
}

impl Default for JitterCorrector {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterCorrector {
    pub fn new() -> Self {
        Self {
            last_pkt_correct_time: -1,
            last_pkt_time: -1,
            first_seen: false,
        }
    }

    /// Mutates `pkt.timestamp` per the selected algorithm. Script (metadata)
    /// packets are passed through untouched in OFF/ZERO, but forced to 0 in
    /// FULL — an external caller asserting "script timestamp equals current
    /// GOP time" must override the timestamp itself after enqueue (spec §9
    /// open question).
    pub fn correct(&mut self, pkt: &mut MediaPacket, algo: JitterAlgorithm) {
        if pkt.is_script() {
            if algo == JitterAlgorithm::Full {
                pkt.timestamp = 0;
            }
            return;
        }
        match algo {
            JitterAlgorithm::Off => {}
            JitterAlgorithm::Zero => self.correct_zero(pkt),
            JitterAlgorithm::Full => self.correct_full(pkt),
        }
    }

    fn correct_zero(&mut self, pkt: &mut MediaPacket) {
        if !self.first_seen {
            self.first_seen = true;
            self.last_pkt_time = pkt.timestamp;
        }
        pkt.timestamp -= self.last_pkt_time;
    }

    fn correct_full(&mut self, pkt: &mut MediaPacket) {
        let input_ts = pkt.timestamp;
        if self.last_pkt_correct_time < 0 {
            // First packet: establish baseline, output 0.
            self.last_pkt_correct_time = 0;
            self.last_pkt_time = input_ts;
            pkt.timestamp = 0;
            return;
        }

        let mut delta = input_ts - self.last_pkt_time;
        if delta.abs() > DISCONTINUITY_THRESHOLD_MS {
            delta = DISCONTINUITY_SUBSTITUTE_MS;
        }

        let out = (self.last_pkt_correct_time + delta).max(0);
        self.last_pkt_correct_time = out;
        self.last_pkt_time = input_ts;
        pkt.timestamp = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MessageType;
    use bytes::Bytes;

    fn pkt(ts: i64) -> MediaPacket {
        MediaPacket::new(MessageType::Video, Bytes::from_static(b"x"), ts, 1)
    }

    #[test]
    fn off_is_passthrough() {
        let mut jc = JitterCorrector::new();
        for ts in [100, 200, 50, -10] {
            let mut p = pkt(ts);
            jc.correct(&mut p, JitterAlgorithm::Off);
            assert_eq!(p.timestamp, ts);
        }
    }

    #[test]
    fn zero_subtracts_first_timestamp() {
        let mut jc = JitterCorrector::new();
        let mut first = pkt(1000);
        jc.correct(&mut first, JitterAlgorithm::Zero);
        assert_eq!(first.timestamp, 0);

        let mut second = pkt(1050);
        jc.correct(&mut second, JitterAlgorithm::Zero);
        assert_eq!(second.timestamp, 50);
    }

    #[test]
    fn full_monotonicity_e1_scenario() {
        // spec §8 E1: ts = [100, 90, 400, 410, -10] -> [0, 10, 20, 30, 40]
        let mut jc = JitterCorrector::new();
        let inputs = [100, 90, 400, 410, -10];
        let expected = [0, 10, 20, 30, 40];
        for (ts, exp) in inputs.iter().zip(expected.iter()) {
            let mut p = pkt(*ts);
            jc.correct(&mut p, JitterAlgorithm::Full);
            assert_eq!(p.timestamp, *exp, "input {ts}");
        }
    }

    #[test]
    fn full_boundary_exactly_250ms_is_not_a_discontinuity() {
        let mut jc = JitterCorrector::new();
        let mut first = pkt(0);
        jc.correct(&mut first, JitterAlgorithm::Full);
        assert_eq!(first.timestamp, 0);

        let mut second = pkt(250);
        jc.correct(&mut second, JitterAlgorithm::Full);
        // |delta| == 250, not > 250, so it's treated as valid.
        assert_eq!(second.timestamp, 250);
    }

    #[test]
    fn full_never_decreases() {
        let mut jc = JitterCorrector::new();
        let mut last = -1i64;
        for ts in [0, 33, 1000, 10, 5000, -5000, 5100] {
            let mut p = pkt(ts);
            jc.correct(&mut p, JitterAlgorithm::Full);
            assert!(p.timestamp >= last);
            last = p.timestamp;
        }
    }

    #[test]
    fn script_timestamp_untouched_off_and_zero() {
        for algo in [JitterAlgorithm::Off, JitterAlgorithm::Zero] {
            let mut jc = JitterCorrector::new();
            let mut script = MediaPacket::script(Bytes::from_static(b"meta"), 123, 1);
            jc.correct(&mut script, algo);
            assert_eq!(script.timestamp, 123);
        }
    }

    #[test]
    fn script_timestamp_forced_to_zero_in_full() {
        let mut jc = JitterCorrector::new();
        let mut script = MediaPacket::script(Bytes::from_static(b"meta"), 123, 1);
        jc.correct(&mut script, JitterAlgorithm::Full);
        assert_eq!(script.timestamp, 0);
    }
}
