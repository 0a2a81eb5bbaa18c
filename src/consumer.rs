//! Per-playback-session packet sink: jitter correction plus a bounded queue
//! (C6, spec §4.6).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::config::{JitterAlgorithm, VhostConfig};
use crate::jitter::JitterCorrector;
use crate::packet::MediaPacket;
use crate::queue::MessageQueue;

/// How often a paused consumer's `wait` wakes to recheck state, since a
/// paused reader must never block forever on the notifier.
const PAUSE_PULSE: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct Consumer {
    jitter: JitterCorrector,
    queue: MessageQueue,
    algo: JitterAlgorithm,
    atc: bool,
    paused: bool,
    notify: Arc<Notify>,
    fast_leave: bool,
    queue_length_ms: i64,
    /// Set the first time `threshold_met` observes an empty queue; cleared
    /// as soon as it isn't empty. Lets fast-leave measure how long the
    /// queue has stayed caught up instead of firing on a single empty poll.
    idle_since_ms: Option<i64>,
}

impl Consumer {
    pub fn new(vhost: &VhostConfig) -> Self {
        Self {
            jitter: JitterCorrector::new(),
            queue: MessageQueue::new(vhost.queue.queue_length_ms),
            algo: vhost.time_jitter,
            atc: vhost.atc,
            paused: false,
            notify: Arc::new(Notify::new()),
            fast_leave: vhost.queue.fast_leave,
            queue_length_ms: vhost.queue.queue_length_ms,
            idle_since_ms: None,
        }
    }

    pub fn notify_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn set_atc(&mut self, atc: bool) {
        self.atc = atc;
    }

    /// Copy `pkt`, jitter-correct it (unless ATC), enqueue, and wake any
    /// blocked waiter whose threshold is now satisfied.
    pub fn enqueue(&mut self, pkt: MediaPacket) -> bool {
        let mut pkt = pkt.copy();
        if !self.atc {
            self.jitter.correct(&mut pkt, self.algo);
        }
        let overflowed = self.queue.enqueue(pkt);
        self.notify.notify_waiters();
        overflowed
    }

    /// Whether a blocked `wait(min_msgs, min_duration_ms)` call should
    /// return right now.
    pub fn threshold_met(&mut self, min_msgs: usize, min_duration_ms: i64, now_ms: i64) -> bool {
        if self.queue.len() >= min_msgs {
            self.idle_since_ms = None;
            return true;
        }
        if min_duration_ms > 0 && self.queue.duration() >= min_duration_ms {
            self.idle_since_ms = None;
            return true;
        }
        // A sequence-header re-push can retime av_start past av_end
        // (duration < 0); ATC readers must not stall on that.
        if self.atc && self.queue.duration() < 0 {
            return true;
        }
        if !self.fast_leave || !self.queue.is_empty() {
            self.idle_since_ms = None;
            return false;
        }
        let idle_since = *self.idle_since_ms.get_or_insert(now_ms);
        now_ms - idle_since >= self.queue_length_ms
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn on_play_client_pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Bulk drain; returns 0 while paused without touching the queue.
    pub fn dump_packets(&mut self, max: usize, out: &mut Vec<MediaPacket>) -> usize {
        if self.paused {
            return 0;
        }
        self.queue.dump_packets(max, out)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Sleep until `consumer`'s queue satisfies `(min_msgs, min_duration_ms)` or
/// it is woken by an `enqueue`. While paused, wakes on a short pulse instead
/// so the caller can keep polling `dump_packets` (which returns empty).
pub async fn wait(
    consumer: &parking_lot::Mutex<Consumer>,
    min_msgs: usize,
    min_duration_ms: i64,
) {
    loop {
        let notify = {
            let mut guard = consumer.lock();
            let now_ms = chrono::Utc::now().timestamp_millis();
            if !guard.paused && guard.threshold_met(min_msgs, min_duration_ms, now_ms) {
                return;
            }
            guard.notify_handle()
        };
        if consumer.lock().paused {
            tokio::time::sleep(PAUSE_PULSE).await;
            return;
        }
        notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn cfg() -> VhostConfig {
        VhostConfig::default()
    }

    #[test]
    fn enqueue_applies_jitter_when_not_atc() {
        let mut c = Consumer::new(&cfg());
        let mut out = Vec::new();
        c.enqueue(MediaPacket::video(
            Bytes::from_static(b"v"),
            1000,
            1,
            crate::packet::VideoCodec::H264,
        ));
        c.dump_packets(1, &mut out);
        assert_eq!(out[0].timestamp, 0);
    }

    #[test]
    fn enqueue_skips_jitter_when_atc() {
        let mut v = cfg();
        v.atc = true;
        let mut c = Consumer::new(&v);
        let mut out = Vec::new();
        c.enqueue(MediaPacket::video(
            Bytes::from_static(b"v"),
            1000,
            1,
            crate::packet::VideoCodec::H264,
        ));
        c.dump_packets(1, &mut out);
        assert_eq!(out[0].timestamp, 1000);
    }

    #[test]
    fn pause_makes_dump_packets_return_empty() {
        let mut c = Consumer::new(&cfg());
        c.enqueue(MediaPacket::audio(Bytes::from_static(b"a"), 0, 1));
        c.on_play_client_pause(true);
        let mut out = Vec::new();
        assert_eq!(c.dump_packets(10, &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn threshold_met_by_message_count() {
        let v = cfg();
        let mut c = Consumer::new(&v);
        assert!(!c.threshold_met(1, 0, 0));
        c.enqueue(MediaPacket::audio(Bytes::from_static(b"a"), 0, 1));
        assert!(c.threshold_met(1, 0, 0));
    }

    #[test]
    fn fast_leave_returns_once_empty_queue_has_been_idle_past_queue_length() {
        let mut v = cfg();
        v.queue.fast_leave = true;
        v.queue.queue_length_ms = 1_000;
        let mut c = Consumer::new(&v);
        // Empty from the start: not yet met at t=0 (just started the clock).
        assert!(!c.threshold_met(1, 0, 0));
        assert!(!c.threshold_met(1, 0, 500));
        assert!(c.threshold_met(1, 0, 1_000));
    }

    #[test]
    fn fast_leave_disabled_never_short_circuits_on_empty_queue() {
        let mut v = cfg();
        v.queue.fast_leave = false;
        v.queue.queue_length_ms = 1_000;
        let mut c = Consumer::new(&v);
        assert!(!c.threshold_met(1, 0, 0));
        assert!(!c.threshold_met(1, 0, 10_000));
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_satisfied() {
        let mut c = Consumer::new(&cfg());
        c.enqueue(MediaPacket::audio(Bytes::from_static(b"a"), 0, 1));
        let m = parking_lot::Mutex::new(c);
        wait(&m, 1, 0).await;
    }

    #[tokio::test]
    async fn wait_wakes_on_enqueue() {
        let c = Consumer::new(&cfg());
        let m = Arc::new(parking_lot::Mutex::new(c));
        let m2 = m.clone();
        let waiter = tokio::spawn(async move {
            wait(&m2, 1, 0).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        m.lock().enqueue(MediaPacket::audio(Bytes::from_static(b"a"), 0, 1));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait task should complete")
            .unwrap();
    }
}
