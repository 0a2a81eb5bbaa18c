//! Origin hub: broadcasts publisher events to the side-effect sinks (HLS,
//! DASH, DVR, forwarders, ...) with per-sink error policy (C7, spec §4.7).

use parking_lot::Mutex;

use crate::config::HlsOnError;
use crate::packet::MediaPacket;

/// Outcome of a sink's `on_audio`/`on_video`/`on_meta_data` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// Recoverable: warn, then unpublish this sink only.
    Soft,
    /// Unrecoverable: propagate and fail the whole publish.
    Hard,
}

/// A side-effect consumer of the live source's packet stream.
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;
    fn on_meta_data(&self, _pkt: &MediaPacket) -> Result<(), SinkError> {
        Ok(())
    }
    fn on_audio(&self, _pkt: &MediaPacket) -> Result<(), SinkError> {
        Ok(())
    }
    fn on_video(&self, _pkt: &MediaPacket) -> Result<(), SinkError> {
        Ok(())
    }
    fn on_publish(&self) {}
    fn on_unpublish(&self) {}
    /// `cycle()` lets the sink drive its own periodic work (HLS flush, ...).
    fn cycle(&self) {}
    /// Whether this sink's errors are always non-fatal regardless of the
    /// configured HLS policy (DASH/DVR/HDS, per spec §4.7); forwarders
    /// return `false` (always fatal), HLS consults `hls_on_error`.
    fn is_hard_fatal(&self) -> bool {
        false
    }
}

/// Marks a sink whose errors always kill the publish (forwarders).
pub trait HardFatalSink: Sink {}

struct SinkSlot {
    sink: Box<dyn Sink>,
    disabled: bool,
}

/// Composes every configured sink and fans out publisher events to them.
pub struct Hub {
    sinks: Mutex<Vec<SinkSlot>>,
    hls_on_error: HlsOnError,
}

impl Hub {
    pub fn new(hls_on_error: HlsOnError) -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            hls_on_error,
        }
    }

    pub fn add_sink(&self, sink: Box<dyn Sink>) {
        self.sinks.lock().push(SinkSlot {
            sink,
            disabled: false,
        });
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().iter().filter(|s| !s.disabled).count()
    }

    pub fn on_publish(&self) {
        for slot in self.sinks.lock().iter_mut() {
            slot.disabled = false;
            slot.sink.on_publish();
        }
    }

    pub fn on_unpublish(&self) {
        for slot in self.sinks.lock().iter() {
            slot.sink.on_unpublish();
        }
    }

    pub fn cycle(&self) {
        for slot in self.sinks.lock().iter() {
            if !slot.disabled {
                slot.sink.cycle();
            }
        }
    }

    pub fn on_meta_data(&self, pkt: &MediaPacket) {
        self.dispatch(pkt, None, |sink, pkt| sink.on_meta_data(pkt));
    }

    /// `cached_sh` is the source's current audio (resp. video) sequence
    /// header, used only to evaluate the `continue` policy below.
    pub fn on_audio(
        &self,
        pkt: &MediaPacket,
        cached_sh: Option<&MediaPacket>,
    ) -> Result<(), SinkError> {
        self.dispatch(pkt, cached_sh, |sink, pkt| sink.on_audio(pkt))
    }

    pub fn on_video(
        &self,
        pkt: &MediaPacket,
        cached_sh: Option<&MediaPacket>,
    ) -> Result<(), SinkError> {
        self.dispatch(pkt, cached_sh, |sink, pkt| sink.on_video(pkt))
    }

    /// Run `call` against every enabled sink; apply the per-sink error
    /// policy; return `Hard` only if a sink whose errors are fatal to the
    /// whole publish failed. Forwarders are always fatal. HLS follows
    /// `hls_on_error`: `ignore` always swallows and disables hls, `continue`
    /// swallows without disabling only when the failing packet looks like a
    /// mislabelled sequence header (same size as the cached one), anything
    /// else (including `disconnect`) propagates and kills the publish.
    fn dispatch(
        &self,
        pkt: &MediaPacket,
        cached_sh: Option<&MediaPacket>,
        call: impl Fn(&dyn Sink, &MediaPacket) -> Result<(), SinkError>,
    ) -> Result<(), SinkError> {
        let mut fatal = false;
        for slot in self.sinks.lock().iter_mut() {
            if slot.disabled {
                continue;
            }
            if call(slot.sink.as_ref(), pkt).is_err() {
                if slot.sink.is_hard_fatal() {
                    // Forwarder: always fatal.
                    fatal = true;
                    continue;
                }
                if slot.sink.name() == "hls" {
                    match self.hls_on_error {
                        HlsOnError::Ignore => {
                            tracing::warn!("hls error, ignoring and unpublishing hls");
                            slot.disabled = true;
                            slot.sink.on_unpublish();
                        }
                        HlsOnError::Continue => {
                            if looks_like_mislabelled_sh(cached_sh, pkt) {
                                tracing::warn!(
                                    "hls error on a packet that looks like a sequence header, ignoring"
                                );
                            } else {
                                fatal = true;
                            }
                        }
                        HlsOnError::Disconnect => {
                            fatal = true;
                        }
                    }
                } else {
                    tracing::warn!(sink = slot.sink.name(), "sink error, disabling sink");
                    slot.disabled = true;
                    slot.sink.on_unpublish();
                }
            }
        }
        if fatal {
            Err(SinkError::Hard)
        } else {
            Ok(())
        }
    }
}

/// Whether `pkt` is plausibly a sequence header fed through the wrong path
/// (same size as the cached one), in which case an hls decode error on it
/// can be swallowed rather than killing the publish.
fn looks_like_mislabelled_sh(cached_sh: Option<&MediaPacket>, pkt: &MediaPacket) -> bool {
    cached_sh.map(|sh| sh.size() == pkt.size()).unwrap_or(false)
}
