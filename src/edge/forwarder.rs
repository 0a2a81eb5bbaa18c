//! Publish-edge forwarder: mirrors a local publish to a configured upstream
//! destination through the same bounded-queue-plus-shrink policy as the
//! consumer queue (C2/C11, spec §4.11).

use std::sync::Arc;

use tokio::sync::Notify;

use crate::config::ForwardConfig;
use crate::error::{CoreError, Result};
use crate::packet::MediaPacket;
use crate::queue::MessageQueue;

/// Destination the forwarder pump writes decoded packets to.
pub trait ForwardSink: Send + Sync {
    fn write(&self, pkt: &MediaPacket) -> Result<()>;
}

pub struct Forwarder {
    queue: parking_lot::Mutex<MessageQueue>,
    notify: Arc<Notify>,
    config: ForwardConfig,
}

impl Forwarder {
    pub fn new(config: ForwardConfig) -> Self {
        Self {
            queue: parking_lot::Mutex::new(MessageQueue::new(10_000)),
            notify: Arc::new(Notify::new()),
            config,
        }
    }

    pub fn enqueue(&self, pkt: MediaPacket) {
        self.queue.lock().enqueue(pkt);
        self.notify.notify_waiters();
    }

    pub fn destinations(&self) -> &[String] {
        &self.config.destinations
    }

    /// Drains the queue into `sink` until it returns an error, which is
    /// fatal to the forwarder and propagated so the caller tears down the
    /// publish connection (spec §4.11, §7 sink-hard category).
    pub async fn pump(&self, sink: &dyn ForwardSink) -> Result<()> {
        loop {
            let mut batch = Vec::new();
            {
                let mut queue = self.queue.lock();
                queue.dump_all(&mut batch);
            }
            if batch.is_empty() {
                self.notify.notified().await;
                continue;
            }
            for pkt in &batch {
                sink.write(pkt)
                    .map_err(|e| CoreError::SinkHard(e.to_string()))?;
            }
        }
    }
}
