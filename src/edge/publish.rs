//! Publish edge (C11, spec §4.11): guards concurrent local publishes and
//! owns the forwarder that mirrors packets upstream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::edge::forwarder::Forwarder;
use crate::packet::MediaPacket;

pub struct PublishEdge {
    publish_active: AtomicBool,
    forwarder: parking_lot::Mutex<Option<Arc<Forwarder>>>,
}

impl Default for PublishEdge {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishEdge {
    pub fn new() -> Self {
        Self {
            publish_active: AtomicBool::new(false),
            forwarder: parking_lot::Mutex::new(None),
        }
    }

    pub fn can_publish(&self) -> bool {
        !self.publish_active.load(Ordering::SeqCst)
    }

    /// Starts the forwarder for a new local publisher. Returns `false` if a
    /// local publish is already active.
    pub fn on_client_publish(&self, forwarder: Arc<Forwarder>) -> bool {
        if self
            .publish_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *self.forwarder.lock() = Some(forwarder);
        true
    }

    pub fn on_proxy_publish(&self, pkt: MediaPacket) {
        if let Some(fwd) = self.forwarder.lock().as_ref() {
            fwd.enqueue(pkt);
        }
    }

    pub fn on_proxy_unpublish(&self) {
        self.forwarder.lock().take();
        self.publish_active.store(false, Ordering::SeqCst);
    }
}
