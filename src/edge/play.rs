//! Play edge state machine (C10, spec §4.10).

use std::sync::atomic::{AtomicBool, Ordering};

/// `Init → Play → IngestConnected → Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayEdgeState {
    Init,
    Play,
    IngestConnected,
}

pub struct PlayEdge {
    state: parking_lot::Mutex<PlayEdgeState>,
    ingester_running: AtomicBool,
}

impl Default for PlayEdge {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayEdge {
    pub fn new() -> Self {
        Self {
            state: parking_lot::Mutex::new(PlayEdgeState::Init),
            ingester_running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> PlayEdgeState {
        *self.state.lock()
    }

    /// First consumer joined: start the ingester if not already running.
    /// Returns `true` if the caller must actually spawn the ingester task.
    pub fn on_client_play(&self) -> bool {
        let mut state = self.state.lock();
        if *state == PlayEdgeState::Init {
            *state = PlayEdgeState::Play;
        }
        if self
            .ingester_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            true
        } else {
            false
        }
    }

    /// Called by the ingester once the upstream handshake succeeds.
    /// Idempotent.
    pub fn on_ingest_play(&self) {
        let mut state = self.state.lock();
        if *state != PlayEdgeState::Init {
            *state = PlayEdgeState::IngestConnected;
        }
    }

    pub fn on_all_client_stop(&self) {
        *self.state.lock() = PlayEdgeState::Init;
        self.ingester_running.store(false, Ordering::SeqCst);
    }

    pub fn on_ingester_closed(&self) {
        self.ingester_running.store(false, Ordering::SeqCst);
        *self.state.lock() = PlayEdgeState::Init;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_client_starts_ingester_second_does_not() {
        let edge = PlayEdge::new();
        assert!(edge.on_client_play());
        assert!(!edge.on_client_play());
        assert_eq!(edge.state(), PlayEdgeState::Play);
    }

    #[test]
    fn ingest_play_is_idempotent() {
        let edge = PlayEdge::new();
        edge.on_client_play();
        edge.on_ingest_play();
        edge.on_ingest_play();
        assert_eq!(edge.state(), PlayEdgeState::IngestConnected);
    }

    #[test]
    fn all_client_stop_returns_to_init_and_allows_restart() {
        let edge = PlayEdge::new();
        edge.on_client_play();
        edge.on_ingest_play();
        edge.on_all_client_stop();
        assert_eq!(edge.state(), PlayEdgeState::Init);
        assert!(edge.on_client_play());
    }
}
