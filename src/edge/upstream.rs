//! Upstream client contract shared by the RTMP and HTTP-FLV pull variants
//! (spec §4.10 "Upstream contract").

use crate::error::Result;
use crate::packet::MediaPacket;
use crate::source::StreamRequest;

/// One selected origin (host, port) picked by the ingester's load balancer.
#[derive(Debug, Clone)]
pub struct SelectedOrigin {
    pub host: String,
    pub port: u16,
}

/// A decoded message handed back from `recv_message`.
pub enum UpstreamMessage {
    Audio(MediaPacket),
    Video(MediaPacket),
    MetaData(MediaPacket),
    /// RTMP redirect response: the ingester loop restarts against this URL.
    Redirect(String),
}

/// Implemented by both the RTMP and HTTP-FLV pull clients (spec §4.10).
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    async fn connect(&mut self, request: &StreamRequest, origin: &SelectedOrigin) -> Result<()>;
    async fn recv_message(&mut self) -> Result<UpstreamMessage>;
    async fn close(&mut self);
    fn selected(&self) -> Option<&SelectedOrigin>;
    fn set_recv_timeout_ms(&mut self, timeout_ms: u64);
}
