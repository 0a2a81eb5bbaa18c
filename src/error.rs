//! Error taxonomy for the live-streaming origin core.
//!
//! Mirrors the teacher's split between a broad user-facing error and a
//! narrower subsystem-specific one (`HlsError`/`FfmpegError`): `CoreError`
//! covers the fan-out core, `DvrError` covers the DVR segmenters.

use thiserror::Error;

/// Main error type for the origin core (spec §7 categories, not type names —
/// each variant below is tagged with the category it belongs to).
#[derive(Error, Debug)]
pub enum CoreError {
    /// category: config
    #[error("invalid configuration: {0}")]
    Config(String),

    /// category: parse
    #[error("packet parse/decode failure: {0}")]
    Parse(String),

    /// category: io
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// category: sink-hard — forwarder write failure, propagated so the
    /// publisher connection is torn down.
    #[error("forwarder sink failed: {0}")]
    SinkHard(String),

    /// category: protocol-policy — HLS on_error decisions (§4.7).
    #[error("protocol policy violation: {0}")]
    ProtocolPolicy(String),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("source already publishing: {0}")]
    AlreadyPublishing(String),

    #[error("publish rejected by security check")]
    PublishRefused,

    #[error("play rejected by security check")]
    PlayRefused,

    #[error("upstream connect failed: {0}")]
    UpstreamConnect(String),

    #[error("upstream redirect to {0}")]
    UpstreamRedirect(String),

    #[error("dvr error: {0}")]
    Dvr(#[from] DvrError),

    #[error("hook call failed: {0}")]
    Hook(String),
}

/// category: sink-soft failures are logged and the offending sink is
/// unpublished; they are never converted into a `CoreError` that kills the
/// publish, so there is no `CoreError::SinkSoft` variant — callers record it
/// via `tracing::warn!` and call `Sink::on_unpublish` directly (§4.7).
pub type Result<T> = std::result::Result<T, CoreError>;

/// DVR-segmenter-specific errors.
#[derive(Error, Debug)]
pub enum DvrError {
    #[error("unsupported codec for DVR target: {0}")]
    UnsupportedCodec(String),

    #[error("failed to open fragment file {path}: {source}")]
    OpenFragment {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write fragment: {0}")]
    WriteFragment(String),

    #[error("failed to seek/patch fragment metadata: {0}")]
    PatchMetadata(String),

    #[error("failed to rename fragment into place: {0}")]
    RenameFragment(String),

    #[error("mp4 muxer error: {0}")]
    Mp4(String),
}

pub type DvrResult<T> = std::result::Result<T, DvrError>;
