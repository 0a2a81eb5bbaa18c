//! RTSP session handling: describe/setup/play/teardown and track fan-out
//! (C15, spec §4.14).

pub mod play_stream;
pub mod sdp;
pub mod session;

pub use play_stream::{PlayStream, SendTrack};
pub use session::{NetworkWriter, RtspSession, Track};
