//! Ambient HTTP control plane (spec SPEC_FULL §1/§3): health, version and
//! debug endpoints only — publish/play transport and config-file syntax are
//! external collaborators per spec §6.

pub mod handlers;
pub mod routes;

pub use routes::create_router;
