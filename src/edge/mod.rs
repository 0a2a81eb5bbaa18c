//! Edge pull/push: play-edge ingesters and publish-edge forwarders with
//! round-robin load balancing over configured origins (C10-C12, spec
//! §4.10-§4.11).

pub mod forwarder;
pub mod ingester;
pub mod play;
pub mod publish;
pub mod upstream;

pub use forwarder::Forwarder;
pub use ingester::OriginBalancer;
pub use play::{PlayEdge, PlayEdgeState};
pub use publish::PublishEdge;
pub use upstream::Upstream;
