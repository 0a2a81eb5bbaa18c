//! DVR recording (C16, spec §4.15): segmenters write publish output to disk
//! under a `session` or `segment` plan; a fragment cache serves recent
//! output back without re-opening the file, and a background worker fires
//! the `on_dvr` hook once a fragment closes.

pub mod flv_segmenter;
pub mod fragment_cache;
pub mod hook;
pub mod mp4_segmenter;
pub mod plan;

pub use flv_segmenter::FlvSegmenter;
pub use fragment_cache::{FragmentCache, FragmentCacheConfig};
pub use hook::{shared_hook_client, ClosedFragment, DvrHookWorker};
pub use mp4_segmenter::Mp4Segmenter;
pub use plan::{Segmenter, SegmentPlan, SessionPlan};
