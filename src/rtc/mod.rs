//! RTC ↔ RTMP frame reassembly (C14, spec §4.13).

pub mod frame_builder;

pub use frame_builder::FrameBuilder;
