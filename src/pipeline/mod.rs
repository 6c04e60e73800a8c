//! Receive pipeline for TRTP audio
//!
//! # Architecture
//!
//! - The receive stage runs as its own task and owns the TRTP session
//! - Each substream (one per SSRC) reassembles access units and hands them
//!   to a decoder pump thread
//! - Pumps render against the common clock through a clock transform
//! - Health monitoring tracks counters and raises alerts

pub mod clock;
pub mod health;
pub mod receiver;
pub mod stage;
pub mod state;
pub mod types;

pub use clock::{ClockTransform, CommonClock, LocalCommonClock};
pub use health::{HealthMonitor, ReceiverHealth};
pub use stage::PipelineStage;
pub use state::PipelineState;
pub use types::{AccessUnit, CodecFormat, CodecKind, DecodedUnit, OutputFormat};
