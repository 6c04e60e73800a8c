//! Timed audio output
//!
//! A render sink plays PCM buffers at the common-clock time their PTS maps
//! to. The device behind it is supplied by the embedder.

pub mod probe;

use bytes::{Bytes, BytesMut};

use crate::error::RenderError;
use crate::pipeline::clock::ClockTransform;

pub use probe::{LoggingSinkFactory, SinkStats};

pub trait RenderSink: Send {
    fn set_transform(&mut self, transform: &ClockTransform) -> Result<(), RenderError>;

    /// Linear gain in `0.0..=1.0`
    fn set_volume(&mut self, volume: f32) -> Result<(), RenderError>;

    /// Sink-owned buffer with room for `len` bytes.
    fn allocate_buffer(&mut self, len: usize) -> Result<BytesMut, RenderError>;

    fn submit(&mut self, buffer: Bytes, pts: i64) -> Result<(), RenderError>;

    fn start(&mut self);

    fn stop(&mut self);
}

pub trait RenderSinkFactory: Send + Sync {
    fn construct(&self, channels: u32, sample_rate: u32) -> Result<Box<dyn RenderSink>, RenderError>;
}

/// Map a wire volume (0-255) to a linear gain.
pub fn volume_gain(volume: u8) -> f32 {
    volume as f32 / 255.0
}
