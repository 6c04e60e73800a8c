//! Decoding side of the receiver
//!
//! The decode engine itself is supplied by the embedder through
//! [`DecoderFactory`]. The [`DecoderPump`] drives it from a dedicated thread
//! and feeds its output to a render sink.

pub mod mp3;
pub mod probe;
pub mod pump;

use crate::error::DecodeError;
use crate::pipeline::types::{AccessUnit, CodecFormat, DecodedUnit, OutputFormat};

pub use mp3::{MpegFrameInfo, parse_frame_header};
pub use probe::ProbeDecoderFactory;
pub use pump::{DecoderPump, PumpContext, PumpSource};

/// Upstream data source a decode engine pulls access units from.
pub trait AccessUnitSource {
    /// Block until an access unit is available. `None` means no more data
    /// will arrive (the pump is shutting down).
    fn pull(&mut self) -> Option<AccessUnit>;
}

/// Pull-based decoder.
///
/// `read` pulls as many access units from `source` as it needs and returns
/// at most one decoded unit. `Ok(None)` is a successful step with no output.
pub trait DecodeEngine: Send {
    fn start(&mut self, format: &CodecFormat) -> Result<(), DecodeError>;

    fn read(&mut self, source: &mut dyn AccessUnitSource) -> Result<Option<DecodedUnit>, DecodeError>;

    fn stop(&mut self);

    /// PCM layout after a `FormatChanged` report, if the engine knows it.
    fn output_format(&self) -> Option<OutputFormat> {
        None
    }
}

/// Creates decode engines for a given codec format
pub trait DecoderFactory: Send + Sync {
    fn create(&self, format: &CodecFormat) -> Result<Box<dyn DecodeEngine>, DecodeError>;
}
