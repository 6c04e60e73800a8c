//! Probe decode engine
//!
//! Validates access units and emits silence of the right duration instead
//! of decoding them. Lets the receiver run end to end (timing, rendering,
//! underflow prediction) on hosts without a codec backend.

use bytes::Bytes;
use log::debug;

use crate::decoder::mp3::parse_frame_header;
use crate::decoder::{AccessUnitSource, DecodeEngine, DecoderFactory};
use crate::error::DecodeError;
use crate::pipeline::types::{AccessUnit, CodecFormat, DecodedUnit, OutputFormat};

/// AAC-LC frame length
const AAC_SAMPLES_PER_FRAME: usize = 1024;
const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeDecoderFactory;

impl DecoderFactory for ProbeDecoderFactory {
    fn create(&self, format: &CodecFormat) -> Result<Box<dyn DecodeEngine>, DecodeError> {
        Ok(Box::new(ProbeDecoder {
            format: format.clone(),
            output: format.output_format(),
            pending: None,
            started: false,
        }))
    }
}

pub struct ProbeDecoder {
    format: CodecFormat,
    output: OutputFormat,
    /// Unit whose frame announced a new output format, decoded on the next read
    pending: Option<AccessUnit>,
    started: bool,
}

impl ProbeDecoder {
    fn silence(&self, samples: usize, pts: Option<i64>) -> DecodedUnit {
        let len = samples * self.output.channels as usize * BYTES_PER_SAMPLE;
        DecodedUnit {
            data: Bytes::from(vec![0u8; len]),
            pts,
        }
    }
}

impl DecodeEngine for ProbeDecoder {
    fn start(&mut self, format: &CodecFormat) -> Result<(), DecodeError> {
        self.format = format.clone();
        self.output = format.output_format();
        self.started = true;
        debug!("ProbeDecoder: started for {}", format);
        Ok(())
    }

    fn read(&mut self, source: &mut dyn AccessUnitSource) -> Result<Option<DecodedUnit>, DecodeError> {
        if !self.started {
            return Err(DecodeError::Failed("decoder not started".into()));
        }

        let unit = match self.pending.take() {
            Some(unit) => unit,
            None => source.pull().ok_or(DecodeError::EndOfStream)?,
        };

        match self.format {
            CodecFormat::Mp3 { .. } => {
                let info = parse_frame_header(&unit.data).ok_or_else(|| {
                    DecodeError::Failed(format!("no MPEG frame header in {} byte unit", unit.len()))
                })?;

                let output = OutputFormat {
                    channels: info.channels,
                    sample_rate: info.sample_rate,
                };
                if output != self.output {
                    self.output = output;
                    self.pending = Some(unit);
                    return Err(DecodeError::FormatChanged);
                }
                Ok(Some(self.silence(info.samples_per_frame as usize, unit.pts)))
            }
            CodecFormat::Aac { .. } => {
                if unit.is_empty() {
                    return Err(DecodeError::Failed("empty AAC access unit".into()));
                }
                Ok(Some(self.silence(AAC_SAMPLES_PER_FRAME, unit.pts)))
            }
        }
    }

    fn stop(&mut self) {
        self.started = false;
        self.pending = None;
    }

    fn output_format(&self) -> Option<OutputFormat> {
        Some(self.output)
    }
}
