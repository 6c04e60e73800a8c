//! Per-SSRC access unit reassembly
//!
//! A substream collects TRTP fragments into complete access units and feeds
//! them to its decoder pump. It runs on the receive path only and needs no
//! locking of its own.
//!
//! A unit starts with a fragment carrying the full TRTP header. The header
//! declares the exact aux and payload sizes; continuations fill aux first,
//! then payload. Once the payload is full the unit is complete, codec
//! parameters are (re)derived from it, and it is queued for decode.

use bytes::{Bytes, BytesMut};
use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::decoder::mp3::parse_frame_header;
use crate::decoder::pump::{DEFAULT_VOLUME, DecoderPump, PumpContext};
use crate::error::{FragmentError, PumpError};
use crate::pipeline::clock::ClockTransform;
use crate::pipeline::health::ReceiverHealth;
use crate::pipeline::types::{AccessUnit, CodecFormat, CodecKind};
use crate::protocol::header::{self, HeaderKind};

/// Leading aux bytes of an AAC unit: sample rate + channel count
const AAC_AUX_PARAMS_LEN: usize = 8;

/// Upper bound on the up-front reservation for a declared size; larger
/// units grow as their bytes arrive.
const MAX_INITIAL_RESERVE: usize = 64 * 1024;

/// What a fragment did to the substream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Bytes absorbed, unit still incomplete
    Pending,
    /// Unit completed and handed to the decoder pump
    Queued,
}

/// Access unit under reassembly. Sizes are fixed when the header is parsed.
struct InProgress {
    data: BytesMut,
    expected: usize,
    aux: BytesMut,
    aux_expected: usize,
    pts: Option<i64>,
    codec: CodecKind,
}

impl InProgress {
    fn new(expected: usize, aux_expected: usize, pts: Option<i64>, codec: CodecKind) -> Self {
        Self {
            data: BytesMut::with_capacity(expected.min(MAX_INITIAL_RESERVE)),
            expected,
            aux: BytesMut::with_capacity(aux_expected.min(MAX_INITIAL_RESERVE)),
            aux_expected,
            pts,
            codec,
        }
    }

    fn remaining(&self) -> usize {
        (self.aux_expected - self.aux.len()) + (self.expected - self.data.len())
    }

    /// Aux first, then payload. Caller guarantees `bytes` fits.
    fn absorb(&mut self, bytes: &[u8]) {
        let aux_take = (self.aux_expected - self.aux.len()).min(bytes.len());
        self.aux.extend_from_slice(&bytes[..aux_take]);

        let rest = &bytes[aux_take..];
        let take = (self.expected - self.data.len()).min(rest.len());
        self.data.extend_from_slice(&rest[..take]);
    }

    fn is_complete(&self) -> bool {
        self.data.len() >= self.expected
    }
}

pub struct Substream {
    ssrc: u32,
    /// Kind and raw codec type, fixed by the first accepted fragment
    details: Option<(HeaderKind, u8)>,
    in_progress: Option<InProgress>,
    waiting_for_rap: bool,
    /// Sticky until `shutdown`
    status: Option<PumpError>,
    format: Option<CodecFormat>,
    /// Last values forwarded to the pump, replayed after a format change
    transform: Option<ClockTransform>,
    volume: u8,
    underflow_threshold_us: i64,
    pump: DecoderPump,
    health: Arc<ReceiverHealth>,
}

impl Substream {
    pub fn new(ssrc: u32, ctx: PumpContext) -> Self {
        Self {
            ssrc,
            details: None,
            in_progress: None,
            waiting_for_rap: true,
            status: None,
            format: None,
            transform: None,
            volume: DEFAULT_VOLUME,
            underflow_threshold_us: ctx.config.underflow_threshold_us,
            health: Arc::clone(&ctx.health),
            pump: DecoderPump::new(ctx),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn status(&self) -> Option<&PumpError> {
        self.status.as_ref()
    }

    pub fn format(&self) -> Option<&CodecFormat> {
        self.format.as_ref()
    }

    pub fn is_accumulating(&self) -> bool {
        self.in_progress.is_some()
    }

    pub fn is_waiting_for_rap(&self) -> bool {
        self.waiting_for_rap
    }

    pub fn pump(&self) -> &DecoderPump {
        &self.pump
    }

    fn check_halted(&self) -> Result<(), FragmentError> {
        match &self.status {
            Some(status) => Err(FragmentError::Halted(status.clone())),
            None => Ok(()),
        }
    }

    /// Handle the first fragment of an access unit.
    ///
    /// `ts_low` is the RTP timestamp, the low half of the PTS.
    pub fn process_fragment_start(
        &mut self,
        buf: &[u8],
        ts_low: u32,
    ) -> Result<FragmentOutcome, FragmentError> {
        self.check_halted()?;

        if self.discard_in_progress() {
            warn!(
                "Substream 0x{:08x}: fragment start aborted access unit already in progress",
                self.ssrc
            );
            self.health.record_anomaly();
        }

        let parsed = header::parse(buf, ts_low)?;
        self.setup_details(parsed.kind, parsed.audio.codec)?;

        self.set_volume(parsed.audio.volume);
        if let Some(transform) = parsed.clock_transform {
            self.process_clock_transform(transform);
        }

        if self.waiting_for_rap {
            if !parsed.audio.flags.random_access_point() {
                return Err(FragmentError::WaitingForRap);
            }
            self.waiting_for_rap = false;
            debug!("Substream 0x{:08x}: first random access point", self.ssrc);
        }

        let expected = parsed.payload_len();
        if expected == 0 {
            return Err(FragmentError::EmptyPayload);
        }

        let trailing = &buf[parsed.header_len..];
        let capacity = parsed.aux_len() + expected;
        if trailing.len() > capacity {
            self.health.record_anomaly();
            return Err(FragmentError::Oversized {
                carried: trailing.len(),
                capacity,
            });
        }

        // codec was validated by setup_details
        let codec = CodecKind::from_wire(parsed.audio.codec).unwrap_or(CodecKind::Invalid);
        let mut unit = InProgress::new(expected, parsed.aux_len(), parsed.pts, codec);
        unit.absorb(trailing);

        if unit.is_complete() {
            return self.complete(unit);
        }
        self.in_progress = Some(unit);
        Ok(FragmentOutcome::Pending)
    }

    /// Handle a follow-on fragment of the access unit in progress.
    pub fn process_fragment_continuation(
        &mut self,
        buf: &[u8],
    ) -> Result<FragmentOutcome, FragmentError> {
        self.check_halted()?;

        let Some(mut unit) = self.in_progress.take() else {
            return Err(FragmentError::NothingInProgress);
        };

        let capacity = unit.remaining();
        if buf.len() > capacity {
            self.health.record_anomaly();
            return Err(FragmentError::Oversized {
                carried: buf.len(),
                capacity,
            });
        }

        unit.absorb(buf);
        if unit.is_complete() {
            return self.complete(unit);
        }
        self.in_progress = Some(unit);
        Ok(FragmentOutcome::Pending)
    }

    pub fn process_clock_transform(&mut self, transform: ClockTransform) {
        self.transform = Some(transform);
        self.pump.set_clock_transform(transform);
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume;
        self.pump.set_volume(volume);
    }

    pub fn query_underflow(&self, threshold_us: i64) -> bool {
        self.pump.is_approaching_underflow(threshold_us)
    }

    /// Underflow check at the configured threshold
    pub fn is_about_to_underflow(&self) -> bool {
        self.query_underflow(self.underflow_threshold_us)
    }

    /// Drop the access unit in progress, if any.
    pub fn discard_in_progress(&mut self) -> bool {
        self.in_progress.take().is_some()
    }

    /// Tear down decoding and clear the sticky error.
    ///
    /// Established kind/codec, the clock transform and the random access
    /// point gate survive; volume returns to its default.
    pub fn shutdown(&mut self) {
        self.format = None;
        self.status = None;
        self.volume = DEFAULT_VOLUME;
        self.in_progress = None;
        self.reset_pump();
    }

    /// Shut the pump down and hand it back the remembered transform and volume.
    fn reset_pump(&mut self) {
        self.pump.shutdown();
        if let Some(transform) = self.transform {
            self.pump.set_clock_transform(transform);
        }
        self.pump.set_volume(self.volume);
    }

    fn setup_details(&mut self, kind: HeaderKind, codec: u8) -> Result<(), FragmentError> {
        if let Some((established_kind, established_codec)) = self.details {
            if kind != established_kind {
                return Err(FragmentError::KindMismatch {
                    established: established_kind,
                    got: kind,
                });
            }
            if codec != established_codec {
                return Err(FragmentError::CodecMismatch {
                    established: established_codec,
                    got: codec,
                });
            }
            return Ok(());
        }

        match CodecKind::from_wire(codec) {
            Some(kind) if kind.is_supported() => {}
            _ => return Err(FragmentError::UnsupportedCodec(codec)),
        }

        info!(
            "Substream 0x{:08x}: established {} substream, codec {}",
            self.ssrc,
            kind,
            CodecKind::from_wire(codec).unwrap_or(CodecKind::Invalid)
        );
        self.details = Some((kind, codec));
        Ok(())
    }

    fn derive_format(unit: &InProgress) -> Result<CodecFormat, FragmentError> {
        match unit.codec {
            CodecKind::Mpeg1Audio => {
                if unit.data.len() < 4 {
                    return Err(FragmentError::BadCodecMetadata(
                        "MP3 payload too short to contain header".into(),
                    ));
                }
                let info = parse_frame_header(&unit.data).ok_or_else(|| {
                    FragmentError::BadCodecMetadata("failed to parse MP3 frame header".into())
                })?;
                Ok(CodecFormat::Mp3 {
                    sample_rate: info.sample_rate,
                    channels: info.channels,
                })
            }
            CodecKind::Aac => {
                let aux = &unit.aux;
                if aux.len() < AAC_AUX_PARAMS_LEN {
                    return Err(FragmentError::BadCodecMetadata(format!(
                        "not enough aux data ({}) to initialize AAC decoder",
                        aux.len()
                    )));
                }
                let sample_rate = u32::from_be_bytes([aux[0], aux[1], aux[2], aux[3]]);
                let channels = u32::from_be_bytes([aux[4], aux[5], aux[6], aux[7]]);
                let codec_config = (aux.len() > AAC_AUX_PARAMS_LEN)
                    .then(|| Bytes::copy_from_slice(&aux[AAC_AUX_PARAMS_LEN..]));
                Ok(CodecFormat::Aac {
                    sample_rate,
                    channels,
                    codec_config,
                })
            }
            other => Err(FragmentError::BadCodecMetadata(format!(
                "no decoder for codec {}",
                other
            ))),
        }
    }

    /// Refresh codec parameters, make sure the pump runs, and queue the unit.
    fn complete(&mut self, unit: InProgress) -> Result<FragmentOutcome, FragmentError> {
        let format = Self::derive_format(&unit)?;

        if let Some(previous) = &self.format
            && *previous != format
        {
            warn!(
                "Substream 0x{:08x}: format change {} -> {}, forcing decoder reset",
                self.ssrc, previous, format
            );
            self.health.record_format_change();
            self.reset_pump();
        }
        self.format = Some(format.clone());

        if let Err(e) = self.pump.initialize(&format) {
            error!("Substream 0x{:08x}: failed to init decoder: {}", self.ssrc, e);
            self.reset_pump();
            self.format = None;
            return Err(FragmentError::DecoderInit(e));
        }

        let unit = AccessUnit::new(unit.data.freeze(), unit.pts, unit.codec);
        let len = unit.len();
        match self.pump.enqueue(unit) {
            Ok(()) => {
                self.health.record_unit(len);
                Ok(FragmentOutcome::Queued)
            }
            Err((rejected, e)) => {
                warn!(
                    "Substream 0x{:08x}: failed to queue {:?} for decode, resetting decoder pump: {}",
                    self.ssrc, rejected, e
                );
                self.status = Some(e.clone());
                self.pump.shutdown();
                Err(FragmentError::PumpRejected(e))
            }
        }
    }
}
