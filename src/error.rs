//! Error types for the TRTP receive pipeline
//!
//! Protocol-level errors describe why a fragment was dropped; pump-level
//! errors describe why decoding stopped. Application plumbing wraps these
//! in `anyhow`.

use thiserror::Error;

use crate::protocol::header::HeaderKind;

/// Reasons a TRTP header was rejected by the parser.
///
/// All of these are non-fatal: the fragment is dropped and the substream
/// state is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload too short for TRTP header ({available} < {needed} bytes)")]
    Truncated { needed: usize, available: usize },

    #[error("unexpected TRTP version {0}")]
    BadVersion(u8),

    #[error("unhandled TRTP header kind ({0})")]
    UnsupportedKind(HeaderKind),

    #[error("unknown TRTP header kind {0}")]
    UnknownKind(u8),

    #[error("declared TRTP length {declared} below structural minimum {minimum}")]
    LengthTooShort { declared: u32, minimum: u32 },

    #[error("aux length {aux} plus header overhead {overhead} exceeds TRTP length {total}")]
    AuxTooLarge { aux: u32, overhead: u32, total: u32 },
}

/// Reasons a fragment did not advance reassembly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("malformed header: {0}")]
    Malformed(#[from] ParseError),

    #[error("header kind {got} does not match established kind {established}")]
    KindMismatch {
        established: HeaderKind,
        got: HeaderKind,
    },

    #[error("codec type {got} does not match established codec type {established}")]
    CodecMismatch { established: u8, got: u8 },

    #[error("unsupported codec type {0}")]
    UnsupportedCodec(u8),

    #[error("dropping non-RAP payload while waiting for random access point")]
    WaitingForRap,

    #[error("access unit with zero payload length")]
    EmptyPayload,

    #[error("fragment carries {carried} bytes but only {capacity} remain")]
    Oversized { carried: usize, capacity: usize },

    #[error("continuation with no access unit in progress")]
    NothingInProgress,

    #[error("cannot derive codec metadata: {0}")]
    BadCodecMetadata(String),

    #[error("failed to initialize decoder: {0}")]
    DecoderInit(PumpError),

    #[error("decoder pump rejected access unit: {0}")]
    PumpRejected(PumpError),

    #[error("substream halted by earlier fatal error: {0}")]
    Halted(PumpError),
}

impl FragmentError {
    /// True for errors that discarded an access unit already in progress.
    pub fn is_anomaly(&self) -> bool {
        matches!(self, FragmentError::Oversized { .. })
    }

    /// True once the substream refuses all further input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FragmentError::PumpRejected(_) | FragmentError::Halted(_)
        )
    }
}

/// Errors surfaced by the decoder pump. Cloneable so the terminal status can
/// be handed to every caller that observes it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PumpError {
    #[error("invalid format: {0}")]
    InvalidArgument(String),

    #[error("failed to create decoder: {0}")]
    DecoderCreation(String),

    #[error("failed to spawn decode thread: {0}")]
    ThreadSpawn(String),

    #[error("failed to start decoder: {0}")]
    DecoderStart(String),

    #[error(
        "decode error budget exhausted ({errors} consecutive errors, {long_errors} long): {last}"
    )]
    BudgetExhausted {
        errors: u32,
        long_errors: u32,
        last: String,
    },

    #[error("decoded output is missing its presentation timestamp")]
    MissingTimestamp,
}

/// Errors reported by a decode engine's `read`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Output format changed; the render sink must be rebuilt.
    #[error("decoder output format changed")]
    FormatChanged,

    #[error("decoder source exhausted")]
    EndOfStream,

    #[error("decode failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("render sink error: {0}")]
pub struct RenderError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("common clock unavailable: {0}")]
pub struct ClockError(pub String);

/// Errors building transmit-side packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("audio packet has no access unit data")]
    EmptyAccessUnit,

    #[error("invalid codec type for audio packet")]
    InvalidCodec,

    #[error("packet length {0} does not fit the 32-bit length field")]
    TooLarge(usize),

    #[error("fragment size {max} cannot hold {header} header bytes")]
    FragmentTooSmall { max: usize, header: usize },

    #[error("RTP packet too short ({0} bytes)")]
    RtpTruncated(usize),

    #[error("unsupported RTP version {0}")]
    RtpVersion(u8),
}

/// Why a datagram did not reach a substream, or what the substream said.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    #[error("bad RTP framing: {0}")]
    Rtp(#[from] PacketError),

    #[error("unexpected RTP payload type {0}")]
    PayloadType(u8),

    #[error("substream 0x{ssrc:08x}: {source}")]
    Fragment {
        ssrc: u32,
        #[source]
        source: FragmentError,
    },
}
