//! TRTP header parsing
//!
//! A TRTP header sits at the start of the first RTP payload of every
//! access unit. The header must arrive in one piece; it is never split
//! across RTP payloads.
//!
//! ```text
//! version(1) kind|flags(1) total_length(4) [ts_high(4)] [transform(24)]
//! audio: codec(1) audio_flags(1) volume(1) [aux_length(4)] aux... payload...
//! ```

use crate::error::ParseError;
use crate::pipeline::clock::ClockTransform;

pub const TRTP_VERSION: u8 = 1;

/// version + kind/flags + total length
pub const BASE_HEADER_LEN: usize = 6;
pub const TS_HIGH_LEN: usize = 4;
pub const AUDIO_HEADER_LEN: usize = 3;
pub const AUX_LENGTH_LEN: usize = 4;

pub const FLAG_TS_VALID: u8 = 0x01;
pub const FLAG_TS_TRANSFORM_PRESENT: u8 = 0x02;

/// Substream kind carried in the high nibble of the second header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    Audio = 1,
    Video = 2,
    Subpicture = 3,
    Control = 4,
}

impl HeaderKind {
    pub fn from_nibble(value: u8) -> Option<Self> {
        match value {
            1 => Some(HeaderKind::Audio),
            2 => Some(HeaderKind::Video),
            3 => Some(HeaderKind::Subpicture),
            4 => Some(HeaderKind::Control),
            _ => None,
        }
    }

    pub fn to_nibble(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for HeaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderKind::Audio => write!(f, "Audio"),
            HeaderKind::Video => write!(f, "Video"),
            HeaderKind::Subpicture => write!(f, "Subpicture"),
            HeaderKind::Control => write!(f, "Control"),
        }
    }
}

/// Per-payload flags of an audio header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioFlags(pub u8);

impl AudioFlags {
    pub const AUX_LENGTH_PRESENT: u8 = 0x10;
    pub const RANDOM_ACCESS_POINT: u8 = 0x08;
    pub const DROPABLE: u8 = 0x04;
    pub const DISCONTINUITY: u8 = 0x02;
    pub const END_OF_STREAM: u8 = 0x01;

    #[inline]
    fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn aux_length_present(self) -> bool {
        self.has(Self::AUX_LENGTH_PRESENT)
    }

    pub fn random_access_point(self) -> bool {
        self.has(Self::RANDOM_ACCESS_POINT)
    }

    pub fn dropable(self) -> bool {
        self.has(Self::DROPABLE)
    }

    pub fn discontinuity(self) -> bool {
        self.has(Self::DISCONTINUITY)
    }

    pub fn end_of_stream(self) -> bool {
        self.has(Self::END_OF_STREAM)
    }
}

/// Audio-specific header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    /// Raw codec type; validated against the substream by the reassembler
    pub codec: u8,
    pub flags: AudioFlags,
    pub volume: u8,
    /// Declared codec aux data length (0 when absent)
    pub aux_length: u32,
}

/// Parsed TRTP header descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrtpHeader {
    pub kind: HeaderKind,
    pub pts: Option<i64>,
    pub clock_transform: Option<ClockTransform>,
    /// Declared length of the whole TRTP payload, header included
    pub total_length: u32,
    /// Bytes of header preceding the aux data
    pub header_len: usize,
    pub audio: AudioHeader,
}

impl TrtpHeader {
    /// Access unit bytes declared by this header.
    pub fn payload_len(&self) -> usize {
        self.total_length as usize - self.header_len - self.audio.aux_length as usize
    }

    pub fn aux_len(&self) -> usize {
        self.audio.aux_length as usize
    }
}

#[inline]
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Check both the available bytes and the declared length against the
/// minimum structure seen so far.
fn require(buf: &[u8], total_length: Option<u32>, min: usize) -> Result<(), ParseError> {
    if buf.len() < min {
        return Err(ParseError::Truncated {
            needed: min,
            available: buf.len(),
        });
    }
    if let Some(declared) = total_length
        && (declared as usize) < min
    {
        return Err(ParseError::LengthTooShort {
            declared,
            minimum: min as u32,
        });
    }
    Ok(())
}

/// Parse the TRTP header at the start of `buf`.
///
/// `ts_low` is the low half of the presentation timestamp, carried in the
/// RTP timestamp field.
pub fn parse(buf: &[u8], ts_low: u32) -> Result<TrtpHeader, ParseError> {
    let mut min = BASE_HEADER_LEN;
    require(buf, None, min)?;

    if buf[0] != TRTP_VERSION {
        return Err(ParseError::BadVersion(buf[0]));
    }

    let nibble = (buf[1] >> 4) & 0x0F;
    let kind = HeaderKind::from_nibble(nibble).ok_or(ParseError::UnknownKind(nibble))?;
    if kind != HeaderKind::Audio {
        return Err(ParseError::UnsupportedKind(kind));
    }

    let ts_valid = buf[1] & FLAG_TS_VALID != 0;
    if ts_valid {
        min += TS_HIGH_LEN;
        require(buf, None, min)?;
    }

    let total_length = read_u32(buf, 2);
    require(buf, Some(total_length), min)?;

    let mut offset = BASE_HEADER_LEN;
    let pts = if ts_valid {
        let ts_high = read_u32(buf, offset);
        offset += TS_HIGH_LEN;
        Some((((ts_high as u64) << 32) | ts_low as u64) as i64)
    } else {
        None
    };

    let clock_transform = if buf[1] & FLAG_TS_TRANSFORM_PRESENT != 0 {
        min += ClockTransform::WIRE_LEN;
        require(buf, Some(total_length), min)?;
        let mut block = [0u8; ClockTransform::WIRE_LEN];
        block.copy_from_slice(&buf[offset..offset + ClockTransform::WIRE_LEN]);
        offset += ClockTransform::WIRE_LEN;
        Some(ClockTransform::from_wire(&block))
    } else {
        None
    };

    min += AUDIO_HEADER_LEN;
    require(buf, Some(total_length), min)?;
    let codec = buf[offset];
    let flags = AudioFlags(buf[offset + 1]);
    let volume = buf[offset + 2];
    offset += AUDIO_HEADER_LEN;

    let aux_length = if flags.aux_length_present() {
        min += AUX_LENGTH_LEN;
        require(buf, Some(total_length), min)?;
        let len = read_u32(buf, offset);
        offset += AUX_LENGTH_LEN;
        len
    } else {
        0
    };

    debug_assert_eq!(offset, min);
    let overhead = offset as u64;
    if aux_length as u64 + overhead > total_length as u64 {
        return Err(ParseError::AuxTooLarge {
            aux: aux_length,
            overhead: overhead as u32,
            total: total_length,
        });
    }

    Ok(TrtpHeader {
        kind,
        pts,
        clock_transform,
        total_length,
        header_len: offset,
        audio: AudioHeader {
            codec,
            flags,
            volume,
            aux_length,
        },
    })
}
