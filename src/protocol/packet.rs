//! Transmit-side TRTP packet construction
//!
//! Audio and control packets share one header writer; each body appends its
//! own fields. The low 32 bits of the PTS travel in the RTP timestamp, so
//! encoding hands them back separately.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::PacketError;
use crate::pipeline::clock::ClockTransform;
use crate::pipeline::types::CodecKind;
use crate::protocol::header::{
    AUDIO_HEADER_LEN, AUX_LENGTH_LEN, AudioFlags, BASE_HEADER_LEN, FLAG_TS_TRANSFORM_PRESENT,
    FLAG_TS_VALID, HeaderKind, TRTP_VERSION, TS_HIGH_LEN,
};

/// Control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Nop = 1,
    Flush = 2,
    Eos = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub codec: CodecKind,
    pub random_access_point: bool,
    pub dropable: bool,
    pub discontinuity: bool,
    pub end_of_stream: bool,
    pub volume: u8,
    pub access_unit: Bytes,
    pub aux_data: Bytes,
}

impl AudioPayload {
    pub fn new(codec: CodecKind, access_unit: Bytes) -> Self {
        Self {
            codec,
            random_access_point: true,
            dropable: false,
            discontinuity: false,
            end_of_stream: false,
            volume: 0xFF,
            access_unit,
            aux_data: Bytes::new(),
        }
    }

    pub fn with_aux_data(mut self, aux: Bytes) -> Self {
        self.aux_data = aux;
        self
    }

    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_random_access_point(mut self, rap: bool) -> Self {
        self.random_access_point = rap;
        self
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if !self.aux_data.is_empty() {
            flags |= AudioFlags::AUX_LENGTH_PRESENT;
        }
        if self.random_access_point {
            flags |= AudioFlags::RANDOM_ACCESS_POINT;
        }
        if self.dropable {
            flags |= AudioFlags::DROPABLE;
        }
        if self.discontinuity {
            flags |= AudioFlags::DISCONTINUITY;
        }
        if self.end_of_stream {
            flags |= AudioFlags::END_OF_STREAM;
        }
        flags
    }

    fn header_len(&self) -> usize {
        AUDIO_HEADER_LEN
            + if self.aux_data.is_empty() {
                0
            } else {
                AUX_LENGTH_LEN
            }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Audio(AudioPayload),
    Control(ControlCommand),
}

impl PacketBody {
    fn kind(&self) -> HeaderKind {
        match self {
            PacketBody::Audio(_) => HeaderKind::Audio,
            PacketBody::Control(_) => HeaderKind::Control,
        }
    }

    /// Body-specific header bytes (after the common header).
    fn header_len(&self) -> usize {
        match self {
            PacketBody::Audio(audio) => audio.header_len(),
            PacketBody::Control(_) => 1,
        }
    }

    fn trailer_len(&self) -> usize {
        match self {
            PacketBody::Audio(audio) => audio.aux_data.len() + audio.access_unit.len(),
            PacketBody::Control(_) => 0,
        }
    }
}

/// One TRTP packet ready for encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrtpPacket {
    pub pts: Option<i64>,
    pub clock_transform: Option<ClockTransform>,
    pub body: PacketBody,
}

/// Encoded TRTP bytes plus the value for the RTP timestamp field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub trtp: Bytes,
    pub rtp_timestamp: u32,
    /// Bytes of header that must stay in the first fragment
    pub header_len: usize,
}

impl TrtpPacket {
    pub fn audio(pts: Option<i64>, payload: AudioPayload) -> Self {
        Self {
            pts,
            clock_transform: None,
            body: PacketBody::Audio(payload),
        }
    }

    pub fn control(command: ControlCommand) -> Self {
        Self {
            pts: None,
            clock_transform: None,
            body: PacketBody::Control(command),
        }
    }

    pub fn with_clock_transform(mut self, transform: ClockTransform) -> Self {
        self.clock_transform = Some(transform);
        self
    }

    fn common_header_len(&self) -> usize {
        BASE_HEADER_LEN
            + if self.pts.is_some() { TS_HIGH_LEN } else { 0 }
            + if self.clock_transform.is_some() {
                ClockTransform::WIRE_LEN
            } else {
                0
            }
    }

    /// Total header bytes (common + body specific)
    pub fn header_len(&self) -> usize {
        self.common_header_len() + self.body.header_len()
    }

    pub fn encode(&self) -> Result<EncodedPacket, PacketError> {
        if let PacketBody::Audio(audio) = &self.body {
            if audio.access_unit.is_empty() {
                return Err(PacketError::EmptyAccessUnit);
            }
            if audio.codec == CodecKind::Invalid {
                return Err(PacketError::InvalidCodec);
            }
        }

        let header_len = self.header_len();
        let total = header_len + self.body.trailer_len();
        let total_u32 = u32::try_from(total).map_err(|_| PacketError::TooLarge(total))?;

        let mut buf = BytesMut::with_capacity(total);
        self.write_common_header(&mut buf, total_u32);

        match &self.body {
            PacketBody::Audio(audio) => {
                buf.put_u8(audio.codec.to_wire());
                buf.put_u8(audio.flags());
                buf.put_u8(audio.volume);
                if !audio.aux_data.is_empty() {
                    let aux_len = u32::try_from(audio.aux_data.len())
                        .map_err(|_| PacketError::TooLarge(audio.aux_data.len()))?;
                    buf.put_u32(aux_len);
                }
                debug_assert_eq!(buf.len(), header_len);
                buf.put_slice(&audio.aux_data);
                buf.put_slice(&audio.access_unit);
            }
            PacketBody::Control(command) => {
                buf.put_u8(*command as u8);
            }
        }

        Ok(EncodedPacket {
            trtp: buf.freeze(),
            rtp_timestamp: self.pts.map(|pts| pts as u32).unwrap_or(0),
            header_len,
        })
    }

    fn write_common_header(&self, buf: &mut BytesMut, total: u32) {
        let mut flags = self.body.kind().to_nibble() << 4;
        if self.pts.is_some() {
            flags |= FLAG_TS_VALID;
        }
        if self.clock_transform.is_some() {
            flags |= FLAG_TS_TRANSFORM_PRESENT;
        }

        buf.put_u8(TRTP_VERSION);
        buf.put_u8(flags);
        buf.put_u32(total);
        if let Some(pts) = self.pts {
            buf.put_u32(((pts as u64) >> 32) as u32);
        }
        if let Some(transform) = &self.clock_transform {
            buf.put_slice(&transform.to_wire());
        }
    }
}

impl EncodedPacket {
    /// Split into RTP-sized payloads. The first carries the complete header.
    pub fn fragment(&self, max_payload: usize) -> Result<Vec<Bytes>, PacketError> {
        if max_payload < self.header_len || max_payload == 0 {
            return Err(PacketError::FragmentTooSmall {
                max: max_payload,
                header: self.header_len,
            });
        }

        let mut out = Vec::with_capacity(self.trtp.len().div_ceil(max_payload));
        let mut offset = 0;
        while offset < self.trtp.len() {
            let end = (offset + max_payload).min(self.trtp.len());
            out.push(self.trtp.slice(offset..end));
            offset = end;
        }
        Ok(out)
    }
}
