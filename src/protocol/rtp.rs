//! Fixed RTP header framing for TRTP payloads (RFC 3550 section 5.1).
//!
//! TRTP uses the marker bit to flag the first fragment of an access unit
//! and the RTP timestamp to carry the low half of the PTS.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::PacketError;

pub const RTP_VERSION: u8 = 2;
pub const RTP_HEADER_LEN: usize = 12;
pub const TRTP_PAYLOAD_TYPE: u8 = 100;

pub const EPOCH_MASK: u32 = (1 << 22) - 1;
pub const EPOCH_SHIFT: u32 = 10;

/// Build a TRTP SSRC from its epoch, program and substream parts.
pub fn make_ssrc(epoch: u32, program_id: u8, substream_id: u8) -> u32 {
    ((epoch & EPOCH_MASK) << EPOCH_SHIFT)
        | (((program_id & 0x1F) as u32) << 5)
        | (substream_id & 0x1F) as u32
}

/// Fields of the fixed RTP header the receiver cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Parse an RTP datagram, returning the header and its payload.
    pub fn parse(datagram: &Bytes) -> Result<(RtpHeader, Bytes), PacketError> {
        if datagram.len() < RTP_HEADER_LEN {
            return Err(PacketError::RtpTruncated(datagram.len()));
        }

        let b0 = datagram[0];
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(PacketError::RtpVersion(version));
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let b1 = datagram[1];
        let header = RtpHeader {
            marker: b1 & 0x80 != 0,
            payload_type: b1 & 0x7F,
            sequence_number: u16::from_be_bytes([datagram[2], datagram[3]]),
            timestamp: u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]),
            ssrc: u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]),
        };

        let mut start = RTP_HEADER_LEN + csrc_count * 4;
        if extension {
            if datagram.len() < start + 4 {
                return Err(PacketError::RtpTruncated(datagram.len()));
            }
            let words = u16::from_be_bytes([datagram[start + 2], datagram[start + 3]]) as usize;
            start += 4 + words * 4;
        }

        let mut end = datagram.len();
        if padding && end > start {
            let pad = datagram[end - 1] as usize;
            end = end.saturating_sub(pad);
        }
        if start > end {
            return Err(PacketError::RtpTruncated(datagram.len()));
        }

        Ok((header, datagram.slice(start..end)))
    }

    pub fn write(&self, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_LEN + payload.len());
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        buf.put_slice(payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_header() {
        let header = RtpHeader {
            marker: true,
            payload_type: TRTP_PAYLOAD_TYPE,
            sequence_number: 0xBEEF,
            timestamp: 0x1234_5678,
            ssrc: make_ssrc(3, 1, 2),
        };
        let datagram = header.write(&[9, 8, 7]);
        let (parsed, payload) = RtpHeader::parse(&datagram).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(payload.as_ref(), &[9, 8, 7]);
        assert_eq!(parsed.ssrc, (3 << 10) | (1 << 5) | 2);
    }

    #[test]
    fn test_skips_csrc_extension_and_padding() {
        let mut raw = vec![0x80 | 0x20 | 0x10 | 0x01, 100];
        raw.extend_from_slice(&[0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
        raw.extend_from_slice(&[0xAA; 4]); // one CSRC
        raw.extend_from_slice(&[0xBE, 0xDE, 0, 1, 0, 0, 0, 0]); // one-word extension
        raw.extend_from_slice(&[5, 6]);
        raw.extend_from_slice(&[0, 2]); // two bytes of padding

        let (header, payload) = RtpHeader::parse(&Bytes::from(raw)).unwrap();
        assert!(!header.marker);
        assert_eq!(header.sequence_number, 1);
        assert_eq!(payload.as_ref(), &[5, 6]);
    }

    #[test]
    fn test_rejects_bad_datagrams() {
        assert_eq!(
            RtpHeader::parse(&Bytes::from_static(&[0x80, 100, 0])),
            Err(PacketError::RtpTruncated(3))
        );
        let raw = Bytes::from(vec![0x40; 12]);
        assert_eq!(RtpHeader::parse(&raw), Err(PacketError::RtpVersion(1)));
    }
}
