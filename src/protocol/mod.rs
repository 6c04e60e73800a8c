//! TRTP wire format
//!
//! - `header`: receive-side header parser
//! - `packet`: transmit-side packet encoder and fragmenter
//! - `rtp`: fixed RTP header framing

pub mod header;
pub mod packet;
pub mod rtp;

pub use header::{AudioFlags, HeaderKind, TrtpHeader};
pub use packet::{AudioPayload, ControlCommand, EncodedPacket, PacketBody, TrtpPacket};
pub use rtp::RtpHeader;
