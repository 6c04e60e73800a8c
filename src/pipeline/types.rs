//! Core types shared by the reassembler and the decoder pump

use bytes::Bytes;

/// Audio codec carried in a TRTP audio payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Invalid,
    PcmBigEndian,
    PcmLittleEndian,
    Mpeg1Audio,
    Aac,
}

impl CodecKind {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(CodecKind::Invalid),
            1 => Some(CodecKind::PcmBigEndian),
            2 => Some(CodecKind::PcmLittleEndian),
            3 => Some(CodecKind::Mpeg1Audio),
            4 => Some(CodecKind::Aac),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            CodecKind::Invalid => 0,
            CodecKind::PcmBigEndian => 1,
            CodecKind::PcmLittleEndian => 2,
            CodecKind::Mpeg1Audio => 3,
            CodecKind::Aac => 4,
        }
    }

    /// Only MPEG-1 audio and AAC can be decoded by the receiver.
    pub fn is_supported(self) -> bool {
        matches!(self, CodecKind::Mpeg1Audio | CodecKind::Aac)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            CodecKind::Mpeg1Audio => "audio/mpeg",
            CodecKind::Aac => "audio/mp4a-latm",
            CodecKind::PcmBigEndian | CodecKind::PcmLittleEndian => "audio/raw",
            CodecKind::Invalid => "",
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecKind::Invalid => write!(f, "Invalid"),
            CodecKind::PcmBigEndian => write!(f, "PCM (BE)"),
            CodecKind::PcmLittleEndian => write!(f, "PCM (LE)"),
            CodecKind::Mpeg1Audio => write!(f, "MP3"),
            CodecKind::Aac => write!(f, "AAC"),
        }
    }
}

/// Codec parameters a decoder needs before it can start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecFormat {
    Mp3 {
        sample_rate: u32,
        channels: u32,
    },
    Aac {
        sample_rate: u32,
        channels: u32,
        /// Opaque codec configuration (ESDS) trailing the AAC aux header
        codec_config: Option<Bytes>,
    },
}

impl CodecFormat {
    pub fn codec(&self) -> CodecKind {
        match self {
            CodecFormat::Mp3 { .. } => CodecKind::Mpeg1Audio,
            CodecFormat::Aac { .. } => CodecKind::Aac,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            CodecFormat::Mp3 { sample_rate, .. } | CodecFormat::Aac { sample_rate, .. } => {
                *sample_rate
            }
        }
    }

    pub fn channels(&self) -> u32 {
        match self {
            CodecFormat::Mp3 { channels, .. } | CodecFormat::Aac { channels, .. } => *channels,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            channels: self.channels(),
            sample_rate: self.sample_rate(),
        }
    }
}

impl std::fmt::Display for CodecFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}Hz x{}",
            self.codec(),
            self.sample_rate(),
            self.channels()
        )?;
        if let CodecFormat::Aac {
            codec_config: Some(config),
            ..
        } = self
        {
            write!(f, " (+{} bytes config)", config.len())?;
        }
        Ok(())
    }
}

/// PCM layout handed to the render sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub channels: u32,
    pub sample_rate: u32,
}

/// One complete encoded access unit
#[derive(Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub data: Bytes,
    /// Presentation timestamp in media time, when the transmitter sent one
    pub pts: Option<i64>,
    pub codec: CodecKind,
}

impl AccessUnit {
    pub fn new(data: Bytes, pts: Option<i64>, codec: CodecKind) -> Self {
        Self { data, pts, codec }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for AccessUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessUnit")
            .field("codec", &self.codec)
            .field("pts", &self.pts)
            .field("size", &self.len())
            .finish()
    }
}

/// Decoded PCM produced by a decode engine
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedUnit {
    pub data: Bytes,
    pub pts: Option<i64>,
}

impl std::fmt::Debug for DecodedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedUnit")
            .field("pts", &self.pts)
            .field("size", &self.data.len())
            .finish()
    }
}
