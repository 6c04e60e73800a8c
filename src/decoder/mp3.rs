//! MPEG audio frame header inspection
//!
//! The decoder needs sample rate and channel count before the first frame
//! can be decoded; both come from the 4-byte frame header.

/// Parameters read from one MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpegFrameInfo {
    pub sample_rate: u32,
    pub channels: u32,
    /// Bitrate in kbps
    pub bitrate: u32,
    /// Frame length in bytes, padding included
    pub frame_size: usize,
    /// PCM samples per channel the frame decodes to
    pub samples_per_frame: u32,
}

const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];

const BITRATE_V1_L1: [u32; 14] = [
    32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448,
];
const BITRATE_V2_L1: [u32; 14] = [
    32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256,
];
const BITRATE_V1_L2: [u32; 14] = [
    32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384,
];
const BITRATE_V1_L3: [u32; 14] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const BITRATE_V2_L23: [u32; 14] = [8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Parse the frame header at the start of `data`.
///
/// Returns `None` if there are fewer than 4 bytes, the sync word is missing,
/// or any field holds a reserved/free-format value.
pub fn parse_frame_header(data: &[u8]) -> Option<MpegFrameInfo> {
    if data.len() < 4 {
        return None;
    }
    let header = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);

    if header & 0xFFE0_0000 != 0xFFE0_0000 {
        return None;
    }

    // 0: MPEG 2.5, 1: reserved, 2: MPEG 2, 3: MPEG 1
    let version = (header >> 19) & 3;
    if version == 1 {
        return None;
    }

    // 1: Layer III, 2: Layer II, 3: Layer I
    let layer = (header >> 17) & 3;
    if layer == 0 {
        return None;
    }

    let bitrate_index = ((header >> 12) & 0x0F) as usize;
    if bitrate_index == 0 || bitrate_index == 0x0F {
        return None;
    }

    let sample_rate_index = ((header >> 10) & 3) as usize;
    if sample_rate_index == 3 {
        return None;
    }

    let mut sample_rate = SAMPLE_RATES_V1[sample_rate_index];
    match version {
        2 => sample_rate /= 2,
        0 => sample_rate /= 4,
        _ => {}
    }

    let padding = ((header >> 9) & 1) as usize;
    let is_v1 = version == 3;

    let (bitrate, frame_size) = if layer == 3 {
        let table = if is_v1 { &BITRATE_V1_L1 } else { &BITRATE_V2_L1 };
        let bitrate = table[bitrate_index - 1];
        let size = (12000 * bitrate as usize / sample_rate as usize + padding) * 4;
        (bitrate, size)
    } else {
        let table = match (is_v1, layer) {
            (true, 2) => &BITRATE_V1_L2,
            (true, _) => &BITRATE_V1_L3,
            (false, _) => &BITRATE_V2_L23,
        };
        let bitrate = table[bitrate_index - 1];
        let size = if !is_v1 && layer == 1 {
            72000 * bitrate as usize / sample_rate as usize + padding
        } else {
            144000 * bitrate as usize / sample_rate as usize + padding
        };
        (bitrate, size)
    };

    let samples_per_frame = match layer {
        3 => 384,
        2 => 1152,
        _ if is_v1 => 1152,
        _ => 576,
    };

    let channel_mode = (header >> 6) & 3;
    let channels = if channel_mode == 3 { 1 } else { 2 };

    Some(MpegFrameInfo {
        sample_rate,
        channels,
        bitrate,
        frame_size,
        samples_per_frame,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpeg1_layer3_stereo() {
        // 128kbps, 44.1kHz, joint stereo
        let info = parse_frame_header(&[0xFF, 0xFB, 0x90, 0x64]).unwrap();
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bitrate, 128);
        assert_eq!(info.frame_size, 417);
        assert_eq!(info.samples_per_frame, 1152);
    }

    #[test]
    fn test_mpeg2_layer3_mono() {
        // MPEG 2, 64kbps, 24kHz, mono
        let info = parse_frame_header(&[0xFF, 0xF3, 0x84, 0xC4]).unwrap();
        assert_eq!(info.sample_rate, 24000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.bitrate, 64);
        assert_eq!(info.frame_size, 192);
        assert_eq!(info.samples_per_frame, 576);
    }

    #[test]
    fn test_rejects_invalid_headers() {
        assert_eq!(parse_frame_header(&[0xFF, 0xFB, 0x90]), None);
        // no sync
        assert_eq!(parse_frame_header(&[0x12, 0x34, 0x56, 0x78]), None);
        // free-format bitrate
        assert_eq!(parse_frame_header(&[0xFF, 0xFB, 0x00, 0x64]), None);
        // reserved sample rate
        assert_eq!(parse_frame_header(&[0xFF, 0xFB, 0x9C, 0x64]), None);
        // reserved version
        assert_eq!(parse_frame_header(&[0xFF, 0xEB, 0x90, 0x64]), None);
    }
}
