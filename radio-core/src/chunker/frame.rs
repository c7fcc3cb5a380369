//! MPEG audio frame headers
//!
//! Only what is needed to find frame boundaries and pace playback: version,
//! layer, bitrate, sample rate and padding. CRC, mode and emphasis bits are
//! ignored.

use chrono::TimeDelta;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    I,
    II,
    III,
}

impl MpegVersion {
    fn table_index(self) -> usize {
        match self {
            MpegVersion::Mpeg1 => 0,
            MpegVersion::Mpeg2 => 1,
            MpegVersion::Mpeg25 => 2,
        }
    }
}

impl Layer {
    fn table_index(self) -> usize {
        match self {
            Layer::I => 0,
            Layer::II => 1,
            Layer::III => 2,
        }
    }
}

/// Bitrates in kbps, by [MPEG-1 or not][layer][bitrate index]
const BITRATES: [[[u32; 15]; 3]; 2] = [
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    ],
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    ],
];

/// Sample rates in Hz, by [version][sample rate index]
const SAMPLE_RATES: [[u32; 3]; 3] = [
    [44_100, 48_000, 32_000],
    [22_050, 24_000, 16_000],
    [11_025, 12_000, 8_000],
];

/// Nominal frame durations in ns, by [version][layer][sample rate index]
const DURATIONS: [[[i64; 3]; 3]; 3] = [
    // MPEG-1: 384, 1152 and 1152 samples per frame
    [
        [8_707_483, 8_000_000, 12_000_000],
        [26_122_449, 24_000_000, 36_000_000],
        [26_122_449, 24_000_000, 36_000_000],
    ],
    // MPEG-2: 384, 1152 and 576 samples per frame
    [
        [17_414_966, 16_000_000, 24_000_000],
        [52_244_898, 48_000_000, 72_000_000],
        [26_122_449, 24_000_000, 36_000_000],
    ],
    // MPEG-2.5
    [
        [34_829_932, 32_000_000, 48_000_000],
        [104_489_796, 96_000_000, 144_000_000],
        [52_244_898, 48_000_000, 72_000_000],
    ],
];

/// A parsed 4-byte MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    bitrate_index: u8,
    sample_rate_index: u8,
    pub padding: bool,
}

impl FrameHeader {
    /// Length of the header itself
    pub const LEN: usize = 4;

    /// Parse the header at the start of `bytes`. Returns `None` for anything
    /// that is not a usable header: no sync, reserved version or layer, free
    /// or bad bitrate, reserved sample rate.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN {
            return None;
        }
        let (a, b, c) = (bytes[0], bytes[1], bytes[2]);

        let sync = ((a as u16) << 4 | (b as u16) >> 4) & 0xffe;
        if sync != 0xffe {
            return None;
        }

        let version = match (b >> 3) & 0x03 {
            0b11 => MpegVersion::Mpeg1,
            0b10 => MpegVersion::Mpeg2,
            0b00 => MpegVersion::Mpeg25,
            _ => return None,
        };
        let layer = match (b >> 1) & 0x03 {
            0b11 => Layer::I,
            0b10 => Layer::II,
            0b01 => Layer::III,
            _ => return None,
        };

        let bitrate_index = c >> 4;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let sample_rate_index = (c & 0x0c) >> 2;
        if sample_rate_index == 3 {
            return None;
        }

        Some(Self {
            version,
            layer,
            bitrate_index,
            sample_rate_index,
            padding: (c >> 1) & 0x01 == 1,
        })
    }

    /// Bitrate in kbps
    pub fn bitrate(&self) -> u32 {
        let lsf = usize::from(self.version != MpegVersion::Mpeg1);
        BITRATES[lsf][self.layer.table_index()][self.bitrate_index as usize]
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.version.table_index()][self.sample_rate_index as usize]
    }

    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (Layer::I, _) => 384,
            (Layer::II, _) | (Layer::III, MpegVersion::Mpeg1) => 1152,
            (Layer::III, _) => 576,
        }
    }

    /// Total frame length in bytes, header included
    pub fn frame_size(&self) -> usize {
        let bitrate = self.bitrate() as usize * 1000;
        let rate = self.sample_rate() as usize;
        let padding = usize::from(self.padding);
        match (self.layer, self.version) {
            (Layer::I, _) => (12 * bitrate / rate + padding) * 4,
            (Layer::II, _) | (Layer::III, MpegVersion::Mpeg1) => 144 * bitrate / rate + padding,
            (Layer::III, _) => 72 * bitrate / rate + padding,
        }
    }

    /// Playback time of one frame
    pub fn duration(&self) -> TimeDelta {
        TimeDelta::nanoseconds(
            DURATIONS[self.version.table_index()][self.layer.table_index()]
                [self.sample_rate_index as usize],
        )
    }

    /// Whether `other` could be the next frame of the same stream
    pub fn is_compatible(&self, other: &FrameHeader) -> bool {
        self.version == other.version
            && self.layer == other.layer
            && self.sample_rate_index == other.sample_rate_index
    }
}

impl fmt::Display for MpegVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpegVersion::Mpeg1 => write!(f, "MPEG-1"),
            MpegVersion::Mpeg2 => write!(f, "MPEG-2"),
            MpegVersion::Mpeg25 => write!(f, "MPEG-2.5"),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::I => write!(f, "I"),
            Layer::II => write!(f, "II"),
            Layer::III => write!(f, "III"),
        }
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} layer {}; {}Hz {}kbps",
            self.version,
            self.layer,
            self.sample_rate(),
            self.bitrate()
        )
    }
}

/// Header bytes for the given table indices
#[cfg(test)]
pub(crate) fn encode_header(
    version: MpegVersion,
    layer: Layer,
    bitrate_index: u8,
    sample_rate_index: u8,
    padding: bool,
) -> [u8; 4] {
    let version_bits = match version {
        MpegVersion::Mpeg1 => 0b11,
        MpegVersion::Mpeg2 => 0b10,
        MpegVersion::Mpeg25 => 0b00,
    };
    let layer_bits = match layer {
        Layer::I => 0b11,
        Layer::II => 0b10,
        Layer::III => 0b01,
    };
    [
        0xff,
        0xe0 | version_bits << 3 | layer_bits << 1 | 0x01,
        bitrate_index << 4 | sample_rate_index << 2 | u8::from(padding) << 1,
        0xc4,
    ]
}
