//! PCM stream format descriptor

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// WAVE format tag for linear PCM
pub const FORMAT_PCM: u16 = 1;

/// WAVE format tag for WAVE_FORMAT_EXTENSIBLE
pub const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Everything that defines a PCM audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Sample encoding tag (always `FORMAT_PCM` once parsed)
    pub encoding: u16,
    pub channels: u16,
    pub rate: u32,
    pub bits: u16,
}

/// Audio CD
pub const CD: StreamFormat = StreamFormat {
    encoding: FORMAT_PCM,
    channels: 2,
    rate: 44_100,
    bits: 16,
};

/// Digital audio tape; the default playback format
pub const DAT: StreamFormat = StreamFormat {
    encoding: FORMAT_PCM,
    channels: 2,
    rate: 48_000,
    bits: 16,
};

/// High-resolution studio masters
pub const HI_RES: StreamFormat = StreamFormat {
    encoding: FORMAT_PCM,
    channels: 2,
    rate: 192_000,
    bits: 24,
};

impl StreamFormat {
    pub fn new(channels: u16, rate: u32, bits: u16) -> Self {
        Self {
            encoding: FORMAT_PCM,
            channels,
            rate,
            bits,
        }
    }

    /// Bytes used to store a single sample of a single channel
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits as usize + 7) / 8
    }

    /// Bytes per sample frame (one sample for every channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.bytes_per_frame() * self.rate as usize
    }

    /// Playback time of `bytes` worth of audio, rounded down to whole frames
    pub fn duration_of(&self, bytes: usize) -> TimeDelta {
        let bpf = self.bytes_per_frame();
        if bpf == 0 || self.rate == 0 {
            return TimeDelta::zero();
        }
        let frames = (bytes / bpf) as i64;
        TimeDelta::nanoseconds(frames * 1_000_000_000 / self.rate as i64)
    }

    /// Basic sanity: something a WAV header or an encoder could describe
    pub fn is_valid(&self) -> bool {
        self.channels > 0 && self.rate > 0 && self.bits > 0 && self.bits <= 32
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        DAT
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} channels, {}Hz, {} bits",
            self.channels, self.rate, self.bits
        )
    }
}
