//! Sample format and stream specification types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum accepted sample rate.
pub const RATE_MAX: u32 = 192_000;

/// Maximum accepted channel count.
pub const CHANNELS_MAX: u8 = 32;

/// PCM sample formats understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Unsigned 8 bit.
    U8,
    /// 8 bit a-law.
    Alaw,
    /// 8 bit mu-law.
    Ulaw,
    /// Signed 16 bit, little endian.
    S16Le,
    /// Signed 16 bit, big endian.
    S16Be,
    /// 32 bit IEEE float, little endian.
    F32Le,
    /// 32 bit IEEE float, big endian.
    F32Be,
}

impl SampleFormat {
    /// Signed 16 bit in native byte order.
    #[cfg(target_endian = "little")]
    pub const S16NE: SampleFormat = SampleFormat::S16Le;
    #[cfg(target_endian = "big")]
    pub const S16NE: SampleFormat = SampleFormat::S16Be;

    /// 32 bit float in native byte order.
    #[cfg(target_endian = "little")]
    pub const F32NE: SampleFormat = SampleFormat::F32Le;
    #[cfg(target_endian = "big")]
    pub const F32NE: SampleFormat = SampleFormat::F32Be;

    /// Size of a single sample in bytes.
    pub fn sample_size(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::Alaw | SampleFormat::Ulaw => 1,
            SampleFormat::S16Le | SampleFormat::S16Be => 2,
            SampleFormat::F32Le | SampleFormat::F32Be => 4,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            SampleFormat::U8 => 0,
            SampleFormat::Alaw => 1,
            SampleFormat::Ulaw => 2,
            SampleFormat::S16Le => 3,
            SampleFormat::S16Be => 4,
            SampleFormat::F32Le => 5,
            SampleFormat::F32Be => 6,
        }
    }

    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SampleFormat::U8),
            1 => Some(SampleFormat::Alaw),
            2 => Some(SampleFormat::Ulaw),
            3 => Some(SampleFormat::S16Le),
            4 => Some(SampleFormat::S16Be),
            5 => Some(SampleFormat::F32Le),
            6 => Some(SampleFormat::F32Be),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::Alaw => "alaw",
            SampleFormat::Ulaw => "ulaw",
            SampleFormat::S16Le => "s16le",
            SampleFormat::S16Be => "s16be",
            SampleFormat::F32Le => "f32le",
            SampleFormat::F32Be => "f32be",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete sample specification: format, rate and channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpec {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u8,
}

impl SampleSpec {
    pub fn new(format: SampleFormat, rate: u32, channels: u8) -> Self {
        Self {
            format,
            rate,
            channels,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.rate > 0 && self.rate <= RATE_MAX && self.channels > 0 && self.channels <= CHANNELS_MAX
    }

    /// Size of one frame (one sample per channel) in bytes.
    pub fn frame_size(&self) -> usize {
        self.format.sample_size() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.frame_size() * self.rate as usize
    }

    /// Playback time covered by `len` bytes of audio in this spec.
    pub fn bytes_to_duration(&self, len: usize) -> Duration {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros((len as u64).saturating_mul(1_000_000) / bps as u64)
    }
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ch {}Hz {}", self.channels, self.rate, self.format)
    }
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            format: SampleFormat::S16NE,
            rate: 44_100,
            channels: 2,
        }
    }
}
