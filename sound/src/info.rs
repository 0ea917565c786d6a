use crate::SoundError;

/// Numeric interpretation of one PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Unsigned,
    Signed,
    Float,
}

/// Immutable PCM format descriptor.
///
/// A *frame* is one sample per channel; all byte/frame/millisecond
/// conversions derive from this triple. 24-bit signed audio is stored as
/// packed 3-byte little-endian samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundInfo {
    pub kind: SampleKind,
    pub bits: u16,
    pub channels: u8,
    pub rate: u32,
}

impl SoundInfo {
    /// The renderer's canonical interchange format.
    pub const DEFAULT: SoundInfo = SoundInfo {
        kind: SampleKind::Signed,
        bits: 16,
        channels: 2,
        rate: 44100,
    };

    pub fn new(kind: SampleKind, bits: u16, channels: u8, rate: u32) -> Result<Self, SoundError> {
        let valid = match kind {
            SampleKind::Unsigned => matches!(bits, 8 | 16 | 32),
            SampleKind::Signed => matches!(bits, 8 | 16 | 24 | 32),
            SampleKind::Float => matches!(bits, 32 | 64),
        };
        if !valid || channels == 0 || rate == 0 {
            return Err(SoundError::InvalidFormat { kind, bits });
        }
        Ok(Self {
            kind,
            bits,
            channels,
            rate,
        })
    }

    #[inline]
    pub fn sample_bytes(&self) -> usize {
        self.bits as usize / 8
    }

    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.sample_bytes()
    }

    #[inline]
    pub fn bytes_from_frames(&self, frames: usize) -> usize {
        frames * self.frame_bytes()
    }

    #[inline]
    pub fn frames_from_bytes(&self, bytes: usize) -> usize {
        bytes / self.frame_bytes()
    }

    #[inline]
    pub fn frames_from_ms(&self, ms: u32) -> usize {
        (self.rate as f64 / 1000.0 * ms as f64) as usize
    }

    #[inline]
    pub fn bytes_from_ms(&self, ms: u32) -> usize {
        self.bytes_from_frames(self.frames_from_ms(ms))
    }

    #[inline]
    pub fn ms_from_frames(&self, frames: usize) -> f32 {
        (frames as f64 * 1000.0 / self.rate as f64) as f32
    }
}

impl Default for SoundInfo {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsigned_24bit() {
        assert!(SoundInfo::new(SampleKind::Unsigned, 24, 2, 44100).is_err());
    }

    #[test]
    fn rejects_odd_float_widths() {
        assert!(SoundInfo::new(SampleKind::Float, 16, 2, 44100).is_err());
        assert!(SoundInfo::new(SampleKind::Float, 64, 2, 44100).is_ok());
    }

    #[test]
    fn conversions_follow_the_format_triple() {
        let info = SoundInfo::DEFAULT;
        assert_eq!(info.frame_bytes(), 4);
        assert_eq!(info.bytes_from_frames(44100), 176400);
        assert_eq!(info.frames_from_ms(1000), 44100);
        assert_eq!(info.ms_from_frames(22050), 500.0);
    }

    #[test]
    fn packed_24bit_frame_size() {
        let info = SoundInfo::new(SampleKind::Signed, 24, 2, 48000).unwrap();
        assert_eq!(info.frame_bytes(), 6);
        assert_eq!(info.frames_from_bytes(60), 10);
    }
}
