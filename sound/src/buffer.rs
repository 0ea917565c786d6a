use byte_slice_cast::{AsByteSlice, AsMutByteSlice, AsMutSliceOf, AsSliceOf, ToByteSlice};

use crate::sample::{self, PcmSample};
use crate::{AudioSource, SampleKind, SoundError, SoundInfo};

/// Heap storage for PCM data, kept 8-byte aligned so the byte region can be
/// reinterpreted as any supported sample type.
#[derive(Clone, Default)]
struct AlignedBuf {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuf {
    fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::zeroed(bytes.len());
        buf.as_mut_slice().copy_from_slice(bytes);
        buf
    }

    #[inline]
    fn as_slice(&self) -> &[u8] {
        &self.words.as_byte_slice()[..self.len]
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.words.as_mut_byte_slice()[..len]
    }

    fn clear(&mut self) {
        self.words = Vec::new();
        self.len = 0;
    }
}

/// An owned, contiguous PCM buffer with its format descriptor.
///
/// Invariant: `total_bytes() == frames() * channels * bits/8`; an empty
/// buffer has zero sizes. Cloning copies the sample data; `swap` exchanges
/// two buffers wholesale.
#[derive(Clone, Default)]
pub struct Sound {
    info: SoundInfo,
    name: Option<String>,
    data: AlignedBuf,
    frames: usize,
    duration_ms: f32,
}

/// Dispatch one operation over the `(kind, bits)` matrix. `$generic`
/// receives the concrete sample type; `$packed` handles 3-byte 24-bit
/// samples. Invalid combinations are unconstructible through
/// [`SoundInfo::new`].
macro_rules! per_sample_type {
    ($info:expr, $generic:ident, $packed:ident) => {
        match ($info.kind, $info.bits) {
            (SampleKind::Unsigned, 8) => $generic!(u8),
            (SampleKind::Unsigned, 16) => $generic!(u16),
            (SampleKind::Unsigned, 32) => $generic!(u32),
            (SampleKind::Signed, 8) => $generic!(i8),
            (SampleKind::Signed, 16) => $generic!(i16),
            (SampleKind::Signed, 24) => $packed!(),
            (SampleKind::Signed, 32) => $generic!(i32),
            (SampleKind::Float, 32) => $generic!(f32),
            (SampleKind::Float, 64) => $generic!(f64),
            (kind, bits) => unreachable!("unvalidated sound format {:?} {}bit", kind, bits),
        }
    };
}

pub(crate) use per_sample_type;

fn mix_span(info: &SoundInfo, dst: &mut [u8], src: &[u8], samples: usize, gain: f32) {
    macro_rules! generic {
        ($t:ty) => {{
            let d = dst.as_mut_slice_of::<$t>().expect("pcm storage alignment");
            let s = src.as_slice_of::<$t>().expect("pcm storage alignment");
            if gain == 1.0 {
                sample::mix(d, s, samples)
            } else {
                sample::mix_scaled(d, s, samples, gain as f64)
            }
        }};
    }
    macro_rules! packed {
        () => {{
            if gain == 1.0 {
                sample::mix_s24(dst, src, samples)
            } else {
                sample::mix_s24_scaled(dst, src, samples, gain as f64)
            }
        }};
    }
    per_sample_type!(info, generic, packed)
}

fn copy_span(info: &SoundInfo, dst: &mut [u8], src: &[u8], samples: usize, gain: f32) {
    macro_rules! generic {
        ($t:ty) => {{
            let d = dst.as_mut_slice_of::<$t>().expect("pcm storage alignment");
            let s = src.as_slice_of::<$t>().expect("pcm storage alignment");
            if gain == 1.0 {
                sample::copy(d, s, samples)
            } else {
                sample::copy_scaled(d, s, samples, gain as f64)
            }
        }};
    }
    macro_rules! packed {
        () => {{
            if gain == 1.0 {
                sample::copy_s24(dst, src, samples)
            } else {
                sample::copy_s24_scaled(dst, src, samples, gain as f64)
            }
        }};
    }
    per_sample_type!(info, generic, packed)
}

fn level_span(info: &SoundInfo, src: &[u8], samples: usize) -> f32 {
    macro_rules! generic {
        ($t:ty) => {{
            let s = src.as_slice_of::<$t>().expect("pcm storage alignment");
            let mut sum = 0.0f64;
            for v in &s[..samples] {
                sum += (*v as f64).abs();
            }
            (sum / samples as f64 / <$t as PcmSample>::PEAK) as f32
        }};
    }
    macro_rules! packed {
        () => {{
            let mut sum = 0.0f64;
            for i in 0..samples {
                sum += (sample::read_s24(&src[i * 3..]) as f64).abs();
            }
            (sum / samples as f64 / sample::S24_MAX as f64) as f32
        }};
    }
    per_sample_type!(info, generic, packed)
}

impl Sound {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Allocate `frames` zeroed frames.
    pub fn alloc_frames(info: SoundInfo, frames: usize) -> Self {
        Self {
            info,
            name: None,
            data: AlignedBuf::zeroed(info.bytes_from_frames(frames)),
            frames,
            duration_ms: info.ms_from_frames(frames),
        }
    }

    /// Allocate `ms` milliseconds of silence.
    pub fn alloc_duration(info: SoundInfo, ms: u32) -> Self {
        Self::alloc_frames(info, info.frames_from_ms(ms))
    }

    /// Allocate from a byte size (rounded down to whole frames).
    pub fn alloc_bytes(info: SoundInfo, bytes: usize) -> Self {
        Self::alloc_frames(info, info.frames_from_bytes(bytes))
    }

    /// Take ownership of decoded interleaved samples.
    pub fn from_samples<T>(info: SoundInfo, samples: &[T]) -> Result<Self, SoundError>
    where
        T: PcmSample + ToByteSlice,
    {
        Self::from_bytes(info, samples.as_byte_slice())
    }

    /// Take ownership of a raw interleaved byte region.
    pub fn from_bytes(info: SoundInfo, bytes: &[u8]) -> Result<Self, SoundError> {
        let fb = info.frame_bytes();
        if bytes.len() % fb != 0 {
            return Err(SoundError::UnalignedBuffer(bytes.len(), fb));
        }
        let frames = bytes.len() / fb;
        Ok(Self {
            info,
            name: None,
            data: AlignedBuf::from_bytes(bytes),
            frames,
            duration_ms: info.ms_from_frames(frames),
        })
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.frames = 0;
        self.duration_ms = 0.0;
    }

    pub fn swap(&mut self, other: &mut Sound) {
        std::mem::swap(self, other);
    }

    #[inline]
    pub fn info(&self) -> &SoundInfo {
        &self.info
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.data.len
    }

    #[inline]
    pub fn duration_ms(&self) -> f32 {
        self.duration_ms
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.len == 0
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_slice()
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut_slice()
    }

    /// Saturating-add up to `frames` frames into `dst` starting at
    /// `cursor`, advancing it. Returns the frame count written.
    pub fn mix_frames(
        &self,
        dst: &mut [u8],
        cursor: &mut usize,
        frames: usize,
        gain: f32,
    ) -> usize {
        if self.is_empty() || *cursor >= self.frames {
            return 0;
        }
        let n = (self.frames - *cursor).min(frames);
        let samples = n * self.info.channels as usize;
        let src_off = self.info.bytes_from_frames(*cursor);
        let dst_len = self.info.bytes_from_frames(n);
        mix_span(
            &self.info,
            &mut dst[..dst_len],
            &self.data.as_slice()[src_off..],
            samples,
            gain,
        );
        *cursor += n;
        n
    }

    /// Overwrite variant of [`Sound::mix_frames`].
    pub fn copy_frames(
        &self,
        dst: &mut [u8],
        cursor: &mut usize,
        frames: usize,
        gain: f32,
    ) -> usize {
        if self.is_empty() || *cursor >= self.frames {
            return 0;
        }
        let n = (self.frames - *cursor).min(frames);
        let samples = n * self.info.channels as usize;
        let src_off = self.info.bytes_from_frames(*cursor);
        let dst_len = self.info.bytes_from_frames(n);
        copy_span(
            &self.info,
            &mut dst[..dst_len],
            &self.data.as_slice()[src_off..],
            samples,
            gain,
        );
        *cursor += n;
        n
    }

    /// Mean absolute sample level in [0, 1] over `sample_len` samples at
    /// frame `offset`.
    pub fn level(&self, offset_frames: usize, sample_len: usize) -> f32 {
        if self.frames <= offset_frames {
            return 0.0;
        }
        let ch = self.info.channels as usize;
        let scan = ((self.frames - offset_frames) * ch).min(sample_len);
        if scan == 0 {
            return 0.0;
        }
        let src_off = self.info.bytes_from_frames(offset_frames);
        level_span(&self.info, &self.data.as_slice()[src_off..], scan)
    }

    /// Convert into `target` (width, channel layout and rate), replacing
    /// the buffer contents. A no-op when the formats already match.
    pub fn set_format(&mut self, target: SoundInfo) -> Result<(), SoundError> {
        if self.info == target || self.is_empty() {
            self.info = target;
            return Ok(());
        }
        let mut converted = crate::resample::convert(self, &target)?;
        converted.name = self.name.take();
        *self = converted;
        Ok(())
    }

    /// Non-destructive variant of [`Sound::set_format`].
    pub fn resampled(&self, target: SoundInfo) -> Result<Sound, SoundError> {
        if self.info == target {
            return Ok(self.clone());
        }
        crate::resample::convert(self, &target)
    }
}

impl AudioSource for Sound {
    fn info(&self) -> SoundInfo {
        self.info
    }

    fn frames(&self) -> usize {
        self.frames
    }

    fn duration_ms(&self) -> f32 {
        self.duration_ms
    }

    fn mix_at(&self, dst: &mut [u8], cursor: &mut usize, frames: usize, gain: f32) -> usize {
        self.mix_frames(dst, cursor, frames, gain)
    }

    fn copy_at(&self, dst: &mut [u8], cursor: &mut usize, frames: usize, gain: f32) -> usize {
        self.copy_frames(dst, cursor, frames, gain)
    }

    fn level_at(&self, offset_frames: usize, sample_len: usize) -> f32 {
        self.level(offset_frames, sample_len)
    }
}
