//! Offline sound effector: volume scale, pitch change and SOLA tempo
//! change. The three passes are independent and compose in the order
//! volume, then pitch, then tempo.

use byte_slice_cast::{AsMutSliceOf, AsSliceOf, FromByteSlice, ToByteSlice};

use crate::buffer::per_sample_type;
use crate::sample::{self, PcmSample};
use crate::{SampleKind, Sound, SoundError};

/// Frames per SOLA segment. Too small a segment is indistinguishable from
/// plain pitch resampling at 44100 Hz.
const SOLA_SEGMENT_FRAMES: usize = 2048;

/// Frames in the SOLA search window and cross-fade. Must stay a multiple
/// of 8 for the unrolled correlation loops.
const SOLA_OVERLAP_FRAMES: usize = 32;

/// Intermediate right-shift applied to integer correlation products so the
/// running sums stay in range.
const CORR_DIVIDER_BITS: u32 = 2;

pub struct Effector {
    tempo: f64,
    pitch: f64,
    volume: f64,
}

impl Default for Effector {
    fn default() -> Self {
        Self::new()
    }
}

impl Effector {
    pub fn new() -> Self {
        Self {
            tempo: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }

    /// Length multiplier; pitch is preserved (SOLA).
    pub fn set_tempo(&mut self, tempo: f64) {
        self.tempo = tempo;
    }

    /// Playback-rate ratio; duration shrinks by the same factor.
    pub fn set_pitch(&mut self, pitch: f64) {
        self.pitch = pitch;
    }

    /// Shift pitch by `ratio` while keeping the overall duration: the
    /// pitch pass shortens by `ratio`, the tempo pass stretches back.
    pub fn set_pitch_keep_duration(&mut self, ratio: f64) {
        self.pitch = ratio;
        self.tempo = ratio;
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
    }

    /// Apply the configured passes to `s` in place.
    pub fn apply(&self, s: &mut Sound) -> Result<(), SoundError> {
        if self.volume < 0.0 {
            return Err(SoundError::Domain("volume must be >= 0"));
        }
        if self.pitch <= 0.0 {
            return Err(SoundError::Domain("pitch must be > 0"));
        }
        if self.tempo <= 0.0 {
            return Err(SoundError::Domain("tempo must be > 0"));
        }
        if s.is_empty() {
            return Ok(());
        }
        log::debug!(
            "effector pass: volume {} pitch {} tempo {} over {} frames",
            self.volume,
            self.pitch,
            self.tempo,
            s.frames()
        );

        if self.volume != 1.0 {
            volume_in_place(s, self.volume);
        }
        if self.pitch != 1.0 {
            let mut shifted = pitch_resample(s, self.pitch)?;
            s.swap(&mut shifted);
        }
        if self.tempo != 1.0 {
            let mut stretched = tempo_resample(s, self.tempo)?;
            s.swap(&mut stretched);
        }
        Ok(())
    }
}

fn volume_in_place(s: &mut Sound, volume: f64) {
    let info = *s.info();
    let samples = s.frames() * info.channels as usize;
    let bytes = s.as_bytes_mut();
    macro_rules! generic {
        ($t:ty) => {{
            let data = bytes.as_mut_slice_of::<$t>().expect("pcm storage alignment");
            for v in &mut data[..samples] {
                *v = v.scale(volume);
            }
        }};
    }
    macro_rules! packed {
        () => {{
            for i in 0..samples {
                let v = sample::read_s24(&bytes[i * 3..]) as f64 * volume;
                sample::write_s24(
                    &mut bytes[i * 3..],
                    v.clamp(sample::S24_MIN as f64, sample::S24_MAX as f64) as i32,
                );
            }
        }};
    }
    per_sample_type!(info, generic, packed)
}

/// Sample-index remap: destination frame `i` reads source frame
/// `floor(i * pitch)`. No anti-aliasing; key sounds are short and the
/// caller picks the ratio.
fn pitch_resample(s: &Sound, pitch: f64) -> Result<Sound, SoundError> {
    let info = *s.info();
    let channels = info.channels as usize;
    let src_frames = s.frames();
    let dst_frames = (src_frames as f64 / pitch) as usize;

    macro_rules! generic {
        ($t:ty) => {{
            let src = s
                .as_bytes()
                .as_slice_of::<$t>()
                .expect("pcm storage alignment");
            let out = pitch_remap(src, src_frames, channels, dst_frames, pitch);
            Sound::from_samples(info, &out)
        }};
    }
    macro_rules! packed {
        () => {{
            let src = s.as_bytes();
            let mut out = vec![0u8; dst_frames * channels * 3];
            for i in 0..dst_frames {
                let sf = ((i as f64 * pitch) as usize).min(src_frames - 1);
                let so = sf * channels * 3;
                let do_ = i * channels * 3;
                out[do_..do_ + channels * 3].copy_from_slice(&src[so..so + channels * 3]);
            }
            Sound::from_bytes(info, &out)
        }};
    }
    per_sample_type!(info, generic, packed)
}

fn pitch_remap<T: PcmSample>(
    src: &[T],
    src_frames: usize,
    channels: usize,
    dst_frames: usize,
    pitch: f64,
) -> Vec<T> {
    let mut out = vec![T::default(); dst_frames * channels];
    if channels == 1 {
        // fast path for mono
        for (i, d) in out.iter_mut().enumerate() {
            *d = src[((i as f64 * pitch) as usize).min(src_frames - 1)];
        }
    } else {
        for i in 0..dst_frames {
            let sf = ((i as f64 * pitch) as usize).min(src_frames - 1);
            for ch in 0..channels {
                out[i * channels + ch] = src[sf * channels + ch];
            }
        }
    }
    out
}

/// Sample types the SOLA tempo pass operates on natively.
trait TempoSample: PcmSample + FromByteSlice + ToByteSlice {
    /// Cross-correlation of `a` against `b`, normalised by `sqrt(sum(a^2))`.
    fn cross_corr(a: &[Self], b: &[Self]) -> f64;

    /// `*dst += src * coef` without saturating surprises; the fade ramps
    /// keep the sum below full scale.
    fn fade_add(dst: &mut Self, src: Self, coef: f64);
}

macro_rules! impl_tempo_int {
    ($($t:ty),*) => {$(
        impl TempoSample for $t {
            fn cross_corr(a: &[Self], b: &[Self]) -> f64 {
                let n = a.len().min(b.len());
                let mut corr: i64 = 0;
                let mut norm: i64 = 0;
                let mut i = 0;
                while i + 4 <= n {
                    corr += (a[i] as i64 * b[i] as i64
                        + a[i + 1] as i64 * b[i + 1] as i64)
                        >> CORR_DIVIDER_BITS;
                    corr += (a[i + 2] as i64 * b[i + 2] as i64
                        + a[i + 3] as i64 * b[i + 3] as i64)
                        >> CORR_DIVIDER_BITS;
                    norm += (a[i] as i64 * a[i] as i64
                        + a[i + 1] as i64 * a[i + 1] as i64)
                        >> CORR_DIVIDER_BITS;
                    norm += (a[i + 2] as i64 * a[i + 2] as i64
                        + a[i + 3] as i64 * a[i + 3] as i64)
                        >> CORR_DIVIDER_BITS;
                    i += 4;
                }
                let norm = norm as f64;
                corr as f64 / if norm < 1e-9 { 1.0 } else { norm.sqrt() }
            }

            #[inline]
            fn fade_add(dst: &mut Self, src: Self, coef: f64) {
                *dst = dst.saturating_add((src as f64 * coef) as $t);
            }
        }
    )*};
}

impl_tempo_int!(i16, i32, u16, u32);

macro_rules! impl_tempo_float {
    ($($t:ty),*) => {$(
        impl TempoSample for $t {
            fn cross_corr(a: &[Self], b: &[Self]) -> f64 {
                let n = a.len().min(b.len());
                let mut corr = 0.0f64;
                let mut norm = 0.0f64;
                for i in 0..n {
                    corr += a[i] as f64 * b[i] as f64;
                    norm += a[i] as f64 * a[i] as f64;
                }
                corr / if norm < 1e-9 { 1.0 } else { norm.sqrt() }
            }

            #[inline]
            fn fade_add(dst: &mut Self, src: Self, coef: f64) {
                *dst += (src as f64 * coef) as $t;
            }
        }
    )*};
}

impl_tempo_float!(f32, f64);

/// SOLA time stretch: output length is `frames * length` with pitch
/// preserved by splicing segments at the most-correlated join.
fn tempo_resample(s: &Sound, length: f64) -> Result<Sound, SoundError> {
    let info = *s.info();
    macro_rules! generic {
        ($t:ty) => {{
            sola_typed::<$t>(s, length)
        }};
    }
    macro_rules! unsupported {
        () => {{
            Err(SoundError::UnsupportedEffect {
                op: "tempo",
                kind: info.kind,
                bits: info.bits,
            })
        }};
    }
    match (info.kind, info.bits) {
        (SampleKind::Unsigned, 16) => generic!(u16),
        (SampleKind::Unsigned, 32) => generic!(u32),
        (SampleKind::Signed, 16) => generic!(i16),
        (SampleKind::Signed, 32) => generic!(i32),
        (SampleKind::Float, 32) => generic!(f32),
        (SampleKind::Float, 64) => generic!(f64),
        _ => unsupported!(),
    }
}

fn sola_typed<T: TempoSample>(s: &Sound, length: f64) -> Result<Sound, SoundError> {
    let info = *s.info();
    let channels = info.channels as usize;
    let src = s
        .as_bytes()
        .as_slice_of::<T>()
        .expect("pcm storage alignment");
    let src_frames = s.frames();
    let out = sola(src, src_frames, channels, length);
    Sound::from_samples(info, &out)
}

fn sola<T: TempoSample>(src: &[T], src_frames: usize, channels: usize, length: f64) -> Vec<T> {
    let overlap = SOLA_OVERLAP_FRAMES;
    let dst_frames = (src_frames as f64 * length) as usize;
    let mut dst = vec![T::default(); dst_frames * channels];
    if dst_frames == 0 || src_frames == 0 {
        return dst;
    }
    let mut current = 0usize;

    while current < dst_frames {
        let mut segment = SOLA_SEGMENT_FRAMES;
        let mut end_fade = true;
        if current + segment >= dst_frames {
            end_fade = false;
            segment = dst_frames - current;
        }
        // the first segment has no previous tail to fade against; sources
        // shorter than one segment degenerate to repeated plain copies
        let begin_fade = current > 0 && src_frames > SOLA_SEGMENT_FRAMES && segment >= overlap;
        let plain = segment
            .saturating_sub(overlap * begin_fade as usize)
            .saturating_sub(overlap * end_fade as usize)
            .min(src_frames);

        let mut expected = (src_frames as f64 * current as f64 / dst_frames as f64) as usize;
        if expected > src_frames - segment.min(src_frames) {
            expected = src_frames - segment.min(src_frames);
        }

        let chosen = if begin_fade {
            let lo = expected.saturating_sub(overlap);
            let hi = (expected + overlap - 1)
                .min(src_frames - segment)
                .min(src_frames - overlap);
            let compare = &dst[current * channels..(current + overlap) * channels];
            let mut best = lo;
            let mut best_corr = f64::MIN;
            for cand in lo..=hi {
                let probe = &src[cand * channels..(cand + overlap) * channels];
                let corr = T::cross_corr(probe, compare);
                // strictly-greater keeps the lowest offset on ties
                if corr > best_corr {
                    best_corr = corr;
                    best = cand;
                }
            }
            best
        } else {
            expected
        };

        let mut sp = chosen * channels;
        let mut dp = current * channels;

        if begin_fade {
            fade_mix(&mut dst[dp..], &src[sp..], overlap, channels, true);
            sp += overlap * channels;
            dp += overlap * channels;
        }

        let span = plain * channels;
        dst[dp..dp + span].copy_from_slice(&src[sp..sp + span]);
        sp += span;
        dp += span;

        if end_fade && sp / channels + overlap <= src_frames {
            fade_mix(&mut dst[dp..], &src[sp..], overlap, channels, false);
        }

        current += segment - overlap * end_fade as usize;
    }

    dst
}

/// Linear cross-fade over `frames` frames: coefficients ramp `i/(n+1)` in
/// and `1 - i/(n+1)` out, added on top of the already-written data.
fn fade_mix<T: TempoSample>(
    dst: &mut [T],
    src: &[T],
    frames: usize,
    channels: usize,
    ramp_in: bool,
) {
    let mut idx = 0;
    for i in 1..=frames {
        let a = i as f64 / (frames + 1) as f64;
        let coef = if ramp_in { a } else { 1.0 - a };
        for _ in 0..channels {
            T::fade_add(&mut dst[idx], src[idx], coef);
            idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SoundInfo;

    fn sine(freq: f64, seconds: f64, info: SoundInfo) -> Sound {
        let frames = (info.rate as f64 * seconds) as usize;
        let channels = info.channels as usize;
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let v = (2.0 * std::f64::consts::PI * freq * i as f64 / info.rate as f64).sin();
            let s = (v * 20000.0) as i16;
            for _ in 0..channels {
                samples.push(s);
            }
        }
        Sound::from_samples(info, &samples).unwrap()
    }

    /// Dominant frequency via a coarse Goertzel scan, one channel.
    fn dominant_freq(s: &Sound, lo: u32, hi: u32) -> u32 {
        use byte_slice_cast::AsSliceOf;
        let info = *s.info();
        let channels = info.channels as usize;
        let data = s.as_bytes().as_slice_of::<i16>().unwrap();
        let n = s.frames().min(32768);
        let mut best = lo;
        let mut best_power = 0.0f64;
        for freq in lo..=hi {
            let w = 2.0 * std::f64::consts::PI * freq as f64 / info.rate as f64;
            let coef = 2.0 * w.cos();
            let (mut s0, mut s1, mut s2) = (0.0f64, 0.0, 0.0);
            for i in 0..n {
                s0 = data[i * channels] as f64 + coef * s1 - s2;
                s2 = s1;
                s1 = s0;
            }
            let power = s1 * s1 + s2 * s2 - coef * s1 * s2;
            if power > best_power {
                best_power = power;
                best = freq;
            }
        }
        best
    }

    #[test]
    fn identity_composition_is_a_no_op() {
        let src = sine(440.0, 0.2, SoundInfo::DEFAULT);
        let mut out = src.clone();
        let effector = Effector::new();
        effector.apply(&mut out).unwrap();
        assert_eq!(out.frames(), src.frames());
        assert_eq!(out.as_bytes(), src.as_bytes());
    }

    #[test]
    fn pitch_length_law() {
        let src = sine(440.0, 0.5, SoundInfo::DEFAULT);
        let mut out = src.clone();
        let mut effector = Effector::new();
        effector.set_pitch(2.0);
        effector.apply(&mut out).unwrap();
        let expect = (src.frames() as f64 / 2.0) as usize;
        assert!((out.frames() as i64 - expect as i64).abs() <= 1);
    }

    #[test]
    fn tempo_length_law() {
        let src = sine(440.0, 0.8, SoundInfo::DEFAULT);
        let mut out = src.clone();
        let mut effector = Effector::new();
        effector.set_tempo(0.666);
        effector.apply(&mut out).unwrap();
        let expect = (src.frames() as f64 * 0.666) as usize;
        assert!((out.frames() as i64 - expect as i64).abs() <= 1);
    }

    #[test]
    fn tempo_preserves_dominant_frequency() {
        let src = sine(440.0, 3.0, SoundInfo::DEFAULT);
        let mut out = src.clone();
        let mut effector = Effector::new();
        effector.set_tempo(0.666);
        effector.apply(&mut out).unwrap();
        let freq = dominant_freq(&out, 420, 460);
        assert!((freq as i64 - 440).abs() <= 3, "dominant {freq} Hz");
    }

    #[test]
    fn pitch_doubles_dominant_frequency() {
        let src = sine(440.0, 1.0, SoundInfo::DEFAULT);
        let mut out = src.clone();
        let mut effector = Effector::new();
        effector.set_pitch(2.0);
        effector.apply(&mut out).unwrap();
        let freq = dominant_freq(&out, 840, 920);
        assert!((freq as i64 - 880).abs() <= 3, "dominant {freq} Hz");
    }

    #[test]
    fn pitch_keep_duration_preserves_length() {
        let src = sine(440.0, 1.0, SoundInfo::DEFAULT);
        let mut out = src.clone();
        let mut effector = Effector::new();
        effector.set_pitch_keep_duration(1.5);
        effector.apply(&mut out).unwrap();
        // frames/1.5 through the pitch pass, then stretched back by 1.5
        let drift = out.frames() as i64 - src.frames() as i64;
        assert!(drift.abs() <= 2, "drift {drift}");
        let freq = dominant_freq(&out, 620, 700);
        assert!((freq as i64 - 660).abs() <= 4, "dominant {freq} Hz");
    }

    #[test]
    fn volume_scales_and_saturates() {
        let info = SoundInfo::DEFAULT;
        let src = Sound::from_samples(info, &[1000i16, -1000, 30000, -30000]).unwrap();
        let mut out = src.clone();
        let mut effector = Effector::new();
        effector.set_volume(2.0);
        effector.apply(&mut out).unwrap();
        let v: Vec<i16> = out
            .as_bytes()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(v, vec![2000, -2000, i16::MAX, i16::MIN]);
    }

    #[test]
    fn tempo_rejects_zero_and_packed_widths() {
        let mut s = sine(440.0, 0.1, SoundInfo::DEFAULT);
        let mut effector = Effector::new();
        effector.set_tempo(0.0);
        assert!(effector.apply(&mut s).is_err());

        let s24 = SoundInfo::new(SampleKind::Signed, 24, 2, 44100).unwrap();
        let mut s = Sound::alloc_duration(s24, 100);
        let mut effector = Effector::new();
        effector.set_tempo(0.5);
        assert!(effector.apply(&mut s).is_err());
    }
}
