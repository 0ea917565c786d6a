//! PCM format conversion: sample width, channel layout and sample rate.
//!
//! Values travel through a normalised f64 intermediate so width changes are
//! value-space proportional (`s8 -> s16` is exactly `x * 32767 / 127`). Rate
//! conversion is linear interpolation between adjacent source frames.

use byte_slice_cast::AsSliceOf;

use crate::buffer::per_sample_type;
use crate::sample;
use crate::{SampleKind, Sound, SoundError, SoundInfo};

fn read_normalized(src: &Sound) -> Vec<f64> {
    let info = *src.info();
    let samples = src.frames() * info.channels as usize;
    let bytes = src.as_bytes();
    let mut out = Vec::with_capacity(samples);

    macro_rules! generic {
        ($t:ty) => {{
            let s = bytes.as_slice_of::<$t>().expect("pcm storage alignment");
            for v in &s[..samples] {
                out.push(normalize_int(*v as f64, info.kind, info.bits));
            }
        }};
    }
    macro_rules! packed {
        () => {{
            for i in 0..samples {
                out.push(sample::read_s24(&bytes[i * 3..]) as f64 / sample::S24_MAX as f64);
            }
        }};
    }
    per_sample_type!(info, generic, packed);
    out
}

#[inline]
fn normalize_int(v: f64, kind: SampleKind, bits: u16) -> f64 {
    match kind {
        SampleKind::Float => v,
        SampleKind::Signed => v / signed_max(bits),
        SampleKind::Unsigned => {
            let half = (1u64 << (bits - 1)) as f64;
            (v - half) / (half - 1.0)
        }
    }
}

#[inline]
fn signed_max(bits: u16) -> f64 {
    ((1u64 << (bits - 1)) - 1) as f64
}

fn write_normalized(values: &[f64], info: SoundInfo) -> Sound {
    let mut out = Sound::alloc_frames(info, values.len() / info.channels as usize);
    {
        let bytes = out.as_bytes_mut();
        macro_rules! generic {
            ($t:ty) => {{
                use byte_slice_cast::AsMutSliceOf;
                let dst = bytes.as_mut_slice_of::<$t>().expect("pcm storage alignment");
                for (d, v) in dst.iter_mut().zip(values) {
                    *d = denormalize(*v, info.kind, info.bits) as $t;
                }
            }};
        }
        macro_rules! packed {
            () => {{
                for (i, v) in values.iter().enumerate() {
                    let x = (v * sample::S24_MAX as f64).round();
                    sample::write_s24(&mut bytes[i * 3..], x as i32);
                }
            }};
        }
        per_sample_type!(info, generic, packed);
    }
    out
}

#[inline]
fn denormalize(v: f64, kind: SampleKind, bits: u16) -> f64 {
    match kind {
        SampleKind::Float => v,
        SampleKind::Signed => {
            let max = signed_max(bits);
            (v * max).round().clamp(-max - 1.0, max)
        }
        SampleKind::Unsigned => {
            let half = (1u64 << (bits - 1)) as f64;
            (v * (half - 1.0) + half)
                .round()
                .clamp(0.0, half * 2.0 - 1.0)
        }
    }
}

fn convert_channels(samples: Vec<f64>, from: u8, to: u8) -> Result<Vec<f64>, SoundError> {
    match (from, to) {
        (a, b) if a == b => Ok(samples),
        (1, 2) => {
            let mut out = Vec::with_capacity(samples.len() * 2);
            for s in samples {
                out.push(s);
                out.push(s);
            }
            Ok(out)
        }
        (2, 1) => {
            let mut out = Vec::with_capacity(samples.len() / 2);
            for pair in samples.chunks_exact(2) {
                out.push((pair[0] + pair[1]) * 0.5);
            }
            Ok(out)
        }
        (a, b) => Err(SoundError::UnsupportedChannelLayout(a, b)),
    }
}

fn convert_rate(samples: Vec<f64>, channels: usize, from: u32, to: u32) -> Vec<f64> {
    if from == to {
        return samples;
    }
    let src_frames = samples.len() / channels;
    if src_frames == 0 {
        return samples;
    }
    let dst_frames = (src_frames as f64 * to as f64 / from as f64) as usize;
    let step = from as f64 / to as f64;
    let mut out = Vec::with_capacity(dst_frames * channels);
    for i in 0..dst_frames {
        let pos = i as f64 * step;
        let i0 = (pos as usize).min(src_frames - 1);
        let i1 = (i0 + 1).min(src_frames - 1);
        let frac = pos - i0 as f64;
        for ch in 0..channels {
            let a = samples[i0 * channels + ch];
            let b = samples[i1 * channels + ch];
            out.push(a * (1.0 - frac) + b * frac);
        }
    }
    out
}

pub(crate) fn convert(src: &Sound, target: &SoundInfo) -> Result<Sound, SoundError> {
    let from = *src.info();
    let samples = read_normalized(src);
    let samples = convert_channels(samples, from.channels, target.channels)?;
    let samples = convert_rate(samples, target.channels as usize, from.rate, target.rate);
    Ok(write_normalized(&samples, *target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SampleKind;

    fn info(kind: SampleKind, bits: u16, channels: u8, rate: u32) -> SoundInfo {
        SoundInfo::new(kind, bits, channels, rate).unwrap()
    }

    #[test]
    fn s8_to_s16_is_proportional() {
        let src = Sound::from_samples(info(SampleKind::Signed, 8, 1, 44100), &[127i8, -127, 0])
            .unwrap();
        let out = src
            .resampled(info(SampleKind::Signed, 16, 1, 44100))
            .unwrap();
        let bytes = out.as_bytes();
        let v: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(v, vec![32767, -32767, 0]);
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let src = Sound::from_samples(SoundInfo::new(SampleKind::Signed, 16, 1, 44100).unwrap(),
            &[100i16, -100]).unwrap();
        let out = src.resampled(SoundInfo::DEFAULT).unwrap();
        assert_eq!(out.frames(), 2);
        let v: Vec<i16> = out
            .as_bytes()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(v, vec![100, 100, -100, -100]);
    }

    #[test]
    fn stereo_to_mono_averages() {
        let src = Sound::from_samples(SoundInfo::DEFAULT, &[100i16, 300, -50, -150]).unwrap();
        let out = src
            .resampled(info(SampleKind::Signed, 16, 1, 44100))
            .unwrap();
        let v: Vec<i16> = out
            .as_bytes()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(v, vec![200, -100]);
    }

    #[test]
    fn unsupported_channel_pairs_error() {
        let src = Sound::alloc_frames(info(SampleKind::Signed, 16, 6, 44100), 8);
        assert!(src.resampled(SoundInfo::DEFAULT).is_err());
    }

    #[test]
    fn rate_doubling_interpolates_midpoints() {
        let src =
            Sound::from_samples(info(SampleKind::Float, 32, 1, 22050), &[0.0f32, 1.0]).unwrap();
        let out = src.resampled(info(SampleKind::Float, 32, 1, 44100)).unwrap();
        assert_eq!(out.frames(), 4);
        let v = out
            .as_bytes()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect::<Vec<_>>();
        assert_eq!(v[0], 0.0);
        assert!((v[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn s24_packed_round_trip() {
        let s24 = info(SampleKind::Signed, 24, 1, 44100);
        let mut bytes = [0u8; 6];
        sample::write_s24(&mut bytes[0..], 0x40_0000);
        sample::write_s24(&mut bytes[3..], -0x40_0000);
        let src = Sound::from_bytes(s24, &bytes).unwrap();
        let out = src.resampled(info(SampleKind::Signed, 16, 1, 44100)).unwrap();
        let v: Vec<i16> = out
            .as_bytes()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        // half of full scale within rounding
        assert!((v[0] as i32 - 16384).abs() <= 1);
        assert!((v[1] as i32 + 16384).abs() <= 1);
    }
}
