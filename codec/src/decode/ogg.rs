use std::io::Cursor;

use lewton::inside_ogg::OggStreamReader;
use lewton::samples::InterleavedSamples;
use keymix_sound::{sample, SampleKind, Sound, SoundInfo};

use crate::CodecError;

/// Decode Ogg Vorbis. The natural output is 32-bit float; when `preferred`
/// asks for another sample kind/width the float samples are quantized on
/// the fly (channel count and rate stay native).
pub fn decode(bytes: &[u8], preferred: Option<&SoundInfo>) -> Result<Sound, CodecError> {
    let mut reader = OggStreamReader::new(Cursor::new(bytes))?;
    let channels = reader.ident_hdr.audio_channels;
    let rate = reader.ident_hdr.audio_sample_rate;

    let mut samples: Vec<f32> = Vec::new();
    while let Some(packet) = reader.read_dec_packet_generic::<InterleavedSamples<f32>>()? {
        samples.extend_from_slice(&packet.samples);
    }
    // partial trailing frames cannot happen, but guard the invariant
    samples.truncate(samples.len() / channels as usize * channels as usize);

    match preferred {
        Some(want) if !matches!((want.kind, want.bits), (SampleKind::Float, 32)) => {
            quantize(&samples, want.kind, want.bits, channels, rate)
        }
        _ => {
            let info = SoundInfo::new(SampleKind::Float, 32, channels, rate)?;
            Ok(Sound::from_samples(info, &samples)?)
        }
    }
}

fn quantize(
    samples: &[f32],
    kind: SampleKind,
    bits: u16,
    channels: u8,
    rate: u32,
) -> Result<Sound, CodecError> {
    let info = SoundInfo::new(kind, bits, channels, rate)?;

    macro_rules! signed {
        ($t:ty, $max:expr) => {{
            let out: Vec<$t> = samples
                .iter()
                .map(|v| {
                    (*v as f64 * $max as f64 + 0.5)
                        .floor()
                        .clamp(-($max as f64) - 1.0, $max as f64) as $t
                })
                .collect();
            Ok(Sound::from_samples(info, &out)?)
        }};
    }
    macro_rules! unsigned {
        ($t:ty, $half:expr) => {{
            let out: Vec<$t> = samples
                .iter()
                .map(|v| {
                    ((*v as f64 + 1.0) * ($half as f64 - 1.0) + 0.5)
                        .floor()
                        .clamp(0.0, $half as f64 * 2.0 - 1.0) as $t
                })
                .collect();
            Ok(Sound::from_samples(info, &out)?)
        }};
    }

    match (kind, bits) {
        (SampleKind::Signed, 8) => signed!(i8, 127i32),
        (SampleKind::Signed, 16) => signed!(i16, 32767i32),
        (SampleKind::Signed, 32) => signed!(i32, 2147483647i64),
        (SampleKind::Signed, 24) => {
            let mut packed = vec![0u8; samples.len() * 3];
            for (i, v) in samples.iter().enumerate() {
                let x = (*v as f64 * sample::S24_MAX as f64 + 0.5).floor();
                sample::write_s24(&mut packed[i * 3..], x as i32);
            }
            Ok(Sound::from_bytes(info, &packed)?)
        }
        (SampleKind::Unsigned, 8) => unsigned!(u8, 128i32),
        (SampleKind::Unsigned, 16) => unsigned!(u16, 32768i32),
        (SampleKind::Unsigned, 32) => unsigned!(u32, 2147483648i64),
        (SampleKind::Float, 64) => {
            let out: Vec<f64> = samples.iter().map(|v| *v as f64).collect();
            Ok(Sound::from_samples(info, &out)?)
        }
        // Float/32 is handled by the natural path
        _ => {
            let out: Vec<f32> = samples.to_vec();
            Ok(Sound::from_samples(info, &out)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16_values(sound: &Sound) -> Vec<i16> {
        sound
            .as_bytes()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn signed_quantization_rounds_to_nearest() {
        let samples = [100.6 / 32767.0f32, -100.6 / 32767.0, 1.0, -1.0];
        let out = quantize(&samples, SampleKind::Signed, 16, 1, 44100).unwrap();
        assert_eq!(s16_values(&out), vec![101, -101, 32767, -32767]);
    }

    #[test]
    fn packed_24bit_quantization_rounds_to_nearest() {
        let samples = [0.5f32, -0.5];
        let out = quantize(&samples, SampleKind::Signed, 24, 1, 44100).unwrap();
        assert_eq!(sample::read_s24(&out.as_bytes()[0..]), 4_194_304);
        assert_eq!(sample::read_s24(&out.as_bytes()[3..]), -4_194_303);
    }

    #[test]
    fn unsigned_quantization_matches_signed_rounding() {
        let samples = [0.0f32, 1.0, -1.0];
        let out = quantize(&samples, SampleKind::Unsigned, 8, 1, 44100).unwrap();
        assert_eq!(out.as_bytes(), &[127, 254, 0]);
    }
}
