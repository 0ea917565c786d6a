use std::io::Cursor;

use hound::{SampleFormat, WavReader};
use keymix_sound::{sample, SampleKind, Sound, SoundInfo};

use crate::CodecError;

/// Decode RIFF/WAVE as stored: integer PCM keeps its width (8-bit stays
/// unsigned, 24-bit stays packed), float stays f32. Compressed payloads
/// (ADPCM et al.) are rejected by the reader.
pub fn decode(bytes: &[u8]) -> Result<Sound, CodecError> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = u8::try_from(spec.channels)
        .map_err(|_| CodecError::Wav(hound::Error::Unsupported))?;

    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => {
            let samples: Vec<f32> = reader
                .samples::<f32>()
                .collect::<Result<_, _>>()?;
            let info = SoundInfo::new(SampleKind::Float, 32, channels, spec.sample_rate)?;
            Ok(Sound::from_samples(info, &samples)?)
        }
        (SampleFormat::Int, 8) => {
            // stored unsigned; hound centers around zero
            let samples: Vec<u8> = reader
                .samples::<i8>()
                .map(|s| s.map(|v| (v as i16 + 128) as u8))
                .collect::<Result<_, _>>()?;
            let info = SoundInfo::new(SampleKind::Unsigned, 8, channels, spec.sample_rate)?;
            Ok(Sound::from_samples(info, &samples)?)
        }
        (SampleFormat::Int, 16) => {
            let samples: Vec<i16> = reader
                .samples::<i16>()
                .collect::<Result<_, _>>()?;
            let info = SoundInfo::new(SampleKind::Signed, 16, channels, spec.sample_rate)?;
            Ok(Sound::from_samples(info, &samples)?)
        }
        (SampleFormat::Int, 24) => {
            let wide: Vec<i32> = reader
                .samples::<i32>()
                .collect::<Result<_, _>>()?;
            let mut packed = vec![0u8; wide.len() * 3];
            for (i, v) in wide.iter().enumerate() {
                sample::write_s24(&mut packed[i * 3..], *v);
            }
            let info = SoundInfo::new(SampleKind::Signed, 24, channels, spec.sample_rate)?;
            Ok(Sound::from_bytes(info, &packed)?)
        }
        (SampleFormat::Int, 32) => {
            let samples: Vec<i32> = reader
                .samples::<i32>()
                .collect::<Result<_, _>>()?;
            let info = SoundInfo::new(SampleKind::Signed, 32, channels, spec.sample_rate)?;
            Ok(Sound::from_samples(info, &samples)?)
        }
        _ => Err(CodecError::Wav(hound::Error::Unsupported)),
    }
}
