use std::io::Cursor;

use keymix_sound::{SampleKind, Sound, SoundInfo};

use crate::CodecError;

/// Decode FLAC to integer PCM. 24-bit streams are promoted to a 32-bit
/// container (the sample values keep their 24-bit range).
pub fn decode(bytes: &[u8]) -> Result<Sound, CodecError> {
    let mut reader = claxon::FlacReader::new(Cursor::new(bytes))?;
    let streaminfo = reader.streaminfo();
    let channels = u8::try_from(streaminfo.channels)
        .map_err(|_| CodecError::FlacDecode(claxon::Error::Unsupported("channel count")))?;
    let rate = streaminfo.sample_rate;

    // samples() yields interleaved, sign-extended values
    let wide: Vec<i32> = reader.samples().collect::<Result<_, _>>()?;

    match streaminfo.bits_per_sample {
        8 => {
            let info = SoundInfo::new(SampleKind::Signed, 8, channels, rate)?;
            let samples: Vec<i8> = wide.iter().map(|v| *v as i8).collect();
            Ok(Sound::from_samples(info, &samples)?)
        }
        16 => {
            let info = SoundInfo::new(SampleKind::Signed, 16, channels, rate)?;
            let samples: Vec<i16> = wide.iter().map(|v| *v as i16).collect();
            Ok(Sound::from_samples(info, &samples)?)
        }
        24 | 32 => {
            let info = SoundInfo::new(SampleKind::Signed, 32, channels, rate)?;
            Ok(Sound::from_samples(info, &wide)?)
        }
        _ => Err(CodecError::FlacDecode(claxon::Error::Unsupported(
            "bit depth",
        ))),
    }
}
