use std::io::Cursor;

use keymix_sound::{SampleKind, Sound, SoundInfo};
use minimp3::{Decoder, Error};

use crate::CodecError;

/// Decode MPEG layer 3 to 16-bit signed PCM.
pub fn decode(bytes: &[u8]) -> Result<Sound, CodecError> {
    let mut decoder = Decoder::new(Cursor::new(bytes));
    let mut samples: Vec<i16> = Vec::new();
    let mut channels = 0u8;
    let mut rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if rate == 0 {
                    rate = frame.sample_rate as u32;
                    channels = frame.channels as u8;
                }
                samples.extend_from_slice(&frame.data);
            }
            Err(Error::Eof) => break,
            Err(e) => {
                if samples.is_empty() {
                    return Err(CodecError::Mp3Decode(format!("{e:?}")));
                }
                // keep what decoded so far; trailing garbage is common
                log::warn!("mp3 stream ended early: {e:?}");
                break;
            }
        }
    }

    if rate == 0 {
        return Err(CodecError::Mp3Decode("no decodable frames".into()));
    }
    let info = SoundInfo::new(SampleKind::Signed, 16, channels, rate)?;
    Ok(Sound::from_samples(info, &samples)?)
}
