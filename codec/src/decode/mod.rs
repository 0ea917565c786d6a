mod flac;
mod mp3;
mod ogg;
mod wav;

use std::path::Path;

use keymix_sound::{Sound, SoundInfo};

use crate::CodecError;

/// Audio container formats the decoder dispatch understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Wav,
    Ogg,
    Flac,
    Mp3,
}

/// Identify the container from the leading bytes, falling back to the
/// extension hint when no magic matches.
pub fn sniff(bytes: &[u8], ext_hint: Option<&str>) -> Result<Container, CodecError> {
    if bytes.len() < 4 {
        return Err(CodecError::ShortInput);
    }
    match &bytes[..4] {
        b"OggS" => return Ok(Container::Ogg),
        b"RIFF" => return Ok(Container::Wav),
        b"fLaC" => return Ok(Container::Flac),
        _ => {}
    }
    if bytes[..3] == *b"ID3" {
        return Ok(Container::Mp3);
    }
    if let Some(ext) = ext_hint {
        if ext.eq_ignore_ascii_case("ogg") {
            return Ok(Container::Ogg);
        } else if ext.eq_ignore_ascii_case("wav") {
            return Ok(Container::Wav);
        } else if ext.eq_ignore_ascii_case("flac") {
            return Ok(Container::Flac);
        } else if ext.eq_ignore_ascii_case("mp3") {
            return Ok(Container::Mp3);
        }
    }
    Err(CodecError::UnknownFormat(ext_hint.map(str::to_owned)))
}

/// Decode `bytes` into an owned PCM buffer in the backend's natural
/// format.
///
/// `preferred` is a best-effort hint: the Vorbis backend quantizes
/// directly to the requested sample kind and width (channel layout and
/// rate stay native); the other backends emit their natural format and the
/// caller converts.
pub fn decode(
    bytes: &[u8],
    ext_hint: Option<&str>,
    preferred: Option<&SoundInfo>,
) -> Result<Sound, CodecError> {
    let container = sniff(bytes, ext_hint)?;
    log::debug!("decoding {} bytes as {:?}", bytes.len(), container);
    match container {
        Container::Wav => wav::decode(bytes),
        Container::Ogg => ogg::decode(bytes, preferred),
        Container::Flac => flac::decode(bytes),
        Container::Mp3 => mp3::decode(bytes),
    }
}

/// Read and decode a file, using its extension as the format hint.
pub fn load_path(
    path: impl AsRef<Path>,
    preferred: Option<&SoundInfo>,
) -> Result<Sound, CodecError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|e| e.to_str());
    let mut sound = decode(&bytes, ext, preferred)?;
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        sound.set_name(name);
    }
    if let Some(info) = preferred {
        if sound.info() != info {
            sound.set_format(*info)?;
        }
    }
    Ok(sound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_prefers_magic_over_extension() {
        assert_eq!(
            sniff(b"OggS\x00rest", Some("wav")).unwrap(),
            Container::Ogg
        );
        assert_eq!(sniff(b"RIFF\x10\x00\x00\x00", None).unwrap(), Container::Wav);
        assert_eq!(sniff(b"fLaC....", None).unwrap(), Container::Flac);
        assert_eq!(sniff(b"ID3\x04....", None).unwrap(), Container::Mp3);
    }

    #[test]
    fn sniff_falls_back_to_extension() {
        assert_eq!(sniff(&[0u8; 16], Some("OGG")).unwrap(), Container::Ogg);
        assert_eq!(sniff(&[0u8; 16], Some("Mp3")).unwrap(), Container::Mp3);
        assert!(sniff(&[0u8; 16], Some("txt")).is_err());
        assert!(sniff(&[0u8; 16], None).is_err());
    }

    #[test]
    fn short_input_is_rejected() {
        assert!(matches!(
            sniff(b"Ogg", Some("ogg")),
            Err(CodecError::ShortInput)
        ));
    }
}
