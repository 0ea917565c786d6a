use std::io::Write;

use byte_slice_cast::AsSliceOf;
use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::error::Verify;
use keymix_sound::{sample, SampleKind, Sound, SoundInfo};

use crate::CodecError;

/// FLAC via the pure-Rust encoder. The default prediction parameters
/// stand in for libFLAC compression level 5; a VORBIS_COMMENT block built
/// from the metadata map is spliced in after STREAMINFO.
pub fn encode<W: Write>(
    sound: &Sound,
    mut out: W,
    metadata: &crate::Metadata,
) -> Result<(), CodecError> {
    let (samples, bits) = to_flac_samples(sound)?;
    let info = sound.info();

    let config = flacenc::config::Encoder::default()
        .into_verified()
        .map_err(|_| CodecError::FlacEncode("invalid encoder configuration".into()))?;
    let source = flacenc::source::MemSource::from_samples(
        &samples,
        info.channels as usize,
        bits as usize,
        info.rate as usize,
    );
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| CodecError::FlacEncode(format!("{e:?}")))?;

    let mut sink = ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|e| CodecError::FlacEncode(format!("{e:?}")))?;

    let tagged = splice_vorbis_comment(sink.as_slice(), metadata)?;
    out.write_all(&tagged)?;
    out.flush()?;
    Ok(())
}

/// Interleaved i32 samples in the value range of the returned bit width.
/// Float and unsigned inputs detour through signed 16-bit; 32-bit integers
/// are reduced to the encoder's 24-bit ceiling.
fn to_flac_samples(sound: &Sound) -> Result<(Vec<i32>, u16), CodecError> {
    let info = *sound.info();
    match (info.kind, info.bits) {
        (SampleKind::Signed, 8) => {
            let s = sound
                .as_bytes()
                .as_slice_of::<i8>()
                .expect("pcm storage alignment");
            Ok((s.iter().map(|v| *v as i32).collect(), 8))
        }
        (SampleKind::Signed, 16) => {
            let s = sound
                .as_bytes()
                .as_slice_of::<i16>()
                .expect("pcm storage alignment");
            Ok((s.iter().map(|v| *v as i32).collect(), 16))
        }
        (SampleKind::Signed, 24) => {
            let bytes = sound.as_bytes();
            let n = sound.frames() * info.channels as usize;
            let mut s = Vec::with_capacity(n);
            for i in 0..n {
                s.push(sample::read_s24(&bytes[i * 3..]));
            }
            Ok((s, 24))
        }
        (SampleKind::Signed, 32) => {
            let s = sound
                .as_bytes()
                .as_slice_of::<i32>()
                .expect("pcm storage alignment");
            Ok((s.iter().map(|v| v >> 8).collect(), 24))
        }
        _ => {
            let s16 = sound.resampled(SoundInfo::new(
                SampleKind::Signed,
                16,
                info.channels,
                info.rate,
            )?)?;
            let s = s16
                .as_bytes()
                .as_slice_of::<i16>()
                .expect("pcm storage alignment")
                .iter()
                .map(|v| *v as i32)
                .collect();
            Ok((s, 16))
        }
    }
}

const BLOCK_VORBIS_COMMENT: u8 = 4;
const LAST_BLOCK_FLAG: u8 = 0x80;

/// Insert a VORBIS_COMMENT metadata block directly after STREAMINFO.
fn splice_vorbis_comment(stream: &[u8], metadata: &crate::Metadata) -> Result<Vec<u8>, CodecError> {
    if stream.len() < 8 || &stream[..4] != b"fLaC" {
        return Err(CodecError::FlacEncode("malformed encoder output".into()));
    }
    let header = stream[4];
    let was_last = header & LAST_BLOCK_FLAG != 0;
    let len = u32::from_be_bytes([0, stream[5], stream[6], stream[7]]) as usize;
    let streaminfo_end = 8 + len;
    if stream.len() < streaminfo_end {
        return Err(CodecError::FlacEncode("truncated STREAMINFO".into()));
    }

    let mut body = Vec::new();
    let vendor = b"keymix";
    body.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    body.extend_from_slice(vendor);
    body.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    for (key, value) in metadata {
        let entry = format!("{key}={value}");
        body.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        body.extend_from_slice(entry.as_bytes());
    }

    let mut out = Vec::with_capacity(stream.len() + body.len() + 4);
    out.extend_from_slice(b"fLaC");
    out.push(header & !LAST_BLOCK_FLAG);
    out.extend_from_slice(&stream[5..streaminfo_end]);
    out.push(BLOCK_VORBIS_COMMENT | if was_last { LAST_BLOCK_FLAG } else { 0 });
    let body_len = (body.len() as u32).to_be_bytes();
    out.extend_from_slice(&body_len[1..4]);
    out.extend_from_slice(&body);
    out.extend_from_slice(&stream[streaminfo_end..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_block_is_spliced_after_streaminfo() {
        // minimal fake stream: fLaC + last STREAMINFO of 4 bytes + frames
        let mut stream = Vec::new();
        stream.extend_from_slice(b"fLaC");
        stream.push(LAST_BLOCK_FLAG); // STREAMINFO, last
        stream.extend_from_slice(&[0, 0, 4]);
        stream.extend_from_slice(&[1, 2, 3, 4]);
        stream.extend_from_slice(b"FRAMES");

        let mut metadata = crate::Metadata::new();
        metadata.insert("TITLE".into(), "t".into());

        let out = splice_vorbis_comment(&stream, &metadata).unwrap();
        assert_eq!(&out[..4], b"fLaC");
        // STREAMINFO no longer last
        assert_eq!(out[4], 0);
        // inserted block is a last VORBIS_COMMENT
        assert_eq!(out[12], BLOCK_VORBIS_COMMENT | LAST_BLOCK_FLAG);
        assert!(out.ends_with(b"FRAMES"));
    }
}
