use std::io::Write;

use keymix_sound::{SampleKind, Sound};

use crate::CodecError;

/// Write a canonical RIFF/WAVE/`fmt `/`data` file: a 44-byte header
/// followed by the raw interleaved samples. Integer PCM is format tag 1,
/// float is 3; `byte_rate` and `block_align` derive from the SoundInfo.
pub fn encode<W: Write>(sound: &Sound, mut out: W) -> Result<(), CodecError> {
    let info = sound.info();
    let data_len = sound.total_bytes() as u32;
    let byte_rate = info.rate * info.channels as u32 * info.bits as u32 / 8;
    let block_align = info.channels as u16 * info.bits / 8;
    let format_tag: u16 = match info.kind {
        SampleKind::Float => 3,
        _ => 1,
    };

    out.write_all(b"RIFF")?;
    out.write_all(&(36 + data_len).to_le_bytes())?;
    out.write_all(b"WAVE")?;
    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&format_tag.to_le_bytes())?;
    out.write_all(&(info.channels as u16).to_le_bytes())?;
    out.write_all(&info.rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&info.bits.to_le_bytes())?;
    out.write_all(b"data")?;
    out.write_all(&data_len.to_le_bytes())?;
    out.write_all(sound.as_bytes())?;
    out.flush()?;
    Ok(())
}
