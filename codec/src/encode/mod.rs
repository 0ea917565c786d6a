mod flac;
mod ogg;
mod wav;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use keymix_sound::Sound;

use crate::CodecError;

/// Ordered `TITLE`/`ARTIST`/... tag map carried into the container.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Wav,
    Ogg,
    Flac,
}

impl OutputFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("wav") {
            Some(Self::Wav)
        } else if ext.eq_ignore_ascii_case("ogg") {
            Some(Self::Ogg)
        } else if ext.eq_ignore_ascii_case("flac") {
            Some(Self::Flac)
        } else {
            None
        }
    }
}

/// Encode `sound` into `out`. `quality` in [0, 1] maps to backend-specific
/// parameters; WAV ignores it.
pub fn encode<W: std::io::Write>(
    sound: &Sound,
    format: OutputFormat,
    out: W,
    metadata: &Metadata,
    quality: f64,
) -> Result<(), CodecError> {
    log::info!(
        "encoding {} frames as {:?} (quality {quality})",
        sound.frames(),
        format
    );
    match format {
        OutputFormat::Wav => wav::encode(sound, out),
        OutputFormat::Ogg => ogg::encode(sound, out, metadata, quality),
        OutputFormat::Flac => flac::encode(sound, out, metadata),
    }
}

/// Encode to a file, deriving the container from the path extension.
pub fn save_path(
    sound: &Sound,
    path: impl AsRef<Path>,
    metadata: &Metadata,
    quality: f64,
) -> Result<(), CodecError> {
    let path = path.as_ref();
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(OutputFormat::from_extension)
        .ok_or_else(|| {
            CodecError::UnknownOutputFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_owned),
            )
        })?;
    let file = File::create(path)?;
    encode(sound, format, BufWriter::new(file), metadata, quality)
}
