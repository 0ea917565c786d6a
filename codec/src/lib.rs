mod decode;
mod encode;

pub use decode::{decode, load_path, sniff, Container};
pub use encode::{encode, save_path, Metadata, OutputFormat};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("input too short to identify a container")]
    ShortInput,
    #[error("unrecognized audio container (extension hint: {0:?})")]
    UnknownFormat(Option<String>),
    #[error("unrecognized output extension: {0:?}")]
    UnknownOutputFormat(Option<String>),
    #[error(transparent)]
    Sound(#[from] keymix_sound::SoundError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("wav: {0}")]
    Wav(#[from] hound::Error),
    #[error("vorbis decode: {0}")]
    VorbisDecode(#[from] lewton::VorbisError),
    #[error("flac decode: {0}")]
    FlacDecode(#[from] claxon::Error),
    #[error("mp3 decode: {0}")]
    Mp3Decode(String),
    #[error("vorbis encode: {0}")]
    VorbisEncode(#[from] vorbis_rs::VorbisError),
    #[error("flac encode: {0}")]
    FlacEncode(String),
}
