mod channel;
mod midi;
mod mixer;
mod pool;

pub use channel::Channel;
pub use midi::{event_from_status, MidiEventKind, MidiSound};
pub use mixer::{Mixer, MAX_AUDIBLE_CHANNELS};
pub use pool::{
    ChartEvents, ChartMidiCommand, ChartNote, KeyEventKind, KeySoundEvent, KeySoundPool,
    ResourceDir,
};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixerError {
    #[error(transparent)]
    Codec(#[from] keymix_codec::CodecError),
    #[error(transparent)]
    Sound(#[from] keymix_sound::SoundError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("soundfont {0}: {1}")]
    SoundFont(PathBuf, String),
    #[error("synthesizer: {0}")]
    Synth(String),
}
