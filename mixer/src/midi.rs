use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use keymix_sound::{AudioSource, SampleKind, Sound, SoundInfo};
use parking_lot::Mutex;
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};

use crate::MixerError;

pub const MIDI_CHANNELS: usize = 16;

/// MIDI short-message events understood by the streaming adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEventKind {
    NoteOn,
    NoteOff,
    KeyPressure,
    MainVolume,
    Pan,
    Expression,
    Sustain,
    AllSoundsOff,
    ResetControllers,
    AllNotesOff,
    ToneBank,
    Program,
    PitchWheel,
}

/// Decode a raw status byte (plus its first data byte) following the
/// MIDI 1.0 short-message taxonomy. SysEx and meta events return `None`.
pub fn event_from_status(status: u8, a: u8) -> Option<MidiEventKind> {
    if status == 0xF0 || status == 0xF7 || status == 0xFF {
        return None;
    }
    if status & 0x80 == 0 {
        return None;
    }
    match (status >> 4) & 0x07 {
        0 => Some(MidiEventKind::NoteOff),
        1 => Some(MidiEventKind::NoteOn),
        2 => Some(MidiEventKind::KeyPressure),
        3 => match a & 0x7F {
            7 => Some(MidiEventKind::MainVolume),
            10 => Some(MidiEventKind::Pan),
            11 => Some(MidiEventKind::Expression),
            64 => Some(MidiEventKind::Sustain),
            120 => Some(MidiEventKind::AllSoundsOff),
            121 => Some(MidiEventKind::ResetControllers),
            123 => Some(MidiEventKind::AllNotesOff),
            0 => Some(MidiEventKind::ToneBank),
            _ => None,
        },
        4 => Some(MidiEventKind::Program),
        6 => Some(MidiEventKind::PitchWheel),
        _ => None,
    }
}

struct BankSlot {
    font: Arc<SoundFont>,
    refs: usize,
}

/// The synthesizer sound bank is process-global: first adapter
/// construction loads it, the last drop releases it.
static SOUND_BANK: Mutex<Option<BankSlot>> = Mutex::new(None);

fn acquire_bank(config: Option<&Path>) -> Result<Option<Arc<SoundFont>>, MixerError> {
    let mut slot = SOUND_BANK.lock();
    if let Some(bank) = slot.as_mut() {
        bank.refs += 1;
        return Ok(Some(bank.font.clone()));
    }
    let Some(path) = config else {
        log::warn!("no soundfont configured; MIDI events will synthesize silence");
        return Ok(None);
    };
    let mut file = File::open(path)?;
    let font = SoundFont::new(&mut file)
        .map_err(|e| MixerError::SoundFont(path.to_path_buf(), format!("{e:?}")))?;
    let font = Arc::new(font);
    *slot = Some(BankSlot {
        font: font.clone(),
        refs: 1,
    });
    log::info!("loaded soundfont {}", path.display());
    Ok(Some(font))
}

fn release_bank() {
    let mut slot = SOUND_BANK.lock();
    if let Some(bank) = slot.as_mut() {
        bank.refs -= 1;
        if bank.refs == 0 {
            *slot = None;
        }
    }
}

#[derive(Clone, Copy)]
struct ChannelState {
    default_key: u8,
    velocity: u8,
}

struct SynthState {
    synth: Option<Synthesizer>,
    left: Vec<f32>,
    right: Vec<f32>,
    channels: [ChannelState; MIDI_CHANNELS],
}

/// A virtual streaming sound backed by the software synthesizer: every
/// `mix`/`copy` pulls freshly rendered PCM, so the frame cursor and
/// end-of-buffer logic of ordinary sounds do not apply.
pub struct MidiSound {
    info: SoundInfo,
    holds_bank: bool,
    state: Mutex<SynthState>,
}

impl MidiSound {
    pub fn new(info: SoundInfo, config: Option<&Path>) -> Result<Self, MixerError> {
        let bank = acquire_bank(config)?;
        let holds_bank = bank.is_some();
        let synth = match &bank {
            Some(font) => Some(
                Synthesizer::new(font, &SynthesizerSettings::new(info.rate as i32))
                    .map_err(|e| MixerError::Synth(format!("{e:?}")))?,
            ),
            None => None,
        };
        Ok(Self {
            info,
            holds_bank,
            state: Mutex::new(SynthState {
                synth,
                left: Vec::new(),
                right: Vec::new(),
                channels: [ChannelState {
                    default_key: 60,
                    velocity: 100,
                }; MIDI_CHANNELS],
            }),
        })
    }

    pub fn set_default_key(&self, channel: u8, key: u8) {
        self.state.lock().channels[channel as usize % MIDI_CHANNELS].default_key = key;
    }

    pub fn set_velocity(&self, channel: u8, velocity: u8) {
        self.state.lock().channels[channel as usize % MIDI_CHANNELS].velocity = velocity;
    }

    /// Key-on with the channel's current velocity.
    pub fn play_key(&self, channel: u8, key: u8) {
        let mut state = self.state.lock();
        let velocity = state.channels[channel as usize % MIDI_CHANNELS].velocity;
        if let Some(synth) = state.synth.as_mut() {
            synth.note_on(channel as i32, key as i32, velocity as i32);
        }
    }

    pub fn stop_key(&self, channel: u8, key: u8) {
        let mut state = self.state.lock();
        if let Some(synth) = state.synth.as_mut() {
            synth.note_off(channel as i32, key as i32);
        }
    }

    pub fn play(&self, channel: u8) {
        let key = self.state.lock().channels[channel as usize % MIDI_CHANNELS].default_key;
        self.play_key(channel, key);
    }

    pub fn stop(&self, channel: u8) {
        let key = self.state.lock().channels[channel as usize % MIDI_CHANNELS].default_key;
        self.stop_key(channel, key);
    }

    /// Inject one decoded short message.
    pub fn send_event(&self, channel: u8, kind: MidiEventKind, a: u8, b: u8) {
        let mut state = self.state.lock();
        let Some(synth) = state.synth.as_mut() else {
            return;
        };
        let ch = channel as i32;
        let (a, b) = (a as i32, b as i32);
        match kind {
            MidiEventKind::NoteOn => synth.note_on(ch, a, b),
            MidiEventKind::NoteOff => synth.note_off(ch, a),
            MidiEventKind::KeyPressure => synth.process_midi_message(ch, 0xA0, a, b),
            MidiEventKind::MainVolume => synth.process_midi_message(ch, 0xB0, 7, a),
            MidiEventKind::Pan => synth.process_midi_message(ch, 0xB0, 10, a),
            MidiEventKind::Expression => synth.process_midi_message(ch, 0xB0, 11, a),
            MidiEventKind::Sustain => synth.process_midi_message(ch, 0xB0, 64, a),
            MidiEventKind::AllSoundsOff => synth.process_midi_message(ch, 0xB0, 120, 0),
            MidiEventKind::ResetControllers => synth.process_midi_message(ch, 0xB0, 121, 0),
            MidiEventKind::AllNotesOff => synth.process_midi_message(ch, 0xB0, 123, 0),
            MidiEventKind::ToneBank => synth.process_midi_message(ch, 0xB0, 0, a),
            MidiEventKind::Program => synth.process_midi_message(ch, 0xC0, a, 0),
            MidiEventKind::PitchWheel => synth.process_midi_message(ch, 0xE0, a, b),
        }
    }

    /// Render `frames` frames and hand them back converted to the
    /// adapter's output format.
    fn render_block(&self, frames: usize) -> Option<Sound> {
        let mut state = self.state.lock();
        state.left.resize(frames, 0.0);
        state.right.resize(frames, 0.0);
        state.left.fill(0.0);
        state.right.fill(0.0);
        let SynthState {
            synth, left, right, ..
        } = &mut *state;
        synth.as_mut()?.render(&mut left[..], &mut right[..]);

        let mut interleaved = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            interleaved.push(left[i]);
            interleaved.push(right[i]);
        }
        let stereo_f32 = SoundInfo {
            kind: SampleKind::Float,
            bits: 32,
            channels: 2,
            rate: self.info.rate,
        };
        let block = Sound::from_samples(stereo_f32, &interleaved).ok()?;
        block.resampled(self.info).ok()
    }
}

impl Drop for MidiSound {
    fn drop(&mut self) {
        if self.holds_bank {
            release_bank();
        }
    }
}

impl AudioSource for MidiSound {
    fn info(&self) -> SoundInfo {
        self.info
    }

    fn frames(&self) -> usize {
        // self-paced; the mixer never sees an end of buffer
        usize::MAX
    }

    fn duration_ms(&self) -> f32 {
        0.0
    }

    fn is_streaming(&self) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        false
    }

    fn mix_at(&self, dst: &mut [u8], cursor: &mut usize, frames: usize, gain: f32) -> usize {
        let Some(block) = self.render_block(frames) else {
            *cursor += frames;
            return frames;
        };
        let mut pos = 0;
        block.mix_frames(dst, &mut pos, frames, gain);
        *cursor += frames;
        frames
    }

    fn copy_at(&self, dst: &mut [u8], cursor: &mut usize, frames: usize, gain: f32) -> usize {
        dst[..self.info.bytes_from_frames(frames)].fill(0);
        let Some(block) = self.render_block(frames) else {
            *cursor += frames;
            return frames;
        };
        let mut pos = 0;
        block.copy_frames(dst, &mut pos, frames, gain);
        *cursor += frames;
        frames
    }

    fn level_at(&self, _offset_frames: usize, _sample_len: usize) -> f32 {
        // the synthesizer has no lookahead window to meter; rank it as
        // always audible
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte_taxonomy() {
        assert_eq!(event_from_status(0x80, 0), Some(MidiEventKind::NoteOff));
        assert_eq!(event_from_status(0x93, 0), Some(MidiEventKind::NoteOn));
        assert_eq!(event_from_status(0xB0, 7), Some(MidiEventKind::MainVolume));
        assert_eq!(event_from_status(0xB1, 64), Some(MidiEventKind::Sustain));
        assert_eq!(event_from_status(0xB0, 123), Some(MidiEventKind::AllNotesOff));
        assert_eq!(event_from_status(0xC5, 0), Some(MidiEventKind::Program));
        assert_eq!(event_from_status(0xE0, 0), Some(MidiEventKind::PitchWheel));
        // SysEx, meta and running-status data bytes are ignored
        assert_eq!(event_from_status(0xF0, 0), None);
        assert_eq!(event_from_status(0xFF, 0), None);
        assert_eq!(event_from_status(0x45, 0), None);
    }

    #[test]
    fn silent_adapter_reports_full_frames() {
        let midi = MidiSound::new(SoundInfo::DEFAULT, None).unwrap();
        assert!(midi.is_streaming());
        let mut out = vec![0u8; SoundInfo::DEFAULT.bytes_from_frames(64)];
        let mut cursor = 0;
        assert_eq!(midi.mix_at(&mut out, &mut cursor, 64, 1.0), 64);
        assert_eq!(cursor, 64);
        assert!(out.iter().all(|b| *b == 0));
    }
}
