use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use keymix_sound::{AudioSource, Sound, SoundInfo};
use parking_lot::Mutex;

use crate::channel::Channel;
use crate::midi::MidiSound;
use crate::MixerError;

/// Hard cap on channels considered by the audibility ranking.
pub const MAX_AUDIBLE_CHANNELS: usize = 1024;

const LEVEL_SAMPLE_WINDOW: usize = 128;

/// Composes playback channels into one output stream.
///
/// The internal mutex serialises sound-cache mutation; the steady-state
/// mix path never takes it. One thread drives `mix_all` at a time (the
/// borrow checker enforces the exclusive part of that contract).
pub struct Mixer {
    info: SoundInfo,
    cache: Mutex<HashMap<String, Arc<Sound>>>,
    channels: Vec<Channel>,
    audible: Vec<usize>,
    max_audible: i32,
    midi: Option<Arc<MidiSound>>,
    midi_channel: Option<usize>,
}

impl Mixer {
    pub fn new(info: SoundInfo, channels: usize) -> Self {
        let mut mixer = Self {
            info,
            cache: Mutex::new(HashMap::new()),
            channels: Vec::new(),
            audible: Vec::new(),
            max_audible: -1,
            midi: None,
            midi_channel: None,
        };
        mixer.set_max_channel_size(channels);
        mixer
    }

    pub fn info(&self) -> &SoundInfo {
        &self.info
    }

    /// Switch the canonical format, re-converting every cached sound and
    /// reinitialising the MIDI adapter. Costly.
    pub fn set_sound_info(&mut self, info: SoundInfo) -> Result<(), MixerError> {
        self.info = info;
        let mut replaced: Vec<(Arc<Sound>, Arc<Sound>)> = Vec::new();
        {
            let mut cache = self.cache.lock();
            for slot in cache.values_mut() {
                let converted = Arc::new(slot.resampled(info)?);
                replaced.push((slot.clone(), converted.clone()));
                *slot = converted;
            }
        }
        for channel in &mut self.channels {
            let Some(bound) = channel.sound() else {
                continue;
            };
            let bound_ptr = Arc::as_ptr(bound) as *const ();
            if let Some((_, new)) = replaced
                .iter()
                .find(|(old, _)| Arc::as_ptr(old) as *const () == bound_ptr)
            {
                channel.set_sound(Some(new.clone()));
            }
        }
        if self.midi.is_some() {
            self.init_midi(None)?;
        }
        Ok(())
    }

    pub fn set_max_channel_size(&mut self, size: usize) {
        if size < self.channels.len() {
            self.channels.truncate(size);
        } else {
            for i in self.channels.len()..size {
                self.channels.push(Channel::new(i));
            }
        }
    }

    pub fn max_channel_size(&self) -> usize {
        self.channels.len()
    }

    /// Audibility cap; negative means "mix every playing channel".
    pub fn set_max_audible(&mut self, max_audible: i32) {
        self.max_audible = max_audible.min(MAX_AUDIBLE_CHANNELS as i32);
    }

    pub fn max_audible(&self) -> i32 {
        self.max_audible
    }

    /// Decode and cache a sound under `name`, converted to the canonical
    /// format on insertion. A cached entry is returned as-is.
    pub fn create_sound(
        &self,
        bytes: &[u8],
        name: &str,
        ext_hint: Option<&str>,
    ) -> Result<Arc<Sound>, MixerError> {
        {
            let cache = self.cache.lock();
            if let Some(sound) = cache.get(name) {
                return Ok(sound.clone());
            }
        }
        let mut sound = keymix_codec::decode(bytes, ext_hint, Some(&self.info))?;
        if *sound.info() != self.info {
            sound.set_format(self.info)?;
        }
        sound.set_name(name);
        let sound = Arc::new(sound);
        self.cache.lock().insert(name.to_owned(), sound.clone());
        Ok(sound)
    }

    /// File-path variant of [`Mixer::create_sound`]; the file name is the
    /// cache key.
    pub fn create_sound_from_file(&self, path: impl AsRef<Path>) -> Result<Arc<Sound>, MixerError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path.to_string_lossy();
        let ext = path.extension().and_then(|e| e.to_str());
        self.create_sound(&bytes, &name, ext)
    }

    /// Evict `name` from the cache and stop any channel bound to it.
    pub fn delete_sound(&mut self, name: &str) {
        let removed = self.cache.lock().remove(name);
        if let Some(sound) = removed {
            let ptr = Arc::as_ptr(&sound) as *const ();
            for channel in &mut self.channels {
                let bound = channel
                    .sound()
                    .map(|s| Arc::as_ptr(s) as *const () == ptr)
                    .unwrap_or(false);
                if bound {
                    channel.set_sound(None);
                }
            }
        }
    }

    /// Bind `sound` to the first channel that is neither playing nor
    /// occupied. Occupied channels are never stolen; returns `None` when
    /// every slot is busy.
    pub fn play_sound(&mut self, sound: Arc<dyn AudioSource>, start: bool) -> Option<usize> {
        for channel in &mut self.channels {
            if !channel.is_playing() && !channel.is_occupied() {
                channel.set_sound(Some(sound));
                if start {
                    channel.play();
                }
                return Some(channel.index());
            }
        }
        log::debug!("no free channel; playback request dropped");
        None
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn channel_mut(&mut self, index: usize) -> Option<&mut Channel> {
        self.channels.get_mut(index)
    }

    pub fn play(&mut self, index: usize) {
        if let Some(channel) = self.channels.get_mut(index) {
            channel.play();
        }
    }

    pub fn stop(&mut self, index: usize) {
        if let Some(channel) = self.channels.get_mut(index) {
            channel.stop();
        }
    }

    /// Initialise (or reinitialise) the MIDI streaming adapter and bind it
    /// to a locked channel.
    pub fn init_midi(&mut self, soundfont: Option<&Path>) -> Result<(), MixerError> {
        let midi = Arc::new(MidiSound::new(self.info, soundfont)?);
        self.midi = Some(midi.clone());
        match self.midi_channel {
            Some(index) => {
                if let Some(channel) = self.channels.get_mut(index) {
                    channel.set_sound(Some(midi));
                    channel.play();
                }
            }
            None => {
                let index = self.play_sound(midi, true);
                if let Some(index) = index {
                    if let Some(channel) = self.channels.get_mut(index) {
                        channel.lock();
                    }
                }
                self.midi_channel = index;
            }
        }
        Ok(())
    }

    pub fn clear_midi(&mut self) {
        if let Some(index) = self.midi_channel.take() {
            if let Some(channel) = self.channels.get_mut(index) {
                channel.set_sound(None);
                channel.unlock();
            }
        }
        self.midi = None;
    }

    pub fn midi(&self) -> Option<&Arc<MidiSound>> {
        self.midi.as_ref()
    }

    pub fn midi_channel(&self) -> Option<usize> {
        self.midi_channel
    }

    /// Recompute the audible-channel list for the next `mix_all`.
    ///
    /// With no audibility cap every playing channel is audible (up to the
    /// hard limit). With a cap, channels are ranked by
    /// `is_playing * sound_level` and the losers are marked virtual.
    pub fn update(&mut self) {
        self.audible.clear();
        if self.max_audible < 0 {
            for channel in &self.channels {
                if channel.is_playing() {
                    self.audible.push(channel.index());
                    if self.audible.len() >= MAX_AUDIBLE_CHANNELS {
                        break;
                    }
                }
            }
            return;
        }

        for channel in &mut self.channels {
            channel.update_level(LEVEL_SAMPLE_WINDOW);
        }
        let mut order: Vec<usize> = (0..self.channels.len()).collect();
        order.sort_by(|a, b| {
            let ka = rank_key(&self.channels[*a]);
            let kb = rank_key(&self.channels[*b]);
            kb.total_cmp(&ka)
        });
        for (priority, index) in order.iter().enumerate() {
            let audible = priority < self.max_audible as usize;
            let channel = &mut self.channels[*index];
            channel.priority = priority as i32;
            channel.is_virtual = !audible;
            if audible && channel.is_playing() {
                self.audible.push(*index);
            }
        }
    }

    /// Zero-fill `frames` frames of `out` and mix every audible channel
    /// into it. Mixing order across channels is unspecified.
    pub fn mix_all(&mut self, out: &mut [u8], frames: usize) {
        let bytes = self.info.bytes_from_frames(frames);
        out[..bytes].fill(0);
        if self.max_audible < 0 {
            for channel in &mut self.channels {
                channel.mix(out, frames);
            }
        } else {
            let audible = std::mem::take(&mut self.audible);
            for index in &audible {
                if let Some(channel) = self.channels.get_mut(*index) {
                    channel.mix(out, frames);
                }
            }
            self.audible = audible;
        }
    }

    /// Mix or copy a single channel (diagnostic path).
    pub fn mix_channel(&mut self, out: &mut [u8], frames: usize, index: usize) {
        if let Some(channel) = self.channels.get_mut(index) {
            channel.mix(out, frames);
        }
    }

    pub fn copy_channel(&mut self, out: &mut [u8], frames: usize, index: usize) {
        if let Some(channel) = self.channels.get_mut(index) {
            channel.copy(out, frames);
        }
    }
}

fn rank_key(channel: &Channel) -> f32 {
    channel.is_playing() as u32 as f32 * channel.sound_level
}
