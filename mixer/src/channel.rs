use std::sync::Arc;

use keymix_sound::AudioSource;

/// One playback slot of the mixer.
///
/// Invariants: `is_playing() exactly when loops > 0`; the frame cursor stays below the
/// bound sound's frame count while playing; pausing freezes the cursor.
/// Slots are created once at mixer construction and reused forever.
pub struct Channel {
    index: usize,
    group: u32,
    sound: Option<Arc<dyn AudioSource>>,

    volume: f32,
    loops: u32,
    paused: bool,
    occupied: bool,
    cursor: usize,
    fade_total_ms: u32,
    fade_remain_ms: u32,

    // advisory effector parameters, applied by outboard processing
    pub pitch: f32,
    pub speed: f32,
    pub reverb: f32,
    pub key: i32,

    // audibility ranking, maintained by Mixer::update
    pub(crate) sound_level: f32,
    pub(crate) priority: i32,
    pub(crate) is_virtual: bool,
}

impl Channel {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            group: 0,
            sound: None,
            volume: 1.0,
            loops: 0,
            paused: false,
            occupied: false,
            cursor: 0,
            fade_total_ms: 0,
            fade_remain_ms: 0,
            pitch: 1.0,
            speed: 1.0,
            reverb: 0.0,
            key: 0,
            sound_level: 0.0,
            priority: 0,
            is_virtual: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_group(&mut self, group: u32) {
        self.group = group;
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    /// Bind a sound, resetting all playback state.
    pub fn set_sound(&mut self, sound: Option<Arc<dyn AudioSource>>) {
        self.stop();
        self.sound = sound;
    }

    pub fn sound(&self) -> Option<&Arc<dyn AudioSource>> {
        self.sound.as_ref()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume when paused, otherwise restart with a single loop.
    pub fn play(&mut self) {
        if self.paused {
            self.paused = false;
            return;
        }
        self.play_loops(1);
    }

    /// Restart from frame zero with `loops` repetitions, clearing pause
    /// and fade state.
    pub fn play_loops(&mut self, loops: u32) {
        self.loops = loops;
        self.paused = false;
        self.cursor = 0;
        self.fade_total_ms = 0;
        self.fade_remain_ms = 0;
    }

    pub fn stop(&mut self) {
        self.play_loops(0);
    }

    /// Install a linear fade-out of `ms` milliseconds starting now.
    pub fn set_fade_point(&mut self, ms: u32) {
        self.fade_total_ms = ms;
        self.fade_remain_ms = ms;
    }

    /// Advance fade time; called as the driving timeline moves.
    pub fn tick(&mut self, delta_ms: f32) {
        if self.fade_remain_ms > 0 {
            self.fade_remain_ms = self.fade_remain_ms.saturating_sub(delta_ms as u32);
        }
    }

    /// Pin the slot so [`crate::Mixer::play_sound`] never reuses it.
    pub fn lock(&mut self) {
        self.occupied = true;
    }

    pub fn unlock(&mut self) {
        self.occupied = false;
    }

    pub fn is_playing(&self) -> bool {
        self.loops > 0
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn playtime_ms(&self) -> f32 {
        match &self.sound {
            Some(s) => s.info().ms_from_frames(self.cursor),
            None => 0.0,
        }
    }

    fn effective_gain(&self) -> f32 {
        let mut gain = self.volume;
        if self.fade_total_ms > 0 {
            gain *= 1.0 - self.fade_remain_ms as f32 / self.fade_total_ms as f32;
        }
        gain.min(1.0)
    }

    /// Saturating-add up to `frames` frames into `out`. Reaching the end
    /// of the bound sound consumes one loop and wraps the cursor;
    /// streaming sounds are self-paced and never wrap.
    pub fn mix(&mut self, out: &mut [u8], frames: usize) {
        let Some(sound) = self.sound.clone() else {
            return;
        };
        if sound.is_empty() && !sound.is_streaming() {
            return;
        }
        if !self.is_playing() || self.paused || self.volume < 0.0 {
            return;
        }
        let gain = self.effective_gain();
        if sound.is_streaming() {
            sound.mix_at(out, &mut self.cursor, frames, gain);
            return;
        }
        let info = sound.info();
        let mut done = 0;
        while done < frames && self.loops > 0 {
            let off = info.bytes_from_frames(done);
            done += sound.mix_at(&mut out[off..], &mut self.cursor, frames - done, gain);
            if self.cursor >= sound.frames() {
                self.loops -= 1;
                self.cursor = 0;
            }
        }
    }

    /// Overwrite variant of [`Channel::mix`]: zero-fills `out` first, so
    /// the tail past the last written frame stays silent.
    pub fn copy(&mut self, out: &mut [u8], frames: usize) {
        let Some(sound) = self.sound.clone() else {
            return;
        };
        let info = sound.info();
        out[..info.bytes_from_frames(frames)].fill(0);
        if sound.is_empty() && !sound.is_streaming() {
            return;
        }
        if !self.is_playing() || self.paused || self.volume < 0.0 {
            return;
        }
        let gain = self.effective_gain();
        if sound.is_streaming() {
            sound.copy_at(out, &mut self.cursor, frames, gain);
            return;
        }
        let mut done = 0;
        while done < frames && self.loops > 0 {
            let off = info.bytes_from_frames(done);
            done += sound.copy_at(&mut out[off..], &mut self.cursor, frames - done, gain);
            if self.cursor >= sound.frames() {
                self.loops -= 1;
                self.cursor = 0;
            }
        }
    }

    /// Refresh the ranking level from a short window at the cursor.
    pub(crate) fn update_level(&mut self, sample_window: usize) {
        self.sound_level = match &self.sound {
            Some(s) => s.level_at(self.cursor, sample_window),
            None => 0.0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymix_sound::{Sound, SoundInfo};

    fn tone(frames: usize, value: i16) -> Arc<dyn AudioSource> {
        let samples = vec![value; frames * 2];
        Arc::new(Sound::from_samples(SoundInfo::DEFAULT, &samples).unwrap())
    }

    #[test]
    fn playing_iff_loops_positive() {
        let mut c = Channel::new(0);
        c.set_sound(Some(tone(16, 100)));
        assert!(!c.is_playing());
        c.play();
        assert!(c.is_playing());
        c.stop();
        assert!(!c.is_playing());
    }

    #[test]
    fn set_sound_resets_play_state() {
        let mut c = Channel::new(0);
        c.set_sound(Some(tone(16, 100)));
        c.play();
        let mut out = vec![0u8; SoundInfo::DEFAULT.bytes_from_frames(8)];
        c.mix(&mut out, 8);
        assert_eq!(c.cursor(), 8);
        c.set_sound(Some(tone(16, 7)));
        assert_eq!(c.cursor(), 0);
        assert!(!c.is_playing());
    }

    #[test]
    fn mix_consumes_loops_and_stops() {
        let mut c = Channel::new(0);
        c.set_sound(Some(tone(4, 1000)));
        c.play_loops(2);
        let info = SoundInfo::DEFAULT;
        let mut out = vec![0u8; info.bytes_from_frames(16)];
        c.mix(&mut out, 16);
        assert!(!c.is_playing());
        // two loops of 4 frames each
        let v: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(&v[..16], &[1000i16; 16][..]);
        assert_eq!(&v[16..], &[0i16; 16][..]);
    }

    #[test]
    fn pause_freezes_cursor() {
        let mut c = Channel::new(0);
        c.set_sound(Some(tone(32, 5)));
        c.play();
        let info = SoundInfo::DEFAULT;
        let mut out = vec![0u8; info.bytes_from_frames(8)];
        c.mix(&mut out, 8);
        c.pause();
        let before = c.cursor();
        c.mix(&mut out, 8);
        assert_eq!(c.cursor(), before);
        c.play();
        assert!(!c.paused);
        c.mix(&mut out, 8);
        assert_eq!(c.cursor(), before + 8);
    }

    #[test]
    fn fade_point_scales_effective_volume() {
        let mut c = Channel::new(0);
        c.set_sound(Some(tone(64, 10000)));
        c.play();
        c.set_fade_point(100);
        // at installation the fade factor is zero
        assert_eq!(c.effective_gain(), 0.0);
        c.tick(50.0);
        assert!((c.effective_gain() - 0.5).abs() < 1e-6);
        c.tick(50.0);
        assert_eq!(c.effective_gain(), 1.0);
    }

    #[test]
    fn copy_zero_fills_the_tail() {
        let mut c = Channel::new(0);
        c.set_sound(Some(tone(2, 42)));
        c.play();
        let info = SoundInfo::DEFAULT;
        let mut out = vec![0xffu8; info.bytes_from_frames(4)];
        c.copy(&mut out, 4);
        let v: Vec<i16> = out
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(v, vec![42, 42, 42, 42, 0, 0, 0, 0]);
    }
}
