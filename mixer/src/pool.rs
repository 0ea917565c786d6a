use std::sync::Arc;

use keymix_sound::{AudioSource, Sound};

use crate::midi::event_from_status;
use crate::{Mixer, MixerError};

/// Upper bound on playable lanes (lane 0 is reserved for background
/// events).
pub const LANE_LIMIT: usize = 256;

/// Time points closer than this are merged during offline rendering.
const MERGE_WINDOW_MS: f32 = 10.0;

/// Silent tail appended after the last audible sample.
const TAIL_MS: u32 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    NoteOn,
    NoteOff,
    MidiControl,
}

/// One scheduled key-sound event on a lane timeline.
#[derive(Debug, Clone, Copy)]
pub struct KeySoundEvent {
    pub time_ms: f32,
    pub channel: u32,
    pub kind: KeyEventKind,
    pub is_midi: bool,
    pub autoplay: bool,
    pub playable: bool,
    pub args: [u8; 3],
}

/// A note produced by the chart parser (an opaque, already-ordered data
/// source as far as the engine is concerned).
#[derive(Debug, Clone)]
pub struct ChartNote {
    pub time_ms: f32,
    /// Playable lane, 1-based; ignored for BGM notes.
    pub lane: u32,
    /// Key-sound channel (index into the sound bank).
    pub channel: u32,
    pub key: u8,
    /// Normalised velocity in [0, 1].
    pub velocity: f32,
    pub duration_ms: f32,
    /// Fires automatically as time advances even on playable lanes.
    pub autoplay: bool,
}

/// A raw MIDI command event from the chart, `(status, data1, data2)`.
#[derive(Debug, Clone)]
pub struct ChartMidiCommand {
    pub time_ms: f32,
    pub args: [u8; 3],
}

/// The chart contents the scheduler consumes.
#[derive(Debug, Clone, Default)]
pub struct ChartEvents {
    pub bgm: Vec<ChartNote>,
    pub notes: Vec<ChartNote>,
    pub midi_commands: Vec<ChartMidiCommand>,
    /// Key-sound bank: `(channel, filename)` load jobs.
    pub sounds: Vec<(u32, String)>,
    /// Charts with no sound bank drive the MIDI synthesizer instead.
    pub is_midi: bool,
}

/// Resolves a sound-bank name to a contiguous byte slice. The engine
/// neither walks directories nor opens archives itself.
pub trait ResourceDir {
    fn read(&self, name: &str) -> std::io::Result<Vec<u8>>;
}

#[derive(Clone)]
struct LoadJob {
    channel: u32,
    filename: String,
}

/// Schedules chart events onto mixer channels along a virtual timeline.
///
/// Lane 0 carries background and MIDI-control events; lanes 1..N carry
/// player-hit notes. Two driving modes exist: incremental
/// ([`KeySoundPool::advance`]) and offline ([`KeySoundPool::record_to`]).
pub struct KeySoundPool {
    mixer: Mixer,
    /// Key-sound channel to mixer channel index.
    channel_map: Vec<Option<usize>>,
    lanes: Vec<Vec<KeySoundEvent>>,
    cursors: Vec<usize>,
    lane_map: Vec<Option<KeySoundEvent>>,
    now_ms: f32,
    autoplay: bool,
    stop_duplicated: bool,
    volume_base: f32,
    jobs: Vec<LoadJob>,
    next_job: usize,
}

impl KeySoundPool {
    pub fn new(mixer: Mixer, pool_size: usize) -> Self {
        let mut pool = Self {
            mixer,
            channel_map: vec![None; pool_size],
            lanes: Vec::new(),
            cursors: Vec::new(),
            lane_map: Vec::new(),
            now_ms: 0.0,
            autoplay: false,
            stop_duplicated: true,
            volume_base: 1.0,
            jobs: Vec::new(),
            next_job: 0,
        };
        pool.set_lane_count(0);
        pool
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut Mixer {
        &mut self.mixer
    }

    pub fn into_mixer(self) -> Mixer {
        self.mixer
    }

    /// Every scheduled event fires playback, not only autoplay ones.
    pub fn set_autoplay(&mut self, autoplay: bool) {
        self.autoplay = autoplay;
    }

    /// When false, a NoteOn for an already-playing channel leaves the
    /// previous playback running instead of retriggering it.
    pub fn set_stop_duplicated_sound(&mut self, stop: bool) {
        self.stop_duplicated = stop;
    }

    /// Base volume applied to every loaded key sound.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume_base = volume;
        for index in self.channel_map.iter().flatten() {
            if let Some(channel) = self.mixer.channel_mut(*index) {
                channel.set_volume(volume);
            }
        }
    }

    fn set_lane_count(&mut self, playable: usize) {
        let lanes = playable + 1;
        self.lanes = vec![Vec::new(); lanes];
        self.cursors = vec![0; lanes];
        self.lane_map = vec![None; lanes];
    }

    /// Build the lane timelines and the sound load-job list from a chart.
    /// Loading itself is resumable through [`KeySoundPool::load_next`].
    pub fn load_from_chart(&mut self, chart: &ChartEvents) {
        let max_lane = chart
            .notes
            .iter()
            .map(|n| n.lane.max(1) as usize)
            .max()
            .unwrap_or(0)
            .min(LANE_LIMIT);
        self.set_lane_count(max_lane);
        self.now_ms = 0.0;
        self.jobs = chart
            .sounds
            .iter()
            .map(|(channel, filename)| LoadJob {
                channel: *channel,
                filename: filename.clone(),
            })
            .collect();
        self.next_job = 0;

        for command in &chart.midi_commands {
            self.lanes[0].push(KeySoundEvent {
                time_ms: command.time_ms,
                channel: command.args[0] as u32 & 0x0F,
                kind: KeyEventKind::MidiControl,
                is_midi: true,
                autoplay: true,
                playable: false,
                args: command.args,
            });
        }

        for note in &chart.bgm {
            push_note(&mut self.lanes[0], note, chart.is_midi, true, false);
        }
        for note in &chart.notes {
            if note.autoplay {
                push_note(&mut self.lanes[0], note, chart.is_midi, true, false);
            } else {
                let lane = (note.lane.max(1) as usize).min(max_lane.max(1));
                push_note(&mut self.lanes[lane], note, chart.is_midi, false, true);
            }
        }

        for lane in &mut self.lanes {
            lane.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
        }
        log::info!(
            "chart loaded: {} lanes, {} sound files",
            self.lanes.len(),
            self.jobs.len()
        );
    }

    /// Decode one pending sound file and bind it to a mixer channel.
    /// Returns false once every job has been attempted. Missing or
    /// undecodable files are logged and skipped; the render continues.
    pub fn load_next(&mut self, dir: &dyn ResourceDir) -> bool {
        let Some(job) = self.jobs.get(self.next_job).cloned() else {
            return false;
        };
        self.next_job += 1;

        match dir.read(&job.filename) {
            Err(e) => {
                log::warn!("missing sound file: {} ({}): {e}", job.filename, job.channel);
            }
            Ok(bytes) => {
                let ext = job.filename.rsplit('.').next();
                match self.mixer.create_sound(&bytes, &job.filename, ext) {
                    Err(e) => {
                        log::warn!(
                            "failed to decode sound file: {} ({}): {e}",
                            job.filename,
                            job.channel
                        );
                    }
                    Ok(sound) => self.bind_sound(job.channel, sound),
                }
            }
        }
        self.next_job < self.jobs.len()
    }

    /// Bind an already-decoded sound to a key-sound channel.
    pub fn bind_sound(&mut self, channel: u32, sound: Arc<dyn AudioSource>) {
        let index = channel as usize;
        if index >= self.channel_map.len() {
            log::warn!("key-sound channel {channel} out of pool range");
            return;
        }
        match self.mixer.play_sound(sound, false) {
            None => log::warn!("no free mixer channel for key sound {channel}"),
            Some(mixer_index) => {
                if let Some(ch) = self.mixer.channel_mut(mixer_index) {
                    ch.set_volume(self.volume_base);
                }
                self.channel_map[index] = Some(mixer_index);
            }
        }
    }

    /// Drain every pending job synchronously.
    pub fn load_all(&mut self, dir: &dyn ResourceDir) {
        while self.load_next(dir) {}
    }

    /// Monotone loading progress in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.jobs.is_empty() {
            1.0
        } else {
            self.next_job as f64 / self.jobs.len() as f64
        }
    }

    pub fn is_loading_finished(&self) -> bool {
        self.next_job >= self.jobs.len()
    }

    pub fn now_ms(&self) -> f32 {
        self.now_ms
    }

    /// Move the timeline forward, draining and executing every event with
    /// `time <= now` lane by lane. Each drained event becomes its lane's
    /// current mapping for user-driven playback.
    pub fn advance(&mut self, delta_ms: f32) {
        self.now_ms += delta_ms;
        for lane in 0..self.lanes.len() {
            loop {
                let cursor = self.cursors[lane];
                let Some(event) = self.lanes[lane].get(cursor) else {
                    break;
                };
                if event.time_ms > self.now_ms {
                    break;
                }
                let event = *event;
                self.cursors[lane] += 1;
                self.lane_map[lane] = Some(event);
                self.dispatch(&event);
            }
        }
        for index in self.channel_map.iter().flatten() {
            if let Some(channel) = self.mixer.channel_mut(*index) {
                channel.tick(delta_ms);
            }
        }
    }

    fn dispatch(&mut self, event: &KeySoundEvent) {
        let fire = self.autoplay || event.autoplay;
        if event.is_midi {
            let Some(midi) = self.mixer.midi().cloned() else {
                return;
            };
            match event.kind {
                KeyEventKind::NoteOn => {
                    midi.set_velocity(event.channel as u8, event.args[2]);
                    if fire {
                        midi.play_key(event.channel as u8, event.args[1]);
                    }
                }
                KeyEventKind::NoteOff => {
                    midi.set_velocity(event.channel as u8, 0);
                    if fire {
                        midi.stop_key(event.channel as u8, event.args[1]);
                    }
                }
                KeyEventKind::MidiControl => {
                    if let Some(kind) = event_from_status(event.args[0], event.args[1]) {
                        midi.send_event(
                            (event.args[0] & 0x0F) as u8,
                            kind,
                            event.args[1],
                            event.args[2],
                        );
                    }
                }
            }
            return;
        }

        let Some(index) = self
            .channel_map
            .get(event.channel as usize)
            .copied()
            .flatten()
        else {
            return;
        };
        match event.kind {
            KeyEventKind::NoteOn => {
                if fire {
                    let retrigger = self.stop_duplicated
                        || !self
                            .mixer
                            .channel(index)
                            .map(|c| c.is_playing())
                            .unwrap_or(false);
                    if retrigger {
                        if let Some(channel) = self.mixer.channel_mut(index) {
                            channel.play_loops(1);
                        }
                    }
                }
            }
            KeyEventKind::NoteOff => {
                if fire {
                    self.mixer.stop(index);
                }
            }
            KeyEventKind::MidiControl => {}
        }
    }

    /// User-driven playback: trigger the sound most recently scheduled
    /// for `lane`.
    pub fn play(&mut self, lane: usize) {
        let Some(Some(event)) = self.lane_map.get(lane).copied() else {
            return;
        };
        if event.is_midi {
            if let Some(midi) = self.mixer.midi().cloned() {
                midi.set_velocity(event.channel as u8, event.args[2]);
                midi.play_key(event.channel as u8, event.args[1]);
            }
            return;
        }
        if let Some(index) = self.channel_map.get(event.channel as usize).copied().flatten() {
            self.mixer.play(index);
        }
    }

    pub fn stop(&mut self, lane: usize) {
        let Some(Some(event)) = self.lane_map.get(lane).copied() else {
            return;
        };
        if event.is_midi {
            if let Some(midi) = self.mixer.midi().cloned() {
                midi.stop_key(event.channel as u8, event.args[1]);
            }
            return;
        }
        if let Some(index) = self.channel_map.get(event.channel as usize).copied().flatten() {
            self.mixer.stop(index);
        }
    }

    /// Rewind or skip to `ms`: lane mappings are refreshed without firing
    /// the stale events in between.
    pub fn move_to(&mut self, ms: f32) {
        for lane in 0..self.lanes.len() {
            self.cursors[lane] = 0;
            while let Some(event) = self.lanes[lane].get(self.cursors[lane]) {
                if event.time_ms > ms {
                    break;
                }
                self.lane_map[lane] = Some(*event);
                self.cursors[lane] += 1;
            }
        }
        self.now_ms = ms;
    }

    /// Latest time any scheduled sound keeps ringing: event time plus the
    /// bound sound's duration.
    pub fn last_sound_time(&self) -> f32 {
        let mut last = 0.0f32;
        for lane in &self.lanes {
            for event in lane {
                let mut end = event.time_ms;
                if let Some(index) = self
                    .channel_map
                    .get(event.channel as usize)
                    .copied()
                    .flatten()
                {
                    if let Some(sound) = self.mixer.channel(index).and_then(|c| c.sound()) {
                        end += sound.duration_ms();
                    }
                }
                last = last.max(end);
            }
        }
        last
    }

    /// Offline render: walk the merged event timeline, alternating
    /// `advance` and `mix_all` into a freshly allocated buffer. The mixer
    /// advances channel cursors in lockstep with the event timeline, so
    /// each mixed interval exactly covers the gap to the next event.
    pub fn record_to(&mut self, out: &mut Sound) -> Result<(), MixerError> {
        let mut timepoints: Vec<f32> = self
            .lanes
            .iter()
            .flat_map(|lane| lane.iter().map(|e| e.time_ms))
            .collect();
        timepoints.sort_by(|a, b| a.total_cmp(b));

        let mut merged: Vec<f32> = Vec::new();
        for t in timepoints {
            match merged.last_mut() {
                Some(last) if t - *last <= MERGE_WINDOW_MS => *last = t,
                _ => merged.push(t),
            }
        }
        if merged.is_empty() {
            return Ok(());
        }

        let info = *self.mixer.info();
        let total_ms = self.last_sound_time() + TAIL_MS as f32;
        let total_frames = info.frames_from_ms(total_ms as u32);
        *out = Sound::alloc_frames(info, total_frames);

        let mut prev_ms = 0.0f32;
        for (i, t) in merged.iter().enumerate() {
            self.advance(t - prev_ms);
            prev_ms = *t;
            let start = info.frames_from_ms(*t as u32).min(total_frames);
            let end = match merged.get(i + 1) {
                Some(next) => info.frames_from_ms(*next as u32).min(total_frames),
                None => total_frames,
            };
            if end > start {
                let offset = info.bytes_from_frames(start);
                self.mixer.mix_all(&mut out.as_bytes_mut()[offset..], end - start);
            }
        }
        Ok(())
    }
}

fn push_note(
    lane: &mut Vec<KeySoundEvent>,
    note: &ChartNote,
    is_midi: bool,
    autoplay: bool,
    playable: bool,
) {
    let velocity = (note.velocity.clamp(0.0, 1.0) * 0x7F as f32) as u8;
    let event = KeySoundEvent {
        time_ms: note.time_ms,
        channel: note.channel,
        kind: KeyEventKind::NoteOn,
        is_midi,
        autoplay,
        playable,
        args: [0, note.key, velocity],
    };
    lane.push(event);
    if note.duration_ms > 0.0 {
        lane.push(KeySoundEvent {
            time_ms: note.time_ms + note.duration_ms,
            kind: KeyEventKind::NoteOff,
            ..event
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymix_sound::{Sound, SoundInfo};

    fn tick_sound(ms: u32) -> Arc<Sound> {
        let info = SoundInfo::DEFAULT;
        let frames = info.frames_from_ms(ms);
        Arc::new(Sound::from_samples(info, &vec![8000i16; frames * 2]).unwrap())
    }

    fn pool_with_ticks() -> KeySoundPool {
        let mixer = Mixer::new(SoundInfo::DEFAULT, 16);
        let mut pool = KeySoundPool::new(mixer, 8);
        let chart = ChartEvents {
            notes: vec![
                note_at(0.0),
                note_at(100.0),
                note_at(200.0),
            ],
            ..Default::default()
        };
        pool.load_from_chart(&chart);
        pool.bind_sound(1, tick_sound(50));
        pool
    }

    fn note_at(time_ms: f32) -> ChartNote {
        ChartNote {
            time_ms,
            lane: 1,
            channel: 1,
            key: 0,
            velocity: 1.0,
            duration_ms: 0.0,
            autoplay: false,
        }
    }

    fn rms(out: &Sound, from_ms: u32, to_ms: u32) -> f64 {
        let info = *out.info();
        let a = info.bytes_from_frames(info.frames_from_ms(from_ms));
        let b = info.bytes_from_frames(info.frames_from_ms(to_ms));
        let bytes = &out.as_bytes()[a..b];
        let mut acc = 0.0f64;
        let mut n = 0usize;
        for pair in bytes.chunks_exact(2) {
            let v = i16::from_le_bytes([pair[0], pair[1]]) as f64;
            acc += v * v;
            n += 1;
        }
        (acc / n as f64).sqrt()
    }

    #[test]
    fn offline_render_places_energy_at_note_times() {
        let mut pool = pool_with_ticks();
        pool.set_autoplay(true);
        let mut out = Sound::empty();
        pool.record_to(&mut out).unwrap();
        assert!(!out.is_empty());

        for (lo, hi) in [(0, 50), (100, 150), (200, 250)] {
            assert!(rms(&out, lo + 5, hi - 5) > 0.0, "window {lo}..{hi}");
        }
        for (lo, hi) in [(50, 100), (150, 200), (250, 300)] {
            assert_eq!(rms(&out, lo + 5, hi - 5), 0.0, "window {lo}..{hi}");
        }
    }

    #[test]
    fn playable_notes_do_not_fire_without_autoplay() {
        let mut pool = pool_with_ticks();
        let mut out = Sound::empty();
        pool.record_to(&mut out).unwrap();
        assert!(!out.is_empty());
        assert_eq!(rms(&out, 5, 45), 0.0);
    }

    #[test]
    fn timepoint_merging_keeps_the_later_point() {
        let mixer = Mixer::new(SoundInfo::DEFAULT, 4);
        let mut pool = KeySoundPool::new(mixer, 4);
        let chart = ChartEvents {
            notes: vec![note_at(0.0), note_at(4.0), note_at(8.0), note_at(30.0)],
            ..Default::default()
        };
        pool.load_from_chart(&chart);
        pool.bind_sound(1, tick_sound(2));
        pool.set_autoplay(true);
        let mut out = Sound::empty();
        pool.record_to(&mut out).unwrap();
        // events at 0/4/8 ms merged to one mix point at 8 ms; the 30 ms
        // note still lands in its own interval
        assert!(rms(&out, 30, 32) > 0.0);
    }

    #[test]
    fn stop_duplicated_sound_controls_retrigger() {
        let info = SoundInfo::DEFAULT;
        let mixer = Mixer::new(info, 4);
        let mut pool = KeySoundPool::new(mixer, 4);
        let chart = ChartEvents {
            notes: vec![note_at(0.0), note_at(10.0)],
            ..Default::default()
        };
        pool.load_from_chart(&chart);
        pool.bind_sound(1, tick_sound(100));
        pool.set_autoplay(true);

        // with retriggering the cursor resets at the second note
        pool.advance(0.0);
        let index = pool.channel_map[1].unwrap();
        let mut scratch = vec![0u8; info.bytes_from_frames(441)];
        pool.mixer_mut().mix_all(&mut scratch, 441); // 10 ms
        assert!(pool.mixer().channel(index).unwrap().cursor() > 0);
        pool.advance(10.0);
        assert_eq!(pool.mixer().channel(index).unwrap().cursor(), 0);

        // without it the second note leaves playback running
        let mixer = Mixer::new(info, 4);
        let mut pool = KeySoundPool::new(mixer, 4);
        pool.load_from_chart(&chart);
        pool.bind_sound(1, tick_sound(100));
        pool.set_autoplay(true);
        pool.set_stop_duplicated_sound(false);
        pool.advance(0.0);
        let index = pool.channel_map[1].unwrap();
        let mut scratch = vec![0u8; info.bytes_from_frames(441)];
        pool.mixer_mut().mix_all(&mut scratch, 441);
        let cursor = pool.mixer().channel(index).unwrap().cursor();
        assert!(cursor > 0);
        pool.advance(10.0);
        assert_eq!(pool.mixer().channel(index).unwrap().cursor(), cursor);
    }

    #[test]
    fn last_sound_time_adds_bound_duration() {
        let pool = {
            let mut p = pool_with_ticks();
            p.set_autoplay(true);
            p
        };
        let last = pool.last_sound_time();
        assert!((last - 250.0).abs() < 2.0, "last {last}");
    }

    #[test]
    fn user_play_resolves_through_the_lane_mapping() {
        let mut pool = pool_with_ticks();
        // no autoplay: advancing maps lanes without firing playback
        pool.advance(0.0);
        let index = pool.channel_map[1].unwrap();
        assert!(!pool.mixer().channel(index).unwrap().is_playing());
        pool.play(1);
        assert!(pool.mixer().channel(index).unwrap().is_playing());
        pool.stop(1);
        assert!(!pool.mixer().channel(index).unwrap().is_playing());
    }

    #[test]
    fn move_to_skips_without_firing() {
        let mut pool = pool_with_ticks();
        pool.set_autoplay(true);
        pool.move_to(150.0);
        let index = pool.channel_map[1].unwrap();
        assert!(!pool.mixer().channel(index).unwrap().is_playing());
        assert_eq!(pool.now_ms(), 150.0);
        // the note at 200 ms still fires on the next advance
        pool.advance(60.0);
        assert!(pool.mixer().channel(index).unwrap().is_playing());
    }

    #[test]
    fn load_progress_is_monotone() {
        struct NoDir;
        impl ResourceDir for NoDir {
            fn read(&self, _name: &str) -> std::io::Result<Vec<u8>> {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "absent"))
            }
        }
        let mixer = Mixer::new(SoundInfo::DEFAULT, 4);
        let mut pool = KeySoundPool::new(mixer, 4);
        let chart = ChartEvents {
            sounds: vec![(1, "a.wav".into()), (2, "b.wav".into())],
            ..Default::default()
        };
        pool.load_from_chart(&chart);
        assert_eq!(pool.progress(), 0.0);
        assert!(pool.load_next(&NoDir));
        assert_eq!(pool.progress(), 0.5);
        assert!(!pool.load_next(&NoDir));
        assert_eq!(pool.progress(), 1.0);
        assert!(pool.is_loading_finished());
    }
}
