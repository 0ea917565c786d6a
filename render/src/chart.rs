//! Chart event file loading and sound-bank resolution.
//!
//! Chart *notation* parsing is out of scope: the renderer consumes an
//! already-structured JSON event file and maps it onto the scheduler's
//! input types.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use keymix_mixer::{ChartEvents, ChartMidiCommand, ChartNote, ResourceDir};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub subartist: String,
}

#[derive(Debug, Deserialize)]
pub struct NoteDef {
    /// Milliseconds from chart start.
    pub time: f32,
    #[serde(default)]
    pub lane: u32,
    pub channel: u32,
    #[serde(default)]
    pub key: u8,
    #[serde(default = "default_velocity")]
    pub velocity: f32,
    #[serde(default)]
    pub duration: f32,
    #[serde(default)]
    pub autoplay: bool,
}

fn default_velocity() -> f32 {
    1.0
}

#[derive(Debug, Deserialize)]
pub struct MidiDef {
    pub time: f32,
    pub args: [u8; 3],
}

#[derive(Debug, Default, Deserialize)]
pub struct Chart {
    #[serde(default)]
    pub meta: ChartMeta,
    /// Key-sound bank: channel number to file name.
    #[serde(default)]
    pub sounds: BTreeMap<String, String>,
    #[serde(default)]
    pub bgm: Vec<NoteDef>,
    #[serde(default)]
    pub notes: Vec<NoteDef>,
    #[serde(default)]
    pub midi: Vec<MidiDef>,
    #[serde(default)]
    pub is_midi: bool,
}

impl Chart {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        let chart: Chart = serde_json::from_slice(&bytes)?;
        if chart.is_empty() {
            anyhow::bail!("chart {} contains no events", path.display());
        }
        Ok(chart)
    }

    pub fn is_empty(&self) -> bool {
        self.bgm.is_empty() && self.notes.is_empty() && self.midi.is_empty()
    }

    /// Lower the serde model onto the scheduler's input.
    pub fn events(&self) -> ChartEvents {
        let note = |n: &NoteDef| ChartNote {
            time_ms: n.time,
            lane: n.lane,
            channel: n.channel,
            key: n.key,
            velocity: n.velocity,
            duration_ms: n.duration,
            autoplay: n.autoplay,
        };
        ChartEvents {
            bgm: self.bgm.iter().map(note).collect(),
            notes: self.notes.iter().map(note).collect(),
            midi_commands: self
                .midi
                .iter()
                .map(|m| ChartMidiCommand {
                    time_ms: m.time,
                    args: m.args,
                })
                .collect(),
            sounds: self
                .sounds
                .iter()
                .filter_map(|(channel, filename)| {
                    match channel.parse::<u32>() {
                        Ok(ch) => Some((ch, filename.clone())),
                        Err(_) => {
                            log::warn!("ignoring non-numeric sound channel {channel:?}");
                            None
                        }
                    }
                })
                .collect(),
            is_midi: self.is_midi,
        }
    }
}

const AUDIO_EXTENSIONS: [&str; 4] = ["wav", "ogg", "flac", "mp3"];

/// Sound-bank directory on the local filesystem. Resolution falls back to
/// the other supported audio extensions when the exact name is absent
/// (sound banks frequently ship `.ogg` files referenced as `.wav`).
pub struct FsDir {
    base: PathBuf,
}

impl FsDir {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl ResourceDir for FsDir {
    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        let exact = self.base.join(name);
        match std::fs::read(&exact) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            Err(_) => {}
        }
        for ext in AUDIO_EXTENSIONS {
            let candidate = exact.with_extension(ext);
            if let Ok(bytes) = std::fs::read(&candidate) {
                log::debug!("resolved {name} via alternative extension {ext}");
                return Ok(bytes);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{name} (any audio extension)"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_json_round_trip() {
        let json = r#"{
            "meta": {"title": "T", "artist": "A"},
            "sounds": {"1": "kick.wav", "2": "snare.wav"},
            "notes": [
                {"time": 0, "lane": 1, "channel": 1},
                {"time": 100, "lane": 2, "channel": 2, "velocity": 0.5, "duration": 30}
            ],
            "bgm": [{"time": 0, "channel": 2, "autoplay": true}]
        }"#;
        let chart: Chart = serde_json::from_str(json).unwrap();
        assert_eq!(chart.meta.title, "T");
        let events = chart.events();
        assert_eq!(events.sounds.len(), 2);
        assert_eq!(events.notes.len(), 2);
        assert_eq!(events.bgm.len(), 1);
        assert_eq!(events.notes[1].velocity, 0.5);
        assert_eq!(events.notes[0].velocity, 1.0);
    }

    #[test]
    fn empty_chart_is_rejected() {
        let chart: Chart = serde_json::from_str("{}").unwrap();
        assert!(chart.is_empty());
    }
}
