//! The render pipeline: chart, preload, offline mix, effector,
//! encode, with a coarse progress callback across the four stages.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use keymix_codec::{Metadata, OutputFormat};
use keymix_mixer::{KeySoundPool, Mixer};
use keymix_sound::{Effector, Sound, SoundInfo};

use crate::chart::{Chart, FsDir};

const POOL_CHANNELS: usize = 2048;

pub struct RenderOptions {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub format: Option<OutputFormat>,
    pub quality: f64,
    pub pitch: f64,
    pub tempo: f64,
    pub volume: f32,
    pub stop_duplicated_sound: bool,
    pub output_html: Option<PathBuf>,
    pub soundfont: Option<PathBuf>,
}

impl RenderOptions {
    pub fn new(input: PathBuf) -> Self {
        Self {
            input,
            output: None,
            format: None,
            quality: 0.6,
            pitch: 1.0,
            tempo: 1.0,
            volume: 0.8,
            stop_duplicated_sound: true,
            output_html: None,
            soundfont: None,
        }
    }
}

/// Writing to `-` or `STDOUT` streams the encoded file to stdout.
fn is_stdout(path: &Path) -> bool {
    matches!(path.to_str(), Some("-") | Some("STDOUT"))
}

pub fn render(opts: &RenderOptions, progress: &mut dyn FnMut(f64)) -> anyhow::Result<()> {
    progress(0.0);

    let chart = Chart::load(&opts.input)
        .with_context(|| format!("reading chart {}", opts.input.display()))?;

    // output format: explicit type, else output extension, else ogg
    let format = opts
        .format
        .or_else(|| {
            opts.output
                .as_deref()
                .filter(|p| !is_stdout(p))
                .and_then(|p| p.extension())
                .and_then(|e| e.to_str())
                .and_then(OutputFormat::from_extension)
        })
        .unwrap_or(OutputFormat::Ogg);
    let output = opts.output.clone().unwrap_or_else(|| {
        let title = if chart.meta.title.is_empty() {
            "out"
        } else {
            chart.meta.title.as_str()
        };
        let ext = match format {
            OutputFormat::Wav => "wav",
            OutputFormat::Ogg => "ogg",
            OutputFormat::Flac => "flac",
        };
        PathBuf::from(format!("{title}.{ext}"))
    });

    let events = chart.events();
    let mut mixer = Mixer::new(SoundInfo::DEFAULT, POOL_CHANNELS);
    if events.is_midi || !events.midi_commands.is_empty() || opts.soundfont.is_some() {
        mixer.init_midi(opts.soundfont.as_deref())?;
    }

    let mut pool = KeySoundPool::new(mixer, POOL_CHANNELS);
    // offline rendering fires every scheduled note, playable or not
    pool.set_autoplay(true);
    pool.set_stop_duplicated_sound(opts.stop_duplicated_sound);
    pool.load_from_chart(&events);

    let dir = FsDir::new(opts.input.parent().unwrap_or(Path::new(".")));
    while pool.load_next(&dir) {
        progress(0.3 * pool.progress());
    }
    pool.set_volume(opts.volume);
    progress(0.3);

    let mut mix = Sound::empty();
    pool.record_to(&mut mix)?;
    if mix.is_empty() {
        anyhow::bail!("chart produced no mixable events");
    }
    progress(0.6);

    if opts.pitch != 1.0 || opts.tempo != 1.0 {
        let mut effector = Effector::new();
        effector.set_pitch(opts.pitch);
        effector.set_tempo(opts.tempo);
        effector.apply(&mut mix).context("effector pass")?;
    }
    progress(0.75);

    let mut metadata = Metadata::new();
    metadata.insert("TITLE".into(), chart.meta.title.clone());
    metadata.insert("SUBTITLE".into(), chart.meta.subtitle.clone());
    metadata.insert("ARTIST".into(), chart.meta.artist.clone());
    metadata.insert("SUBARTIST".into(), chart.meta.subartist.clone());
    metadata.retain(|_, v| !v.is_empty());

    if is_stdout(&output) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        keymix_codec::encode(&mix, format, &mut lock, &metadata, opts.quality)?;
        lock.flush()?;
    } else {
        let file = File::create(&output)
            .with_context(|| format!("creating {}", output.display()))?;
        keymix_codec::encode(&mix, format, BufWriter::new(file), &metadata, opts.quality)?;
        log::info!("wrote {}", output.display());
    }

    if let Some(html_path) = &opts.output_html {
        crate::html::export(&chart, html_path)
            .with_context(|| format!("writing {}", html_path.display()))?;
    }

    progress(1.0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keymix_codec::Metadata;

    #[test]
    fn end_to_end_chart_render() {
        let dir = std::env::temp_dir().join("keymix-render-test");
        std::fs::create_dir_all(&dir).unwrap();

        // 50 ms tick sample
        let info = SoundInfo::DEFAULT;
        let frames = info.frames_from_ms(50);
        let tick = Sound::from_samples(info, &vec![9000i16; frames * 2]).unwrap();
        keymix_codec::save_path(&tick, dir.join("tick.wav"), &Metadata::new(), 0.6).unwrap();

        let chart = r#"{
            "meta": {"title": "e2e"},
            "sounds": {"1": "tick.wav"},
            "notes": [
                {"time": 0, "lane": 1, "channel": 1},
                {"time": 100, "lane": 1, "channel": 1}
            ]
        }"#;
        std::fs::write(dir.join("chart.json"), chart).unwrap();

        let mut opts = RenderOptions::new(dir.join("chart.json"));
        opts.output = Some(dir.join("out.wav"));
        opts.output_html = Some(dir.join("out.html"));
        let mut seen = Vec::new();
        render(&opts, &mut |p| seen.push(p)).unwrap();

        let out = keymix_codec::load_path(dir.join("out.wav"), None).unwrap();
        assert_eq!(*out.info(), SoundInfo::DEFAULT);
        // ticks at 0 and 100 ms plus the silent tail
        assert!(out.duration_ms() >= 3100.0);
        let first = i16::from_le_bytes([out.as_bytes()[0], out.as_bytes()[1]]);
        assert_eq!(first, (9000.0f32 * 0.8) as i16);

        assert!(seen.first().copied() == Some(0.0));
        assert!(seen.last().copied() == Some(1.0));
        assert!(dir.join("out.html").exists());
    }
}
