use std::sync::Arc;

use keymix_mixer::{ChartEvents, ChartMidiCommand, ChartNote, KeySoundPool, Mixer};
use keymix_sound::{Sound, SoundInfo};

fn sample(ms: u32, value: i16) -> Arc<Sound> {
    let info = SoundInfo::DEFAULT;
    let frames = info.frames_from_ms(ms);
    Arc::new(Sound::from_samples(info, &vec![value; frames * 2]).unwrap())
}

fn note(time_ms: f32, lane: u32, channel: u32) -> ChartNote {
    ChartNote {
        time_ms,
        lane,
        channel,
        key: 60,
        velocity: 1.0,
        duration_ms: 0.0,
        autoplay: false,
    }
}

fn frame_at_ms(out: &Sound, ms: u32) -> i16 {
    let byte = out.info().bytes_from_ms(ms);
    i16::from_le_bytes([out.as_bytes()[byte], out.as_bytes()[byte + 1]])
}

/// BGM on lane 0 and a held playable note with a synthetic NoteOff,
/// rendered offline.
#[test]
fn bgm_and_held_notes_render_together() {
    let mixer = Mixer::new(SoundInfo::DEFAULT, 32);
    let mut pool = KeySoundPool::new(mixer, 16);

    let chart = ChartEvents {
        bgm: vec![ChartNote {
            autoplay: true,
            ..note(0.0, 0, 1)
        }],
        notes: vec![ChartNote {
            duration_ms: 40.0,
            ..note(50.0, 1, 2)
        }],
        ..Default::default()
    };
    pool.load_from_chart(&chart);
    pool.bind_sound(1, sample(30, 1000));
    pool.bind_sound(2, sample(500, 2000)); // long sound, cut by NoteOff
    pool.set_autoplay(true);

    let mut out = Sound::empty();
    pool.record_to(&mut out).unwrap();
    assert!(!out.is_empty());

    // BGM rings for its whole 30 ms
    assert_eq!(frame_at_ms(&out, 10), 1000);
    // held note sounds between NoteOn (50 ms) and NoteOff (90 ms)
    assert_eq!(frame_at_ms(&out, 70), 2000);
    // and is silenced after the synthetic NoteOff
    assert_eq!(frame_at_ms(&out, 120), 0);
}

/// MIDI control events flow through the scheduler even when no
/// synthesizer bank is configured (silent adapter).
#[test]
fn midi_chart_renders_without_a_soundfont() {
    let mut mixer = Mixer::new(SoundInfo::DEFAULT, 8);
    mixer.init_midi(None).unwrap();
    let midi_channel = mixer.midi_channel().unwrap();
    assert!(mixer.channel(midi_channel).unwrap().is_occupied());

    let mut pool = KeySoundPool::new(mixer, 8);
    let chart = ChartEvents {
        bgm: vec![note(0.0, 0, 3)],
        midi_commands: vec![ChartMidiCommand {
            time_ms: 5.0,
            args: [0xB0, 7, 100],
        }],
        is_midi: true,
        ..Default::default()
    };
    pool.load_from_chart(&chart);
    pool.set_autoplay(true);

    let mut out = Sound::empty();
    pool.record_to(&mut out).unwrap();
    // nothing audible, but the render completes and is sized from the
    // event timeline plus the silent tail
    assert!(out.duration_ms() >= 3000.0);
    assert!(out.as_bytes().iter().all(|b| *b == 0));
}

/// Incremental driving mode with a fade point installed mid-flight.
#[test]
fn incremental_advance_with_fade() {
    let info = SoundInfo::DEFAULT;
    let mixer = Mixer::new(info, 8);
    let mut pool = KeySoundPool::new(mixer, 8);
    let chart = ChartEvents {
        notes: vec![note(0.0, 1, 1)],
        ..Default::default()
    };
    pool.load_from_chart(&chart);
    pool.bind_sound(1, sample(200, 4000));
    pool.set_autoplay(true);

    pool.advance(0.0);
    let index = pool
        .mixer()
        .channel(0)
        .filter(|c| c.is_playing())
        .map(|c| c.index())
        .unwrap();
    pool.mixer_mut()
        .channel_mut(index)
        .unwrap()
        .set_fade_point(100);

    // freshly installed fade silences the channel
    let mut out = vec![0u8; info.bytes_from_frames(441)];
    pool.mixer_mut().mix_all(&mut out, 441);
    assert!(out.iter().all(|b| *b == 0));

    // half the fade later the gain is half
    pool.advance(50.0);
    pool.mixer_mut().mix_all(&mut out, 441);
    let v = i16::from_le_bytes([out[0], out[1]]);
    assert_eq!(v, 2000);
}
