mod chart;
mod html;
mod pipeline;

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use keymix_codec::OutputFormat;

use crate::pipeline::{render, RenderOptions};

/// Offline rhythm-game chart renderer.
#[derive(Parser, Debug)]
#[command(name = "keymix-render", version, about)]
struct Args {
    /// Chart event file to render.
    input: PathBuf,

    /// Output file; `-` or `STDOUT` streams to stdout. Defaults to the
    /// chart title next to the working directory.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Output container: wav, ogg or flac. Derived from the output
    /// extension when unset; ogg otherwise.
    #[arg(long = "type", value_parser = parse_format)]
    format: Option<OutputFormat>,

    /// Encoder quality in [0, 1] (ogg / flac).
    #[arg(long, default_value_t = 0.6)]
    quality: f64,

    /// Pitch ratio, > 0.
    #[arg(long, default_value_t = 1.0)]
    pitch: f64,

    /// Tempo length multiplier, > 0.
    #[arg(long, default_value_t = 1.0)]
    tempo: f64,

    /// Key-sound base volume.
    #[arg(long, default_value_t = 0.8)]
    volume: f32,

    /// Restart an already-playing channel when the same channel is
    /// scheduled again.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    stop_duplicated_sound: bool,

    /// Also write an HTML rendering of the chart.
    #[arg(long)]
    output_html: Option<PathBuf>,

    /// SoundFont for the MIDI synthesizer; without it MIDI charts render
    /// silence.
    #[arg(long)]
    soundfont: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    OutputFormat::from_extension(s).ok_or_else(|| format!("unknown output type {s:?}"))
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()
        .ok();

    let mut opts = RenderOptions::new(args.input);
    opts.output = args.output;
    opts.format = args.format;
    opts.quality = args.quality;
    opts.pitch = args.pitch;
    opts.tempo = args.tempo;
    opts.volume = args.volume;
    opts.stop_duplicated_sound = args.stop_duplicated_sound;
    opts.output_html = args.output_html;
    opts.soundfont = args.soundfont;

    let mut last_percent = -1i32;
    let mut progress = |p: f64| {
        let percent = (p * 100.0) as i32;
        if percent != last_percent {
            last_percent = percent;
            log::info!("progress {percent}%");
        }
    };

    // exit status stays 0 either way; the outcome line is the contract
    match render(&opts, &mut progress) {
        Ok(()) => println!("Encoding finished successfully."),
        Err(e) => {
            log::error!("{e:#}");
            println!("Encoding failed.");
        }
    }
}
