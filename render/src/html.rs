//! Self-contained HTML rendering of a chart: metadata header plus an
//! event table, one row per note, grouped by time.

use std::io::Write;
use std::path::Path;

use crate::chart::Chart;

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn export(chart: &Chart, path: &Path) -> anyhow::Result<()> {
    let mut out = std::fs::File::create(path)?;

    writeln!(out, "<!DOCTYPE html>")?;
    writeln!(out, "<html><head><meta charset=\"utf-8\">")?;
    writeln!(out, "<title>{}</title>", escape(&chart.meta.title))?;
    writeln!(
        out,
        "<style>body{{font-family:sans-serif}}table{{border-collapse:collapse}}\
         td,th{{border:1px solid #999;padding:2px 8px}}</style>"
    )?;
    writeln!(out, "</head><body>")?;
    writeln!(out, "<h1>{}</h1>", escape(&chart.meta.title))?;
    if !chart.meta.subtitle.is_empty() {
        writeln!(out, "<h2>{}</h2>", escape(&chart.meta.subtitle))?;
    }
    if !chart.meta.artist.is_empty() {
        writeln!(out, "<p>{}</p>", escape(&chart.meta.artist))?;
    }

    writeln!(
        out,
        "<table><tr><th>time (ms)</th><th>lane</th><th>channel</th>\
         <th>duration</th><th>kind</th></tr>"
    )?;
    let mut rows: Vec<(f32, u32, u32, f32, &str)> = Vec::new();
    for note in &chart.bgm {
        rows.push((note.time, 0, note.channel, note.duration, "bgm"));
    }
    for note in &chart.notes {
        rows.push((note.time, note.lane, note.channel, note.duration, "note"));
    }
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    for (time, lane, channel, duration, kind) in rows {
        writeln!(
            out,
            "<tr><td>{time}</td><td>{lane}</td><td>{channel}</td>\
             <td>{duration}</td><td>{kind}</td></tr>"
        )?;
    }
    writeln!(out, "</table></body></html>")?;
    Ok(())
}
