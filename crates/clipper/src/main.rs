//! clipper: command-line front end for the clip player.
//!
//! ## Commands
//! - `devices`: list output devices and whether they can run at the session rate.
//! - `info`: decode a file and print its normalized length plus a coarse waveform.
//! - `play`: play a file with optional start offset and speed until it ends or ctrl-c.
//! - `export`: write a time range of a file to a clip (WAV, or any format via ffmpeg).
//!
//! Every file is normalized to 44.1 kHz stereo on load, so all positions are in seconds of
//! the source track regardless of playback speed.

mod cli;

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use clip_player::decode::decoder_for;
use clip_player::export::default_clip_path;
use clip_player::{
    AudioBuffer, ClipSink, FfmpegSink, OutputMode, Player, PlayerConfig, PlayerStatus, WavSink,
    device, export_clip,
};
use crossbeam_channel::{bounded, select, tick};
use tracing_subscriber::EnvFilter;

/// Status line refresh period while playing.
const STATUS_TICK: Duration = Duration::from_millis(200);
/// Width of the `info` waveform overview in characters.
const OVERVIEW_WIDTH: usize = 64;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,clipper=info,clip_player=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    match &args.cmd {
        cli::Command::Devices => list_devices(),
        cli::Command::Info { path } => {
            let config = args.player_config(OutputMode::Headless);
            let buffer = decode_file(&config, path)?;
            print_info(path, &buffer);
            Ok(())
        }
        cli::Command::Play { path, start, speed } => {
            let config = args.player_config(OutputMode::Device);
            play_file(config, path, *start, *speed)
        }
        cli::Command::Export {
            path,
            start,
            end,
            out,
            ffmpeg,
        } => {
            let config = args.player_config(OutputMode::Headless);
            let buffer = decode_file(&config, path)?;
            let out = out.clone().unwrap_or_else(|| default_clip_path(path, 1));
            let mut sink: Box<dyn ClipSink> = if *ffmpeg {
                Box::new(FfmpegSink::new(args.ffmpeg_bin.clone(), &out))
            } else {
                Box::new(WavSink::new(&out))
            };
            let frames = export_clip(&buffer, *start, *end, sink.as_mut())
                .with_context(|| format!("export to {}", out.display()))?;
            if frames == 0 {
                println!("empty range {start:.3}..{end:.3}s, nothing written");
            } else {
                println!(
                    "{} frames ({:.3}s) -> {}",
                    frames,
                    frames as f64 / buffer.sample_rate() as f64,
                    out.display()
                );
            }
            Ok(())
        }
    }
}

fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let infos = device::list_device_infos(&host, clip_player::config::SAMPLE_RATE)?;
    if infos.is_empty() {
        println!("no output devices");
    }
    for (i, d) in infos.iter().enumerate() {
        let note = if d.supports_session_rate {
            ""
        } else {
            "  (no 44100 Hz support)"
        };
        println!(
            "#{i}: {}  [{}-{} Hz]{note}",
            d.name, d.min_rate, d.max_rate
        );
    }
    Ok(())
}

fn decode_file(config: &PlayerConfig, path: &Path) -> Result<AudioBuffer> {
    let decoder = decoder_for(&config.decoder);
    let buffer = decoder
        .decode(path, config.sample_rate, config.channels)
        .with_context(|| format!("decode {}", path.display()))?;
    Ok(buffer)
}

fn print_info(path: &Path, buffer: &AudioBuffer) {
    println!("file:      {}", path.display());
    println!("frames:    {}", buffer.frame_count());
    println!("duration:  {}", format_time(buffer.duration_secs()));
    println!("rate:      {} Hz", buffer.sample_rate());
    println!("channels:  {}", buffer.channels());

    let per_bucket = buffer.frame_count().div_ceil(OVERVIEW_WIDTH).max(1);
    let line: String = buffer
        .peaks(0, per_bucket, OVERVIEW_WIDTH)
        .iter()
        .map(|p| level_glyph(p.max.max(-p.min)))
        .collect();
    println!("waveform:  {line}");
}

fn level_glyph(level: f32) -> char {
    const GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let idx = (level.clamp(0.0, 1.0) * (GLYPHS.len() - 1) as f32).round() as usize;
    GLYPHS[idx]
}

fn play_file(config: PlayerConfig, path: &Path, start: f64, speed: f32) -> Result<()> {
    let mut player = Player::new(config);
    player.init().context("open audio output")?;
    player
        .load(path)
        .with_context(|| format!("load {}", path.display()))?;
    player.seek(start);
    player.set_speed(speed);
    player.play();

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install ctrl-c handler")?;
    let ticker = tick(STATUS_TICK);

    let mut stderr = std::io::stderr();
    loop {
        select! {
            recv(stop_rx) -> _ => {
                tracing::info!("interrupted");
                player.stop();
                break;
            }
            recv(ticker) -> _ => {
                let status = player.status();
                let _ = write!(stderr, "\r{}", status_line(&status));
                let _ = stderr.flush();
                if !status.playing {
                    break;
                }
            }
        }
    }
    let _ = writeln!(stderr);

    let status = player.status();
    if status.underrun_events > 0 {
        tracing::warn!(
            events = status.underrun_events,
            frames = status.underrun_frames,
            "underruns during playback"
        );
    }
    player.close();
    Ok(())
}

fn status_line(status: &PlayerStatus) -> String {
    let state = if status.playing { "playing" } else { "stopped" };
    format!(
        "{state:<8} {} / {}  x{:.2}",
        format_time(status.position_ms as f64 / 1000.0),
        format_time(status.duration_ms as f64 / 1000.0),
        status.speed
    )
}

fn format_time(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let minutes = total_ms / 60_000;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{minutes:02}:{seconds:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_time_pads_fields() {
        assert_eq!(format_time(0.0), "00:00.000");
        assert_eq!(format_time(61.5), "01:01.500");
        assert_eq!(format_time(-3.0), "00:00.000");
    }

    #[test]
    fn level_glyph_scales() {
        assert_eq!(level_glyph(0.0), '▁');
        assert_eq!(level_glyph(1.0), '█');
        assert_eq!(level_glyph(4.0), '█');
    }

    #[test]
    fn status_line_shows_position_and_speed() {
        let status = PlayerStatus {
            playing: true,
            position_ms: 61_500,
            duration_ms: 180_000,
            speed: 1.5,
            ..PlayerStatus::default()
        };
        assert_eq!(status_line(&status), "playing  01:01.500 / 03:00.000  x1.50");
    }
}
