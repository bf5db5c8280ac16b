//! Clip export.
//!
//! A selection `[start, end)` in seconds is quantized to frames and the matching slice of the
//! loaded buffer is written to a [`ClipSink`]. Two sinks exist:
//! - [`WavSink`]: 32-bit float WAV through `hound`, no external tools
//! - [`FfmpegSink`]: raw `f32le` piped into ffmpeg, container chosen by the output extension

use std::io::{BufRead, BufReader, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crate::buffer::AudioBuffer;
use crate::error::{PlayerError, Result};

/// Samples converted to bytes per write into the ffmpeg pipe.
const PIPE_CHUNK_SAMPLES: usize = 4096;

/// Frame range of a clip, always non-empty and inside the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClipRange {
    pub start_frame: usize,
    pub end_frame: usize,
}

impl ClipRange {
    /// Quantize `[start_secs, end_secs)` to frames (truncating) and clamp to the buffer.
    ///
    /// Returns `None` for empty or inverted selections.
    pub fn from_times(
        start_secs: f64,
        end_secs: f64,
        sample_rate: u32,
        frame_count: usize,
    ) -> Option<Self> {
        let start_frame = secs_to_frame(start_secs, sample_rate, frame_count);
        let end_frame = secs_to_frame(end_secs, sample_rate, frame_count);
        (start_frame < end_frame).then_some(Self {
            start_frame,
            end_frame,
        })
    }

    pub fn frames(&self) -> usize {
        self.end_frame - self.start_frame
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start_frame..self.end_frame
    }
}

fn secs_to_frame(secs: f64, sample_rate: u32, frame_count: usize) -> usize {
    if secs.is_nan() || secs <= 0.0 {
        return 0;
    }
    let frame = secs * sample_rate as f64;
    if frame >= frame_count as f64 {
        frame_count
    } else {
        frame as usize
    }
}

/// Destination for an exported clip.
pub trait ClipSink {
    /// Write interleaved samples in one go.
    fn write_clip(&mut self, samples: &[f32], sample_rate: u32, channels: usize) -> Result<()>;
}

/// 32-bit float WAV file.
#[derive(Clone, Debug)]
pub struct WavSink {
    path: PathBuf,
}

impl WavSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ClipSink for WavSink {
    fn write_clip(&mut self, samples: &[f32], sample_rate: u32, channels: usize) -> Result<()> {
        let channels = u16::try_from(channels)
            .map_err(|_| PlayerError::Export(format!("too many channels: {channels}")))?;
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&self.path, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Encode through an `ffmpeg` child process.
#[derive(Clone, Debug)]
pub struct FfmpegSink {
    program: String,
    path: PathBuf,
}

impl FfmpegSink {
    pub fn new(program: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            path: path.into(),
        }
    }

    fn command(&self, sample_rate: u32, channels: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-v", "error", "-f", "f32le", "-ar"])
            .arg(sample_rate.to_string())
            .arg("-ac")
            .arg(channels.to_string())
            .args(["-i", "pipe:0", "-y"])
            .arg(&self.path);
        cmd
    }
}

impl ClipSink for FfmpegSink {
    fn write_clip(&mut self, samples: &[f32], sample_rate: u32, channels: usize) -> Result<()> {
        let mut child = self
            .command(sample_rate, channels)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PlayerError::Export(format!("spawn {}: {e}", self.program)))?;

        let stderr_thread = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                for line in BufReader::new(stderr)
                    .lines()
                    .map_while(std::result::Result::ok)
                {
                    tracing::warn!(target: "clip_player::ffmpeg", "{line}");
                }
            })
        });

        let write_result = match child.stdin.take() {
            Some(mut stdin) => write_f32le(&mut stdin, samples),
            None => Err(std::io::Error::other("ffmpeg stdin unavailable")),
        };

        let status = child
            .wait()
            .map_err(|e| PlayerError::Export(format!("waiting for {}: {e}", self.program)))?;
        if let Some(handle) = stderr_thread {
            let _ = handle.join();
        }

        write_result.map_err(|e| PlayerError::Export(format!("writing to encoder: {e}")))?;
        if !status.success() {
            return Err(PlayerError::Export(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        Ok(())
    }
}

fn write_f32le<W: Write>(writer: &mut W, samples: &[f32]) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(PIPE_CHUNK_SAMPLES * 4);
    for chunk in samples.chunks(PIPE_CHUNK_SAMPLES) {
        bytes.clear();
        for sample in chunk {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        writer.write_all(&bytes)?;
    }
    writer.flush()
}

/// Write `[start_secs, end_secs)` of `buffer` to `sink`. Returns the number of frames written.
///
/// An empty or inverted range writes nothing and leaves the sink untouched.
pub fn export_clip(
    buffer: &AudioBuffer,
    start_secs: f64,
    end_secs: f64,
    sink: &mut dyn ClipSink,
) -> Result<usize> {
    let Some(range) = ClipRange::from_times(
        start_secs,
        end_secs,
        buffer.sample_rate(),
        buffer.frame_count(),
    ) else {
        tracing::debug!(start_secs, end_secs, "empty clip range, nothing exported");
        return Ok(0);
    };

    sink.write_clip(
        buffer.frames(range.as_range()),
        buffer.sample_rate(),
        buffer.channels(),
    )?;
    tracing::info!(
        start_frame = range.start_frame,
        end_frame = range.end_frame,
        frames = range.frames(),
        "clip exported"
    );
    Ok(range.frames())
}

/// Suggest `<dir>/<stem>-clip-NN.wav` next to the source file.
pub fn default_clip_path(source: &Path, index: usize) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".to_string());
    source.with_file_name(format!("{stem}-clip-{index:02}.wav"))
}
