//! Whole-file decode into the session format.
//!
//! Two collaborators can produce an [`AudioBuffer`]:
//! - [`SymphoniaDecoder`]: probes and decodes in-process, then normalizes rate/channels
//! - [`FfmpegDecoder`]: runs an external `ffmpeg` that emits raw `f32le` at the session format
//!
//! Both run to completion on the calling (control) thread. Buffers grow geometrically and
//! report allocation failure instead of aborting.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffer::AudioBuffer;
use crate::config::DecoderBackend;
use crate::error::{DecodeError, PlayerError, Result};
use crate::resample;

/// Samples reserved up front by the ffmpeg reader (1 Mi samples).
const INITIAL_CAPACITY: usize = 1024 * 1024;
/// Samples read from the ffmpeg pipe per `read` call.
const READ_CHUNK_SAMPLES: usize = 4096;

/// A decode collaborator: file path in, session-format PCM out.
pub trait Decode: Send {
    fn decode(&self, path: &Path, sample_rate: u32, channels: usize) -> Result<AudioBuffer>;
}

/// Build the decoder selected by `backend`.
pub fn decoder_for(backend: &DecoderBackend) -> Box<dyn Decode> {
    match backend {
        DecoderBackend::Symphonia => Box::new(SymphoniaDecoder),
        DecoderBackend::Ffmpeg { program } => Box::new(FfmpegDecoder::new(program.clone())),
    }
}

/// Append `samples`, growing `buf` geometrically and surfacing allocation failure.
fn append_samples(buf: &mut Vec<f32>, samples: &[f32]) -> Result<()> {
    buf.try_reserve(samples.len())
        .map_err(|_| PlayerError::Allocation {
            samples: buf.len() + samples.len(),
        })?;
    buf.extend_from_slice(samples);
    Ok(())
}

/// In-process decoder built on Symphonia.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

impl Decode for SymphoniaDecoder {
    fn decode(&self, path: &Path, sample_rate: u32, channels: usize) -> Result<AudioBuffer> {
        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Probe(e.to_string()))?;

        let mut format = probed.format;
        let track = format.default_track().ok_or(DecodeError::NoTrack)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Probe(e.to_string()))?;

        let mut src_rate = codec_params.sample_rate;
        let mut src_channels = codec_params.channels.map(|c| c.count());
        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "packet read error, stopping: {e}");
                    break;
                }
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(DecodeError::Probe(e.to_string()).into()),
            };

            let spec = *decoded.spec();
            src_rate.get_or_insert(spec.rate);
            src_channels.get_or_insert(spec.channels.count());

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            append_samples(&mut samples, sample_buf.samples())?;
        }

        if samples.is_empty() {
            return Err(DecodeError::Empty.into());
        }

        let src_rate = src_rate.ok_or_else(|| DecodeError::Probe("unknown sample rate".into()))?;
        let src_channels =
            src_channels.ok_or_else(|| DecodeError::Probe("unknown channel layout".into()))?;

        tracing::info!(
            path = %path.display(),
            rate_hz = src_rate,
            channels = src_channels,
            frames = samples.len() / src_channels.max(1),
            "decoded source"
        );

        let normalized =
            resample::normalize(samples, src_rate, src_channels, sample_rate, channels)?;
        Ok(AudioBuffer::from_interleaved(normalized, sample_rate, channels)?)
    }
}

/// Decoder that delegates to an external `ffmpeg` process.
#[derive(Clone, Debug)]
pub struct FfmpegDecoder {
    program: String,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegDecoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, path: &Path, sample_rate: u32, channels: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-v", "error", "-i"])
            .arg(path)
            .args(["-f", "f32le", "-ac"])
            .arg(channels.to_string())
            .arg("-ar")
            .arg(sample_rate.to_string())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Decode for FfmpegDecoder {
    fn decode(&self, path: &Path, sample_rate: u32, channels: usize) -> Result<AudioBuffer> {
        tracing::info!(program = %self.program, path = %path.display(), "spawning decoder");
        let mut child = self
            .command(path, sample_rate, channels)
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr_thread = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                    tracing::warn!("ffmpeg: {line}");
                }
            })
        });

        let read = match child.stdout.take() {
            Some(stdout) => read_f32le(stdout),
            None => Err(DecodeError::Empty.into()),
        };

        let status = child.wait().map_err(DecodeError::Io);
        if let Some(handle) = stderr_thread {
            let _ = handle.join();
        }

        let samples = read?;
        match status {
            Ok(s) if !s.success() => {
                tracing::warn!(
                    status = %s,
                    samples = samples.len(),
                    "decoder exited with failure; output may be incomplete"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("could not collect decoder status: {e}"),
        }

        if samples.is_empty() {
            return Err(DecodeError::Empty.into());
        }
        tracing::info!(
            frames = samples.len() / channels.max(1),
            samples = samples.len(),
            "loaded audio"
        );
        Ok(AudioBuffer::from_interleaved(samples, sample_rate, channels)?)
    }
}

/// Read a raw little-endian `f32` stream to completion.
///
/// Starts at [`INITIAL_CAPACITY`] samples and grows by doubling. A trailing partial sample
/// (fewer than four bytes) is discarded.
pub fn read_f32le<R: Read>(mut reader: R) -> Result<Vec<f32>> {
    let mut samples: Vec<f32> = Vec::new();
    samples
        .try_reserve(INITIAL_CAPACITY)
        .map_err(|_| PlayerError::Allocation {
            samples: INITIAL_CAPACITY,
        })?;

    let mut bytes = vec![0u8; READ_CHUNK_SAMPLES * 4];
    let mut scratch = Vec::with_capacity(READ_CHUNK_SAMPLES);
    let mut pending = 0usize;

    loop {
        let n = match reader.read(&mut bytes[pending..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DecodeError::Io(e).into()),
        };
        let filled = pending + n;
        let whole = filled / 4 * 4;

        scratch.clear();
        scratch.extend(
            bytes[..whole]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
        if samples.len() + scratch.len() > samples.capacity() {
            let grow = samples.capacity().max(scratch.len());
            samples
                .try_reserve_exact(grow)
                .map_err(|_| PlayerError::Allocation {
                    samples: samples.len() + grow,
                })?;
        }
        samples.extend_from_slice(&scratch);

        bytes.copy_within(whole..filled, 0);
        pending = filled - whole;
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_wav;
    use std::io::Cursor;

    /// Reader that hands out at most `step` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn read_f32le_reassembles_split_samples() {
        let values = [0.5f32, -0.25, 1.0, 0.125, -1.0];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let out = read_f32le(Trickle {
            data,
            pos: 0,
            step: 3,
        })
        .unwrap();
        assert_eq!(out, values);
    }

    #[test]
    fn read_f32le_drops_trailing_partial_sample() {
        let mut data = 0.75f32.to_le_bytes().to_vec();
        data.extend_from_slice(&[1, 2]);
        let out = read_f32le(Cursor::new(data)).unwrap();
        assert_eq!(out, vec![0.75]);
    }

    #[test]
    fn read_f32le_grows_past_initial_capacity() {
        let count = INITIAL_CAPACITY + 10;
        let data = vec![0u8; count * 4];
        let out = read_f32le(Cursor::new(data)).unwrap();
        assert_eq!(out.len(), count);
        assert!(out.capacity() >= INITIAL_CAPACITY * 2);
    }

    #[test]
    fn symphonia_decodes_session_format_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 44_100, 2, 4410);

        let buf = SymphoniaDecoder.decode(&path, 44_100, 2).unwrap();
        assert_eq!(buf.frame_count(), 4410);
        assert_eq!(buf.channels(), 2);
        assert_eq!(buf.sample_rate(), 44_100);
    }

    #[test]
    fn symphonia_normalizes_mono_low_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 22_050, 1, 22_050);

        let buf = SymphoniaDecoder.decode(&path, 44_100, 2).unwrap();
        assert_eq!(buf.channels(), 2);
        let diff = (buf.frame_count() as i64 - 44_100).unsigned_abs();
        assert!(diff < 882, "frames = {}", buf.frame_count());
        let frame = buf.frame(1000).unwrap();
        assert_eq!(frame[0], frame[1]);
    }

    #[test]
    fn symphonia_missing_file_is_open_error() {
        let err = SymphoniaDecoder
            .decode(Path::new("/definitely/not/here.wav"), 44_100, 2)
            .unwrap_err();
        assert!(matches!(err, PlayerError::Decode(DecodeError::Open { .. })));
    }

    #[test]
    fn symphonia_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        let err = SymphoniaDecoder.decode(&path, 44_100, 2).unwrap_err();
        assert!(matches!(err, PlayerError::Decode(_)));
    }

    #[test]
    fn ffmpeg_missing_program_is_spawn_error() {
        let decoder = FfmpegDecoder::new("clip-player-no-such-ffmpeg");
        let err = decoder
            .decode(Path::new("whatever.wav"), 44_100, 2)
            .unwrap_err();
        assert!(matches!(err, PlayerError::Decode(DecodeError::Spawn { .. })));
    }
}
