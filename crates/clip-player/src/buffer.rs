//! Decoded audio store.
//!
//! An [`AudioBuffer`] is the fully decoded track in session format: interleaved `f32`
//! at a fixed rate and channel count. It is immutable once built and shared as
//! `Arc<AudioBuffer>` between the player, the render path and visualization readers.

use std::ops::Range;

use crate::error::DecodeError;

/// Frames inspected per waveform bucket at most.
const PEAK_SCAN_LIMIT: usize = 100;

/// Interleaved `f32` samples plus format metadata.
///
/// Invariant: `samples.len() == frame_count * channels`.
#[derive(Debug, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    frame_count: usize,
    sample_rate: u32,
    channels: usize,
}

/// Min/max of one waveform column.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Peak {
    pub min: f32,
    pub max: f32,
}

impl AudioBuffer {
    /// Wrap decoded samples, dropping a trailing partial frame.
    ///
    /// Fails with [`DecodeError::Empty`] when not even one whole frame is present.
    pub fn from_interleaved(
        mut samples: Vec<f32>,
        sample_rate: u32,
        channels: usize,
    ) -> Result<Self, DecodeError> {
        let channels = channels.max(1);
        let frame_count = samples.len() / channels;
        if frame_count == 0 {
            return Err(DecodeError::Empty);
        }
        samples.truncate(frame_count * channels);
        Ok(Self {
            samples,
            frame_count,
            sample_rate,
            channels,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// One interleaved frame, or `None` past the end.
    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        if index >= self.frame_count {
            return None;
        }
        let start = index * self.channels;
        Some(&self.samples[start..start + self.channels])
    }

    /// Interleaved samples for a frame range, clamped to the buffer.
    pub fn frames(&self, range: Range<usize>) -> &[f32] {
        let end = range.end.min(self.frame_count);
        let start = range.start.min(end);
        &self.samples[start * self.channels..end * self.channels]
    }

    /// Nearest frame for a time in seconds, clamped to `[0, frame_count]`.
    pub fn time_to_frame(&self, secs: f64) -> usize {
        time_to_frame(secs, self.sample_rate, self.frame_count)
    }

    /// Waveform summary of channel 0.
    ///
    /// Each bucket covers `frames_per_bucket` frames starting at `start_frame`; only the first
    /// [`PEAK_SCAN_LIMIT`] frames of a bucket are inspected. Buckets starting past the end are
    /// not returned, so the result may be shorter than `buckets`.
    pub fn peaks(&self, start_frame: usize, frames_per_bucket: usize, buckets: usize) -> Vec<Peak> {
        let step = frames_per_bucket.max(1);
        let scan = step.min(PEAK_SCAN_LIMIT);
        let mut out = Vec::with_capacity(buckets);
        for b in 0..buckets {
            let first = start_frame.saturating_add(b.saturating_mul(step));
            if first >= self.frame_count {
                break;
            }
            let last = first.saturating_add(scan).min(self.frame_count);
            let mut peak = Peak::default();
            for i in first..last {
                let s = self.samples[i * self.channels];
                peak.min = peak.min.min(s);
                peak.max = peak.max.max(s);
            }
            out.push(peak);
        }
        out
    }
}

/// Seconds to a frame index: rounded to nearest, clamped to `[0, frame_count]`.
pub(crate) fn time_to_frame(secs: f64, sample_rate: u32, frame_count: usize) -> usize {
    if !secs.is_finite() || secs <= 0.0 {
        return if secs == f64::INFINITY { frame_count } else { 0 };
    }
    let frame = (secs * sample_rate as f64).round();
    if frame >= frame_count as f64 {
        frame_count
    } else {
        frame as usize
    }
}
