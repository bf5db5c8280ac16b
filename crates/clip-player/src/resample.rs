//! Format normalization.
//!
//! Decoded sources arrive at whatever rate and layout the file has. Before they become an
//! [`AudioBuffer`](crate::buffer::AudioBuffer) they are mapped to the session channel count
//! and converted to the session rate with Rubato. This runs on the control thread during
//! `load`, never on the audio thread.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::{DecodeError, PlayerError};

/// Input chunk size in frames for the offline resampling loop.
const CHUNK_FRAMES: usize = 1024;

/// Remap interleaved samples from `src_channels` to `dst_channels`.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - equal counts: pass-through
/// - other layouts: keep the first channels, pad missing ones with channel 0
pub fn map_channels(
    samples: &[f32],
    src_channels: usize,
    dst_channels: usize,
) -> Result<Vec<f32>, PlayerError> {
    let src_channels = src_channels.max(1);
    let dst_channels = dst_channels.max(1);
    let frames = samples.len() / src_channels;
    let total = frames * dst_channels;

    let mut out = Vec::new();
    out.try_reserve_exact(total)
        .map_err(|_| PlayerError::Allocation { samples: total })?;

    if src_channels == dst_channels {
        out.extend_from_slice(&samples[..total]);
        return Ok(out);
    }

    for frame in samples.chunks_exact(src_channels) {
        match (src_channels, dst_channels) {
            (2, 1) => out.push(0.5 * (frame[0] + frame[1])),
            _ => {
                for ch in 0..dst_channels {
                    out.push(frame.get(ch).copied().unwrap_or(frame[0]));
                }
            }
        }
    }
    Ok(out)
}

/// Convert interleaved audio from `src_rate` to `dst_rate`.
///
/// Returns the input untouched when the rates already match.
pub fn resample_interleaved(
    samples: Vec<f32>,
    channels: usize,
    src_rate: u32,
    dst_rate: u32,
) -> Result<Vec<f32>, PlayerError> {
    if src_rate == dst_rate || samples.is_empty() {
        return Ok(samples);
    }
    if src_rate == 0 {
        return Err(DecodeError::Resample("source rate is zero".into()).into());
    }

    let channels = channels.max(1);
    let f_ratio = dst_rate as f64 / src_rate as f64;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let mut resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        CHUNK_FRAMES,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let in_frames = samples.len() / channels;
    let expected = ((in_frames as f64) * f_ratio).ceil() as usize * channels;
    let mut out = Vec::new();
    out.try_reserve(expected + CHUNK_FRAMES * channels)
        .map_err(|_| PlayerError::Allocation { samples: expected })?;

    let out_capacity_frames = ((f_ratio * 1.1).ceil() as usize + 1) * CHUNK_FRAMES + 64;
    let mut out_chunk = vec![0.0f32; out_capacity_frames * channels];

    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    // The final chunk is zero-padded to a full chunk and flagged with `partial_len`.
    let mut padded = vec![0.0f32; CHUNK_FRAMES * channels];
    for chunk in samples.chunks(CHUNK_FRAMES * channels) {
        let chunk_frames = chunk.len() / channels;
        if chunk_frames == 0 {
            continue;
        }
        let input: &[f32] = if chunk_frames == CHUNK_FRAMES {
            indexing.partial_len = None;
            chunk
        } else {
            padded.fill(0.0);
            padded[..chunk_frames * channels].copy_from_slice(&chunk[..chunk_frames * channels]);
            indexing.partial_len = Some(chunk_frames);
            &padded
        };

        let input_adapter = InterleavedSlice::new(input, channels, CHUNK_FRAMES)
            .map_err(|e| DecodeError::Resample(format!("input adapter: {e}")))?;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut out_chunk, channels, out_capacity_frames)
                .map_err(|e| DecodeError::Resample(format!("output adapter: {e}")))?;

        indexing.input_offset = 0;
        indexing.output_offset = 0;

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| DecodeError::Resample(e.to_string()))?;

        out.extend_from_slice(&out_chunk[..nbr_out * channels]);
    }

    tracing::debug!(
        from_hz = src_rate,
        to_hz = dst_rate,
        in_frames,
        out_frames = out.len() / channels,
        "resampled source"
    );
    Ok(out)
}

/// Bring decoded audio into session format (channels first, then rate).
pub fn normalize(
    samples: Vec<f32>,
    src_rate: u32,
    src_channels: usize,
    dst_rate: u32,
    dst_channels: usize,
) -> Result<Vec<f32>, PlayerError> {
    let mapped = if src_channels == dst_channels {
        samples
    } else {
        map_channels(&samples, src_channels, dst_channels)?
    };
    resample_interleaved(mapped, dst_channels, src_rate, dst_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_to_stereo_duplicates() {
        let out = map_channels(&[0.1, 0.2], 1, 2).unwrap();
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_to_mono_averages() {
        let out = map_channels(&[0.2, 0.4, -1.0, 1.0], 2, 1).unwrap();
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn surround_to_stereo_keeps_front_pair() {
        let frame = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let out = map_channels(&frame, 6, 2).unwrap();
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn missing_channels_repeat_channel_zero() {
        let frames = [1.0, 2.0, 3.0, -1.0, -2.0, -3.0];
        let out = map_channels(&frames, 3, 5).unwrap();
        assert_eq!(
            out,
            vec![1.0, 2.0, 3.0, 1.0, 1.0, -1.0, -2.0, -3.0, -1.0, -1.0]
        );
    }

    #[test]
    fn matching_rates_pass_through() {
        let input = vec![0.25f32; 64];
        let out = resample_interleaved(input.clone(), 2, 44_100, 44_100).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn upsampling_doubles_length_roughly() {
        let frames = 22_050;
        let input: Vec<f32> = (0..frames * 2)
            .map(|i| ((i / 2) as f32 * 0.01).sin() * 0.5)
            .collect();
        let out = resample_interleaved(input, 2, 22_050, 44_100).unwrap();
        let out_frames = out.len() / 2;
        let expected = frames * 2;
        let diff = (out_frames as i64 - expected as i64).unsigned_abs() as usize;
        assert!(diff < expected / 50, "got {out_frames} frames, expected ~{expected}");
    }

    #[test]
    fn zero_source_rate_is_rejected() {
        let err = resample_interleaved(vec![0.0; 4], 2, 0, 44_100).unwrap_err();
        assert!(matches!(err, PlayerError::Decode(DecodeError::Resample(_))));
    }
}
