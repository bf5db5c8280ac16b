//! Playback stage (CPAL output stream).
//!
//! Builds the CPAL output stream whose callback pulls from the [`Controller`].
//! The callback:
//! - renders session-format `f32` into a scratch buffer allocated up front
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::Arc;

use cpal::traits::DeviceTrait;

use crate::controller::Controller;
use crate::error::{PlayerError, Result};

/// Frames rendered per scratch pass when the device does not announce a fixed buffer size.
const DEFAULT_SCRATCH_FRAMES: usize = 16_384;

/// Build a CPAL output stream that plays whatever `controller` renders.
///
/// `config.sample_rate` must equal the controller's session rate; the stream does no
/// rate conversion.
///
/// ## Real-time constraints
/// The callback never waits on a lock and never allocates; if the controller is busy the
/// device gets silence.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    controller: &Arc<Controller>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, controller),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, controller),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, controller),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, controller),
        other => Err(PlayerError::Device(format!(
            "unsupported sample format: {other:?}"
        ))),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    controller: &Arc<Controller>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let scratch_frames = match config.buffer_size {
        cpal::BufferSize::Fixed(frames) => (frames as usize).max(1),
        cpal::BufferSize::Default => DEFAULT_SCRATCH_FRAMES,
    };

    let mut state = OutputState {
        src_channels: controller.channels(),
        scratch: vec![0.0; scratch_frames * controller.channels()],
    };

    let controller_cb = controller.clone();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            state.fill(&controller_cb, data, channels_out);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Callback-owned state: the render scratch buffer and its layout.
struct OutputState {
    src_channels: usize,
    scratch: Vec<f32>,
}

impl OutputState {
    /// Fill a device buffer, rendering through `scratch` in as many passes as needed.
    fn fill<T>(&mut self, controller: &Controller, data: &mut [T], dst_channels: usize)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let src_channels = self.src_channels;
        let scratch_frames = self.scratch.len() / src_channels;
        let frames = data.len() / dst_channels;

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(scratch_frames);
            let src = &mut self.scratch[..n * src_channels];
            controller.render(src);

            for (i, frame) in src.chunks_exact(src_channels).enumerate() {
                let base = (done + i) * dst_channels;
                for ch in 0..dst_channels {
                    data[base + ch] = <T as cpal::Sample>::from_sample::<f32>(map_sample(
                        frame,
                        dst_channels,
                        ch,
                    ));
                }
            }
            done += n;
        }

        for sample in &mut data[frames * dst_channels..] {
            *sample = <T as cpal::Sample>::from_sample::<f32>(0.0);
        }
    }
}

/// Read one output sample for `dst_ch` from a source frame.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - stereo → stereo: pass-through
/// - other layouts: best-effort "clamp to available channels"
fn map_sample(frame: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    let src_channels = frame.len();
    match (src_channels, dst_channels) {
        (1, _) => frame[0],
        (2, 1) => 0.5 * (frame[0] + frame[1]),
        (2, 2) => frame[dst_ch.min(1)],
        _ => frame[dst_ch.min(src_channels.saturating_sub(1))],
    }
}
