//! Point-in-time view of the player for status lines and diagnostics.

use crate::controller::Controller;

/// Snapshot of playback state, counters and output configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerStatus {
    /// Whether the render path is currently producing audio.
    pub playing: bool,
    /// Position of the audio leaving the engine, in milliseconds.
    pub position_ms: u64,
    /// Length of the loaded track in milliseconds (0 when nothing is loaded).
    pub duration_ms: u64,
    /// Current playback speed.
    pub speed: f32,
    /// Session sample rate in Hz.
    pub sample_rate: u32,
    /// Session channel count.
    pub channels: usize,
    /// Selected output device name, `None` when running headless.
    pub device: Option<String>,
    /// Fixed device callback size in frames, when the device announced one.
    pub buffer_size_frames: Option<u32>,
    /// Frames handed to the output so far.
    pub rendered_frames: u64,
    /// Total frames emitted as silence due to underruns.
    pub underrun_frames: u64,
    /// Number of underrun incidents observed by the render path.
    pub underrun_events: u64,
}

impl PlayerStatus {
    /// Read the controller's counters into a snapshot.
    pub(crate) fn capture(
        controller: &Controller,
        device: Option<&str>,
        buffer_size_frames: Option<u32>,
    ) -> Self {
        let sample_rate = controller.sample_rate();
        Self {
            playing: controller.is_playing(),
            position_ms: frames_to_ms(controller.position_frames(), sample_rate),
            duration_ms: secs_to_ms(controller.duration()),
            speed: controller.speed(),
            sample_rate,
            channels: controller.channels(),
            device: device.map(str::to_owned),
            buffer_size_frames,
            rendered_frames: controller.rendered_frames(),
            underrun_frames: controller.underrun_frames(),
            underrun_events: controller.underrun_events(),
        }
    }
}

fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames.saturating_mul(1000) / sample_rate as u64
}

fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::buffer::AudioBuffer;
    use crate::config::PlayerConfig;
    use crate::stretch::Stretcher;

    fn controller() -> Controller {
        let config = PlayerConfig::headless();
        let engine = Stretcher::new(44_100, 2, config.engine_capacity_frames());
        Controller::new(&config, Box::new(engine))
    }

    #[test]
    fn frames_convert_to_millis() {
        assert_eq!(frames_to_ms(88_200, 44_100), 2_000);
        assert_eq!(frames_to_ms(441, 44_100), 10);
        assert_eq!(frames_to_ms(1, 0), 0);
    }

    #[test]
    fn capture_reports_empty_session() {
        let status = PlayerStatus::capture(&controller(), None, None);
        assert!(!status.playing);
        assert_eq!(status.position_ms, 0);
        assert_eq!(status.duration_ms, 0);
        assert_eq!(status.speed, 1.0);
        assert_eq!(status.sample_rate, 44_100);
        assert_eq!(status.channels, 2);
    }

    #[test]
    fn capture_reports_position_and_device() {
        let controller = controller();
        let samples = vec![0.0; 44_100 * 10 * 2];
        controller.load(Arc::new(
            AudioBuffer::from_interleaved(samples, 44_100, 2).unwrap(),
        ));
        controller.seek(2.5);
        controller.set_speed(1.5);

        let status = PlayerStatus::capture(&controller, Some("USB DAC"), Some(512));
        assert_eq!(status.position_ms, 2_500);
        assert_eq!(status.duration_ms, 10_000);
        assert_eq!(status.speed, 1.5);
        assert_eq!(status.device.as_deref(), Some("USB DAC"));
        assert_eq!(status.buffer_size_frames, Some(512));
    }
}
