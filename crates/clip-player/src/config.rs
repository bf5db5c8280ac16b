/// Session sample rate every source is normalized to.
pub const SAMPLE_RATE: u32 = 44_100;
/// Session channel count every source is normalized to.
pub const CHANNELS: usize = 2;

/// Lowest accepted playback speed.
pub const MIN_SPEED: f32 = 0.5;
/// Highest accepted playback speed.
pub const MAX_SPEED: f32 = 3.0;

/// Which collaborator turns a file into PCM.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DecoderBackend {
    /// In-process decode via Symphonia.
    #[default]
    Symphonia,
    /// External `ffmpeg` process (program name or path).
    Ffmpeg { program: String },
}

/// Where rendered audio goes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Open a CPAL output stream on `init`.
    #[default]
    Device,
    /// No device; audio is pulled through `Player::render`.
    Headless,
}

/// Player tuning parameters shared by decode/stretch/render stages.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Session rate in Hz.
    pub sample_rate: u32,
    /// Session channel count.
    pub channels: usize,
    /// Source frames handed to the stretch engine per write.
    pub feed_chunk_frames: usize,
    /// Max frames produced per inner render pass.
    pub render_block_frames: usize,
    /// Capacity of the stretch engine FIFOs, allocated once at init.
    pub engine_buffer_seconds: f32,
    pub decoder: DecoderBackend,
    /// Output device substring match; default device when unset.
    pub device: Option<String>,
    pub output: OutputMode,
}

impl Default for PlayerConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            feed_chunk_frames: 1024,
            render_block_frames: 4096,
            engine_buffer_seconds: 4.0,
            decoder: DecoderBackend::default(),
            device: None,
            output: OutputMode::default(),
        }
    }
}

impl PlayerConfig {
    /// Config for offline use: no device is opened.
    pub fn headless() -> Self {
        Self {
            output: OutputMode::Headless,
            ..Self::default()
        }
    }

    /// Engine FIFO capacity in frames, never smaller than what one render block can demand.
    pub(crate) fn engine_capacity_frames(&self) -> usize {
        let secs = if self.engine_buffer_seconds.is_finite() && self.engine_buffer_seconds > 0.0 {
            self.engine_buffer_seconds
        } else {
            4.0
        };
        let frames = (self.sample_rate as f32 * secs).ceil() as usize;
        let floor = self.render_block_frames.max(1) * 4 + self.feed_chunk_frames.max(1) * 4;
        frames.max(floor)
    }
}

/// Clamp a requested speed into the accepted range; NaN falls back to 1.0.
pub fn clamp_speed(speed: f32) -> f32 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_speed_respects_bounds() {
        assert_eq!(clamp_speed(0.1), MIN_SPEED);
        assert_eq!(clamp_speed(10.0), MAX_SPEED);
        assert_eq!(clamp_speed(1.25), 1.25);
        assert_eq!(clamp_speed(f32::NAN), 1.0);
        assert_eq!(clamp_speed(f32::INFINITY), MAX_SPEED);
    }

    #[test]
    fn engine_capacity_falls_back_on_bad_seconds() {
        let mut cfg = PlayerConfig::default();
        cfg.engine_buffer_seconds = f32::NAN;
        assert_eq!(cfg.engine_capacity_frames(), 176_400);
        cfg.engine_buffer_seconds = 0.01;
        assert_eq!(cfg.engine_capacity_frames(), 4096 * 4 + 1024 * 4);
    }
}
