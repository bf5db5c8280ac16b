//! Control surface used by the front end.
//!
//! [`Player`] owns one playback session: the controller, the stretch engine inside it, the
//! output stream and the decoder used by `load`. Everything before [`Player::init`] and after
//! [`Player::close`] is a no-op, so a front end can call into it without tracking state.

use std::path::Path;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::buffer::AudioBuffer;
use crate::config::{OutputMode, PlayerConfig};
use crate::controller::Controller;
use crate::decode::{Decode, decoder_for};
use crate::device;
use crate::error::{PlayerError, Result};
use crate::playback;
use crate::status::PlayerStatus;
use crate::stretch::Stretcher;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Running,
    Closed,
}

/// An open device stream and what was negotiated for it.
struct Output {
    stream: cpal::Stream,
    device_name: String,
    buffer_size_frames: Option<u32>,
}

/// One playback session: decode, play, seek, change speed, inspect.
pub struct Player {
    config: PlayerConfig,
    decoder: Box<dyn Decode>,
    lifecycle: Lifecycle,
    controller: Option<Arc<Controller>>,
    output: Option<Output>,
}

impl Player {
    /// Create an uninitialized player using the decoder selected in `config`.
    pub fn new(config: PlayerConfig) -> Self {
        let decoder = decoder_for(&config.decoder);
        Self::with_decoder(config, decoder)
    }

    /// Create an uninitialized player with a caller-supplied decoder.
    pub fn with_decoder(config: PlayerConfig, decoder: Box<dyn Decode>) -> Self {
        Self {
            config,
            decoder,
            lifecycle: Lifecycle::Uninitialized,
            controller: None,
            output: None,
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Allocate the engine and, unless headless, open and start the output stream.
    ///
    /// Calling it again while running does nothing. A closed player cannot be restarted.
    pub fn init(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Closed => return Err(PlayerError::EngineUnavailable),
            Lifecycle::Uninitialized => {}
        }

        let engine = Stretcher::new(
            self.config.sample_rate,
            self.config.channels,
            self.config.engine_capacity_frames(),
        );
        let (input_latency, output_latency) = engine.latency_frames();
        tracing::debug!(
            capacity_frames = engine.capacity_frames(),
            input_latency,
            output_latency,
            "time-stretch engine allocated"
        );
        let controller = Arc::new(Controller::new(&self.config, Box::new(engine)));

        let output = match self.config.output {
            OutputMode::Device => Some(self.open_output(&controller)?),
            OutputMode::Headless => None,
        };

        tracing::info!(
            rate_hz = self.config.sample_rate,
            channels = self.config.channels,
            device = output.as_ref().map(|o| o.device_name.as_str()).unwrap_or("headless"),
            "player initialized"
        );
        self.controller = Some(controller);
        self.output = output;
        self.lifecycle = Lifecycle::Running;
        Ok(())
    }

    fn open_output(&self, controller: &Arc<Controller>) -> Result<Output> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, self.config.device.as_deref())
            .map_err(|e| PlayerError::Device(format!("{e:#}")))?;
        let device_name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let supported = device::pick_output_config(&device, self.config.sample_rate)
            .map_err(|e| PlayerError::Device(format!("{e:#}")))?;
        if supported.sample_rate() != self.config.sample_rate {
            return Err(PlayerError::Device(format!(
                "{device_name} cannot run at {} Hz (closest is {} Hz)",
                self.config.sample_rate,
                supported.sample_rate()
            )));
        }

        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        if let Some(buf) = device::pick_buffer_size(&supported) {
            stream_config.buffer_size = buf;
        }
        let buffer_size_frames = match stream_config.buffer_size {
            cpal::BufferSize::Fixed(frames) => Some(frames),
            cpal::BufferSize::Default => None,
        };

        let stream = playback::build_output_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            controller,
        )?;
        stream.play()?;

        tracing::info!(
            device = %device_name,
            channels = stream_config.channels,
            sample_format = ?supported.sample_format(),
            buffer_frames = ?buffer_size_frames,
            host = ?host.id(),
            "output stream started"
        );
        Ok(Output {
            stream,
            device_name,
            buffer_size_frames,
        })
    }

    /// Stop the device, then release the engine and the loaded track.
    pub fn close(&mut self) {
        if self.lifecycle != Lifecycle::Running {
            self.lifecycle = Lifecycle::Closed;
            return;
        }
        if let Some(output) = self.output.take() {
            if let Err(err) = output.stream.pause() {
                tracing::debug!("pausing stream on close: {err}");
            }
            drop(output);
        }
        if let Some(controller) = self.controller.take() {
            controller.pause();
            drop(controller.unload());
        }
        self.lifecycle = Lifecycle::Closed;
        tracing::info!("player closed");
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    fn running(&self) -> Option<&Arc<Controller>> {
        self.controller.as_ref()
    }

    /// Decode `path` and make it the current track, paused at 0.
    ///
    /// On failure the previous track stays loaded and keeps its position.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let controller = self.running().ok_or(PlayerError::EngineUnavailable)?;

        let buffer = self
            .decoder
            .decode(path, self.config.sample_rate, self.config.channels)?;
        tracing::info!(
            path = %path.display(),
            frames = buffer.frame_count(),
            duration_secs = buffer.duration_secs(),
            "loaded"
        );
        let previous = controller.load(Arc::new(buffer));
        drop(previous);
        Ok(())
    }

    pub fn play(&self) {
        if let Some(controller) = self.running() {
            controller.play();
        }
    }

    pub fn pause(&self) {
        if let Some(controller) = self.running() {
            controller.pause();
        }
    }

    pub fn stop(&self) {
        if let Some(controller) = self.running() {
            controller.stop();
        }
    }

    pub fn seek(&self, secs: f64) {
        if let Some(controller) = self.running() {
            controller.seek(secs);
        }
    }

    /// Set the playback speed, clamped to 0.5..=3.0.
    pub fn set_speed(&self, speed: f32) {
        if let Some(controller) = self.running() {
            let applied = controller.set_speed(speed);
            tracing::info!(speed = applied, requested = speed, "speed changed");
        }
    }

    pub fn speed(&self) -> f32 {
        self.running().map(|c| c.speed()).unwrap_or(1.0)
    }

    /// Seconds into the track of the audio currently being heard.
    pub fn current_time(&self) -> f64 {
        self.running().map(|c| c.current_time()).unwrap_or(0.0)
    }

    pub fn duration(&self) -> f64 {
        self.running().map(|c| c.duration()).unwrap_or(0.0)
    }

    pub fn is_playing(&self) -> bool {
        self.running().is_some_and(|c| c.is_playing())
    }

    /// Shared handle to the loaded samples, valid even after a later reload.
    pub fn buffer_snapshot(&self) -> Option<Arc<AudioBuffer>> {
        self.running().and_then(|c| c.buffer())
    }

    pub fn status(&self) -> PlayerStatus {
        match self.running() {
            Some(controller) => PlayerStatus::capture(
                controller,
                self.output.as_ref().map(|o| o.device_name.as_str()),
                self.output.as_ref().and_then(|o| o.buffer_size_frames),
            ),
            None => PlayerStatus {
                speed: 1.0,
                sample_rate: self.config.sample_rate,
                channels: self.config.channels,
                ..PlayerStatus::default()
            },
        }
    }

    /// Pull interleaved session-format audio directly, as the device callback would.
    ///
    /// Intended for headless use; fills `out` with silence when not running.
    pub fn render(&self, out: &mut [f32]) {
        match self.running() {
            Some(controller) => controller.render(out),
            None => out.fill(0.0),
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}
