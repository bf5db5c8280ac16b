pub mod buffer;
pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod error;
pub mod export;
pub mod playback;
pub mod player;
pub mod resample;
pub mod status;
pub mod stretch;

pub use buffer::{AudioBuffer, Peak};
pub use config::{DecoderBackend, OutputMode, PlayerConfig};
pub use error::{DecodeError, PlayerError, Result};
pub use export::{ClipRange, ClipSink, FfmpegSink, WavSink, export_clip};
pub use player::Player;
pub use status::PlayerStatus;

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    /// Write a 16-bit PCM sine fixture.
    pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
}
