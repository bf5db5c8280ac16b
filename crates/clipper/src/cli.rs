use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clip_player::{DecoderBackend, OutputMode, PlayerConfig};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "clipper", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Decoder used to read source files
    #[arg(long, value_enum, default_value_t = Decoder::Symphonia, global = true)]
    pub decoder: Decoder,

    /// ffmpeg executable for `--decoder ffmpeg` and `export --ffmpeg`
    #[arg(long, default_value = "ffmpeg", global = true)]
    pub ffmpeg_bin: String,

    /// Source frames fed to the time-stretch engine per step
    #[arg(long, default_value_t = 1024, global = true)]
    pub chunk_frames: usize,

    /// Largest block rendered per inner pull (frames)
    #[arg(long, default_value_t = 4096, global = true)]
    pub block_frames: usize,

    /// Time-stretch engine buffer size in seconds
    #[arg(long, default_value_t = 4.0, global = true)]
    pub engine_buffer_seconds: f32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List output devices and exit
    Devices,

    /// Decode a file and print what was loaded
    Info {
        /// Path to audio file
        path: PathBuf,
    },

    /// Play a file until it ends or ctrl-c is pressed
    Play {
        /// Path to audio file
        path: PathBuf,

        /// Start position in seconds
        #[arg(long, default_value_t = 0.0)]
        start: f64,

        /// Playback speed (clamped to 0.5..=3.0)
        #[arg(long, default_value_t = 1.0)]
        speed: f32,
    },

    /// Write `[start, end)` of a file to a new clip
    Export {
        /// Path to audio file
        path: PathBuf,

        /// Clip start in seconds
        #[arg(long)]
        start: f64,

        /// Clip end in seconds
        #[arg(long)]
        end: f64,

        /// Output file (defaults to `<name>-clip-01.wav` next to the source)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Encode through ffmpeg so the output extension picks the format
        #[arg(long)]
        ffmpeg: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Decoder {
    Symphonia,
    Ffmpeg,
}

impl Args {
    /// Build the player configuration from the global flags.
    pub fn player_config(&self, output: OutputMode) -> PlayerConfig {
        let decoder = match self.decoder {
            Decoder::Symphonia => DecoderBackend::Symphonia,
            Decoder::Ffmpeg => DecoderBackend::Ffmpeg {
                program: self.ffmpeg_bin.clone(),
            },
        };
        PlayerConfig {
            feed_chunk_frames: self.chunk_frames,
            render_block_frames: self.block_frames,
            engine_buffer_seconds: self.engine_buffer_seconds,
            decoder,
            device: self.device.clone(),
            output,
            ..PlayerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_flags_map_onto_config() {
        let args = Args::parse_from([
            "clipper",
            "--device",
            "dac",
            "--chunk-frames",
            "512",
            "play",
            "song.flac",
            "--speed",
            "1.5",
        ]);
        let config = args.player_config(OutputMode::Device);
        assert_eq!(config.feed_chunk_frames, 512);
        assert_eq!(config.device.as_deref(), Some("dac"));
        assert_eq!(config.decoder, DecoderBackend::Symphonia);
        match args.cmd {
            Command::Play { speed, start, .. } => {
                assert_eq!(speed, 1.5);
                assert_eq!(start, 0.0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ffmpeg_decoder_uses_program_flag() {
        let args = Args::parse_from([
            "clipper",
            "info",
            "a.mp3",
            "--decoder",
            "ffmpeg",
            "--ffmpeg-bin",
            "/opt/ffmpeg",
        ]);
        let config = args.player_config(OutputMode::Headless);
        assert_eq!(
            config.decoder,
            DecoderBackend::Ffmpeg {
                program: "/opt/ffmpeg".to_string()
            }
        );
        assert_eq!(config.output, OutputMode::Headless);
    }

    #[test]
    fn version_carries_sha_and_build_day() {
        let inner = VERSION
            .strip_prefix(concat!(env!("CARGO_PKG_VERSION"), " ("))
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap();
        let (sha, day) = inner.split_once(", ").unwrap();
        assert!(!sha.is_empty());
        assert_eq!(day.len(), 10, "{day}");
        assert_eq!(day.as_bytes()[4], b'-');
        assert_eq!(day.as_bytes()[7], b'-');
        assert!(day[..4].parse::<u32>().unwrap() >= 2024);
    }

    #[test]
    fn export_requires_range() {
        assert!(Args::try_parse_from(["clipper", "export", "a.wav", "--start", "1"]).is_err());
        let args =
            Args::try_parse_from(["clipper", "export", "a.wav", "--start", "1", "--end", "2"])
                .unwrap();
        assert!(matches!(args.cmd, Command::Export { ffmpeg: false, .. }));
    }
}
