//! Error taxonomy for the player surface.
//!
//! Everything that can fail on the control thread funnels into [`PlayerError`].
//! The realtime render path has no error channel: it degrades to silence.

use std::io;
use std::path::PathBuf;

/// Failures while turning a file into an [`AudioBuffer`](crate::buffer::AudioBuffer).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("cannot open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot start decoder `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("unsupported or unreadable source: {0}")]
    Probe(String),
    #[error("no decodable audio track")]
    NoTrack,
    #[error("decoder produced no samples")]
    Empty,
    #[error("decoder stream error: {0}")]
    Io(#[from] io::Error),
    #[error("format conversion failed: {0}")]
    Resample(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// A sample buffer could not be grown; the load is aborted, the process keeps going.
    #[error("out of memory while buffering {samples} samples")]
    Allocation { samples: usize },
    #[error("audio device error: {0}")]
    Device(String),
    #[error("player is not initialized")]
    EngineUnavailable,
    #[error("clip export failed: {0}")]
    Export(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;

impl From<cpal::BuildStreamError> for PlayerError {
    fn from(e: cpal::BuildStreamError) -> Self {
        PlayerError::Device(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for PlayerError {
    fn from(e: cpal::PlayStreamError) -> Self {
        PlayerError::Device(e.to_string())
    }
}

impl From<hound::Error> for PlayerError {
    fn from(e: hound::Error) -> Self {
        PlayerError::Export(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_convert_into_player_errors() {
        let err: PlayerError = DecodeError::Empty.into();
        assert!(matches!(err, PlayerError::Decode(DecodeError::Empty)));
        assert_eq!(err.to_string(), "decoder produced no samples");
    }

    #[test]
    fn open_error_mentions_path() {
        let err = DecodeError::Open {
            path: PathBuf::from("/missing.flac"),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert!(err.to_string().contains("missing.flac"));
    }
}
