//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - describing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config that runs at the session rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Fixed callback buffer we ask the device for, clamped to what it supports.
///
/// About 23 ms at 44.1 kHz; the controller keeps its own headroom inside the stretch engine.
const TARGET_BUFFER_FRAMES: u32 = 1_024;

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the output config closest to `target_rate`.
///
/// Ranges that contain the target win outright; among those `f32` is preferred over the
/// integer formats. When no range contains the target, the nearest rate is returned and the
/// caller decides whether that is acceptable.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .context("Querying output configs")?
        .collect();

    let mut best: Option<(Candidate, cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            distance: rate.abs_diff(target_rate),
            format_rank: sample_format_rank(range.sample_format()),
            rate,
        };
        let replace = match &best {
            None => true,
            Some((current, _)) => candidate.is_better_than(current),
        };
        if replace {
            best = Some((candidate, range));
        }
    }

    let (candidate, range) = best.ok_or_else(|| anyhow!("No supported output configs"))?;
    Ok(range.with_sample_rate(candidate.rate))
}

/// Prefer a fixed buffer size if the device advertises one.
///
/// Asks for [`TARGET_BUFFER_FRAMES`] inside the advertised range so seek and speed changes are
/// heard promptly. Returns `None` when the device only supports the default buffer size.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_buffer_frames(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

#[derive(Clone, Debug)]
/// Lightweight output device metadata for device selection.
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    /// Whether some output config can run at the session rate.
    pub supports_session_rate: bool,
}

/// Return device metadata for `clipper devices`.
///
/// Devices that report no usable rate range are skipped with a warning.
pub fn list_device_infos(host: &cpal::Host, session_rate: u32) -> Result<Vec<DeviceInfo>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut out = Vec::new();
    for d in devices {
        let name = d.description()?.to_string();
        let mut min_rate = u32::MAX;
        let mut max_rate = 0u32;
        let mut supports_session_rate = false;
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
                supports_session_rate |=
                    (r.min_sample_rate()..=r.max_sample_rate()).contains(&session_rate);
            }
        }

        if min_rate > max_rate {
            if let Ok(default_cfg) = d.default_output_config() {
                min_rate = default_cfg.sample_rate();
                max_rate = min_rate;
                supports_session_rate = min_rate == session_rate;
            }
        }

        if min_rate == 0 || min_rate > max_rate {
            tracing::warn!(device = %name, "skipping device with invalid sample rate range");
            continue;
        }

        out.push(DeviceInfo {
            name,
            min_rate,
            max_rate,
            supports_session_rate,
        });
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    distance: u32,
    format_rank: u8,
    rate: u32,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        if self.distance != other.distance {
            self.distance < other.distance
        } else if self.format_rank != other.format_rank {
            self.format_rank < other.format_rank
        } else {
            self.rate > other.rate
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn clamp_buffer_frames(min: u32, max: u32) -> u32 {
    TARGET_BUFFER_FRAMES.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", "  "));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(8_000, 96_000, 44_100), 44_100);
    }

    #[test]
    fn pick_rate_for_range_clamps_to_bounds() {
        assert_eq!(pick_rate_for_range(48_000, 96_000, 44_100), 48_000);
        assert_eq!(pick_rate_for_range(8_000, 32_000, 44_100), 32_000);
    }

    #[test]
    fn exact_rate_beats_better_format() {
        let exact_i16 = Candidate {
            distance: 0,
            format_rank: sample_format_rank(cpal::SampleFormat::I16),
            rate: 44_100,
        };
        let near_f32 = Candidate {
            distance: 3_900,
            format_rank: sample_format_rank(cpal::SampleFormat::F32),
            rate: 48_000,
        };
        assert!(exact_i16.is_better_than(&near_f32));
        assert!(!near_f32.is_better_than(&exact_i16));
    }

    #[test]
    fn f32_wins_among_exact_matches() {
        let f32_cfg = Candidate {
            distance: 0,
            format_rank: 0,
            rate: 44_100,
        };
        let i32_cfg = Candidate {
            distance: 0,
            format_rank: 1,
            rate: 44_100,
        };
        assert!(f32_cfg.is_better_than(&i32_cfg));
    }

    #[test]
    fn buffer_frames_stay_small() {
        assert_eq!(clamp_buffer_frames(64, 4_096), TARGET_BUFFER_FRAMES);
        assert_eq!(clamp_buffer_frames(15, 4_194_304), TARGET_BUFFER_FRAMES);
        assert_eq!(clamp_buffer_frames(64, 512), 512);
        assert_eq!(clamp_buffer_frames(2_048, 8_192), 2_048);
        // Some hosts report an inverted range.
        assert_eq!(clamp_buffer_frames(4_096, 0), 4_096);
    }
}
