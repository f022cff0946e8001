//! Capture settings

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CaptureError, CaptureResult};

/// Which capture strategy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrabberType {
    /// Direct grab if available, otherwise the external encoder
    #[default]
    Auto,
    /// Direct low-level pixel grab
    Direct,
    /// External ffmpeg process
    Ffmpeg,
}

impl std::str::FromStr for GrabberType {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "direct" => Ok(Self::Direct),
            "ffmpeg" => Ok(Self::Ffmpeg),
            other => Err(CaptureError::InvalidConfig(format!(
                "unknown grabber type '{}'",
                other
            ))),
        }
    }
}

/// Output height presets for the encoder strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "144p")]
    P144,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl Quality {
    pub const ALL: [Quality; 6] = [
        Quality::P144,
        Quality::P240,
        Quality::P360,
        Quality::P480,
        Quality::P720,
        Quality::P1080,
    ];

    pub fn height(&self) -> u32 {
        match self {
            Quality::P144 => 144,
            Quality::P240 => 240,
            Quality::P360 => 360,
            Quality::P480 => 480,
            Quality::P720 => 720,
            Quality::P1080 => 1080,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Quality::P144 => "144p",
            Quality::P240 => "240p",
            Quality::P360 => "360p",
            Quality::P480 => "480p",
            Quality::P720 => "720p",
            Quality::P1080 => "1080p",
        }
    }
}

impl std::str::FromStr for Quality {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quality::ALL
            .into_iter()
            .find(|q| q.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CaptureError::InvalidConfig(format!("unknown quality '{}'", s)))
    }
}

/// Maximum supported capture rate
pub const MAX_SNAPS_PER_SECOND: u32 = 60;

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Capture strategy
    pub grabber: GrabberType,
    /// Output height for the encoder strategy
    pub quality: Quality,
    /// Frames per second requested from the source
    pub snaps_per_second: u32,
    /// Composite the pointer overlay into frames
    pub grab_pointer: bool,
    /// Encoder executable
    pub ffmpeg_path: String,
    /// Stall notification window of the loopback reader
    pub data_flow_timeout_ms: u64,
    /// Scratch buffer size of the loopback reader
    pub read_buffer_size: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            grabber: GrabberType::Auto,
            quality: Quality::P720,
            snaps_per_second: 10,
            grab_pointer: false,
            ffmpeg_path: if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" }.to_string(),
            data_flow_timeout_ms: 2000,
            read_buffer_size: 0x10000,
        }
    }
}

impl CaptureSettings {
    /// Load settings from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> CaptureResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.snaps_per_second == 0 || self.snaps_per_second > MAX_SNAPS_PER_SECOND {
            return Err(CaptureError::InvalidConfig(format!(
                "snaps_per_second must be within 1..={}, got {}",
                MAX_SNAPS_PER_SECOND, self.snaps_per_second
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(CaptureError::InvalidConfig(
                "read_buffer_size must be positive".to_string(),
            ));
        }
        if self.ffmpeg_path.trim().is_empty() {
            return Err(CaptureError::InvalidConfig(
                "ffmpeg_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn data_flow_timeout(&self) -> Duration {
        Duration::from_millis(self.data_flow_timeout_ms)
    }

    /// Time budget for one frame at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.snaps_per_second.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = CaptureSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.quality.height(), 720);
        assert_eq!(settings.frame_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: CaptureSettings =
            serde_json::from_str(r#"{"grabber": "ffmpeg", "quality": "360p", "grab_pointer": true}"#)
                .unwrap();
        assert_eq!(settings.grabber, GrabberType::Ffmpeg);
        assert_eq!(settings.quality, Quality::P360);
        assert!(settings.grab_pointer);
        assert_eq!(settings.snaps_per_second, 10);
    }

    #[test]
    fn test_validation_rejects_bad_rates() {
        let mut settings = CaptureSettings {
            snaps_per_second: 0,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(CaptureError::InvalidConfig(_))));

        settings.snaps_per_second = MAX_SNAPS_PER_SECOND + 1;
        assert!(settings.validate().is_err());

        settings.snaps_per_second = 30;
        settings.read_buffer_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("FFMPEG".parse::<GrabberType>().unwrap(), GrabberType::Ffmpeg);
        assert!("robot".parse::<GrabberType>().is_err());
        assert_eq!("1080P".parse::<Quality>().unwrap(), Quality::P1080);
        assert!("4k".parse::<Quality>().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("screencast-settings-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"snaps_per_second": 25, "quality": "480p"}"#).unwrap();

        let settings = CaptureSettings::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.snaps_per_second, 25);
        assert_eq!(settings.quality, Quality::P480);
    }
}
