use crate::error::{Error, Result};

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

pub const MIN_FRAME_COUNT: usize = 2;
pub const MAX_FRAME_COUNT: usize = 300;

/// Tunables for a run. Layered: defaults, optional TOML file, `UNMARK_*`
/// environment variables, then command-line flags.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub frame_count: usize,
    pub frame_rate: u32,
    pub pacing_delay_ms: u64,
    pub settle_delay_ms: u64,
    pub jpeg_quality: u8,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frame_count: 30,
            frame_rate: 24,
            pacing_delay_ms: 1000,
            settle_delay_ms: 50,
            jpeg_quality: 90,
            endpoint: String::from("https://generativelanguage.googleapis.com/v1beta"),
            model: String::from("gemini-2.0-flash-preview-image-generation"),
            api_key: None,
            request_timeout_secs: None,
            ffmpeg: String::from("ffmpeg"),
            ffprobe: String::from("ffprobe"),
        }
    }
}

impl Settings {
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(true));
        }
        let settings: Settings = builder
            .add_source(Environment::with_prefix("UNMARK").try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        validate_frame_count(self.frame_count)?;
        if self.frame_rate == 0 {
            return Err(Error::Config("frame_rate must be positive".to_string()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(Error::Config(format!("jpeg_quality must be between 1 and 100, got {}", self.jpeg_quality)));
        }
        if self.endpoint.is_empty() || self.model.is_empty() {
            return Err(Error::Config("endpoint and model cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

pub fn validate_frame_count(count: usize) -> Result<()> {
    if (MIN_FRAME_COUNT..=MAX_FRAME_COUNT).contains(&count) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "frame count must be between {} and {}, got {}",
            MIN_FRAME_COUNT, MAX_FRAME_COUNT, count
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.pacing_delay(), Duration::from_secs(1));
        assert_eq!(settings.settle_delay(), Duration::from_millis(50));
        assert_eq!(settings.request_timeout(), None);
    }

    #[test]
    fn frame_count_bounds_are_inclusive() {
        assert!(validate_frame_count(2).is_ok());
        assert!(validate_frame_count(300).is_ok());
        assert!(matches!(validate_frame_count(1), Err(Error::Validation(_))));
        assert!(matches!(validate_frame_count(301), Err(Error::Validation(_))));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "frame_count = 12\npacing_delay_ms = 0\nmodel = \"custom-model\"").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.frame_count, 12);
        assert_eq!(settings.pacing_delay(), Duration::ZERO);
        assert_eq!(settings.model, "custom-model");
        assert_eq!(settings.frame_rate, 24);
    }

    #[test]
    fn invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "jpeg_quality = 0").unwrap();

        assert!(matches!(Settings::load(Some(file.path())), Err(Error::Config(_))));
    }
}
