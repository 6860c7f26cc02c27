use crate::backend::BackendKind;
use crate::container::ContainerFormat;
use crate::error::{PipelineError, Result};
use crate::pipeline::descriptor::{AAC_PROFILE_LC, COLOR_FORMAT_YUV420_FLEXIBLE};
use crate::pipeline::types::MediaKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How decoded samples reach the encoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Copy decoder output into encoder input slots on a single thread
    #[default]
    Software,
    /// Render decoder output onto the encoder's input surface, two threads
    ZeroCopy,
}

/// Keys added to the source format before configuring the encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Encoder MIME type; the source MIME is kept when unset
    pub mime: Option<String>,
    pub bit_rate: i64,
    pub max_input_size: usize,
    pub frame_rate: i64,
    pub capture_rate: i64,
    pub i_frame_interval: i64,
    pub color_format: i64,
    pub aac_profile: i64,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        EncoderSettings {
            mime: None,
            bit_rate: 1000 * 1024,
            max_input_size: 655_360,
            frame_rate: 30,
            capture_rate: 1,
            i_frame_interval: 10,
            color_format: COLOR_FORMAT_YUV420_FLEXIBLE,
            aac_profile: AAC_PROFILE_LC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the ordered segment files
    pub input_dir: PathBuf,
    /// Output container, deleted and recreated on every run
    pub output: PathBuf,
    /// Track kind to transcode
    pub kind: MediaKind,
    /// Output container format; guessed from the output extension when unset
    pub container: Option<ContainerFormat>,
    pub backend: BackendKind,
    pub transfer: TransferMode,
    /// Only list segments with one of these extensions (all files when empty)
    pub extensions: Vec<String>,
    /// Upper bound of every slot acquisition wait
    pub poll_timeout_ms: u64,
    /// Abort when no stage made progress for this long
    pub stall_timeout_ms: u64,
    /// Capacity of the notification channel
    pub event_capacity: usize,
    pub encoder: EncoderSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input_dir: PathBuf::from("split"),
            output: PathBuf::from("merged.wav"),
            kind: MediaKind::Audio,
            container: None,
            backend: BackendKind::default(),
            transfer: TransferMode::default(),
            extensions: Vec::new(),
            poll_timeout_ms: 10,
            stall_timeout_ms: 10_000,
            event_capacity: 64,
            encoder: EncoderSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new(input_dir: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        PipelineConfig {
            input_dir: input_dir.into(),
            output: output.into(),
            ..Default::default()
        }
    }

    /// Load a JSON configuration file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout_ms == 0 {
            return Err(PipelineError::Config("poll_timeout_ms must be positive".into()));
        }
        if self.encoder.max_input_size == 0 {
            return Err(PipelineError::Config(
                "encoder.max_input_size must be positive".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(PipelineError::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Container format for the output, explicit or guessed from the file name
    pub fn container_format(&self) -> Result<ContainerFormat> {
        match self.container {
            Some(format) => Ok(format),
            None => ContainerFormat::from_path(&self.output).ok_or_else(|| {
                PipelineError::Config(format!(
                    "cannot guess container format of {}",
                    self.output.display()
                ))
            }),
        }
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_encoder_settings() {
        let config = PipelineConfig::default();
        assert_eq!(config.poll_timeout(), Duration::from_millis(10));
        assert_eq!(config.encoder.bit_rate, 1_024_000);
        assert_eq!(config.encoder.max_input_size, 655_360);
        assert_eq!(config.container_format().unwrap(), ContainerFormat::Wav);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"kind":"video","transfer":"zero_copy","encoder":{"frame_rate":60}}"#)
                .unwrap();
        assert_eq!(config.kind, MediaKind::Video);
        assert_eq!(config.transfer, TransferMode::ZeroCopy);
        assert_eq!(config.encoder.frame_rate, 60);
        assert_eq!(config.encoder.i_frame_interval, 10);
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"poll_timeout_ms":0}"#).unwrap();
        assert!(matches!(PipelineConfig::load(&path), Err(PipelineError::Config(_))));
    }
}
