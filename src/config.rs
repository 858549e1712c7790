use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const VALID_QUALITIES: [&str; 8] = [
    "2160p", "1440p", "1080p", "720p", "480p", "360p", "240p", "original",
];

const VALID_PRESETS: [&str; 9] = [
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
];

const VALID_SAMPLE_RATES: [u32; 8] = [8000, 11025, 16000, 22050, 44100, 48000, 88200, 96000];

/// A setting that is either "auto" (follow the source stream) or a fixed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoOr {
    Fixed(u32),
    Auto,
}

impl serde::Serialize for AutoOr {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AutoOr::Fixed(value) => serializer.serialize_u32(*value),
            AutoOr::Auto => serializer.serialize_str("auto"),
        }
    }
}

impl<'de> serde::Deserialize<'de> for AutoOr {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(AutoOr::Fixed(value)),
            Raw::Text(text) if text.eq_ignore_ascii_case("auto") => Ok(AutoOr::Auto),
            Raw::Text(text) => Err(serde::de::Error::custom(format!(
                "expected \"auto\" or a number, got {text:?}"
            ))),
        }
    }
}

impl AutoOr {
    /// Fixed value, or 0 when the source value should be used.
    pub fn value(self) -> u32 {
        match self {
            AutoOr::Fixed(v) => v,
            AutoOr::Auto => 0,
        }
    }
}

impl Default for AutoOr {
    fn default() -> Self {
        AutoOr::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Preferred encoder family: auto, nvidia, intel, amd, apple, vaapi, software.
    pub prefer: String,
    /// "software" to fall back to CPU encoding when hardware fails, or "none".
    pub fallback: String,
    /// Maximum concurrent hardware encoder instances.
    pub max_instances: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            prefer: "auto".to_string(),
            fallback: "software".to_string(),
            max_instances: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityVariantConfig {
    pub quality: String,
    pub bitrate: String,
    pub crf: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl QualityVariantConfig {
    pub fn new(quality: &str, bitrate: &str, crf: u32) -> Self {
        Self {
            quality: quality.to_string(),
            bitrate: bitrate.to_string(),
            crf,
            width: None,
            height: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    pub segment_duration: u32,
    pub playlist_type: String,
    pub delete_threshold: u32,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_duration: 6,
            playlist_type: "vod".to_string(),
            delete_threshold: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub codec: String,
    pub bitrate: String,
    pub channels: AutoOr,
    pub sample_rate: AutoOr,
    pub segment_duration: u32,
    /// Use stream copy when the source audio already matches the target.
    pub copy_if_possible: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate: "128k".to_string(),
            channels: AutoOr::Auto,
            sample_rate: AutoOr::Auto,
            segment_duration: 10,
            copy_if_possible: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpriteSettings {
    pub enabled: bool,
    /// Seconds between thumbnails.
    pub interval: u32,
    pub width: u32,
    pub height: u32,
    pub columns: u32,
    pub rows: u32,
}

impl Default for SpriteSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 10,
            width: 160,
            height: 90,
            columns: 10,
            rows: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_parallel_tasks: u32,
    pub thread_queue_size: u32,
    pub preset: String,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
            thread_queue_size: 512,
            preset: "medium".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub create_metadata: bool,
    pub organize_by_type: bool,
    pub cleanup_temp: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            create_metadata: true,
            organize_by_type: true,
            cleanup_temp: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub hardware: HardwareConfig,
    pub profiles: BTreeMap<String, Vec<QualityVariantConfig>>,
    pub hls: HlsConfig,
    pub audio: AudioConfig,
    pub sprites: SpriteSettings,
    pub performance: PerformanceConfig,
    pub output: OutputConfig,
}

impl TranscoderConfig {
    /// Default configuration with the built-in quality profiles.
    pub fn create_default() -> Self {
        let mut config = Self::default();

        config.profiles.insert(
            "ultra".to_string(),
            vec![
                QualityVariantConfig::new("2160p", "20000k", 18),
                QualityVariantConfig::new("1440p", "16000k", 20),
                QualityVariantConfig::new("1080p", "10000k", 20),
                QualityVariantConfig::new("720p", "6000k", 23),
                QualityVariantConfig::new("480p", "3000k", 26),
                QualityVariantConfig::new("360p", "1000k", 28),
            ],
        );
        config.profiles.insert(
            "high".to_string(),
            vec![
                QualityVariantConfig::new("1440p", "12000k", 22),
                QualityVariantConfig::new("1080p", "8000k", 20),
                QualityVariantConfig::new("720p", "5000k", 23),
                QualityVariantConfig::new("480p", "2500k", 26),
                QualityVariantConfig::new("360p", "1000k", 28),
            ],
        );
        config.profiles.insert(
            "medium".to_string(),
            vec![
                QualityVariantConfig::new("1080p", "5000k", 23),
                QualityVariantConfig::new("720p", "3000k", 25),
                QualityVariantConfig::new("480p", "1500k", 28),
            ],
        );
        config.profiles.insert(
            "low".to_string(),
            vec![
                QualityVariantConfig::new("720p", "2000k", 28),
                QualityVariantConfig::new("480p", "1000k", 30),
            ],
        );

        config
    }

    pub fn get_profile(&self, name: &str) -> Option<&Vec<QualityVariantConfig>> {
        self.profiles.get(name)
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn validate(&self) -> Result<()> {
        let prefer = self.hardware.prefer.to_lowercase();
        if !["auto", "nvidia", "intel", "amd", "apple", "vaapi", "software"]
            .contains(&prefer.as_str())
        {
            return Err(Error::Config(format!(
                "hardware.prefer must be one of auto/nvidia/intel/amd/apple/vaapi/software, got {prefer:?}"
            )));
        }
        if !["software", "none"].contains(&self.hardware.fallback.to_lowercase().as_str()) {
            return Err(Error::Config(
                "hardware.fallback must be \"software\" or \"none\"".to_string(),
            ));
        }
        if !(1..=16).contains(&self.hardware.max_instances) {
            return Err(Error::Config(
                "hardware.max_instances must be between 1 and 16".to_string(),
            ));
        }

        for (name, variants) in &self.profiles {
            for variant in variants {
                if !VALID_QUALITIES.contains(&variant.quality.as_str()) {
                    return Err(Error::Config(format!(
                        "profile {name:?}: unknown quality {:?}",
                        variant.quality
                    )));
                }
                if variant.crf > 51 {
                    return Err(Error::Config(format!(
                        "profile {name:?}: crf must be between 0 and 51"
                    )));
                }
            }
        }

        if !(2..=10).contains(&self.hls.segment_duration) {
            return Err(Error::Config(
                "hls.segment_duration must be between 2 and 10 seconds".to_string(),
            ));
        }
        if !["vod", "event"].contains(&self.hls.playlist_type.as_str()) {
            return Err(Error::Config(
                "hls.playlist_type must be \"vod\" or \"event\"".to_string(),
            ));
        }

        if !["aac", "mp3", "opus"].contains(&self.audio.codec.to_lowercase().as_str()) {
            return Err(Error::Config(
                "audio.codec must be one of aac/mp3/opus".to_string(),
            ));
        }
        if let AutoOr::Fixed(channels) = self.audio.channels {
            if !(1..=8).contains(&channels) {
                return Err(Error::Config(
                    "audio.channels must be \"auto\" or between 1 and 8".to_string(),
                ));
            }
        }
        if let AutoOr::Fixed(rate) = self.audio.sample_rate {
            if !VALID_SAMPLE_RATES.contains(&rate) {
                return Err(Error::Config(
                    "audio.sample_rate must be \"auto\" or a standard rate".to_string(),
                ));
            }
        }
        if !(2..=20).contains(&self.audio.segment_duration) {
            return Err(Error::Config(
                "audio.segment_duration must be between 2 and 20 seconds".to_string(),
            ));
        }

        if self.sprites.enabled {
            if !(1..=60).contains(&self.sprites.interval) {
                return Err(Error::Config(
                    "sprites.interval must be between 1 and 60 seconds".to_string(),
                ));
            }
            if !(80..=320).contains(&self.sprites.width) || !(45..=180).contains(&self.sprites.height) {
                return Err(Error::Config(
                    "sprites.width/height out of range (80-320 x 45-180)".to_string(),
                ));
            }
            if !(5..=20).contains(&self.sprites.columns) || !(5..=20).contains(&self.sprites.rows) {
                return Err(Error::Config(
                    "sprites.columns/rows must be between 5 and 20".to_string(),
                ));
            }
        }

        if !(1..=32).contains(&self.performance.max_parallel_tasks) {
            return Err(Error::Config(
                "performance.max_parallel_tasks must be between 1 and 32".to_string(),
            ));
        }
        if !VALID_PRESETS.contains(&self.performance.preset.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "performance.preset must be an x264 preset name, got {:?}",
                self.performance.preset
            )));
        }

        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(format!("serialize failed: {e}")))
    }
}

/// Loads and saves the transcoder configuration document.
pub struct ConfigManager {
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = Vec::new();
        if let Some(home) = std::env::var_os("HOME") {
            let home = PathBuf::from(home);
            locations.push(home.join(".hlspack.yaml"));
            locations.push(home.join(".config").join("hlspack").join("config.yaml"));
        }
        locations.push(PathBuf::from(".hlspack.yaml"));
        locations
    }

    /// Load the configuration, trying the explicit path first, then the
    /// default locations, then falling back to the built-in defaults.
    pub fn load(&self) -> Result<TranscoderConfig> {
        if let Some(path) = &self.config_path {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            return Self::load_from_file(path);
        }

        for location in Self::default_locations() {
            if location.exists() {
                info!("loading configuration from {}", location.display());
                return Self::load_from_file(&location);
            }
        }

        debug!("no configuration file found, using defaults");
        Ok(TranscoderConfig::create_default())
    }

    fn load_from_file(path: &Path) -> Result<TranscoderConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        if contents.trim().is_empty() {
            return Err(Error::Config(format!(
                "configuration file is empty: {}",
                path.display()
            )));
        }
        let config: TranscoderConfig = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("invalid YAML in {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path, config: &TranscoderConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, config.to_yaml()?)?;
        info!("configuration saved to {}", path.display());
        Ok(())
    }

    /// Write the default configuration, refusing to overwrite unless forced.
    pub fn init_default_config(&self, path: Option<&Path>, force: bool) -> Result<PathBuf> {
        let target = path
            .map(Path::to_path_buf)
            .or_else(|| self.config_path.clone())
            .or_else(|| Self::default_locations().into_iter().next())
            .ok_or_else(|| Error::Config("no writable configuration location".to_string()))?;

        if target.exists() && !force {
            return Err(Error::Config(format!(
                "configuration file already exists: {} (use force to overwrite)",
                target.display()
            )));
        }

        self.save(&target, &TranscoderConfig::create_default())?;
        Ok(target)
    }
}
