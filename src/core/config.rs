use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Where recording runs are written (one sub-directory per run)
    pub storage_path: PathBuf,
    /// Serialized pilot network with its normalization metadata
    pub model_path: PathBuf,
    /// Autopilot tick period in milliseconds
    pub tick_period_ms: u64,
    /// Frames skipped between two recorded frames (<= 0 records every frame)
    pub skip_count: i32,
    /// Run number used by the first recording of this process
    pub initial_run_number: u32,
    /// Width of the grayscale sample fed to the network and written to disk
    pub image_width: u32,
    /// Height of the grayscale sample fed to the network and written to disk
    pub image_height: u32,
    /// Binary threshold level (pixels above it become 255, the rest 0)
    pub threshold: u8,
    /// Threshold the autopilot's input image
    pub threshold_pilot_features: bool,
    /// Threshold images before they are written by the recorder
    pub threshold_recordings: bool,
    /// Output image format for recorded samples: "png" or "bmp"
    pub image_format: String,
    /// Buffered notifications per subscriber before the slowest one starts lagging
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());

        let mut base = PathBuf::from(home);
        base.push(".navpilot");

        Self {
            storage_path: base.join("recordings"),
            model_path: base.join("models").join("pilot.json"),
            tick_period_ms: 100,
            skip_count: 10,
            initial_run_number: 1,
            image_width: 32,
            image_height: 24,
            threshold: 160,
            threshold_pilot_features: true,
            threshold_recordings: true,
            image_format: "png".to_string(),
            event_capacity: 256,
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it with defaults if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from `path`, creating it with defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(10..=1000).contains(&self.tick_period_ms) {
            return Err(format!(
                "Invalid tick period: {}ms. Must be between 10 and 1000",
                self.tick_period_ms
            )
            .into());
        }

        if self.initial_run_number == 0 {
            return Err("Invalid initial run number: 0. Run numbers start at 1".into());
        }

        for (name, value) in [("width", self.image_width), ("height", self.image_height)] {
            if value == 0 || value > 1024 {
                return Err(format!(
                    "Invalid image {}: {}. Must be between 1 and 1024",
                    name, value
                )
                .into());
            }
        }

        let valid_formats = ["png", "bmp"];
        if !valid_formats.contains(&self.image_format.as_str()) {
            return Err(format!(
                "Invalid image format: {}. Must be one of: png, bmp",
                self.image_format
            )
            .into());
        }

        if self.event_capacity == 0 || self.event_capacity > 65536 {
            return Err(format!(
                "Invalid event capacity: {}. Must be between 1 and 65536",
                self.event_capacity
            )
            .into());
        }

        Ok(())
    }

    /// Reset to default configuration
    pub fn reset() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Self::default();
        config.save()?;
        Ok(config)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Get the configuration file path
    fn get_config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| "Could not determine home directory")?;

        let mut path = PathBuf::from(home);
        path.push(".navpilot");
        path.push("config");
        path.push("settings.json");

        Ok(path)
    }
}
