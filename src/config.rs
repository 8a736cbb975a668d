//! Configuration module for persistent pacer settings.
//!
//! This module handles loading, saving, and validating the pacer
//! configuration stored as JSON.

use crate::clock::WaitConfig;
use crate::controller::Gains;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Lowest accepted frame rate target.
pub const MIN_TARGET_FPS: f64 = 1.0;
/// Highest accepted frame rate target.
pub const MAX_TARGET_FPS: f64 = 1000.0;

/// Pacer configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PacerConfig {
    pub target_fps: f64,
    pub gains: Gains,
    pub wait: WaitConfig,
    /// Reset the controller when the target moves by more than this (ms).
    pub auto_reset_threshold_ms: Option<f64>,
    pub tune_on_start: bool,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            gains: Gains::DEFAULT,
            wait: WaitConfig::default(),
            auto_reset_threshold_ms: Some(0.1),
            tune_on_start: false,
        }
    }
}

impl PacerConfig {
    /// Target frame time in milliseconds.
    pub fn target_frame_time_ms(&self) -> f64 {
        1000.0 / self.target_fps
    }

    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_fps.is_finite()
            || self.target_fps < MIN_TARGET_FPS
            || self.target_fps > MAX_TARGET_FPS
        {
            return Err(ConfigError::ValidationError(format!(
                "target_fps ({}) must be between {} and {}",
                self.target_fps, MIN_TARGET_FPS, MAX_TARGET_FPS
            )));
        }

        let Gains { kp, ki, kd } = self.gains;
        if !self.gains.is_finite() || kp < 0.0 || ki < 0.0 || kd < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "gains (kp={}, ki={}, kd={}) must be finite and non-negative",
                kp, ki, kd
            )));
        }

        let wait = self.wait;
        let thresholds = [
            wait.coarse_threshold_ms,
            wait.spin_threshold_ms,
            wait.yield_cutoff_ms,
        ];
        if thresholds.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(ConfigError::ValidationError(
                "wait thresholds must be finite and non-negative".to_string(),
            ));
        }
        if wait.spin_threshold_ms > wait.coarse_threshold_ms {
            return Err(ConfigError::ValidationError(format!(
                "spin_threshold_ms ({}) cannot be greater than coarse_threshold_ms ({})",
                wait.spin_threshold_ms, wait.coarse_threshold_ms
            )));
        }

        if let Some(threshold) = self.auto_reset_threshold_ms {
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "auto_reset_threshold_ms ({}) must be finite and non-negative",
                    threshold
                )));
            }
        }

        Ok(())
    }
}

/// Configuration manager with file I/O.
pub struct ConfigManager {
    config: RwLock<PacerConfig>,
    path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns a manager with default config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ConfigError::ParseError(format!("Failed to read config file: {}", e))
            })?;

            let config: PacerConfig = serde_json::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

            config.validate()?;
            config
        } else {
            PacerConfig::default()
        };

        Ok(Self {
            config: RwLock::new(config),
            path: path.to_path_buf(),
        })
    }

    /// Load configuration from an existing file, failing if it is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        Self::load_or_default(path)
    }

    /// Save configuration to file using atomic write.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config = self.config.read().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire read lock".to_string())
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a temp file, then rename over the target
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&*config)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Get current configuration.
    pub fn get(&self) -> PacerConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|_| PacerConfig::default())
    }

    /// Update configuration with validation.
    pub fn update(&self, config: PacerConfig) -> Result<(), ConfigError> {
        config.validate()?;

        let mut current = self.config.write().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire write lock".to_string())
        })?;

        *current = config;

        // Release lock before saving
        drop(current);

        self.save()
    }

    /// Persist new controller gains, keeping every other setting.
    pub fn update_gains(&self, gains: Gains) -> Result<(), ConfigError> {
        let mut config = self.get();
        config.gains = gains;
        self.update(config)
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the default config path (~/.config/frame-pacer/config.json).
    pub fn default_path() -> PathBuf {
        dirs_config_path().join("config.json")
    }
}

/// Get the config directory path.
fn dirs_config_path() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config").join("frame-pacer")
    } else {
        PathBuf::from("/tmp/frame-pacer")
    }
}
