//! Configuration management for tessera
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. Every section is optional; a missing file means the
//! built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geometry::{Margins, Rect};
use crate::logging::LogConfig;
use crate::window::WindowType;


/// Main configuration struct containing all tessera settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ShellConfig {
    /// Surface timers
    #[serde(default)]
    pub surface: SurfaceConfig,

    /// Session timers
    #[serde(default)]
    pub session: SessionConfig,

    /// Window management policy settings
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Output reconciliation
    #[serde(default)]
    pub screens: ScreensConfig,

    /// Keyboard settings
    #[serde(default)]
    pub input: InputConfig,

    /// Compositor to UI thread dispatch
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurfaceConfig {
    /// Period of the frame dropper. Long enough to let the render thread
    /// pick up a frame first, short enough to keep clients from stalling.
    #[serde(default = "SurfaceConfig::default_frame_dropper_interval_ms")]
    pub frame_dropper_interval_ms: u64,

    /// How long a client gets to honour a close request
    #[serde(default = "SurfaceConfig::default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Delay between `Suspending` and `Suspended`
    #[serde(default = "SessionConfig::default_suspend_timeout_ms")]
    pub suspend_timeout_ms: u64,
}

/// Margins applied around windows of one type when confining them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeMargins {
    pub window_type: WindowType,
    #[serde(flatten)]
    pub margins: Margins,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PolicyConfig {
    /// Areas inherited window movement is confined to
    #[serde(default)]
    pub confinement_regions: Vec<Rect>,

    #[serde(default)]
    pub window_margins: Vec<TypeMargins>,
}

/// What to do with a screen whose output changed scale
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScaleChangePolicy {
    /// Destroy the screen and create a new one, migrating its windows
    #[default]
    Recreate,
    /// Update the existing screen in place
    Reuse,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScreensConfig {
    #[serde(default)]
    pub scale_change: ScaleChangePolicy,

    /// JSON file persisting per-output display configuration
    #[serde(default)]
    pub display_config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputConfig {
    /// Keymap as `"layout+variant"`
    #[serde(default = "InputConfig::default_keymap")]
    pub keymap: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Capacity of the compositor to UI thread queue
    #[serde(default = "DispatchConfig::default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a blocking handoff waits for the UI thread
    #[serde(default = "DispatchConfig::default_handoff_timeout_ms")]
    pub handoff_timeout_ms: u64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            frame_dropper_interval_ms: Self::default_frame_dropper_interval_ms(),
            close_timeout_ms: Self::default_close_timeout_ms(),
        }
    }
}

impl SurfaceConfig {
    fn default_frame_dropper_interval_ms() -> u64 {
        200
    }
    fn default_close_timeout_ms() -> u64 {
        3000
    }

    pub fn frame_dropper_interval(&self) -> Duration {
        Duration::from_millis(self.frame_dropper_interval_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            suspend_timeout_ms: Self::default_suspend_timeout_ms(),
        }
    }
}

impl SessionConfig {
    fn default_suspend_timeout_ms() -> u64 {
        1500
    }

    pub fn suspend_timeout(&self) -> Duration {
        Duration::from_millis(self.suspend_timeout_ms)
    }
}

impl PolicyConfig {
    pub fn margins_for(&self, window_type: WindowType) -> Margins {
        self.window_margins
            .iter()
            .find(|m| m.window_type == window_type)
            .map(|m| m.margins)
            .unwrap_or_default()
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            keymap: Self::default_keymap(),
        }
    }
}

impl InputConfig {
    fn default_keymap() -> String {
        "us".to_string()
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::default_queue_capacity(),
            handoff_timeout_ms: Self::default_handoff_timeout_ms(),
        }
    }
}

impl DispatchConfig {
    fn default_queue_capacity() -> usize {
        1024
    }
    fn default_handoff_timeout_ms() -> u64 {
        5000
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }
}

impl ShellConfig {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = expand_home(path.as_ref())?;

        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ShellConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.surface.frame_dropper_interval_ms == 0 {
            anyhow::bail!("Invalid frame_dropper_interval_ms: must be greater than 0");
        }

        if self.surface.close_timeout_ms == 0 {
            anyhow::bail!("Invalid close_timeout_ms: must be greater than 0");
        }

        if self.dispatch.queue_capacity == 0 {
            anyhow::bail!("Invalid queue_capacity: must be greater than 0");
        }

        if let Some(region) = self.policy.confinement_regions.iter().find(|r| r.is_empty()) {
            anyhow::bail!("Invalid confinement region {:?}: must have a positive size", region);
        }

        if self.input.keymap.split('+').all(str::is_empty) {
            anyhow::bail!("Invalid keymap '{}': layout is missing", self.input.keymap);
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}

fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Ok(Path::new(&home).join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}
