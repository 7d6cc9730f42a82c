//! UEP configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main UEP configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the writable state directory
    #[serde(rename = "memory-dir")]
    pub memory_dir: MemoryDir,

    /// Session lifecycle limits
    pub session: SessionConfig,

    /// System loop pacing
    #[serde(rename = "system-loop")]
    pub system_loop: SystemLoopConfig,

    /// Special-state gating and thresholds
    pub state: StateConfig,

    /// Tool invocation limits
    pub tools: ToolConfig,

    /// TTS chunking budgets
    pub chunker: ChunkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryDir(pub PathBuf);

impl Default for MemoryDir {
    fn default() -> Self {
        Self(PathBuf::from("memory"))
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .uep.yml
        let local_config = PathBuf::from(".uep.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/uep/uep.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("uep").join("uep.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir.0
    }

    pub fn state_queue_path(&self) -> PathBuf {
        self.memory_dir().join("state_queue.json")
    }

    pub fn session_records_path(&self) -> PathBuf {
        self.memory_dir().join("session_records.json")
    }

    pub fn identities_dir(&self) -> PathBuf {
        self.memory_dir().join("identities")
    }

    pub fn sleep_context_path(&self) -> PathBuf {
        self.memory_dir().join("sleep_context.json")
    }
}

/// Session lifecycle limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity limit in seconds before a session is force-ended
    #[serde(rename = "max-age-secs")]
    pub max_age_secs: u64,

    /// Completed records older than this are dropped by cleanup
    #[serde(rename = "record-keep-days")]
    pub record_keep_days: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 86_400,
            record_keep_days: 30,
        }
    }
}

/// System loop pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemLoopConfig {
    /// Inter-tick idle sleep in milliseconds
    #[serde(rename = "idle-sleep-ms")]
    pub idle_sleep_ms: u64,
}

impl Default for SystemLoopConfig {
    fn default() -> Self {
        Self { idle_sleep_ms: 25 }
    }
}

/// Special-state gating and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// MISCHIEF entry gate; off in production unless explicitly enabled
    #[serde(rename = "mischief-enabled")]
    pub mischief_enabled: bool,

    /// Boredom level at or above which SLEEP may trigger
    #[serde(rename = "sleep-boredom-threshold")]
    pub sleep_boredom_threshold: f64,

    /// Inactivity in seconds before SLEEP may trigger
    #[serde(rename = "sleep-inactivity-secs")]
    pub sleep_inactivity_secs: f64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            mischief_enabled: false,
            sleep_boredom_threshold: 0.8,
            sleep_inactivity_secs: 1800.0,
        }
    }
}

/// Tool invocation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Per-tool timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// TTS chunking budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    #[serde(rename = "max-chars")]
    pub max_chars: usize,

    #[serde(rename = "min-chars")]
    pub min_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 150,
            min_chars: 50,
        }
    }
}
