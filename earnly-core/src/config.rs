//! Configuration for the Earnly service

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{AdminSettings, RewardError, RewardResult};

/// Service configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EarnlyConfig {
    /// Signup grants and admin bootstrap
    pub signup: SignupConfig,
    /// Engagement reward amounts
    pub rewards: RewardsConfig,
    /// Admin settings seeded into a fresh store
    pub settings: AdminSettings,
    /// Storage configuration
    pub storage: StorageConfig,
}

/// Signup configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupConfig {
    /// Primary balance granted to every new account
    pub base_primary: Decimal,
    /// Points granted to every new account
    pub base_points: u64,
    /// Accounts signing in with this mobile number become administrators
    pub admin_mobile: Option<String>,
}

/// Engagement reward configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Points for the once-a-day bonus
    pub daily_bonus_points: u64,
    /// Points for a completed rewarded ad
    pub rewarded_ad_points: u64,
    /// Spin wheel segments in points; zero segments grant nothing
    pub spin_segments: Vec<u64>,
    /// Smallest scratch card prize
    pub scratch_min: u64,
    /// Largest scratch card prize, inclusive
    pub scratch_max: u64,
    /// Points for a correct quiz answer, generated or fallback
    pub quiz_points: u64,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON state file used by the command line tool
    pub state_file: PathBuf,
}

impl Default for SignupConfig {
    fn default() -> Self {
        Self {
            base_primary: Decimal::TEN,
            base_points: 500,
            admin_mobile: None,
        }
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            daily_bonus_points: 100,
            rewarded_ad_points: 10,
            spin_segments: vec![100, 0, 500, 50, 200, 0, 1000, 20],
            scratch_min: 50,
            scratch_max: 249,
            quiz_points: 150,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: dirs::data_dir()
                .unwrap_or_default()
                .join("earnly")
                .join("state.json"),
        }
    }
}

impl EarnlyConfig {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> RewardResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EarnlyConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> RewardResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration directory
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_default().join("earnly")
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("earnly.toml")
    }

    /// Validate configuration
    pub fn validate(&self) -> RewardResult<()> {
        if self.signup.base_primary < Decimal::ZERO {
            return Err(RewardError::Configuration(
                "Signup primary grant cannot be negative".to_string(),
            ));
        }

        if self.rewards.spin_segments.is_empty() {
            return Err(RewardError::Configuration(
                "Spin wheel needs at least one segment".to_string(),
            ));
        }

        if self.rewards.scratch_min > self.rewards.scratch_max {
            return Err(RewardError::Configuration(format!(
                "Scratch range {}..={} is empty",
                self.rewards.scratch_min, self.rewards.scratch_max
            )));
        }

        if self.storage.state_file.as_os_str().is_empty() {
            return Err(RewardError::Configuration(
                "Storage state file cannot be empty".to_string(),
            ));
        }

        self.settings
            .validate()
            .map_err(|e| RewardError::Configuration(e.to_string()))
    }
}
