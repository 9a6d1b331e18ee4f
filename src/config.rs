//! Configuration loaded from `config.toml`
//!
//! Lookup order, first existing file wins:
//! 1. `$CTXBUDGET_CONFIG`
//! 2. `<project>/.ctxbudget/config.toml`
//! 3. `<user config dir>/ctxbudget/config.toml`
//!
//! With no file, every value is the built-in default. Every field is
//! optional in the file.

use crate::budget::{
    AgingThresholds, CompactionOptions, ReportConfig, TokenCeiling, DEFAULT_COLD_MAX_AGE_SECS,
    DEFAULT_HOT_MAX_AGE_SECS, DEFAULT_MAX_TOKENS, DEFAULT_STALE_AFTER_SECS,
    DEFAULT_SUMMARY_MAX_CHARS, DEFAULT_TARGET_SATURATION, DEFAULT_WARM_MAX_AGE_SECS,
};
use crate::persist::STATE_DIR;
use crate::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_ENV_VAR: &str = "CTXBUDGET_CONFIG";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub budget: BudgetConfig,
    pub compaction: CompactionConfig,
    pub aging: AgingConfig,
    pub report: ReportLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_tokens: i64,
    /// Ignore `max_tokens` and never saturate
    pub unbounded: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            unbounded: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub target_saturation: f64,
    pub summary_max_chars: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            target_saturation: DEFAULT_TARGET_SATURATION,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgingConfig {
    pub hot_max_age_secs: u64,
    pub warm_max_age_secs: u64,
    pub cold_max_age_secs: u64,
}

impl Default for AgingConfig {
    fn default() -> Self {
        Self {
            hot_max_age_secs: DEFAULT_HOT_MAX_AGE_SECS,
            warm_max_age_secs: DEFAULT_WARM_MAX_AGE_SECS,
            cold_max_age_secs: DEFAULT_COLD_MAX_AGE_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportLimits {
    pub hot_limit: usize,
    pub warm_limit: usize,
    pub cold_limit: usize,
    pub frozen_limit: usize,
    pub stale_after_secs: u64,
}

impl Default for ReportLimits {
    fn default() -> Self {
        let defaults = ReportConfig::default();
        Self {
            hot_limit: defaults.hot_limit,
            warm_limit: defaults.warm_limit,
            cold_limit: defaults.cold_limit,
            frozen_limit: defaults.frozen_limit,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}

impl Config {
    /// Load the configuration for the project at `root`
    pub fn load(root: &Path) -> Result<Self> {
        let explicit = std::env::var_os(CONFIG_ENV_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        if let Some(path) = explicit {
            return Self::from_file(&path);
        }

        match find_config_file(root, dirs::config_dir().as_deref()) {
            Some(path) => Self::from_file(&path),
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parse one config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = toml::from_str(&text).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Where `init-config` writes for the project at `root`
    pub fn project_path(root: &Path) -> PathBuf {
        root.join(STATE_DIR).join(CONFIG_FILE_NAME)
    }

    pub fn ceiling(&self) -> TokenCeiling {
        if self.budget.unbounded {
            TokenCeiling::Unbounded
        } else {
            TokenCeiling::Limited(self.budget.max_tokens)
        }
    }

    pub fn compaction_options(&self) -> CompactionOptions {
        CompactionOptions {
            target_saturation: self.compaction.target_saturation,
            summary_max_chars: self.compaction.summary_max_chars,
        }
    }

    pub fn aging_thresholds(&self) -> AgingThresholds {
        AgingThresholds {
            hot_max_age: secs(self.aging.hot_max_age_secs),
            warm_max_age: secs(self.aging.warm_max_age_secs),
            cold_max_age: secs(self.aging.cold_max_age_secs),
        }
    }

    pub fn report_config(&self) -> ReportConfig {
        ReportConfig {
            hot_limit: self.report.hot_limit,
            warm_limit: self.report.warm_limit,
            cold_limit: self.report.cold_limit,
            frozen_limit: self.report.frozen_limit,
            stale_after: secs(self.report.stale_after_secs),
            summary_max_chars: self.compaction.summary_max_chars,
        }
    }
}

/// Ages beyond a century are treated as a century
const MAX_AGE_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_AGE_SECS) as i64)
}

/// First existing config file among the project and user locations
fn find_config_file(root: &Path, user_config_dir: Option<&Path>) -> Option<PathBuf> {
    let project = Config::project_path(root);
    let user = user_config_dir.map(|dir| dir.join("ctxbudget").join(CONFIG_FILE_NAME));
    std::iter::once(project)
        .chain(user)
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_engine_defaults() {
        let config = Config::default();
        assert_eq!(config.ceiling(), TokenCeiling::default());
        assert_eq!(config.compaction_options(), CompactionOptions::default());
        assert_eq!(config.aging_thresholds(), AgingThresholds::default());
        assert_eq!(config.report_config(), ReportConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[budget]\nmax_tokens = 8000\n\n[aging]\nhot_max_age_secs = 60\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.ceiling(), TokenCeiling::Limited(8000));
        assert_eq!(config.aging.hot_max_age_secs, 60);
        assert_eq!(config.aging.warm_max_age_secs, DEFAULT_WARM_MAX_AGE_SECS);
        assert_eq!(config.compaction, CompactionConfig::default());
    }

    #[test]
    fn test_unbounded_flag() {
        let config: Config = toml::from_str("[budget]\nunbounded = true\n").unwrap();
        assert_eq!(config.ceiling(), TokenCeiling::Unbounded);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[budget]\nmax_tokens = \"lots\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_project_file_shadows_user_file() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let user_file = user.path().join("ctxbudget").join(CONFIG_FILE_NAME);
        fs::create_dir_all(user_file.parent().unwrap()).unwrap();
        fs::write(&user_file, "").unwrap();

        assert_eq!(find_config_file(project.path(), Some(user.path())), Some(user_file));

        let project_file = Config::project_path(project.path());
        fs::create_dir_all(project_file.parent().unwrap()).unwrap();
        fs::write(&project_file, "").unwrap();
        assert_eq!(find_config_file(project.path(), Some(user.path())), Some(project_file));
    }

    #[test]
    fn test_no_file_found() {
        let project = TempDir::new().unwrap();
        assert_eq!(find_config_file(project.path(), None), None);
    }

    #[test]
    fn test_serializes_back_to_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, Config::default());
    }
}
