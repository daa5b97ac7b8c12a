//! `hoist.toml` project configuration
//!
//! ```toml
//! [lowering]
//! optimization = "release"
//! generation = 2
//! report-allocations = true
//! baseline = "target/hoist-baseline.json"
//! ```
//!
//! Every key is optional. Command-line flags win over the file.

use anyhow::{Context, Result};
use hoist_transform::{LoweringOptions, OptimizationLevel};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "hoist.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub lowering: LoweringConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LoweringConfig {
    pub optimization: Option<OptimizationLevel>,
    pub generation: Option<u32>,
    pub report_allocations: Option<bool>,
    /// Relative paths resolve against the directory holding the file
    pub baseline: Option<PathBuf>,
}

/// Command-line values that override the file
#[derive(Debug, Default)]
pub struct Overrides {
    pub release: bool,
    pub generation: Option<u32>,
    pub report_allocations: bool,
    pub baseline: Option<PathBuf>,
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid hoist configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config =
            Self::parse(&text).with_context(|| format!("in {}", path.display()))?;
        if let (Some(baseline), Some(dir)) = (&config.lowering.baseline, path.parent()) {
            if baseline.is_relative() {
                config.lowering.baseline = Some(dir.join(baseline));
            }
        }
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// The explicit file, or `hoist.toml` next to the input if there is one
    pub fn discover(explicit: Option<&Path>, input: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let dir = if input.is_dir() {
            input
        } else {
            input.parent().unwrap_or(Path::new("."))
        };
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    pub fn lowering_options(&self, overrides: &Overrides) -> LoweringOptions {
        let optimization = if overrides.release {
            OptimizationLevel::Release
        } else {
            self.lowering.optimization.unwrap_or_default()
        };
        LoweringOptions {
            optimization,
            generation: overrides
                .generation
                .or(self.lowering.generation)
                .unwrap_or(0),
            report_allocations: overrides.report_allocations
                || self.lowering.report_allocations.unwrap_or(false),
            ..LoweringOptions::default()
        }
    }

    pub fn baseline(&self, overrides: &Overrides) -> Option<PathBuf> {
        overrides
            .baseline
            .clone()
            .or_else(|| self.lowering.baseline.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_gives_defaults() {
        let config = Config::parse("").expect("empty file is valid");
        let options = config.lowering_options(&Overrides::default());
        assert_eq!(options, LoweringOptions::default());
        assert!(config.baseline(&Overrides::default()).is_none());
    }

    #[test]
    fn test_lowering_table() {
        let config = Config::parse(
            r#"
            [lowering]
            optimization = "release"
            generation = 3
            report-allocations = true
            "#,
        )
        .expect("valid config");
        let options = config.lowering_options(&Overrides::default());
        assert!(options.is_release());
        assert_eq!(options.generation, 3);
        assert!(options.report_allocations);
    }

    #[test]
    fn test_flags_override_file() {
        let config = Config::parse(
            r#"
            [lowering]
            generation = 3
            baseline = "old.json"
            "#,
        )
        .expect("valid config");
        let overrides = Overrides {
            release: true,
            generation: Some(4),
            report_allocations: false,
            baseline: Some(PathBuf::from("new.json")),
        };
        let options = config.lowering_options(&overrides);
        assert!(options.is_release());
        assert_eq!(options.generation, 4);
        assert_eq!(config.baseline(&overrides), Some(PathBuf::from("new.json")));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Config::parse("[lowering]\nlevel = 2\n").is_err());
    }
}
