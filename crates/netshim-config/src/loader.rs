//! Configuration loader with multi-source merging

use crate::{ConfigError, SimConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    inline: Option<String>,
}

impl ConfigLoader {
    /// Create a loader that yields the built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer a TOML file over the defaults
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Layer an inline TOML document over the defaults and the file
    pub fn with_toml(mut self, toml: impl Into<String>) -> Self {
        self.inline = Some(toml.into());
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<SimConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = SimConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. Config file
        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigError::NotFound { path: path.clone() }.into());
            }
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        // 3. Inline document; parse it up front for a precise error location
        if let Some(inline) = &self.inline {
            toml::from_str::<toml::Table>(inline)
                .map_err(|source| ConfigError::ParseError { source })?;
            builder = builder.add_source(config::File::from_str(
                inline,
                config::FileFormat::Toml,
            ));
        }

        let config = builder
            .build()
            .map_err(|e| ConfigError::MergeError(e.to_string()))
            .context("Failed to build configuration")?;

        let sim_config: SimConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        sim_config.validate()?;

        Ok(sim_config)
    }

    /// Load configuration or return defaults if any source is unusable
    pub fn load_or_default(self) -> SimConfig {
        self.load().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WifiStandard;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults() {
        let config = ConfigLoader::new().load().expect("Failed to load config");
        assert_eq!(config, SimConfig::default());
    }

    #[test]
    fn test_load_inline_config() {
        let config = ConfigLoader::new()
            .with_toml(
                r#"
[simulator]
seed = 7

[wifi]
ssid = "lab"
default_standard = "80211g"
"#,
            )
            .load()
            .expect("Failed to load config");

        assert_eq!(config.simulator.seed, 7);
        assert_eq!(config.wifi.ssid, "lab");
        assert_eq!(config.wifi.default_standard, WifiStandard::G);
        // Untouched sections keep their defaults
        assert_eq!(config.queue.max_packets, 100);
    }

    #[test]
    fn test_load_file_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("netshim.toml");
        fs::write(
            &path,
            r#"
[queue]
max_packets = 20

[pcap]
directory = "/tmp/traces"
"#,
        )
        .expect("Failed to write config");

        let config = ConfigLoader::new()
            .with_file(&path)
            .load()
            .expect("Failed to load config");

        assert_eq!(config.queue.max_packets, 20);
        assert_eq!(config.pcap.directory, PathBuf::from("/tmp/traces"));
    }

    #[test]
    fn test_inline_overrides_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("netshim.toml");
        fs::write(&path, "[simulator]\nseed = 3\n").expect("Failed to write config");

        let config = ConfigLoader::new()
            .with_file(&path)
            .with_toml("[simulator]\nseed = 9\n")
            .load()
            .expect("Failed to load config");

        assert_eq!(config.simulator.seed, 9);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let result = ConfigLoader::new()
            .with_file(temp_dir.path().join("absent.toml"))
            .load();

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_malformed_inline_toml() {
        let err = ConfigLoader::new()
            .with_toml("[simulator\nseed = ")
            .load()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let err = ConfigLoader::new()
            .with_toml("[queue]\nmax_packets = 0\n")
            .load()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_load_or_default_swallows_errors() {
        let config = ConfigLoader::new()
            .with_toml("not toml at all [")
            .load_or_default();
        assert_eq!(config, SimConfig::default());
    }
}
