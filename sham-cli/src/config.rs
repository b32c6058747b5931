//! Configuration management for the sham CLI.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sham_common::LogFormat;

use crate::cli::Args;

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sham/sham.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hypervisor backend configuration
    pub hypervisor: HypervisorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the explicit config file, or the default one if it exists.
    ///
    /// A missing explicit file is an error; a missing default file is not.
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Result<Self> {
        if let Some(ref uri) = args.uri {
            self.hypervisor.uri = uri.clone();
        }

        if args.dev {
            self.hypervisor.backend = HypervisorBackend::Mock;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if let Some(ref format) = args.log_format {
            self.logging.format = format.parse()?;
        }

        Ok(self)
    }

    /// Check the configuration can be used by this build.
    pub fn validate(&self) -> Result<()> {
        if self.hypervisor.uri.trim().is_empty() {
            bail!("hypervisor.uri must not be empty");
        }

        if self.hypervisor.backend == HypervisorBackend::Libvirt
            && !sham_hypervisor::libvirt::is_available()
        {
            bail!("libvirt backend requested but this build has no libvirt support; use --dev or rebuild with the 'libvirt' feature");
        }

        if self.logging.level.trim().is_empty() {
            bail!("logging.level must not be empty");
        }

        Ok(())
    }
}

/// Hypervisor backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    /// Backend type
    pub backend: HypervisorBackend,
    /// Connection URI
    pub uri: String,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            backend: HypervisorBackend::default(),
            uri: "qemu:///system".to_string(),
        }
    }
}

/// Hypervisor backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorBackend {
    /// In-memory mock hypervisor for testing/development
    Mock,
    /// Libvirt/QEMU backend
    Libvirt,
}

impl Default for HypervisorBackend {
    fn default() -> Self {
        if sham_hypervisor::libvirt::is_available() {
            Self::Libvirt
        } else {
            Self::Mock
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config("hypervisor:\n  backend: mock\n  uri: test:///default\n");

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.hypervisor.backend, HypervisorBackend::Mock);
        assert_eq!(config.hypervisor.uri, "test:///default");
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_load_logging_section() {
        let file = write_config("logging:\n  level: debug\n  format: json\n");

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.hypervisor.uri, "qemu:///system");
    }

    #[test]
    fn test_load_errors() {
        assert!(Config::load("/nonexistent/sham.yaml").is_err());
        assert!(Config::resolve(Some("/nonexistent/sham.yaml")).is_err());

        let file = write_config("hypervisor:\n  backend: xen\n");
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let file = write_config("hypervisor:\n  uri: qemu:///session\nlogging:\n  level: info\n");
        let args = Args::try_parse_from([
            "sham",
            "--dev",
            "--uri",
            "test:///default",
            "--log-format",
            "json",
            "vms",
        ])
        .unwrap();

        let config = Config::load(file.path())
            .unwrap()
            .with_cli_overrides(&args)
            .unwrap();

        assert_eq!(config.hypervisor.backend, HypervisorBackend::Mock);
        assert_eq!(config.hypervisor.uri, "test:///default");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Json);
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_log_format_override() {
        let args = Args::try_parse_from(["sham", "--log-format", "xml", "vms"]).unwrap();
        assert!(Config::default().with_cli_overrides(&args).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.hypervisor.backend = HypervisorBackend::Mock;
        config.validate().unwrap();

        config.hypervisor.uri = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.hypervisor.backend = HypervisorBackend::Libvirt;
        assert_eq!(
            config.validate().is_ok(),
            sham_hypervisor::libvirt::is_available()
        );
    }
}
