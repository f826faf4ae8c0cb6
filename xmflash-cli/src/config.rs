//! Configuration file support for xmflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (XMFLASH_*)
//! 3. Local config file (./xmflash.toml)
//! 4. Global config file (~/.config/xmflash/config.toml)
//!
//! `--config PATH` replaces both files.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use xmflash::ExpectRule;

/// Name of the per-project config file.
pub const LOCAL_CONFIG_FILE: &str = "xmflash.toml";

/// Serial link settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkSection {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Data bits (5-8).
    pub data_bits: Option<u8>,
    /// Stop bits (1 or 2).
    pub stop_bits: Option<u8>,
    /// Parity name (none, even, odd, mark, space).
    pub parity: Option<String>,
}

/// Download settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadSection {
    /// Default firmware image.
    pub firmware: Option<PathBuf>,
    /// Post-transfer validation window in seconds.
    pub post_wait_secs: Option<u64>,
    /// Packet trailer: "crc" or "checksum".
    pub checksum: Option<String>,
}

/// One `[[test.rule]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Command prefix the rule applies to.
    pub prefix: String,
    /// Expected response substring.
    pub expect: Option<String>,
    /// Response timeout override in seconds.
    pub timeout_secs: Option<u64>,
}

impl From<&RuleEntry> for ExpectRule {
    fn from(entry: &RuleEntry) -> Self {
        Self {
            prefix: entry.prefix.clone(),
            expect: entry.expect.clone(),
            timeout: entry.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Command test settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSection {
    /// Default command list file.
    pub commands: Option<PathBuf>,
    /// Default per-command response timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Expectation rules.
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleEntry>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Link settings.
    #[serde(default)]
    pub link: LinkSection,
    /// Download settings.
    #[serde(default)]
    pub download: DownloadSection,
    /// Test settings.
    #[serde(default)]
    pub test: TestSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "xmflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Link
        if other.link.serial.is_some() {
            self.link.serial = other.link.serial;
        }
        if other.link.baud.is_some() {
            self.link.baud = other.link.baud;
        }
        if other.link.data_bits.is_some() {
            self.link.data_bits = other.link.data_bits;
        }
        if other.link.stop_bits.is_some() {
            self.link.stop_bits = other.link.stop_bits;
        }
        if other.link.parity.is_some() {
            self.link.parity = other.link.parity;
        }

        // Download
        if other.download.firmware.is_some() {
            self.download.firmware = other.download.firmware;
        }
        if other.download.post_wait_secs.is_some() {
            self.download.post_wait_secs = other.download.post_wait_secs;
        }
        if other.download.checksum.is_some() {
            self.download.checksum = other.download.checksum;
        }

        // Test: later rules take precedence for the same prefix
        if other.test.commands.is_some() {
            self.test.commands = other.test.commands;
        }
        if other.test.timeout_secs.is_some() {
            self.test.timeout_secs = other.test.timeout_secs;
        }
        let mut rules = other.test.rules;
        rules.append(&mut self.test.rules);
        self.test.rules = rules;
    }

    /// Expectation rules: configured ones first, then the built-in rules.
    pub fn expect_rules(&self) -> Vec<ExpectRule> {
        self.test
            .rules
            .iter()
            .map(ExpectRule::from)
            .chain(ExpectRule::builtin())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.link.serial.is_none());
        assert!(config.link.baud.is_none());
        assert!(config.download.firmware.is_none());
        assert!(config.test.rules.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[link]
serial = "/dev/ttyUSB0"
baud = 115200
data_bits = 8
stop_bits = 1
parity = "none"

[download]
firmware = "build/app.bin"
post_wait_secs = 10
checksum = "crc"

[test]
commands = "TestOrders.txt"
timeout_secs = 8

[[test.rule]]
prefix = "wifi scan"
expect = "OK"
timeout_secs = 30

[[test.rule]]
prefix = "reboot"
timeout_secs = 15
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.link.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.link.baud, Some(115200));
        assert_eq!(config.link.parity.as_deref(), Some("none"));
        assert_eq!(config.download.post_wait_secs, Some(10));
        assert_eq!(config.test.rules.len(), 2);
        assert_eq!(config.test.rules[1].expect, None);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.link.serial.is_none());
        assert!(config.test.rules.is_empty());
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.link.serial = Some("/dev/ttyUSB0".to_string());
        base.link.baud = Some(115200);

        base.merge(Config::default());

        assert_eq!(base.link.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.link.baud, Some(115200));
    }

    #[test]
    fn test_config_merge_overrides_and_prepends_rules() {
        let mut base = Config::default();
        base.link.baud = Some(115200);
        base.test.rules.push(RuleEntry {
            prefix: "gpio".into(),
            expect: Some("global".into()),
            timeout_secs: None,
        });

        let mut local = Config::default();
        local.link.baud = Some(921600);
        local.test.rules.push(RuleEntry {
            prefix: "gpio".into(),
            expect: Some("local".into()),
            timeout_secs: None,
        });

        base.merge(local);
        assert_eq!(base.link.baud, Some(921600));
        assert_eq!(base.test.rules[0].expect.as_deref(), Some("local"));
        assert_eq!(base.test.rules.len(), 2);
    }

    #[test]
    fn test_expect_rules_end_with_builtin() {
        let mut config = Config::default();
        config.test.rules.push(RuleEntry {
            prefix: "wifi".into(),
            expect: Some("OK".into()),
            timeout_secs: Some(30),
        });

        let rules = config.expect_rules();
        assert_eq!(rules[0].prefix, "wifi");
        assert_eq!(rules[0].timeout, Some(Duration::from_secs(30)));
        assert_eq!(rules.last().map(|r| r.prefix.as_str()), Some("gpiob 0 0"));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xmflash.toml");
        fs::write(
            &path,
            r#"
[link]
serial = "/dev/ttyUSB1"
[test]
timeout_secs = 12
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.link.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.test.timeout_secs, Some(12));
    }

    #[test]
    fn test_load_from_path_invalid_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[link\nserial = ").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.link.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.link.serial.is_none());
    }

    #[test]
    fn test_global_config_path_is_some() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("xmflash"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
