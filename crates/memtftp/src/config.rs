use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TftpError};
use crate::packet::BLOCK_SIZE;

/// Default well-known port.
pub const DEFAULT_PORT: u16 = 7125;
pub const DEFAULT_WORKERS: usize = 16;
pub const DEFAULT_TIMEOUT_SECS: u64 = 1;
/// 65535 full blocks, the most a transfer can carry before block numbers wrap.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 65_535 * BLOCK_SIZE as u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TftpConfig {
    pub bind_addr: SocketAddr,
    /// Number of transfer workers; also the intake queue capacity.
    pub workers: usize,
    /// Receive timeout for every transfer, in seconds.
    pub timeout_secs: u64,
    pub deadline: DeadlinePolicy,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
}

impl Default for TftpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            workers: DEFAULT_WORKERS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            deadline: DeadlinePolicy::default(),
            logging: LoggingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl TftpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How the per-transfer receive timeout is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadlinePolicy {
    /// One absolute deadline fixed when the transfer starts; every receive
    /// must complete before it.
    #[default]
    Transfer,
    /// Each receive gets its own `timeout_secs` window.
    Receive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
    /// Emit structured JSON audit events for requests and transfer outcomes
    pub audit_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            audit_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory whose regular files seed the store at startup
    pub preload_dir: Option<PathBuf>,
    /// Largest blob a write may store; 0 means unlimited
    pub max_file_size_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            preload_dir: None,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
        }
    }
}

pub fn load_config(path: &Path) -> Result<TftpConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: TftpConfig = toml::from_str(&contents)
        .map_err(|e| TftpError::Config(format!("Invalid config file {}: {}", path.display(), e)))?;
    Ok(config)
}

pub fn write_config(path: &Path, config: &TftpConfig) -> Result<()> {
    let contents = toml::to_string_pretty(config)
        .map_err(|e| TftpError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, contents)?;
    Ok(())
}

/// Validate configuration before any socket is bound.
pub fn validate_config(config: &TftpConfig) -> Result<()> {
    if config.bind_addr.port() == 0 {
        return Err(TftpError::Config(
            "bind_addr port must be non-zero".to_string(),
        ));
    }

    if config.workers == 0 {
        return Err(TftpError::Config("workers must be at least 1".to_string()));
    }

    if config.timeout_secs == 0 {
        return Err(TftpError::Config(
            "timeout_secs must be at least 1".to_string(),
        ));
    }

    if let Some(ref dir) = config.store.preload_dir {
        match std::fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(TftpError::Config(
                    "store.preload_dir must be a directory".to_string(),
                ));
            }
            Err(e) => {
                return Err(TftpError::Config(format!(
                    "store.preload_dir is not accessible: {}",
                    e
                )));
            }
        }
    }

    if let Some(ref log_file) = config.logging.file {
        let parent = log_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                TftpError::Config("logging.file must include a parent directory".to_string())
            })?;
        match std::fs::metadata(parent) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(TftpError::Config(
                    "logging.file parent must be a directory".to_string(),
                ));
            }
            Err(e) => {
                return Err(TftpError::Config(format!(
                    "logging.file parent error: {}",
                    e
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::io::Result<PathBuf> {
        let mut dir = std::env::temp_dir();
        dir.push(format!("memtftp_test_{}_{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    #[test]
    fn default_config_is_valid() {
        let config = TftpConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:7125".parse().unwrap());
        assert_eq!(config.workers, 16);
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.deadline, DeadlinePolicy::Transfer);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn parses_minimal_toml() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let preload = temp_dir("parse")?;
        let toml = format!(
            r#"
bind_addr = "0.0.0.0:6969"
workers = 4
deadline = "receive"

[store]
preload_dir = "{}"
"#,
            preload.display()
        );
        let config: TftpConfig = toml::from_str(&toml)?;
        assert_eq!(config.workers, 4);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.deadline, DeadlinePolicy::Receive);
        assert_eq!(
            config.store.max_file_size_bytes,
            DEFAULT_MAX_FILE_SIZE_BYTES
        );
        validate_config(&config)?;
        Ok(())
    }

    #[test]
    fn write_then_load_round_trips() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = temp_dir("roundtrip")?;
        let path = dir.join("memtftp.toml");
        let config = TftpConfig {
            workers: 3,
            logging: LoggingConfig {
                format: LogFormat::Json,
                ..Default::default()
            },
            ..Default::default()
        };
        write_config(&path, &config)?;
        let loaded = load_config(&path)?;
        assert_eq!(loaded.workers, 3);
        assert_eq!(loaded.logging.format, LogFormat::Json);
        Ok(())
    }

    #[test]
    fn rejects_invalid_toml() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = temp_dir("invalid")?;
        let path = dir.join("memtftp.toml");
        std::fs::write(&path, "workers = \"many\"")?;
        match load_config(&path) {
            Ok(_) => return Err("expected error for invalid config".into()),
            Err(err) => assert!(format!("{err}").contains("Invalid config file")),
        }
        Ok(())
    }

    #[test]
    fn rejects_zero_bind_port() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let config = TftpConfig {
            bind_addr: "127.0.0.1:0".parse()?,
            ..Default::default()
        };
        match validate_config(&config) {
            Ok(()) => return Err("expected error for zero bind port".into()),
            Err(err) => assert!(format!("{err}").contains("bind_addr port must be non-zero")),
        }
        Ok(())
    }

    #[test]
    fn rejects_zero_workers_and_timeout() {
        let config = TftpConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());

        let config = TftpConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_missing_preload_dir() {
        let config = TftpConfig {
            store: StoreConfig {
                preload_dir: Some(PathBuf::from("/nonexistent/memtftp-preload")),
                ..Default::default()
            },
            ..Default::default()
        };
        match validate_config(&config) {
            Ok(()) => panic!("expected error for missing preload_dir"),
            Err(err) => assert!(format!("{err}").contains("preload_dir")),
        }
    }

    #[test]
    fn rejects_logging_file_with_missing_parent() {
        let config = TftpConfig {
            logging: LoggingConfig {
                file: Some(PathBuf::from("/nonexistent/memtftp/tftp.log")),
                ..Default::default()
            },
            ..Default::default()
        };
        match validate_config(&config) {
            Ok(()) => panic!("expected error for missing log parent"),
            Err(err) => assert!(format!("{err}").contains("logging.file parent")),
        }
    }
}
