//! Server settings: built-in defaults, then an optional TOML file, then
//! command-line flags, each layer overriding the one before.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "chat.toml";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML settings file. A missing file is fine; defaults are used instead.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Address the telnet listener binds to.
    #[arg(long)]
    pub telnet_ip: Option<String>,

    /// Port for the telnet listener. Use 0 for an ephemeral port.
    #[arg(long)]
    pub telnet_port: Option<u16>,

    /// Address the HTTP API binds to.
    #[arg(long)]
    pub api_ip: Option<String>,

    /// Port for the HTTP API. Use 0 for an ephemeral port.
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Append logs to this file instead of stdout.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Messages buffered per client before deliveries start waiting.
    #[arg(long)]
    pub outbox_capacity: Option<usize>,

    /// How long a delivery to a full client queue may wait before it is dropped.
    #[arg(long)]
    pub delivery_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    #[serde(rename = "telnetIP")]
    pub telnet_ip: String,
    #[serde(rename = "telnetPort")]
    pub telnet_port: u16,
    #[serde(rename = "apiIP")]
    pub api_ip: String,
    #[serde(rename = "apiPort")]
    pub api_port: u16,
    #[serde(rename = "logFile")]
    pub log_file: Option<PathBuf>,
    #[serde(rename = "outboxCapacity")]
    pub outbox_capacity: usize,
    #[serde(rename = "deliveryTimeoutMs")]
    pub delivery_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telnet_ip: "127.0.0.1".to_string(),
            telnet_port: 6000,
            api_ip: "127.0.0.1".to_string(),
            api_port: 6001,
            log_file: None,
            outbox_capacity: 64,
            delivery_timeout_ms: 1000,
        }
    }
}

/// Where the file layer of a [`Settings`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults(PathBuf),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reads the file named by `cli.config`, falling back to defaults when
    /// it does not exist, and applies any flags on top.
    pub fn load(cli: &Cli) -> Result<(Self, ConfigSource), ConfigError> {
        let (mut settings, source) = Self::read_file(&cli.config)?;
        settings.apply_overrides(cli);
        Ok((settings, source))
    }

    fn read_file(path: &Path) -> Result<(Self, ConfigSource), ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let settings = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok((settings, ConfigSource::File(path.to_path_buf())))
    }

    fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(ip) = &cli.telnet_ip {
            self.telnet_ip = ip.clone();
        }
        if let Some(port) = cli.telnet_port {
            self.telnet_port = port;
        }
        if let Some(ip) = &cli.api_ip {
            self.api_ip = ip.clone();
        }
        if let Some(port) = cli.api_port {
            self.api_port = port;
        }
        if let Some(path) = &cli.log_file {
            self.log_file = Some(path.clone());
        }
        if let Some(capacity) = cli.outbox_capacity {
            self.outbox_capacity = capacity;
        }
        if let Some(millis) = cli.delivery_timeout_ms {
            self.delivery_timeout_ms = millis;
        }
    }

    pub fn telnet_addr(&self) -> String {
        format!("{}:{}", self.telnet_ip, self.telnet_port)
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api_ip, self.api_port)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["broadcast_chat"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("valid arguments")
    }

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "broadcast-chat-{}-{name}.toml",
            std::process::id()
        ));
        fs::write(&path, contents).expect("write scratch config");
        path
    }

    #[test]
    fn defaults_match_the_classic_ports() {
        let settings = Settings::default();
        assert_eq!(settings.telnet_addr(), "127.0.0.1:6000");
        assert_eq!(settings.api_addr(), "127.0.0.1:6001");
        assert_eq!(settings.log_file, None);
        assert_eq!(settings.delivery_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn toml_uses_camel_case_key_names() {
        let settings = Settings::from_toml_str(
            r#"
            telnetIP = "0.0.0.0"
            telnetPort = 7000
            apiPort = 7001
            logFile = "/var/log/chat.log"
            "#,
        )
        .expect("valid toml");

        assert_eq!(settings.telnet_addr(), "0.0.0.0:7000");
        assert_eq!(settings.api_addr(), "127.0.0.1:7001");
        assert_eq!(settings.log_file, Some(PathBuf::from("/var/log/chat.log")));
        assert_eq!(settings.outbox_capacity, 64);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Settings::from_toml_str("telnetPrt = 7000").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cli = cli(&["--config", "/definitely/not/here/chat.toml"]);
        let (settings, source) = Settings::load(&cli).expect("load");

        assert_eq!(settings, Settings::default());
        assert_eq!(
            source,
            ConfigSource::Defaults(PathBuf::from("/definitely/not/here/chat.toml"))
        );
    }

    #[test]
    fn flags_override_the_file() {
        let path = scratch_file("override", "telnetPort = 7000\napiPort = 7001\n");
        let cli = cli(&[
            "--config",
            path.to_str().expect("utf-8 temp path"),
            "--api-port",
            "0",
            "--delivery-timeout-ms",
            "250",
        ]);

        let (settings, source) = Settings::load(&cli).expect("load");
        fs::remove_file(&path).ok();

        assert_eq!(source, ConfigSource::File(path.clone()));
        assert_eq!(settings.telnet_port, 7000);
        assert_eq!(settings.api_port, 0);
        assert_eq!(settings.delivery_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = scratch_file("malformed", "telnetPort = \"not a port\"\n");
        let result = Settings::load(&cli(&["--config", path.to_str().expect("utf-8")]));
        fs::remove_file(&path).ok();

        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
