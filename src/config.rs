//! Config loader (C9, ambient): a layered TOML file read through the
//! `config` crate into `serde`-derived structs, one per component, the way
//! the teacher's `crate::config::Config` composes its sections.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, serde::Deserialize)]
pub struct Config {
    pub dns: DnsConfig,
    #[serde(default)]
    pub resolver: crate::client::Config,
    #[serde(default)]
    pub hosts: Vec<crate::hosts::SourceConfig>,
}

#[derive(Debug, serde::Deserialize)]
pub struct DnsConfig {
    pub listen: SocketAddr,
    #[serde(default = "DnsConfig::default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub cache_size: i64,
    #[serde(default)]
    pub cache_prefetch: bool,
    #[serde(default)]
    pub hijack_mode: crate::hijack::HijackMode,
    #[serde(default)]
    pub hosts_refresh_interval: u64,
    #[serde(default)]
    pub resolvers: Vec<String>,
    #[serde(default)]
    pub log_database: String,
    #[serde(default)]
    pub log_mode: String,
    #[serde(default)]
    pub log_ttl: u64,
    #[serde(default)]
    pub listen_http: Option<SocketAddr>,
}

impl DnsConfig {
    fn default_protocol() -> String {
        String::from("udp")
    }
}

#[derive(Debug)]
pub enum ValidationError {
    UnsupportedProtocol(String),
    NegativeCacheSize(i64),
    LogModeWithoutDatabase,
    TimeoutOnInlineOrFileSource,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedProtocol(proto) => {
                write!(f, "dns.protocol={proto:?} is not supported, only \"udp\" is")
            }
            Self::NegativeCacheSize(size) => write!(f, "dns.cache_size={size} must not be negative"),
            Self::LogModeWithoutDatabase => {
                write!(f, "dns.log_mode requires dns.log_database to be set")
            }
            Self::TimeoutOnInlineOrFileSource => {
                write!(f, "hosts[].timeout is only valid for http(s) url sources")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum LoadError {
    Config(::config::ConfigError),
    Validation(ValidationError),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<::config::ConfigError> for LoadError {
    fn from(value: ::config::ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ValidationError> for LoadError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl Config {
    /// Default config path per the CLI's `-f` flag: `$HOME/.zdnsrc`.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_default();
        Path::new(&home).join(".zdnsrc")
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let raw = ::config::Config::builder()
            .add_source(::config::File::from(path).required(true))
            .build()?;
        let config: Self = raw.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.dns.protocol != "udp" {
            return Err(ValidationError::UnsupportedProtocol(self.dns.protocol.clone()));
        }
        if self.dns.cache_size < 0 {
            return Err(ValidationError::NegativeCacheSize(self.dns.cache_size));
        }
        if !self.dns.log_mode.is_empty() && self.dns.log_database.is_empty() {
            return Err(ValidationError::LogModeWithoutDatabase);
        }
        for source in &self.hosts {
            let is_inline_or_file = source.entries.is_some()
                || source.url.as_deref().is_some_and(|url| url.starts_with("file://"));
            if is_inline_or_file && source.timeout.is_some() {
                return Err(ValidationError::TimeoutOnInlineOrFileSource);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempConfig(PathBuf);

    impl TempConfig {
        fn write(name: &str, body: &str) -> Self {
            let path = std::env::temp_dir().join(format!("donos-test-{name}.toml"));
            std::fs::write(&path, body).unwrap();
            Self(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempConfig {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn rejects_non_udp_protocol() {
        let file = TempConfig::write(
            "rejects-non-udp-protocol",
            "[dns]\nlisten = \"0.0.0.0:53\"\nprotocol = \"tcp\"\n",
        );
        let error = Config::load(file.path()).unwrap_err();
        assert!(matches!(
            error,
            LoadError::Validation(ValidationError::UnsupportedProtocol(_))
        ));
    }

    #[test]
    fn rejects_negative_cache_size() {
        let file = TempConfig::write(
            "rejects-negative-cache-size",
            "[dns]\nlisten = \"0.0.0.0:53\"\ncache_size = -1\n",
        );
        let error = Config::load(file.path()).unwrap_err();
        assert!(matches!(
            error,
            LoadError::Validation(ValidationError::NegativeCacheSize(-1))
        ));
    }

    #[test]
    fn rejects_log_mode_without_database() {
        let file = TempConfig::write(
            "rejects-log-mode-without-database",
            "[dns]\nlisten = \"0.0.0.0:53\"\nlog_mode = \"all\"\n",
        );
        let error = Config::load(file.path()).unwrap_err();
        assert!(matches!(
            error,
            LoadError::Validation(ValidationError::LogModeWithoutDatabase)
        ));
    }

    #[test]
    fn accepts_a_minimal_config() {
        let file = TempConfig::write("accepts-a-minimal-config", "[dns]\nlisten = \"0.0.0.0:53\"\n");
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.dns.protocol, "udp");
        assert_eq!(config.dns.cache_size, 0);
    }
}
