//! Hosts aggregation (C3 wrapper): loads every configured source, combines
//! them into the single active hosts set the hijack engine consults, and
//! keeps that set fresh on a timer and on SIGHUP.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use donos_hosts::{parse_hostfile, HostsLoader, HostsMap, HostsMatcher, HostsSource};

#[derive(Debug, serde::Deserialize)]
pub struct SourceConfig {
    pub url: Option<String>,
    pub entries: Option<String>,
    #[serde(default = "SourceConfig::default_hijack")]
    pub hijack: bool,
    pub timeout: Option<u64>,
}

impl SourceConfig {
    fn default_hijack() -> bool {
        true
    }
}

#[derive(Debug)]
pub enum LoadError {
    MissingSource,
    AmbiguousSource,
    TimeoutOnInlineOrFileSource,
    Io(std::io::Error),
    Hosts(donos_hosts::LoadError),
    Parse(donos_hosts::ParseError),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSource => write!(f, "a hosts source needs either a url or inline entries"),
            Self::AmbiguousSource => write!(f, "a hosts source cannot have both a url and inline entries"),
            Self::TimeoutOnInlineOrFileSource => {
                write!(f, "timeout is only valid for http(s) url sources")
            }
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Hosts(err) => write!(f, "{err}"),
            Self::Parse(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<donos_hosts::LoadError> for LoadError {
    fn from(value: donos_hosts::LoadError) -> Self {
        Self::Hosts(value)
    }
}

impl From<donos_hosts::ParseError> for LoadError {
    fn from(value: donos_hosts::ParseError) -> Self {
        Self::Parse(value)
    }
}

async fn load_entries(cfg: &SourceConfig) -> Result<HostsMap, LoadError> {
    if cfg.timeout.is_some() {
        return Err(LoadError::TimeoutOnInlineOrFileSource);
    }
    let entries = cfg.entries.as_deref().ok_or(LoadError::MissingSource)?;
    Ok(parse_hostfile(entries)?)
}

async fn load_file(cfg: &SourceConfig, path: &str) -> Result<HostsMap, LoadError> {
    if cfg.timeout.is_some() {
        return Err(LoadError::TimeoutOnInlineOrFileSource);
    }
    let text = tokio::fs::read_to_string(path).await?;
    let HostsSource { entries, .. } = HostsSource::from_file(&text)?;
    Ok(entries)
}

async fn load_url(url: &str) -> Result<HostsMap, LoadError> {
    let HostsSource { entries, .. } = HostsLoader.load(url).await?;
    Ok(entries)
}

async fn load_source(cfg: &SourceConfig) -> Result<HostsMap, LoadError> {
    match (&cfg.url, &cfg.entries) {
        (Some(_), Some(_)) => Err(LoadError::AmbiguousSource),
        (None, None) => Err(LoadError::MissingSource),
        (None, Some(_)) => load_entries(cfg).await,
        (Some(url), None) => match url.strip_prefix("file://") {
            Some(path) => load_file(cfg, path).await,
            None => load_url(url).await,
        },
    }
}

/// Loads every source and folds them into the single active set: `hijack`
/// sources union in first-writer-wins order, `allow` sources subtract
/// their keys from the running aggregate.
pub async fn aggregate(sources: &[SourceConfig]) -> Vec<HostsMap> {
    let mut hijack_maps = Vec::new();
    let mut allow_keys: Vec<String> = Vec::new();

    for cfg in sources {
        match load_source(cfg).await {
            Ok(map) => {
                if cfg.hijack {
                    hijack_maps.push(map);
                } else {
                    allow_keys.extend(map.into_keys());
                }
            }
            Err(err) => {
                tracing::warn!("skipping hosts source: {err}");
            }
        }
    }

    let mut aggregate: HostsMap = HashMap::new();
    for map in hijack_maps {
        for (name, ips) in map {
            aggregate.entry(name).or_insert(ips);
        }
    }
    for key in allow_keys {
        aggregate.remove(&key);
    }

    vec![aggregate]
}

/// Owns the source list and the engine it refreshes, driving both the
/// periodic and the signal-triggered reload.
pub struct HostsRefresher {
    sources: Vec<SourceConfig>,
    engine: Arc<crate::hijack::HijackEngine>,
}

impl HostsRefresher {
    pub fn new(sources: Vec<SourceConfig>, engine: Arc<crate::hijack::HijackEngine>) -> Self {
        Self { sources, engine }
    }

    pub async fn reload(&self) {
        let maps = aggregate(&self.sources).await;
        let matcher = HostsMatcher::new(maps.into_iter().map(Arc::new).collect());
        self.engine.swap(matcher).await;
        tracing::info!("hosts set reloaded");
    }

    /// Runs forever, reloading every `interval`. A zero interval disables
    /// periodic refresh; callers still drive reload via SIGHUP.
    pub async fn run_periodic(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.reload().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hijack_sources_union_and_allow_sources_subtract() {
        let sources = vec![
            SourceConfig {
                url: None,
                entries: Some("192.0.2.1 badhost1\n192.0.2.2 badhost2".into()),
                hijack: true,
                timeout: None,
            },
            SourceConfig {
                url: None,
                entries: Some("192.0.2.3 badhost2".into()),
                hijack: false,
                timeout: None,
            },
        ];

        let aggregated = aggregate(&sources).await;
        assert_eq!(aggregated.len(), 1);
        assert!(aggregated[0].contains_key("badhost1"));
        assert!(!aggregated[0].contains_key("badhost2"));
    }

    #[tokio::test]
    async fn timeout_on_inline_source_is_rejected() {
        let error = load_entries(&SourceConfig {
            url: None,
            entries: Some("192.0.2.1 badhost1".into()),
            hijack: true,
            timeout: Some(5),
        })
        .await
        .unwrap_err();
        assert!(matches!(error, LoadError::TimeoutOnInlineOrFileSource));
    }
}
