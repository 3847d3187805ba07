use std::collections::HashMap;
use std::fmt::Display;
use std::net::IpAddr;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Names suppressed from every parsed hosts file, matching the loopback
/// and broadcast aliases every `/etc/hosts` ships with.
const DEFAULT_IGNORE_LIST: &[&str] = &[
    "localhost",
    "broadcasthost",
    "0.0.0.0",
    "ip6-localhost",
    "ip6-loopback",
    "fe00::0",
    "ff00::0",
    "ff02::1",
    "ff02::2",
    "ff02::3",
];

pub type HostsMap = HashMap<String, Vec<IpAddr>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub value: String,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid ip {:?} on line {}", self.value, self.line)
    }
}

impl std::error::Error for ParseError {}

/// Parses a hosts file made of `ip name1 name2 ...` lines. Blank lines,
/// comment-only lines and lines with fewer than two fields are skipped.
/// A `#` anywhere on a line terminates the rest of that line.
pub fn parse_hostfile(input: &str) -> Result<HostsMap, ParseError> {
    let mut map = HostsMap::new();

    for (idx, raw_line) in input.split('\n').enumerate() {
        let line = match raw_line.split_once('#') {
            Some((before, _)) => before,
            None => raw_line,
        };
        let mut fields = line.split_whitespace();
        let Some(ip_field) = fields.next() else {
            continue;
        };
        let names: Vec<&str> = fields.collect();
        if names.is_empty() {
            continue;
        }

        let ip: IpAddr = ip_field.parse().map_err(|_| ParseError {
            line: idx + 1,
            value: ip_field.to_string(),
        })?;

        for name in names {
            if DEFAULT_IGNORE_LIST.contains(&name) {
                continue;
            }
            map.entry(name.to_string()).or_insert_with(Vec::new).push(ip);
        }
    }

    Ok(map)
}

/// Merges several maps, giving priority to earlier ones: a name already
/// present in an earlier map keeps its existing IP list.
pub fn combine(maps: &[HostsMap]) -> HostsMap {
    let mut result = HostsMap::new();
    for map in maps {
        for (name, ips) in map {
            result.entry(name.clone()).or_insert_with(|| ips.clone());
        }
    }
    result
}

fn hash(input: &str) -> String {
    let result = Sha256::new().chain_update(input).finalize();
    base16ct::lower::encode_string(&result)
}

#[derive(Debug)]
pub struct HostsSource {
    pub hash: String,
    pub entries: HostsMap,
}

impl HostsSource {
    pub fn from_file(value: &str) -> Result<Self, ParseError> {
        let hash = hash(value);
        let entries = parse_hostfile(value)?;
        Ok(Self { hash, entries })
    }
}

#[derive(Debug)]
pub enum LoadError {
    Http(reqwest::Error),
    Parse(ParseError),
}

impl Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(err) => write!(f, "failed to fetch hosts source: {err}"),
            Self::Parse(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<reqwest::Error> for LoadError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

impl From<ParseError> for LoadError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Default)]
pub struct HostsLoader;

impl HostsLoader {
    pub async fn load(&self, url: &str) -> Result<HostsSource, LoadError> {
        tracing::debug!("loading hosts source {url:?}");
        let req = reqwest::get(url).await?;
        let text = req.text().await?;
        Ok(HostsSource::from_file(&text)?)
    }
}

/// A chain of hosts maps walked in priority order. `match` stops at the
/// first map containing the name, so cost is `O(k)` in the chain length.
#[derive(Debug, Clone, Default)]
pub struct HostsMatcher {
    chain: Vec<Arc<HostsMap>>,
}

impl HostsMatcher {
    pub fn new(chain: Vec<Arc<HostsMap>>) -> Self {
        Self { chain }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.chain.iter().any(|map| map.contains_key(name))
    }

    pub fn resolve(&self, name: &str) -> Option<&[IpAddr]> {
        self.chain
            .iter()
            .find_map(|map| map.get(name))
            .map(|ips| ips.as_slice())
    }

    /// Total number of entries across the chain, duplicates counted once
    /// per layer they appear in.
    pub fn len(&self) -> usize {
        self.chain.iter().map(|map| map.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ads_hostfile() {
        let data = "0.0.0.0 0.r.msn.com\n0.0.0.0 207.net\n# a comment line\n";
        let result = parse_hostfile(data).unwrap();
        assert!(result.contains_key("0.r.msn.com"));
        assert!(result.contains_key("207.net"));
    }

    #[test]
    fn parse_basic_hostfile() {
        let data = "127.0.0.1 localhost\n0.0.0.0 0-app.com\n";
        let result = parse_hostfile(data).unwrap();
        assert!(result.contains_key("0-app.com"));
        assert!(!result.contains_key("0.0.0.0"));
    }

    #[test]
    fn parse_complex() {
        let result = parse_hostfile(
            r#"# nope
0.0.0.0 this.is.blocked
0.0.0.0 this.is.also.blocked blocked.again
0.0.0.0 this.is.also.blocked #Youwon'tgetthis
0.0.0.0 this.is.also.blocked # or this"#,
        )
        .unwrap();
        assert!(result.contains_key("this.is.blocked"));
        assert!(result.contains_key("this.is.also.blocked"));
        assert!(result.contains_key("blocked.again"));
        assert!(!result.contains_key("nope"));
        assert!(!result.contains_key("Youwon'tgetthis"));
    }

    #[test]
    fn ignore_list_is_suppressed() {
        let result = parse_hostfile("127.0.0.1 localhost\n::1 ip6-localhost").unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn unparseable_ip_is_a_fatal_error() {
        let error = parse_hostfile("not-an-ip some.name").unwrap_err();
        assert_eq!(error.line, 1);
    }

    #[test]
    fn combine_keeps_first_occurrence() {
        let mut first = HostsMap::new();
        first.insert("a.com".into(), vec!["1.1.1.1".parse().unwrap()]);
        let mut second = HostsMap::new();
        second.insert("a.com".into(), vec!["2.2.2.2".parse().unwrap()]);
        second.insert("b.com".into(), vec!["3.3.3.3".parse().unwrap()]);

        let combined = combine(&[first, second]);
        assert_eq!(combined["a.com"], vec!["1.1.1.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(combined["b.com"], vec!["3.3.3.3".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn matcher_walks_chain_in_order() {
        let mut first = HostsMap::new();
        first.insert("a.com".into(), vec!["1.1.1.1".parse().unwrap()]);
        let mut second = HostsMap::new();
        second.insert("b.com".into(), vec!["2.2.2.2".parse().unwrap()]);

        let matcher = HostsMatcher::new(vec![Arc::new(first), Arc::new(second)]);
        assert!(matcher.matches("a.com"));
        assert!(matcher.matches("b.com"));
        assert!(!matcher.matches("c.com"));
    }
}
