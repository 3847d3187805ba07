//! Hijack engine (C7): synthesizes a local answer for queries whose name
//! is present in the aggregated hosts set.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use donos_hosts::HostsMatcher;
use donos_proto::packet::question::Question;
use donos_proto::packet::record::Record;
use donos_proto::packet::QueryType;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HijackMode {
    Zero,
    Empty,
    Hosts,
}

impl Default for HijackMode {
    fn default() -> Self {
        Self::Zero
    }
}

const HIJACK_TTL: u32 = 3600;

/// Strips a trailing dot and lowercases a query name, per the matcher's
/// non-FQDN convention.
fn normalize(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_lowercase()
}

/// Holds the current aggregated hosts matcher behind a whole-pointer
/// swap, so readers never observe a partially rebuilt set.
#[derive(Debug, Default)]
pub struct HijackEngine {
    matcher: RwLock<Arc<HostsMatcher>>,
    mode: HijackMode,
}

impl HijackEngine {
    pub fn new(mode: HijackMode) -> Self {
        Self {
            matcher: RwLock::new(Arc::new(HostsMatcher::default())),
            mode,
        }
    }

    pub async fn swap(&self, matcher: HostsMatcher) {
        let mut guard = self.matcher.write().await;
        *guard = Arc::new(matcher);
    }

    /// A cheap clone of the currently active matcher, for read-only reporting.
    pub async fn snapshot(&self) -> Arc<HostsMatcher> {
        self.matcher.read().await.clone()
    }

    /// Returns the synthesized answer records, or `None` for a pass-through.
    pub async fn hijack(&self, question: &Question) -> Option<Vec<Record>> {
        if question.qtype != QueryType::A && question.qtype != QueryType::AAAA {
            return None;
        }

        let name = normalize(&question.name);
        let matcher = self.matcher.read().await;
        let addrs = matcher.resolve(&name)?;

        Some(match self.mode {
            HijackMode::Zero => vec![zero_record(&question.name, question.qtype)],
            HijackMode::Empty => Vec::new(),
            HijackMode::Hosts => addrs
                .iter()
                .filter_map(|addr| matching_record(&question.name, question.qtype, *addr))
                .collect(),
        })
    }
}

fn zero_record(domain: &str, qtype: QueryType) -> Record {
    match qtype {
        QueryType::A => Record::A {
            domain: domain.to_string(),
            addr: Ipv4Addr::UNSPECIFIED,
            ttl: HIJACK_TTL,
        },
        _ => Record::AAAA {
            domain: domain.to_string(),
            addr: Ipv6Addr::UNSPECIFIED,
            ttl: HIJACK_TTL,
        },
    }
}

fn matching_record(domain: &str, qtype: QueryType, addr: IpAddr) -> Option<Record> {
    match (qtype, addr) {
        (QueryType::A, IpAddr::V4(addr)) => Some(Record::A {
            domain: domain.to_string(),
            addr,
            ttl: HIJACK_TTL,
        }),
        (QueryType::AAAA, IpAddr::V6(addr)) => Some(Record::AAAA {
            domain: domain.to_string(),
            addr,
            ttl: HIJACK_TTL,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use donos_hosts::HostsMap;
    use std::collections::HashMap;

    fn hosts() -> HostsMatcher {
        let mut map: HostsMap = HashMap::new();
        map.insert(
            "badhost1".into(),
            vec![
                IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
                "2001:db8::1".parse().unwrap(),
            ],
        );
        HostsMatcher::new(vec![Arc::new(map)])
    }

    #[tokio::test]
    async fn zero_mode_hijacks_a_and_aaaa_but_not_mx() {
        let engine = HijackEngine::new(HijackMode::Zero);
        engine.swap(hosts()).await;

        let a = engine
            .hijack(&Question::new("badhost1".into(), QueryType::A))
            .await
            .unwrap();
        assert_eq!(a, vec![zero_record("badhost1", QueryType::A)]);

        let aaaa = engine
            .hijack(&Question::new("badhost1".into(), QueryType::AAAA))
            .await
            .unwrap();
        assert_eq!(aaaa, vec![zero_record("badhost1", QueryType::AAAA)]);

        let mx = engine
            .hijack(&Question::new("badhost1".into(), QueryType::MX))
            .await;
        assert!(mx.is_none());
    }

    #[tokio::test]
    async fn hosts_mode_returns_matching_family() {
        let engine = HijackEngine::new(HijackMode::Hosts);
        engine.swap(hosts()).await;

        let a = engine
            .hijack(&Question::new("badhost1".into(), QueryType::A))
            .await
            .unwrap();
        assert_eq!(
            a,
            vec![Record::A {
                domain: "badhost1".into(),
                addr: Ipv4Addr::new(192, 0, 2, 1),
                ttl: HIJACK_TTL,
            }]
        );
    }

    #[tokio::test]
    async fn empty_mode_returns_no_records() {
        let engine = HijackEngine::new(HijackMode::Empty);
        engine.swap(hosts()).await;

        let a = engine
            .hijack(&Question::new("badhost1".into(), QueryType::A))
            .await
            .unwrap();
        assert!(a.is_empty());
    }

    #[tokio::test]
    async fn unmatched_name_is_a_pass_through() {
        let engine = HijackEngine::new(HijackMode::Zero);
        engine.swap(hosts()).await;

        let result = engine
            .hijack(&Question::new("goodhost".into(), QueryType::A))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn trailing_dot_and_case_are_normalized() {
        let engine = HijackEngine::new(HijackMode::Zero);
        engine.swap(hosts()).await;

        let result = engine
            .hijack(&Question::new("BadHost1.".into(), QueryType::A))
            .await;
        assert!(result.is_some());
    }
}
