//! Log writer (C6): queue-backed asynchronous writer with three modes,
//! merging multiple answer rows into one logical entry on read and
//! periodically pruning entries past their TTL.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use donos_proto::packet::QueryType;
use donos_store::log::LogEntry as StoreEntry;
use tokio::sync::mpsc;

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

/// The three modes a log writer can run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Disabled,
    All,
    Hijacked,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Disabled
    }
}

impl std::str::FromStr for Mode {
    type Err = std::convert::Infallible;

    /// `dns.log_mode`: `all|hijacked|<empty>`, empty meaning disabled.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "all" => Self::All,
            "hijacked" => Self::Hijacked,
            _ => Self::Disabled,
        })
    }
}

impl Mode {
    fn permits(self, hijacked: bool) -> bool {
        match self {
            Self::Disabled => false,
            Self::All => true,
            Self::Hijacked => hijacked,
        }
    }
}

/// A logical log entry, ready to hand to the queue.
#[derive(Debug, Clone)]
pub struct Entry {
    pub remote_addr: SocketAddr,
    pub hijacked: bool,
    pub qtype: QueryType,
    pub question: String,
    pub answers: Vec<String>,
}

const TASK_QUEUE_CAPACITY: usize = 256;

async fn run_consumer(mut rx: mpsc::Receiver<Entry>, pool: donos_store::Pool, ttl: Duration) {
    while let Some(entry) = rx.recv().await {
        let Ok(mut tx) = pool.begin().await else {
            tracing::error!("couldn't open a transaction to write a log entry");
            continue;
        };

        let stored = StoreEntry {
            time: now(),
            remote_addr: entry.remote_addr.ip().to_string(),
            hijacked: entry.hijacked,
            qtype: entry.qtype.into_num(),
            question: entry.question,
            answers: entry.answers,
        };
        if let Err(err) = donos_store::log::write(&mut tx, &stored).await {
            tracing::error!("couldn't write log entry: {err:?}");
            continue;
        }

        if !ttl.is_zero() {
            let cutoff = now() - ttl.as_secs() as i64;
            if let Err(err) = donos_store::log::delete_before(&mut tx, cutoff).await {
                tracing::error!("couldn't prune log entries: {err:?}");
                continue;
            }
        }

        if let Err(err) = tx.commit().await {
            tracing::error!("couldn't commit log entry: {err:?}");
        }
    }
}

/// A logical, reassembled log entry handed back by [`LogWriter::get`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LoggedEntry {
    pub time: i64,
    pub remote_addr: String,
    pub hijacked: bool,
    pub qtype: u16,
    pub question: String,
    pub answers: Vec<String>,
}

impl From<StoreEntry> for LoggedEntry {
    fn from(value: StoreEntry) -> Self {
        Self {
            time: value.time,
            remote_addr: value.remote_addr,
            hijacked: value.hijacked,
            qtype: value.qtype,
            question: value.question,
            answers: value.answers,
        }
    }
}

/// Queue-backed asynchronous writer. When `mode` is [`Mode::Disabled`] the
/// writer never enqueues and never starts its consumer task.
pub struct LogWriter {
    mode: Mode,
    pool: donos_store::Pool,
    tx: tokio::sync::Mutex<Option<mpsc::Sender<Entry>>>,
    consumer: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter").field("mode", &self.mode).finish()
    }
}

impl LogWriter {
    pub fn new(mode: Mode, ttl: Duration, pool: donos_store::Pool) -> Self {
        if mode == Mode::Disabled {
            return Self {
                mode,
                pool,
                tx: tokio::sync::Mutex::new(None),
                consumer: tokio::sync::Mutex::new(None),
            };
        }

        let (tx, rx) = mpsc::channel(TASK_QUEUE_CAPACITY);
        let consumer = tokio::spawn(run_consumer(rx, pool.clone(), ttl));

        Self {
            mode,
            pool,
            tx: tokio::sync::Mutex::new(Some(tx)),
            consumer: tokio::sync::Mutex::new(Some(consumer)),
        }
    }

    /// Enqueues a logical entry iff the configured mode permits it for
    /// this request. Non-blocking until the bounded queue is full.
    pub async fn record(&self, entry: Entry) {
        if !self.mode.permits(entry.hijacked) {
            return;
        }
        let guard = self.tx.lock().await;
        let Some(tx) = guard.as_ref() else {
            return;
        };
        if tx.send(entry).await.is_err() {
            tracing::error!("log writer consumer is gone, dropping entry");
        }
    }

    /// Reads up to `n` logical entries, most recent first.
    pub async fn get(&self, n: u32) -> Vec<LoggedEntry> {
        let Ok(mut tx) = self.pool.begin().await else {
            return Vec::new();
        };
        match donos_store::log::get(&mut tx, n).await {
            Ok(entries) => entries.into_iter().map(LoggedEntry::from).collect(),
            Err(err) => {
                tracing::error!("couldn't read log entries: {err:?}");
                Vec::new()
            }
        }
    }

    /// Waits until every enqueued record has been persisted. Safe to call
    /// through a shared `Arc<LogWriter>`; idempotent.
    pub async fn close(&self) {
        let tx = self.tx.lock().await.take();
        drop(tx);
        if let Some(consumer) = self.consumer.lock().await.take() {
            let _ = consumer.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 5353))
    }

    async fn pool() -> donos_store::Pool {
        let pool = donos_store::Config::test_env().build().await.unwrap();
        donos_store::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn disabled_mode_never_persists() {
        let writer = LogWriter::new(Mode::Disabled, Duration::ZERO, pool().await);
        writer
            .record(Entry {
                remote_addr: addr(),
                hijacked: false,
                qtype: QueryType::A,
                question: "goodhost.".into(),
                answers: vec!["192.0.2.1".into()],
            })
            .await;
        assert!(writer.get(10).await.is_empty());
    }

    #[tokio::test]
    async fn hijacked_only_mode_filters_non_hijacked_requests() {
        let pool = pool().await;
        let writer = LogWriter::new(Mode::Hijacked, Duration::ZERO, pool.clone());
        writer
            .record(Entry {
                remote_addr: addr(),
                hijacked: false,
                qtype: QueryType::A,
                question: "goodhost.".into(),
                answers: vec!["192.0.2.1".into()],
            })
            .await;
        writer
            .record(Entry {
                remote_addr: addr(),
                hijacked: true,
                qtype: QueryType::A,
                question: "badhost.".into(),
                answers: vec![],
            })
            .await;
        writer.close().await;

        let mut tx = pool.begin().await.unwrap();
        let entries = donos_store::log::get(&mut tx, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].question, "badhost.");
    }

    #[tokio::test]
    async fn multi_answer_entry_merges_back_into_one_logical_row() {
        let pool = pool().await;
        let writer = LogWriter::new(Mode::All, Duration::ZERO, pool.clone());
        writer
            .record(Entry {
                remote_addr: addr(),
                hijacked: false,
                qtype: QueryType::A,
                question: "example.com.".into(),
                answers: vec!["192.0.2.1".into(), "192.0.2.2".into()],
            })
            .await;
        writer
            .record(Entry {
                remote_addr: addr(),
                hijacked: false,
                qtype: QueryType::A,
                question: "2.example.com.".into(),
                answers: vec![],
            })
            .await;
        writer.close().await;

        let mut tx = pool.begin().await.unwrap();
        let entries = donos_store::log::get(&mut tx, 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].question, "2.example.com.");
        assert!(entries[0].answers.is_empty());
        assert_eq!(entries[1].answers.len(), 2);
    }
}
