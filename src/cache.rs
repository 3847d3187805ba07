//! Cache engine (C4): bounded FIFO cache keyed by fingerprint, with TTL
//! expiry, optional prefetch-on-near-expiry, an optional write-through
//! backend and a bounded background task queue.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use donos_proto::packet::header::ResponseCode;
use donos_proto::packet::question::Question;
use donos_proto::packet::DnsPacket;
use crate::client::Resolver;
use tokio::sync::{mpsc, RwLock};

use crate::message::{min_ttl, Fingerprint};

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

#[derive(Clone, Debug)]
struct CacheValue {
    created_at: i64,
    message: DnsPacket,
    question: Question,
}

impl CacheValue {
    fn expires_at(&self) -> i64 {
        self.created_at + min_ttl(&self.message) as i64
    }

    fn is_expired(&self, at: i64) -> bool {
        at >= self.expires_at()
    }
}

/// `canCache(msg)`: true iff it has a positive minimum TTL and a
/// NOERROR/NXDOMAIN rcode.
pub fn can_cache(message: &DnsPacket) -> bool {
    min_ttl(message) > 0
        && matches!(
            message.header.response_code,
            ResponseCode::NoError | ResponseCode::NameError
        )
}

/// Write-through backend contract: in-memory and sqlite-backed
/// implementations satisfy the same interface.
#[async_trait]
pub trait CacheBackend: std::fmt::Debug + Send + Sync {
    async fn set(&self, fingerprint: Fingerprint, created_at: i64, wire: &[u8]);
    async fn evict(&self, fingerprint: Fingerprint);
    async fn reset(&self);
    async fn read_recent(&self, n: u32) -> Vec<(Fingerprint, i64, Vec<u8>)>;
}

#[derive(Debug, Default)]
pub struct NullCacheBackend;

#[async_trait]
impl CacheBackend for NullCacheBackend {
    async fn set(&self, _fingerprint: Fingerprint, _created_at: i64, _wire: &[u8]) {}
    async fn evict(&self, _fingerprint: Fingerprint) {}
    async fn reset(&self) {}
    async fn read_recent(&self, _n: u32) -> Vec<(Fingerprint, i64, Vec<u8>)> {
        Vec::new()
    }
}

#[derive(Debug)]
pub struct SqliteCacheBackend {
    pool: donos_store::Pool,
}

impl SqliteCacheBackend {
    pub fn new(pool: donos_store::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheBackend for SqliteCacheBackend {
    async fn set(&self, fingerprint: Fingerprint, created_at: i64, wire: &[u8]) {
        let Ok(mut tx) = self.pool.begin().await else {
            return;
        };
        if let Err(err) = donos_store::cache::set(&mut tx, fingerprint, created_at, wire).await {
            tracing::error!("couldn't persist cache entry: {err:?}");
            return;
        }
        if let Err(err) = tx.commit().await {
            tracing::error!("couldn't commit cache entry: {err:?}");
        }
    }

    async fn evict(&self, fingerprint: Fingerprint) {
        let Ok(mut tx) = self.pool.begin().await else {
            return;
        };
        if let Err(err) = donos_store::cache::evict(&mut tx, fingerprint).await {
            tracing::error!("couldn't evict cache entry: {err:?}");
            return;
        }
        let _ = tx.commit().await;
    }

    async fn reset(&self) {
        let Ok(mut tx) = self.pool.begin().await else {
            return;
        };
        if let Err(err) = donos_store::cache::reset(&mut tx).await {
            tracing::error!("couldn't reset cache: {err:?}");
            return;
        }
        let _ = tx.commit().await;
    }

    async fn read_recent(&self, n: u32) -> Vec<(Fingerprint, i64, Vec<u8>)> {
        let Ok(mut tx) = self.pool.begin().await else {
            return Vec::new();
        };
        match donos_store::cache::read_recent(&mut tx, n).await {
            Ok(rows) => rows
                .into_iter()
                .map(|row| (row.fingerprint, row.created_at, row.value))
                .collect(),
            Err(err) => {
                tracing::error!("couldn't read cache backend: {err:?}");
                Vec::new()
            }
        }
    }
}

enum CacheTask {
    Refresh {
        key: Fingerprint,
        question: Question,
    },
    Evict {
        key: Fingerprint,
    },
}

#[derive(Debug, Default)]
struct Contents {
    values: HashMap<Fingerprint, CacheValue>,
    order: VecDeque<Fingerprint>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Stats {
    pub size: usize,
    pub capacity: usize,
    pub pending_tasks: usize,
}

fn encode(message: &DnsPacket) -> Option<Vec<u8>> {
    let mut message = message.clone();
    let buffer = message.create_buffer().ok()?;
    Some(buffer.buf[..buffer.pos()].to_vec())
}

async fn drain_refresh(
    contents: &RwLock<Contents>,
    backend: &Arc<dyn CacheBackend>,
    upstream: &Resolver,
    key: Fingerprint,
    question: Question,
) {
    match upstream.resolve(question.qtype, &question.name).await {
        Ok(message) if can_cache(&message) => {
            let created_at = now();
            let Some(wire) = encode(&message) else {
                return;
            };
            let mut guard = contents.write().await;
            if let Some(entry) = guard.values.get_mut(&key) {
                entry.message = message;
                entry.created_at = created_at;
            }
            drop(guard);
            backend.set(key, created_at, &wire).await;
        }
        Ok(_) => {
            // Refreshed but no longer cacheable: evict rather than keep
            // serving a stale-and-now-wrong answer.
            let mut guard = contents.write().await;
            guard.values.remove(&key);
            guard.order.retain(|existing| *existing != key);
            drop(guard);
            backend.evict(key).await;
        }
        Err(_) => {
            // Transport-side failure: keep the stale entry, retry on the
            // next qualifying hit.
            tracing::debug!("prefetch refresh failed for key {key}, keeping stale entry");
        }
    }
}

async fn run_consumer(
    mut rx: mpsc::Receiver<CacheTask>,
    contents: Arc<RwLock<Contents>>,
    backend: Arc<dyn CacheBackend>,
    upstream: Option<Arc<Resolver>>,
    pending_tasks: Arc<AtomicUsize>,
) {
    while let Some(task) = rx.recv().await {
        match task {
            CacheTask::Refresh { key, question } => {
                if let Some(upstream) = upstream.as_deref() {
                    drain_refresh(&contents, &backend, upstream, key, question).await;
                }
            }
            CacheTask::Evict { key } => {
                let mut guard = contents.write().await;
                guard.values.remove(&key);
                guard.order.retain(|existing| *existing != key);
                drop(guard);
                backend.evict(key).await;
            }
        }
        pending_tasks.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Bounded FIFO cache. `upstream` being `Some` enables prefetch mode;
/// `backend` being `Some` enables hydration-on-startup and write-through.
pub struct Cache {
    capacity: usize,
    contents: Arc<RwLock<Contents>>,
    backend: Arc<dyn CacheBackend>,
    upstream: Option<Arc<Resolver>>,
    task_tx: tokio::sync::Mutex<Option<mpsc::Sender<CacheTask>>>,
    consumer: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    pending_tasks: Arc<AtomicUsize>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("capacity", &self.capacity).finish()
    }
}

const TASK_QUEUE_CAPACITY: usize = 256;

impl Cache {
    pub async fn new(
        capacity: i64,
        upstream: Option<Arc<Resolver>>,
        backend: Option<Arc<dyn CacheBackend>>,
    ) -> Self {
        let capacity = capacity.max(0) as usize;
        let backend = backend.unwrap_or_else(|| Arc::new(NullCacheBackend));

        let mut contents = Contents::default();
        if capacity > 0 {
            let rows = backend.read_recent(capacity as u32).await;
            // `read_recent` is most-recent-first; walk in reverse so the
            // oldest surviving row ends up at the FIFO eviction head.
            for (fingerprint, created_at, wire) in rows.into_iter().rev() {
                let buffer = donos_proto::BytePacketBuffer::from(wire);
                let Ok(message) = DnsPacket::try_from(buffer) else {
                    continue;
                };
                let Some(question) = message.questions.first().cloned() else {
                    continue;
                };
                contents.order.push_back(fingerprint);
                contents
                    .values
                    .insert(fingerprint, CacheValue { created_at, message, question });
            }
        }
        let contents = Arc::new(RwLock::new(contents));

        let (task_tx, task_rx) = mpsc::channel(TASK_QUEUE_CAPACITY);
        let pending_tasks = Arc::new(AtomicUsize::new(0));

        let consumer = tokio::spawn(run_consumer(
            task_rx,
            contents.clone(),
            backend.clone(),
            upstream.clone(),
            pending_tasks.clone(),
        ));

        Self {
            capacity,
            contents,
            backend,
            upstream,
            task_tx: tokio::sync::Mutex::new(Some(task_tx)),
            consumer: tokio::sync::Mutex::new(Some(consumer)),
            pending_tasks,
        }
    }

    pub fn prefetch_enabled(&self) -> bool {
        self.upstream.is_some()
    }

    pub async fn get(&self, key: Fingerprint) -> Option<DnsPacket> {
        let guard = self.contents.read().await;
        let value = guard.values.get(&key)?;
        let message = value.message.clone();

        if !value.is_expired(now()) {
            return Some(message);
        }

        if self.upstream.is_some() {
            let question = value.question.clone();
            drop(guard);
            self.schedule(CacheTask::Refresh { key, question }).await;
            Some(message)
        } else {
            drop(guard);
            self.schedule(CacheTask::Evict { key }).await;
            None
        }
    }

    pub async fn set(&self, key: Fingerprint, question: Question, message: DnsPacket) {
        if self.capacity == 0 || !can_cache(&message) {
            return;
        }

        let created_at = now();
        let Some(wire) = encode(&message) else {
            return;
        };

        let mut guard = self.contents.write().await;
        let is_new = !guard.values.contains_key(&key);
        guard.values.insert(key, CacheValue { created_at, message, question });
        if !is_new {
            guard.order.retain(|existing| *existing != key);
        }
        guard.order.push_back(key);

        let evicted = if guard.order.len() > self.capacity {
            guard.order.pop_front()
        } else {
            None
        };
        if let Some(evicted) = evicted {
            guard.values.remove(&evicted);
        }
        drop(guard);

        self.backend.set(key, created_at, &wire).await;
        if let Some(evicted) = evicted {
            self.backend.evict(evicted).await;
        }
    }

    pub async fn list(&self, n: usize) -> Vec<DnsPacket> {
        let guard = self.contents.read().await;
        guard
            .order
            .iter()
            .rev()
            .take(n)
            .filter_map(|key| guard.values.get(key).map(|value| value.message.clone()))
            .collect()
    }

    pub async fn stats(&self) -> Stats {
        let guard = self.contents.read().await;
        Stats {
            size: guard.values.len(),
            capacity: self.capacity,
            pending_tasks: self.pending_tasks.load(Ordering::Relaxed),
        }
    }

    pub async fn reset(&self) {
        let mut guard = self.contents.write().await;
        guard.values.clear();
        guard.order.clear();
        drop(guard);
        self.backend.reset().await;
    }

    /// Waits until every queued task has drained, then stops the consumer.
    /// Safe to call through a shared `Arc<Cache>`; idempotent.
    pub async fn close(&self) {
        let sender = self.task_tx.lock().await.take();
        drop(sender);
        if let Some(consumer) = self.consumer.lock().await.take() {
            let _ = consumer.await;
        }
    }

    async fn schedule(&self, task: CacheTask) {
        self.pending_tasks.fetch_add(1, Ordering::Relaxed);
        // Sent while holding at most a read guard on `contents`: the
        // consumer reacquires the write guard itself when a task actually
        // needs to mutate the map, so blocking here on a full queue cannot
        // deadlock with it.
        let guard = self.task_tx.lock().await;
        let sent = match guard.as_ref() {
            Some(tx) => tx.send(task).await.is_ok(),
            None => false,
        };
        if !sent {
            tracing::warn!("cache task queue closed, dropping task");
            self.pending_tasks.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
