//! Background cache worker.
//!
//! Runs on its own tokio task with its own SQLite connections and shares
//! nothing with the page context except files on disk. It owns:
//! - the static asset cache (`asset-cache.sqlite`, zstd-compressed bodies),
//!   filled at install and pruned of old versions at activate
//! - fetch interception for shell assets (API traffic is never handled)
//! - the sync handler that replays the pending-order queue when the
//!   platform delivers the `sync-pending-orders` tag
//!
//! The replay here reads `pending_orders` with raw SQL instead of going
//! through `store`/`queue`; both drains must deliver oldest-first, one at a
//! time, deleting only on success. The contract suite in `queue` runs
//! against both.

use chrono::Utc;
use reqwest::{Client, Method, Url};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ORDERS_PATH;
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ListenerGuard};
use crate::db::{self, DbState};
use crate::error::{StoreError, WorkerError};

const ZSTD_LEVEL: i32 = 3;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this worker will never control anything.
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

// ---------------------------------------------------------------------------
// Asset cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AssetResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Versioned response cache, one named cache per worker version.
pub struct AssetCache {
    db: DbState,
}

impl AssetCache {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create asset cache dir: {e}")))?;
        }
        let conn = db::open_and_configure(path)?;
        Self::from_connection(conn, path)
    }

    fn from_connection(conn: Connection, path: &Path) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS asset_cache (
                cache_name TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                content_type TEXT,
                body BLOB NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (cache_name, url)
            );",
        )?;
        Ok(Self {
            db: DbState::from_connection(conn, path),
        })
    }

    #[cfg(test)]
    fn in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("in-memory asset cache");
        Self::from_connection(conn, Path::new(":memory:")).expect("asset cache schema")
    }

    pub fn get(&self, cache_name: &str, url: &str) -> Result<Option<AssetResponse>, WorkerError> {
        let row: Option<(u16, Option<String>, Vec<u8>)> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT status, content_type, body FROM asset_cache
                     WHERE cache_name = ?1 AND url = ?2",
                    params![cache_name, url],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?)
        })?;
        row.map(|(status, content_type, compressed)| {
            let body = zstd::decode_all(&compressed[..])
                .map_err(|e| WorkerError::Compression(e.to_string()))?;
            Ok(AssetResponse {
                status,
                content_type,
                body,
            })
        })
        .transpose()
    }

    pub fn put(
        &self,
        cache_name: &str,
        url: &str,
        response: &AssetResponse,
    ) -> Result<(), WorkerError> {
        self.put_all(cache_name, std::slice::from_ref(&(url.to_string(), response.clone())))
    }

    /// Store every entry or none of them.
    pub fn put_all(
        &self,
        cache_name: &str,
        entries: &[(String, AssetResponse)],
    ) -> Result<(), WorkerError> {
        let compressed = entries
            .iter()
            .map(|(url, resp)| {
                zstd::encode_all(&resp.body[..], ZSTD_LEVEL)
                    .map(|body| (url, resp, body))
                    .map_err(|e| WorkerError::Compression(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let stored_at = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            for (url, resp, body) in &compressed {
                tx.execute(
                    "INSERT INTO asset_cache (cache_name, url, status, content_type, body, stored_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(cache_name, url) DO UPDATE SET
                        status = excluded.status,
                        content_type = excluded.content_type,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![cache_name, url, resp.status, resp.content_type, body, stored_at],
                )?;
            }
            tx.commit()?;
            Ok(())
        })?;
        Ok(())
    }

    pub fn cache_names(&self) -> Result<Vec<String>, WorkerError> {
        Ok(self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT cache_name FROM asset_cache ORDER BY cache_name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })?)
    }

    pub fn delete_cache(&self, cache_name: &str) -> Result<usize, WorkerError> {
        Ok(self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM asset_cache WHERE cache_name = ?1",
                params![cache_name],
            )?)
        })?)
    }
}

// ---------------------------------------------------------------------------
// Sync registration
// ---------------------------------------------------------------------------

struct SyncInner {
    tags: Mutex<BTreeSet<String>>,
    online: AtomicBool,
    /// A signed-in page context drains the queue itself.
    page_owned: AtomicBool,
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

/// Platform stand-in for background sync: remembers registered tags and
/// hands each one to the worker once connectivity is available.
///
/// While a page context owns the queue (`set_page_owned(true)`), tags stay
/// held on reconnect; the page drain settles them, and whatever is left is
/// handed to the worker when the page lets go.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<SyncInner>,
}

impl SyncManager {
    pub(crate) fn new(tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                tags: Mutex::new(BTreeSet::new()),
                online: AtomicBool::new(false),
                page_owned: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Register `tag`. Delivered right away when online, otherwise on the
    /// next online transition.
    pub fn register(&self, tag: &str) {
        self.hold(tag);
        debug!(tag, "sync tag registered");
        if self.should_deliver() {
            self.deliver_pending();
        }
    }

    /// Claim or release the queue for a page context. Releasing while
    /// online hands any held tag to the worker.
    pub fn set_page_owned(&self, owned: bool) {
        let was = self.inner.page_owned.swap(owned, Ordering::SeqCst);
        if was && !owned && self.inner.online.load(Ordering::SeqCst) {
            self.deliver_pending();
        }
    }

    /// Drop `tag` without delivering it: the queue it stood for is empty.
    pub fn settle(&self, tag: &str) -> bool {
        let removed = self
            .inner
            .tags
            .lock()
            .map(|mut tags| tags.remove(tag))
            .unwrap_or(false);
        if removed {
            debug!(tag, "sync tag settled by page drain");
        }
        removed
    }

    fn should_deliver(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst) && !self.inner.page_owned.load(Ordering::SeqCst)
    }

    pub fn pending_tags(&self) -> Vec<String> {
        self.inner
            .tags
            .lock()
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Follow `monitor`; tags are delivered on every transition to online
    /// unless a page context owns the queue.
    pub fn watch(&self, monitor: &ConnectivityMonitor) -> ListenerGuard {
        self.inner.online.store(monitor.is_online(), Ordering::SeqCst);
        let manager = self.clone();
        monitor.on_change(move |change| {
            manager.inner.online.store(change.online, Ordering::SeqCst);
            if change.online && !manager.inner.page_owned.load(Ordering::SeqCst) {
                manager.deliver_pending();
            }
        })
    }

    /// Keep a tag without triggering delivery.
    fn hold(&self, tag: &str) {
        if let Ok(mut tags) = self.inner.tags.lock() {
            tags.insert(tag.to_string());
        }
    }

    fn deliver_pending(&self) -> usize {
        let tags: Vec<String> = match self.inner.tags.lock() {
            Ok(mut tags) => std::mem::take(&mut *tags).into_iter().collect(),
            Err(_) => return 0,
        };
        let mut delivered = 0;
        for tag in tags {
            let event = WorkerEvent::Sync {
                tag: tag.clone(),
                reply: None,
            };
            if self.inner.tx.send(event).is_ok() {
                delivered += 1;
            } else {
                warn!(tag = %tag, "worker gone; sync tag kept for later");
                self.hold(&tag);
            }
        }
        delivered
    }
}

// ---------------------------------------------------------------------------
// Events and handle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AssetRequest {
    pub method: Method,
    /// Absolute URL, or a path resolved against the shell origin.
    pub url: String,
}

impl AssetRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// API traffic, or the worker does not control fetches yet. The caller
    /// goes to the network itself.
    NotHandled,
    FromCache(AssetResponse),
    FromNetwork(AssetResponse),
}

/// Result of one replay of the pending-order table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub delivered: usize,
    pub failed: usize,
}

type Reply<T> = oneshot::Sender<Result<T, WorkerError>>;

pub enum WorkerEvent {
    Install { reply: Reply<()> },
    Activate { reply: Reply<usize> },
    Fetch { request: AssetRequest, reply: Reply<FetchOutcome> },
    Sync { tag: String, reply: Option<Reply<ReplayReport>> },
    Shutdown,
}

/// Handle to a running worker. Cheap to clone.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkerEvent>,
    state: watch::Receiver<WorkerState>,
    cancel: CancellationToken,
    sync: SyncManager,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn sync_manager(&self) -> SyncManager {
        self.sync.clone()
    }

    pub async fn install(&self) -> Result<(), WorkerError> {
        self.call(|reply| WorkerEvent::Install { reply }).await
    }

    /// Returns how many stale caches were deleted.
    pub async fn activate(&self) -> Result<usize, WorkerError> {
        self.call(|reply| WorkerEvent::Activate { reply }).await
    }

    pub async fn fetch(&self, request: AssetRequest) -> Result<FetchOutcome, WorkerError> {
        self.call(|reply| WorkerEvent::Fetch { request, reply }).await
    }

    pub async fn sync(&self, tag: &str) -> Result<ReplayReport, WorkerError> {
        let tag = tag.to_string();
        self.call(|reply| WorkerEvent::Sync {
            tag,
            reply: Some(reply),
        })
        .await
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerEvent::Shutdown);
        self.cancel.cancel();
    }

    async fn call<T>(
        &self,
        event: impl FnOnce(Reply<T>) -> WorkerEvent,
    ) -> Result<T, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(event(reply)).map_err(|_| WorkerError::Closed)?;
        rx.await.map_err(|_| WorkerError::Closed)?
    }
}

// ---------------------------------------------------------------------------
// Worker task
// ---------------------------------------------------------------------------

pub struct BackgroundWorker {
    config: SyncConfig,
    http: Client,
    cache: Arc<AssetCache>,
    state: watch::Sender<WorkerState>,
    sync: SyncManager,
}

impl BackgroundWorker {
    /// Open the asset cache and start the worker task.
    pub fn spawn(config: SyncConfig, http: Client) -> Result<WorkerHandle, WorkerError> {
        let cache = AssetCache::open(&config.asset_cache_path())?;
        Ok(Self::spawn_with_cache(config, http, cache))
    }

    fn spawn_with_cache(config: SyncConfig, http: Client, cache: AssetCache) -> WorkerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(WorkerState::Parsed);
        let cancel = CancellationToken::new();
        let sync = SyncManager::new(tx.clone());

        let worker = BackgroundWorker {
            config,
            http,
            cache: Arc::new(cache),
            state: state_tx,
            sync: sync.clone(),
        };
        tokio::spawn(worker.run(rx, cancel.clone()));

        WorkerHandle {
            tx,
            state: state_rx,
            cancel,
            sync,
        }
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<WorkerEvent>, cancel: CancellationToken) {
        info!(version = %self.config.asset_cache_version, "Background worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    None | Some(WorkerEvent::Shutdown) => break,
                    Some(event) => self.handle(event).await,
                },
            }
        }
        info!("Background worker stopped");
    }

    async fn handle(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Install { reply } => {
                let _ = reply.send(self.install().await);
            }
            WorkerEvent::Activate { reply } => {
                let _ = reply.send(self.activate().await);
            }
            WorkerEvent::Fetch { request, reply } => {
                let _ = reply.send(self.fetch(request).await);
            }
            WorkerEvent::Sync { tag, reply } => {
                let result = self.on_sync(&tag).await;
                if let Err(e) = &result {
                    error!(tag = %tag, error = %e, "sync handler failed");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            WorkerEvent::Shutdown => {}
        }
    }

    fn current(&self) -> WorkerState {
        *self.state.borrow()
    }

    fn set_state(&self, next: WorkerState) {
        debug!(state = next.as_str(), "worker state");
        self.state.send_replace(next);
    }

    fn expect_state(&self, expected: WorkerState) -> Result<(), WorkerError> {
        let current = self.current();
        if current != expected {
            return Err(WorkerError::InvalidState(current.as_str(), expected.as_str()));
        }
        Ok(())
    }

    /// Fetch every manifest entry, then store them together. One failure
    /// makes the worker redundant and stores nothing.
    async fn install(&self) -> Result<(), WorkerError> {
        self.expect_state(WorkerState::Parsed)?;
        self.set_state(WorkerState::Installing);

        let mut entries = Vec::with_capacity(self.config.asset_manifest.len());
        for path in &self.config.asset_manifest {
            let url = match self.resolve(path) {
                Ok(url) => url,
                Err(reason) => return Err(self.fail_install(path, reason)),
            };
            match self.fetch_network(Method::GET, &url).await {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    entries.push((url.to_string(), resp))
                }
                Ok(resp) => {
                    return Err(self.fail_install(url.as_str(), format!("HTTP {}", resp.status)))
                }
                Err(e) => return Err(self.fail_install(url.as_str(), e.to_string())),
            }
        }

        let cache = self.cache.clone();
        let name = self.config.asset_cache_version.clone();
        let count = entries.len();
        let stored = tokio::task::spawn_blocking(move || cache.put_all(&name, &entries))
            .await
            .map_err(|e| WorkerError::Store(e.into()))
            .and_then(|r| r);
        if let Err(e) = stored {
            return Err(self.fail_install("<asset cache>", e.to_string()));
        }

        self.set_state(WorkerState::Installed);
        info!(count, cache = %self.config.asset_cache_version, "Shell assets cached");
        Ok(())
    }

    fn fail_install(&self, url: &str, reason: String) -> WorkerError {
        self.set_state(WorkerState::Redundant);
        error!(url, reason = %reason, "worker install failed");
        WorkerError::Install {
            url: url.to_string(),
            reason,
        }
    }

    async fn activate(&self) -> Result<usize, WorkerError> {
        self.expect_state(WorkerState::Installed)?;
        self.set_state(WorkerState::Activating);

        let cache = self.cache.clone();
        let keep = self.config.asset_cache_version.clone();
        let removed = tokio::task::spawn_blocking(move || -> Result<usize, WorkerError> {
            let mut removed = 0;
            for name in cache.cache_names()? {
                if name != keep {
                    cache.delete_cache(&name)?;
                    info!(cache = %name, "Deleted stale asset cache");
                    removed += 1;
                }
            }
            Ok(removed)
        })
        .await
        .map_err(|e| WorkerError::Store(e.into()))??;

        self.set_state(WorkerState::Activated);
        // Tags registered before activation were held back.
        if self.sync.should_deliver() {
            self.sync.deliver_pending();
        }
        Ok(removed)
    }

    async fn fetch(&self, request: AssetRequest) -> Result<FetchOutcome, WorkerError> {
        if self.current() != WorkerState::Activated {
            return Ok(FetchOutcome::NotHandled);
        }
        let url = self.resolve(&request.url).map_err(WorkerError::Network)?;
        if self.is_api(&url) {
            return Ok(FetchOutcome::NotHandled);
        }

        let name = self.config.asset_cache_version.clone();
        if request.method == Method::GET {
            let cache = self.cache.clone();
            let (cache_name, key) = (name.clone(), url.to_string());
            let hit = tokio::task::spawn_blocking(move || cache.get(&cache_name, &key))
                .await
                .map_err(|e| WorkerError::Store(e.into()))??;
            if let Some(resp) = hit {
                debug!(url = %url, "asset served from cache");
                return Ok(FetchOutcome::FromCache(resp));
            }
        }

        let resp = self.fetch_network(request.method.clone(), &url).await?;
        if request.method == Method::GET && (200..300).contains(&resp.status) {
            let cache = self.cache.clone();
            let (key, copy) = (url.to_string(), resp.clone());
            let stored = tokio::task::spawn_blocking(move || cache.put(&name, &key, &copy)).await;
            match stored {
                Ok(Ok(())) => debug!(url = %url, "asset cached"),
                Ok(Err(e)) => warn!(url = %url, error = %e, "failed to cache asset"),
                Err(e) => warn!(url = %url, error = %e, "asset cache task aborted"),
            }
        }
        Ok(FetchOutcome::FromNetwork(resp))
    }

    async fn on_sync(&self, tag: &str) -> Result<ReplayReport, WorkerError> {
        if tag != self.config.sync_tag {
            debug!(tag, "ignoring unknown sync tag");
            return Ok(ReplayReport::default());
        }
        if self.current() != WorkerState::Activated {
            warn!(tag, state = self.current().as_str(), "sync before activation; holding tag");
            self.sync.hold(tag);
            return Err(WorkerError::InvalidState(
                self.current().as_str(),
                WorkerState::Activated.as_str(),
            ));
        }
        replay_pending_orders(&self.config.db_path(), &self.http, &self.config.api_base_url).await
    }

    fn resolve(&self, raw: &str) -> Result<Url, String> {
        if let Ok(url) = Url::parse(raw) {
            return Ok(url);
        }
        Url::parse(&format!("{}/", self.config.shell_base_url))
            .and_then(|base| base.join(raw.trim_start_matches('/')))
            .map_err(|e| format!("invalid asset url {raw}: {e}"))
    }

    fn is_api(&self, url: &Url) -> bool {
        url.path().starts_with(&self.config.api_path_prefix)
            || url.as_str().starts_with(&format!("{}/", self.config.api_base_url))
    }

    async fn fetch_network(&self, method: Method, url: &Url) -> Result<AssetResponse, WorkerError> {
        let resp = self
            .http
            .request(method, url.clone())
            .send()
            .await
            .map_err(|e| WorkerError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| WorkerError::Network(e.to_string()))?
            .to_vec();
        Ok(AssetResponse {
            status,
            content_type,
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Queue replay
// ---------------------------------------------------------------------------

/// Shape of a `pending_orders.data` row, as far as replay cares.
#[derive(Deserialize)]
struct QueuedOrder {
    token: String,
    data: Value,
}

fn read_queue(conn: &Connection) -> Result<Vec<(i64, String)>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, data FROM pending_orders ORDER BY created_at ASC, id ASC")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replay the pending-order table at `db_path` against the API.
///
/// Opens its own connection and never creates or migrates the database.
/// Delivery is sequential and oldest-first; an entry is deleted only after
/// a 2xx response, and a failed entry never stops the rest.
pub async fn replay_pending_orders(
    db_path: &Path,
    http: &Client,
    api_base_url: &str,
) -> Result<ReplayReport, WorkerError> {
    let path: PathBuf = db_path.to_path_buf();
    let db = Arc::new(
        tokio::task::spawn_blocking(move || db::open_existing(&path))
            .await
            .map_err(|e| WorkerError::Store(e.into()))??,
    );

    let reader = db.clone();
    let rows = tokio::task::spawn_blocking(move || reader.with_conn(|conn| read_queue(conn)))
        .await
        .map_err(|e| WorkerError::Store(e.into()))??;
    if rows.is_empty() {
        debug!("worker replay: queue empty");
        return Ok(ReplayReport::default());
    }

    let endpoint = format!("{api_base_url}{ORDERS_PATH}");
    let mut report = ReplayReport::default();

    for (id, raw) in rows {
        let order: QueuedOrder = match serde_json::from_str(&raw) {
            Ok(order) => order,
            Err(e) => {
                warn!(local_id = id, error = %e, "worker replay: unreadable queue row skipped");
                report.failed += 1;
                continue;
            }
        };

        let sent = http
            .post(&endpoint)
            .bearer_auth(&order.token)
            .json(&order.data)
            .send()
            .await;
        match sent {
            Ok(resp) if resp.status().is_success() => {
                let deleter = db.clone();
                let deleted = tokio::task::spawn_blocking(move || {
                    deleter.with_conn(|conn| {
                        conn.execute("DELETE FROM pending_orders WHERE id = ?1", params![id])?;
                        Ok(())
                    })
                })
                .await
                .map_err(StoreError::from)
                .and_then(|r| r);
                match deleted {
                    Ok(()) => {
                        info!(local_id = id, "worker replay: order delivered");
                        report.delivered += 1;
                    }
                    Err(e) => {
                        error!(
                            local_id = id,
                            error = %e,
                            "worker replay: order delivered but not removed from queue"
                        );
                        report.failed += 1;
                    }
                }
            }
            Ok(resp) => {
                warn!(
                    local_id = id,
                    status = resp.status().as_u16(),
                    "worker replay: order rejected; will retry"
                );
                report.failed += 1;
            }
            Err(e) => {
                warn!(local_id = id, error = %e, "worker replay: network error; will retry");
                report.failed += 1;
            }
        }
    }

    info!(
        delivered = report.delivered,
        failed = report.failed,
        "worker replay finished"
    );
    Ok(report)
}
