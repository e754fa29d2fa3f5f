//! Page-context runtime.
//!
//! Wires the store, API client, connectivity monitor, refresh agent, queue
//! and background worker together, and runs the trigger policy:
//! - connectivity returns while a session exists: refresh caches, then drain
//! - a session is established while online: same pair
//!
//! While signed in, this context owns the queue and the worker's sync tag is
//! held back on reconnect; after logout the worker replays on its own.
//! Nothing runs on a timer.

use anyhow::Context;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ListenerGuard, PlatformSignal};
use crate::error::{SessionError, StoreError, SyncError};
use crate::logging;
use crate::models::{OrderPayload, StaffCacheEntry};
use crate::queue::{DrainReport, OrderPlacement, PendingOrderQueue};
use crate::refresh::{CacheRefreshAgent, RefreshSummary};
use crate::session::{self, SessionContext, SessionUser};
use crate::storage;
use crate::store::LocalStore;
use crate::worker::{BackgroundWorker, WorkerHandle};

type SharedSession = Arc<RwLock<Option<SessionContext>>>;

/// Outcome of one refresh-then-drain pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPass {
    pub refresh: RefreshSummary,
    pub drain: DrainReport,
}

pub struct PosRuntime {
    config: SyncConfig,
    store: LocalStore,
    api: ApiClient,
    connectivity: ConnectivityMonitor,
    refresh: CacheRefreshAgent,
    queue: PendingOrderQueue,
    session: SharedSession,
    worker: WorkerHandle,
    _sync_watch: ListenerGuard,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

impl PosRuntime {
    /// Open the store, start the worker and the connectivity supervisor.
    ///
    /// `initially_online` is the platform's current guess.
    pub async fn start(config: SyncConfig, initially_online: bool) -> anyhow::Result<Self> {
        let build = logging::build_info();
        info!(
            version = build["version"].as_str().unwrap_or("?"),
            git_sha = build["gitSha"].as_str().unwrap_or("?"),
            built = build["buildTimestamp"].as_str().unwrap_or("?"),
            "Starting POS offline sync"
        );

        let mut config = config;
        let store = LocalStore::open(&config.data_dir)
            .with_context(|| format!("open local store in {}", config.data_dir.display()))?;
        store
            .db()
            .with_conn(|conn| config.apply_local_overrides(conn))
            .context("apply persisted config overrides")?;

        let api = ApiClient::from_config(&config).context("build API client")?;
        let connectivity = ConnectivityMonitor::new(initially_online);

        let worker = BackgroundWorker::spawn(config.clone(), api.http().clone())
            .context("start background worker")?;
        match worker.install().await {
            Ok(()) => {
                if let Err(e) = worker.activate().await {
                    warn!(error = %e, "background worker activation failed");
                }
            }
            Err(e) => warn!(error = %e, "shell assets not cached; continuing without them"),
        }

        let sync_manager = worker.sync_manager();
        let sync_watch = sync_manager.watch(&connectivity);

        let refresh = CacheRefreshAgent::new(api.clone(), store.clone(), connectivity.clone());
        let queue = PendingOrderQueue::new(
            store.clone(),
            api.clone(),
            connectivity.clone(),
            config.offline_unlock_policy,
        )
        .with_sync_registration(sync_manager, config.sync_tag.clone());

        let session: SharedSession = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();
        let supervisor = tokio::spawn(supervise(
            connectivity.clone(),
            refresh.clone(),
            queue.clone(),
            session.clone(),
            cancel.clone(),
        ));

        info!(
            api = %config.api_base_url,
            online = initially_online,
            "POS offline sync ready"
        );
        Ok(Self {
            config,
            store,
            api,
            connectivity,
            refresh,
            queue,
            session,
            worker,
            _sync_watch: sync_watch,
            cancel,
            supervisor,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn queue(&self) -> &PendingOrderQueue {
        &self.queue
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }

    /// Forward a platform online/offline event.
    pub fn notify_connectivity(&self, signal: PlatformSignal) {
        self.connectivity.notify(signal);
    }

    pub fn current_session(&self) -> Option<SessionContext> {
        read_session(&self.session)
    }

    /// Sign in against the server.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionUser, SessionError> {
        if !self.connectivity.is_online() {
            return Err(SessionError::Remote(SyncError::Offline));
        }
        let session = session::login_online(&self.api, &self.store, username, password).await?;
        Ok(self.establish_session(session).await)
    }

    /// Staff that can sign in without the server.
    pub async fn offline_profiles(&self) -> Result<Vec<StaffCacheEntry>, StoreError> {
        session::offline_profiles(&self.store).await
    }

    pub async fn unlock_offline(&self, user_id: i64) -> Result<SessionUser, SessionError> {
        let session = session::unlock_offline(&self.store, user_id).await?;
        Ok(self.establish_session(session).await)
    }

    /// Reinstate the session persisted by a previous run, if any.
    pub async fn restore_session(&self) -> Option<SessionUser> {
        if !self.config.persist_session {
            return None;
        }
        let session = storage::restore_session()?;
        Some(self.establish_session(session).await)
    }

    /// Make `session` current. When online, caches are refreshed and the
    /// queue drained before returning.
    pub async fn establish_session(&self, session: SessionContext) -> SessionUser {
        if self.config.persist_session {
            if let Err(e) = storage::persist_session(&session) {
                warn!(error = %e, "could not persist session; it will not survive a restart");
            }
        }
        let user = session.user.clone();
        match self.session.write() {
            Ok(mut slot) => *slot = Some(session),
            Err(poisoned) => *poisoned.into_inner() = Some(session),
        }
        self.queue.set_page_owned(true);
        info!(user_id = user.id, "Session established");

        if self.connectivity.is_online() {
            if let Err(e) = self.sync_now().await {
                error!(error = %e, "sync after sign-in failed");
            }
        }
        user
    }

    /// Drop the current session. Cached staff credentials are kept for
    /// offline unlock.
    pub fn logout(&self) {
        let previous = match self.session.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        self.queue.set_page_owned(false);
        if self.config.persist_session {
            if let Err(e) = storage::clear_session() {
                warn!(error = %e, "could not clear persisted session");
            }
        }
        if let Some(session) = previous {
            info!(user_id = session.user.id, "Signed out");
        }
    }

    pub async fn submit_order(&self, payload: OrderPayload) -> Result<OrderPlacement, SyncError> {
        let session = self.current_session().ok_or(SyncError::NotSignedIn)?;
        self.queue.submit_order(&session, payload).await
    }

    /// Refresh caches, then drain the queue.
    pub async fn sync_now(&self) -> Result<SyncPass, StoreError> {
        sync_pass(&self.refresh, &self.queue, &self.session).await
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.worker.shutdown();
        if let Err(e) = self.supervisor.await {
            warn!(error = %e, "supervisor task ended abnormally");
        }
        info!("POS offline sync stopped");
    }
}

fn read_session(session: &SharedSession) -> Option<SessionContext> {
    match session.read() {
        Ok(slot) => slot.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

async fn sync_pass(
    refresh: &CacheRefreshAgent,
    queue: &PendingOrderQueue,
    session: &SharedSession,
) -> Result<SyncPass, StoreError> {
    let current = read_session(session);
    let refresh = refresh.refresh_all(current.as_ref()).await?;
    let drain = queue.drain().await?;
    Ok(SyncPass { refresh, drain })
}

/// Run a sync pass on every transition to online while signed in.
async fn supervise(
    connectivity: ConnectivityMonitor,
    refresh: CacheRefreshAgent,
    queue: PendingOrderQueue,
    session: SharedSession,
    cancel: CancellationToken,
) {
    let mut changes = connectivity.subscribe();
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => change,
        };
        match change {
            Ok(change) if change.online => {
                if read_session(&session).is_none() {
                    debug!("back online without a session; nothing to sync");
                    continue;
                }
                match sync_pass(&refresh, &queue, &session).await {
                    Ok(pass) => debug!(?pass, "sync pass after reconnect"),
                    Err(e) => error!(error = %e, "sync pass after reconnect failed"),
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "connectivity supervisor lagged");
                if connectivity.is_online() && read_session(&session).is_some() {
                    if let Err(e) = sync_pass(&refresh, &queue, &session).await {
                        error!(error = %e, "sync pass after lag failed");
                    }
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("connectivity supervisor stopped");
}
