//! Restaurant POS offline sync.
//!
//! Keeps a point-of-sale terminal usable without the network: the menu and
//! staff lists are mirrored into a local SQLite store, orders placed while
//! offline are queued with the credential of the staff member who placed
//! them, and the queue is replayed oldest-first once connectivity returns.
//!
//! Two execution contexts touch the same database file:
//! - the page context (`runtime::PosRuntime`), which owns the refresh agent
//!   and the queue manager
//! - the background worker (`worker`), which caches shell assets and replays
//!   the queue on a background-sync signal with its own connection

pub mod api;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod order;
pub mod queue;
pub mod refresh;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod store;
pub mod worker;

pub use config::{OfflineUnlockPolicy, SyncConfig};
pub use connectivity::{ConnectivityMonitor, PlatformSignal};
pub use error::{OrderError, SessionError, StoreError, SyncError, WorkerError};
pub use models::{MenuCacheEntry, OrderLine, OrderPayload, PendingOrder, Role, StaffCacheEntry};
pub use order::OrderDraft;
pub use queue::{DrainReport, DrainSkip, OrderPlacement, PendingOrderQueue};
pub use refresh::{CacheRefreshAgent, RefreshSummary, ResourceOutcome};
pub use runtime::PosRuntime;
pub use session::{SessionContext, SessionOrigin, SessionUser};
pub use store::LocalStore;
pub use worker::{BackgroundWorker, SyncManager, WorkerHandle, WorkerState};
