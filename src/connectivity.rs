//! Connectivity monitor.
//!
//! Holds the single "is online" signal. It starts from the platform's best
//! guess and changes only when the platform reports an online/offline
//! transition: no polling, no probing. Repeated reports of the current state
//! are not transitions and are dropped.
//!
//! Two ways to observe transitions:
//! - `on_change` registers a listener that runs inline inside `notify`,
//!   before `notify` returns. Dropping the returned guard unsubscribes.
//! - `subscribe` hands out a broadcast receiver for async consumers.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, trace};

const CHANNEL_CAPACITY: usize = 64;

/// Platform-reported network event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSignal {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChange {
    pub online: bool,
    pub at: DateTime<Utc>,
}

type Listener = Arc<dyn Fn(ConnectivityChange) + Send + Sync>;

struct Inner {
    online: AtomicBool,
    transition: Mutex<()>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    tx: broadcast::Sender<ConnectivityChange>,
}

/// Shared online/offline signal. Cheap to clone.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                online: AtomicBool::new(initially_online),
                transition: Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                tx,
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Feed a platform event. Returns the change when it was a transition.
    pub fn notify(&self, signal: PlatformSignal) -> Option<ConnectivityChange> {
        let online = signal == PlatformSignal::Online;
        // Serialise transitions so listeners observe them in order.
        let _guard = self
            .inner
            .transition
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.inner.online.swap(online, Ordering::SeqCst) == online {
            trace!(online, "connectivity: duplicate platform signal ignored");
            return None;
        }

        let change = ConnectivityChange {
            online,
            at: Utc::now(),
        };
        if online {
            info!("Network restored (platform reported online)");
        } else {
            info!("Network lost (platform reported offline)");
        }

        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .map(|l| l.iter().map(|(_, f)| f.clone()).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(change);
        }
        // No receivers is fine.
        let _ = self.inner.tx.send(change);
        Some(change)
    }

    /// Register an inline listener. Unsubscribes when the guard drops.
    pub fn on_change<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(ConnectivityChange) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        ListenerGuard {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityChange> {
        self.inner.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Keeps an `on_change` listener registered while alive.
pub struct ListenerGuard {
    id: u64,
    inner: std::sync::Weak<Inner>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Ok(mut listeners) = inner.listeners.lock() {
                listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
