//! Cache refresh agent.
//!
//! Pulls the menu and staff lists from the API and writes them into the
//! local store. The two resources are fetched concurrently and succeed or
//! fail independently: a failed fetch leaves that cache exactly as it was.
//!
//! - Menu: replaced wholesale (clear-then-insert, one transaction). Skipped
//!   when the fetched list equals what is already cached.
//! - Staff: upserted by id, keeping each profile's captured credential.
//!   Never cleared, so offline unlock keeps working after a bad refresh.

use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{StoreError, SyncError};
use crate::models::{MenuCacheEntry, StaffCacheEntry};
use crate::session::SessionContext;
use crate::store::{self, LocalStore};

#[derive(Debug, Clone, PartialEq)]
pub enum ResourceOutcome {
    Refreshed { count: usize, changed: bool },
    Failed { error: String },
    Skipped,
}

impl ResourceOutcome {
    pub fn is_refreshed(&self) -> bool {
        matches!(self, ResourceOutcome::Refreshed { .. })
    }
}

/// Per-resource result of `refresh_all`.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSummary {
    pub menu: ResourceOutcome,
    pub staff: ResourceOutcome,
}

impl RefreshSummary {
    fn skipped() -> Self {
        Self {
            menu: ResourceOutcome::Skipped,
            staff: ResourceOutcome::Skipped,
        }
    }

    pub fn all_refreshed(&self) -> bool {
        self.menu.is_refreshed() && self.staff.is_refreshed()
    }
}

#[derive(Clone)]
pub struct CacheRefreshAgent {
    api: ApiClient,
    store: LocalStore,
    connectivity: ConnectivityMonitor,
}

impl CacheRefreshAgent {
    pub fn new(api: ApiClient, store: LocalStore, connectivity: ConnectivityMonitor) -> Self {
        Self {
            api,
            store,
            connectivity,
        }
    }

    /// Refresh both caches. Requires a session and an online device;
    /// otherwise nothing is fetched and both resources report `Skipped`.
    ///
    /// Only a catastrophic store error (engine gone, table missing) is
    /// returned as `Err`, after both resources have finished.
    pub async fn refresh_all(
        &self,
        session: Option<&SessionContext>,
    ) -> Result<RefreshSummary, StoreError> {
        let Some(session) = session else {
            debug!("refresh skipped: no session");
            return Ok(RefreshSummary::skipped());
        };
        if !self.connectivity.is_online() {
            debug!("refresh skipped: offline");
            return Ok(RefreshSummary::skipped());
        }

        let token = session.token();
        let (menu, staff) = tokio::join!(self.refresh_menu(token), self.refresh_staff(token));

        let summary = RefreshSummary {
            menu: settle("menu", menu)?,
            staff: settle("staff", staff)?,
        };
        info!(menu = ?summary.menu, staff = ?summary.staff, "Cache refresh finished");
        Ok(summary)
    }

    async fn refresh_menu(&self, token: &str) -> Result<(usize, bool), SyncError> {
        let mut items = self.api.fetch_menu(token).await?;
        items.sort_by_key(|m| m.id);
        items.dedup_by_key(|m| m.id);
        let count = items.len();

        let changed = self
            .store
            .run(move |conn| {
                let cached: Vec<MenuCacheEntry> = store::get_all_sync(conn)?;
                if cached == items {
                    return Ok(false);
                }
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM menu_items", [])?;
                for item in &items {
                    store::put_sync(&tx, item)?;
                }
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if changed {
            info!(count, "menu cache replaced");
        } else {
            debug!(count, "menu cache already current");
        }
        Ok((count, changed))
    }

    async fn refresh_staff(&self, token: &str) -> Result<(usize, bool), SyncError> {
        let remote = self.api.fetch_staff(token).await?;
        let count = remote.len();

        let evicted = self
            .store
            .run(move |conn| {
                let tx = conn.transaction()?;
                let cached: HashMap<i64, StaffCacheEntry> =
                    store::get_all_sync::<StaffCacheEntry>(&tx)?
                        .into_iter()
                        .map(|s| (s.id, s))
                        .collect();

                let mut evicted = 0;
                for entry in remote {
                    // A cached row holding this username under another id is
                    // stale; it would block the upsert.
                    let holder: Option<StaffCacheEntry> =
                        store::find_by_sync(&tx, "username", &entry.username)?;
                    if let Some(stale) = holder.filter(|h| h.id != entry.id) {
                        if store::delete_sync::<StaffCacheEntry>(&tx, stale.id)? {
                            evicted += 1;
                        }
                    }
                    let merged = match cached.get(&entry.id) {
                        Some(existing) => existing.merged_with_remote(entry),
                        None => entry,
                    };
                    store::put_sync(&tx, &merged)?;
                }
                tx.commit()?;
                Ok(evicted)
            })
            .await?;

        if evicted > 0 {
            warn!(evicted, "staff cache: evicted profiles whose username moved to a new id");
        }
        info!(count, "staff cache upserted");
        Ok((count, true))
    }
}

/// Map one resource's result into an outcome, surfacing only catastrophic
/// store failures.
fn settle(
    resource: &'static str,
    result: Result<(usize, bool), SyncError>,
) -> Result<ResourceOutcome, StoreError> {
    match result {
        Ok((count, changed)) => Ok(ResourceOutcome::Refreshed { count, changed }),
        Err(SyncError::Store(e)) if e.is_catastrophic() => {
            error!(resource, error = %e, "refresh aborted by store failure");
            Err(e)
        }
        Err(e) => {
            warn!(resource, error = %e, "refresh failed; keeping cached data");
            Ok(ResourceOutcome::Failed {
                error: e.to_string(),
            })
        }
    }
}
