//! Pending-order queue manager.
//!
//! Orders that cannot (or may not) be sent right away are written to the
//! `pending_orders` table with the credential of the staff member who placed
//! them. `drain` replays that table against the API:
//! - oldest first, strictly one POST at a time
//! - an entry is deleted only after a 2xx answer, receipt or not
//! - any failure is logged and skipped; the next drain retries it
//! - a row that no longer decodes counts as a failure and stays put
//!
//! The queue is a snapshot taken when the drain starts; orders queued while
//! a drain is running wait for the next one. Delivery is at-least-once: the
//! background worker runs its own drain over the same table, and the
//! payload's `client_order_id` lets the server drop duplicates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::ApiClient;
use crate::config::OfflineUnlockPolicy;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{StoreError, SyncError};
use crate::models::{mask_token, OrderPayload, PendingOrder};
use crate::session::SessionContext;
use crate::store::{self, LocalStore};
use crate::worker::SyncManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainSkip {
    Offline,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the drain did not run at all.
    pub skipped: Option<DrainSkip>,
}

impl DrainReport {
    fn skipped(reason: DrainSkip) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Where a submitted order ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderPlacement {
    /// `order_id` is absent when the server accepted without a receipt.
    Sent { order_id: Option<String> },
    Queued { local_id: i64 },
}

/// Clears the in-progress flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct PendingOrderQueue {
    store: LocalStore,
    api: ApiClient,
    connectivity: ConnectivityMonitor,
    policy: OfflineUnlockPolicy,
    sync: Option<(SyncManager, String)>,
    draining: Arc<AtomicBool>,
}

impl PendingOrderQueue {
    pub fn new(
        store: LocalStore,
        api: ApiClient,
        connectivity: ConnectivityMonitor,
        policy: OfflineUnlockPolicy,
    ) -> Self {
        Self {
            store,
            api,
            connectivity,
            policy,
            sync: None,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register `tag` with `manager` whenever an order is queued.
    pub fn with_sync_registration(mut self, manager: SyncManager, tag: impl Into<String>) -> Self {
        self.sync = Some((manager, tag.into()));
        self
    }

    /// Append an order to the queue under `credential`.
    pub async fn enqueue(
        &self,
        payload: OrderPayload,
        credential: &str,
    ) -> Result<PendingOrder, SyncError> {
        payload.validate()?;
        if credential.trim().is_empty() {
            warn!("queueing order without a credential; replay will be rejected");
        }
        let mut order = PendingOrder::new(payload, credential);
        let id = self.store.pending_orders().put(order.clone()).await?;
        order.id = Some(id);

        info!(
            local_id = id,
            client_order_id = %order.data.client_order_id,
            items = order.data.items.len(),
            token = %mask_token(credential),
            "Order queued locally"
        );
        if let Some((manager, tag)) = &self.sync {
            manager.register(tag);
        }
        Ok(order)
    }

    /// Replay queued orders. Only store failures are returned as errors.
    pub async fn drain(&self) -> Result<DrainReport, StoreError> {
        if !self.connectivity.is_online() {
            debug!("drain skipped: offline");
            return Ok(DrainReport::skipped(DrainSkip::Offline));
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain skipped: already running");
            return Ok(DrainReport::skipped(DrainSkip::AlreadyRunning));
        }
        let _guard = DrainGuard(&self.draining);

        let table = self.store.pending_orders();
        let snapshot = table.get_all_raw().await?;
        if snapshot.is_empty() {
            self.settle_sync_tag().await;
            return Ok(DrainReport::default());
        }
        info!(count = snapshot.len(), "Draining pending orders");

        let mut report = DrainReport::default();
        for (id, raw) in snapshot {
            let order = match store::decode_row::<PendingOrder>(id, &raw) {
                Ok(order) => order,
                Err(e) => {
                    warn!(local_id = id, error = %e, "unreadable pending order skipped");
                    report.failed += 1;
                    continue;
                }
            };
            match self.api.post_order(&order.data, &order.token).await {
                Ok(receipt) => {
                    if let Err(e) = table.delete(id).await {
                        error!(
                            local_id = id,
                            error = %e,
                            "order delivered but not removed from queue"
                        );
                        report.failed += 1;
                        continue;
                    }
                    info!(
                        local_id = id,
                        order_id = receipt.as_ref().map(|r| r.order_id.as_str()).unwrap_or("-"),
                        "Pending order delivered"
                    );
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(
                        local_id = id,
                        status = ?e.status(),
                        error = %e,
                        "Pending order not delivered; will retry"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Drain finished"
        );
        self.settle_sync_tag().await;
        Ok(report)
    }

    /// Withdraw the worker's sync tag once this context has emptied the
    /// queue, so a reconnect does not replay the same orders twice.
    async fn settle_sync_tag(&self) {
        let Some((manager, tag)) = &self.sync else {
            return;
        };
        match self.pending_count().await {
            Ok(0) => {
                manager.settle(tag);
            }
            Ok(left) => debug!(left, "orders still queued; sync tag kept"),
            Err(e) => warn!(error = %e, "could not count queue; sync tag kept"),
        }
    }

    /// Hand queue ownership to (or take it back from) this context. While
    /// owned, reconnects are drained here rather than by the worker.
    pub fn set_page_owned(&self, owned: bool) {
        if let Some((manager, _)) = &self.sync {
            manager.set_page_owned(owned);
        }
    }

    /// Send an order now, or queue it.
    ///
    /// Offline devices and offline-unlocked sessions (under `QueueAlways`)
    /// queue without touching the network. A direct POST that fails at the
    /// transport level is queued instead; a server rejection is returned.
    pub async fn submit_order(
        &self,
        session: &SessionContext,
        payload: OrderPayload,
    ) -> Result<OrderPlacement, SyncError> {
        payload.validate()?;
        if !self.connectivity.is_online() || session.must_queue(self.policy) {
            let order = self.enqueue(payload, session.token()).await?;
            return Ok(OrderPlacement::Queued {
                local_id: order.id.unwrap_or_default(),
            });
        }

        match self.api.post_order(&payload, session.token()).await {
            Ok(receipt) => {
                let order_id = receipt.map(|r| r.order_id);
                info!(
                    order_id = order_id.as_deref().unwrap_or("-"),
                    user_id = session.user.id,
                    "Order sent"
                );
                Ok(OrderPlacement::Sent { order_id })
            }
            Err(e) if e.is_network() => {
                warn!(error = %e, "direct order submission failed; queueing");
                let order = self.enqueue(payload, session.token()).await?;
                Ok(OrderPlacement::Queued {
                    local_id: order.id.unwrap_or_default(),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn pending_count(&self) -> Result<usize, StoreError> {
        self.store.pending_orders().count().await
    }
}

// ---------------------------------------------------------------------------
// Drain contract, shared with the worker's replay
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every drain over `pending_orders` must show. A `Drainer`
    //! gets the database path and API base URL and returns
    //! `(succeeded, failed)`.

    use super::*;
    use crate::api::mock;
    use crate::models::OrderLine;
    use chrono::{TimeZone, Utc};
    use std::future::Future;
    use std::path::PathBuf;
    use std::pin::Pin;

    pub type Drainer = Arc<
        dyn Fn(PathBuf, String) -> Pin<Box<dyn Future<Output = (usize, usize)> + Send>>
            + Send
            + Sync,
    >;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: LocalStore,
        api: mock::MockApi,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = LocalStore::open(dir.path()).expect("store");
            Self {
                _dir: dir,
                store,
                api: mock::spawn().await,
            }
        }

        fn db_path(&self) -> PathBuf {
            self.store.db().db_path.clone()
        }

        async fn drain_with(&self, drainer: &Drainer) -> (usize, usize) {
            drainer(self.db_path(), self.api.base_url()).await
        }
    }

    /// Queue an order created at 10:00 plus `minutes`.
    pub async fn enqueue_at(store: &LocalStore, token: &str, minutes: i64) -> PendingOrder {
        let mut order = PendingOrder::new(
            OrderPayload::new(vec![OrderLine {
                menu_item_id: 1 + minutes,
                quantity: 1,
                price: 3.5,
            }]),
            token,
        );
        order.created_at = Utc
            .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
            .single()
            .expect("valid timestamp")
            + chrono::Duration::minutes(minutes);
        let id = store.pending_orders().put(order.clone()).await.expect("put");
        order.id = Some(id);
        order
    }

    fn client_ids(api: &mock::MockApi) -> Vec<String> {
        api.orders()
            .iter()
            .map(|o| o.body["client_order_id"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    async fn rejected_entry_stays_and_does_not_block(drainer: &Drainer) {
        let fx = Fixture::new().await;
        let a = enqueue_at(&fx.store, "tok1", 0).await;
        let b = enqueue_at(&fx.store, "tok2", 5).await;
        fx.api.reject_token("tok1");

        assert_eq!(fx.drain_with(drainer).await, (1, 1));

        let tokens: Vec<Option<String>> = fx.api.orders().into_iter().map(|o| o.token).collect();
        assert_eq!(tokens, vec![Some("tok1".into()), Some("tok2".into())]);
        let remaining = fx.store.pending_orders().get_all().await.unwrap();
        assert_eq!(remaining, vec![a]);
        assert!(fx.store.pending_orders().get(b.id.unwrap()).await.unwrap().is_none());
    }

    async fn delivers_in_creation_order(drainer: &Drainer) {
        let fx = Fixture::new().await;
        let t3 = enqueue_at(&fx.store, "tok", 30).await;
        let t1 = enqueue_at(&fx.store, "tok", 10).await;
        let t2 = enqueue_at(&fx.store, "tok", 20).await;

        assert_eq!(fx.drain_with(drainer).await, (3, 0));

        let expected: Vec<String> = [t1, t2, t3]
            .iter()
            .map(|o| o.data.client_order_id.to_string())
            .collect();
        assert_eq!(client_ids(&fx.api), expected);
        assert_eq!(fx.store.pending_orders().count().await.unwrap(), 0);
    }

    async fn server_error_keeps_entry_unchanged(drainer: &Drainer) {
        let fx = Fixture::new().await;
        let first = enqueue_at(&fx.store, "tok-a", 0).await;
        enqueue_at(&fx.store, "tok-b", 1).await;
        fx.api.script_order_statuses(&[500]);

        assert_eq!(fx.drain_with(drainer).await, (1, 1));
        let remaining = fx.store.pending_orders().get_all().await.unwrap();
        assert_eq!(remaining, vec![first.clone()]);

        assert_eq!(fx.drain_with(drainer).await, (1, 0));
        assert_eq!(fx.store.pending_orders().count().await.unwrap(), 0);
        let ids = client_ids(&fx.api);
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], first.data.client_order_id.to_string());
    }

    async fn unreachable_api_keeps_everything(drainer: &Drainer) {
        let fx = Fixture::new().await;
        enqueue_at(&fx.store, "tok-a", 0).await;
        enqueue_at(&fx.store, "tok-b", 1).await;
        let before = fx.store.pending_orders().get_all().await.unwrap();

        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api", closed.local_addr().unwrap());
        drop(closed);

        assert_eq!(drainer(fx.db_path(), url).await, (0, 2));
        assert_eq!(fx.store.pending_orders().get_all().await.unwrap(), before);
    }

    async fn payload_sent_verbatim(drainer: &Drainer) {
        let fx = Fixture::new().await;
        let mut payload = OrderPayload::new(vec![OrderLine {
            menu_item_id: 9,
            quantity: 2,
            price: 4.25,
        }]);
        payload
            .metadata
            .insert("table_number".into(), serde_json::json!(12));
        let order = PendingOrder::new(payload.clone(), "tok");
        fx.store.pending_orders().put(order).await.unwrap();

        assert_eq!(fx.drain_with(drainer).await, (1, 0));
        let body = &fx.api.orders()[0].body;
        assert_eq!(body["table_number"], 12);
        assert_eq!(body["items"][0]["menu_item_id"], 9);
        assert_eq!(body["items"][0]["quantity"], 2);
        assert_eq!(body["items"][0]["price"], 4.25);
        assert_eq!(
            body["client_order_id"],
            payload.client_order_id.to_string().as_str()
        );
    }

    async fn unreadable_row_is_skipped(drainer: &Drainer) {
        let fx = Fixture::new().await;
        let created = Utc
            .with_ymd_and_hms(2024, 5, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp")
            .timestamp_millis();
        fx.store
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO pending_orders (created_at, data) VALUES (?1, 'not json')",
                    [created],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        let good = enqueue_at(&fx.store, "tok", 5).await;

        assert_eq!(fx.drain_with(drainer).await, (1, 1));
        assert_eq!(client_ids(&fx.api), vec![good.data.client_order_id.to_string()]);
        assert_eq!(fx.store.pending_orders().count().await.unwrap(), 1);
        assert!(fx.store.pending_orders().get(good.id.unwrap()).await.unwrap().is_none());
    }

    async fn success_without_receipt_removes_entry(drainer: &Drainer) {
        let fx = Fixture::new().await;
        enqueue_at(&fx.store, "tok", 0).await;
        enqueue_at(&fx.store, "tok", 1).await;
        fx.api.script_order_statuses(&[204, 200]);

        assert_eq!(fx.drain_with(drainer).await, (2, 0));
        assert_eq!(fx.store.pending_orders().count().await.unwrap(), 0);
        assert_eq!(fx.drain_with(drainer).await, (0, 0));
        assert_eq!(fx.api.orders().len(), 2);
    }

    async fn failed_delete_does_not_stop_the_queue(drainer: &Drainer) {
        let fx = Fixture::new().await;
        let stuck = enqueue_at(&fx.store, "tok", 0).await;
        let next = enqueue_at(&fx.store, "tok", 1).await;
        let stuck_id = stuck.id.unwrap();
        fx.store
            .run(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE TRIGGER keep_stuck BEFORE DELETE ON pending_orders
                     WHEN OLD.id = {stuck_id}
                     BEGIN SELECT RAISE(ABORT, 'row locked'); END;"
                ))?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(fx.drain_with(drainer).await, (1, 1));
        assert_eq!(fx.api.orders().len(), 2);
        let remaining = fx.store.pending_orders().get_all().await.unwrap();
        assert_eq!(remaining, vec![stuck]);
        assert!(fx.store.pending_orders().get(next.id.unwrap()).await.unwrap().is_none());
    }

    async fn empty_queue_is_a_no_op(drainer: &Drainer) {
        let fx = Fixture::new().await;
        assert_eq!(fx.drain_with(drainer).await, (0, 0));
        assert!(fx.api.orders().is_empty());
    }

    pub async fn run_all(drainer: Drainer) {
        rejected_entry_stays_and_does_not_block(&drainer).await;
        delivers_in_creation_order(&drainer).await;
        server_error_keeps_entry_unchanged(&drainer).await;
        unreachable_api_keeps_everything(&drainer).await;
        payload_sent_verbatim(&drainer).await;
        unreadable_row_is_skipped(&drainer).await;
        success_without_receipt_removes_entry(&drainer).await;
        failed_delete_does_not_stop_the_queue(&drainer).await;
        empty_queue_is_a_no_op(&drainer).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{self, RecordedOrder};
    use crate::db;
    use crate::models::{MenuCacheEntry, OrderLine, Role, StaffCacheEntry};
    use crate::session::{SessionOrigin, SessionUser};
    use crate::store::{self, test_store};
    use crate::worker::WorkerEvent;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn session(origin: SessionOrigin, token: &str) -> SessionContext {
        SessionContext::new(
            SessionUser {
                id: 3,
                username: "eleni".into(),
                full_name: "Eleni K".into(),
                role: Role::Waiter,
            },
            token,
            origin,
        )
    }

    fn payload(item: i64) -> OrderPayload {
        OrderPayload::new(vec![OrderLine {
            menu_item_id: item,
            quantity: 2,
            price: 5.0,
        }])
    }

    fn queue_for(
        api_url: &str,
        store: LocalStore,
        online: bool,
        policy: OfflineUnlockPolicy,
    ) -> PendingOrderQueue {
        let client = ApiClient::new(api_url, Duration::from_secs(5)).unwrap();
        PendingOrderQueue::new(store, client, ConnectivityMonitor::new(online), policy)
    }

    #[tokio::test]
    async fn offline_submissions_queue_without_network() {
        let api = mock::spawn().await;
        let store = test_store();
        store
            .menu()
            .put(MenuCacheEntry {
                id: 1,
                name: "Pita".into(),
                category: None,
                price: 2.0,
                is_available: true,
                track_quantity: false,
                quantity: 0,
                low_stock_threshold: 0,
            })
            .await
            .unwrap();
        store
            .staff()
            .put(StaffCacheEntry {
                id: 3,
                username: "eleni".into(),
                full_name: "Eleni K".into(),
                role: Role::Waiter,
                is_active: true,
                last_known_token: Some("tok-eleni".into()),
            })
            .await
            .unwrap();
        let menu_before = store.menu().get_all().await.unwrap();
        let staff_before = store.staff().get_all().await.unwrap();

        let queue = queue_for(&api.base_url(), store.clone(), false, OfflineUnlockPolicy::default());
        let user = session(SessionOrigin::Online, "tok-eleni");
        for i in 0..4 {
            let placed = queue.submit_order(&user, payload(i)).await.unwrap();
            assert!(matches!(placed, OrderPlacement::Queued { .. }));
        }

        assert_eq!(queue.pending_count().await.unwrap(), 4);
        assert!(api.orders().is_empty());
        assert_eq!(store.menu().get_all().await.unwrap(), menu_before);
        assert_eq!(store.staff().get_all().await.unwrap(), staff_before);

        let queued = store.pending_orders().get_all().await.unwrap();
        assert!(queued.iter().all(|o| o.token == "tok-eleni"));
        assert_eq!(queued[0].data.items, payload(0).items);
    }

    #[tokio::test]
    async fn drain_does_nothing_while_offline() {
        let api = mock::spawn().await;
        let store = test_store();
        let queue = queue_for(&api.base_url(), store, false, OfflineUnlockPolicy::default());
        queue.enqueue(payload(1), "tok").await.unwrap();

        let report = queue.drain().await.unwrap();
        assert_eq!(report.skipped, Some(DrainSkip::Offline));
        assert!(api.orders().is_empty());
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn second_drain_in_same_context_is_skipped() {
        let api = mock::spawn().await;
        let queue = queue_for(&api.base_url(), test_store(), true, OfflineUnlockPolicy::default());
        queue.draining.store(true, Ordering::SeqCst);

        let report = queue.drain().await.unwrap();
        assert_eq!(report.skipped, Some(DrainSkip::AlreadyRunning));

        queue.draining.store(false, Ordering::SeqCst);
        let report = queue.drain().await.unwrap();
        assert_eq!(report, DrainReport::default());
    }

    #[tokio::test]
    async fn orders_queued_mid_drain_wait_for_next_drain() {
        let api = mock::spawn().await;
        let store = test_store();
        let queue = queue_for(&api.base_url(), store.clone(), true, OfflineUnlockPolicy::default());
        queue.enqueue(payload(1), "tok-first").await.unwrap();

        let db = store.db().clone();
        let fired = Arc::new(AtomicBool::new(false));
        api.on_order(Arc::new(move |_: &RecordedOrder| {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            let late = PendingOrder::new(payload(2), "tok-late");
            let conn = db.conn.lock().unwrap();
            store::put_sync(&*conn, &late).unwrap();
        }));

        let report = queue.drain().await.unwrap();
        assert_eq!((report.succeeded, report.failed), (1, 0));
        let left = store.pending_orders().get_all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].token, "tok-late");
        assert_eq!(api.orders().len(), 1);

        let report = queue.drain().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn online_submission_posts_directly() {
        let api = mock::spawn().await;
        let queue = queue_for(&api.base_url(), test_store(), true, OfflineUnlockPolicy::default());

        let placed = queue
            .submit_order(&session(SessionOrigin::Online, "tok-live"), payload(1))
            .await
            .unwrap();
        assert_eq!(
            placed,
            OrderPlacement::Sent {
                order_id: Some("1".into())
            }
        );
        assert_eq!(api.orders()[0].token.as_deref(), Some("tok-live"));
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_unlocked_sessions_follow_policy() {
        let api = mock::spawn().await;
        let user = session(SessionOrigin::OfflineUnlock, "tok-cached");

        let strict = queue_for(&api.base_url(), test_store(), true, OfflineUnlockPolicy::QueueAlways);
        let placed = strict.submit_order(&user, payload(1)).await.unwrap();
        assert!(matches!(placed, OrderPlacement::Queued { .. }));
        assert!(api.orders().is_empty());

        let relaxed = queue_for(
            &api.base_url(),
            test_store(),
            true,
            OfflineUnlockPolicy::DirectWhenOnline,
        );
        let placed = relaxed.submit_order(&user, payload(1)).await.unwrap();
        assert!(matches!(placed, OrderPlacement::Sent { .. }));
    }

    #[tokio::test]
    async fn unreachable_server_falls_back_to_queue() {
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api", closed.local_addr().unwrap());
        drop(closed);
        let queue = queue_for(&url, test_store(), true, OfflineUnlockPolicy::default());

        let placed = queue
            .submit_order(&session(SessionOrigin::Online, "tok"), payload(1))
            .await
            .unwrap();
        assert!(matches!(placed, OrderPlacement::Queued { .. }));
        assert_eq!(queue.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn server_rejection_is_returned_not_queued() {
        let api = mock::spawn().await;
        api.reject_token("tok-expired");
        let queue = queue_for(&api.base_url(), test_store(), true, OfflineUnlockPolicy::default());

        let err = queue
            .submit_order(&session(SessionOrigin::Online, "tok-expired"), payload(1))
            .await
            .expect_err("401");
        assert_eq!(err.status(), Some(401));
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn queueing_registers_the_sync_tag() {
        let api = mock::spawn().await;
        let (tx, _rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let manager = SyncManager::new(tx);
        let queue = queue_for(&api.base_url(), test_store(), false, OfflineUnlockPolicy::default())
            .with_sync_registration(manager.clone(), "sync-pending-orders");

        assert!(manager.pending_tags().is_empty());
        queue.enqueue(payload(1), "tok").await.unwrap();
        assert_eq!(manager.pending_tags(), vec!["sync-pending-orders".to_string()]);
    }

    #[tokio::test]
    async fn drain_withdraws_sync_tag_only_when_queue_is_empty() {
        let api = mock::spawn().await;
        let (tx, _rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let manager = SyncManager::new(tx);
        let queue = queue_for(&api.base_url(), test_store(), true, OfflineUnlockPolicy::default())
            .with_sync_registration(manager.clone(), "sync-pending-orders");

        queue.enqueue(payload(1), "tok-expired").await.unwrap();
        queue.enqueue(payload(2), "tok-ok").await.unwrap();
        api.reject_token("tok-expired");
        let report = queue.drain().await.unwrap();
        assert_eq!((report.succeeded, report.failed), (1, 1));
        assert_eq!(manager.pending_tags(), vec!["sync-pending-orders".to_string()]);

        api.state.rejected_tokens.lock().unwrap().clear();
        let report = queue.drain().await.unwrap();
        assert_eq!((report.succeeded, report.failed), (1, 0));
        assert!(manager.pending_tags().is_empty());
    }

    #[tokio::test]
    async fn zero_quantity_orders_are_refused() {
        let api = mock::spawn().await;
        let queue = queue_for(&api.base_url(), test_store(), false, OfflineUnlockPolicy::default());
        let mut bad = payload(1);
        bad.items[0].quantity = 0;

        let err = queue.enqueue(bad.clone(), "tok").await.expect_err("quantity 0");
        assert!(matches!(err, SyncError::InvalidOrder(_)), "{err:?}");
        let err = queue
            .submit_order(&session(SessionOrigin::Online, "tok"), bad)
            .await
            .expect_err("quantity 0");
        assert!(matches!(err, SyncError::InvalidOrder(_)), "{err:?}");
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert!(api.orders().is_empty());
    }

    #[tokio::test]
    async fn queue_drain_satisfies_drain_contract() {
        let drainer: contract::Drainer = Arc::new(|db_path, api_url| {
            Box::pin(async move {
                let store = LocalStore::new(Arc::new(db::open_existing(&db_path).expect("open")));
                let queue = queue_for(&api_url, store, true, OfflineUnlockPolicy::default());
                let report = queue.drain().await.expect("drain");
                (report.succeeded, report.failed)
            })
        });
        contract::run_all(drainer).await;
    }
}
