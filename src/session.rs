//! Staff sessions.
//!
//! A `SessionContext` is an explicit value handed to every entry point that
//! needs an identity (order submission, cache refresh). Sessions come from
//! two places:
//! - `login_online`: the server issued a fresh token, which is also captured
//!   as the staff member's last known credential in the local staff cache.
//! - `unlock_offline`: no server contact; the cached credential is reused.
//!   Orders placed under such a session are attributed to that credential
//!   and replayed with it later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::api::ApiClient;
use crate::config::OfflineUnlockPolicy;
use crate::error::{SessionError, StoreError};
use crate::models::{mask_token, Role, StaffCacheEntry};
use crate::store::LocalStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

impl From<&StaffCacheEntry> for SessionUser {
    fn from(entry: &StaffCacheEntry) -> Self {
        Self {
            id: entry.id,
            username: entry.username.clone(),
            full_name: entry.full_name.clone(),
            role: entry.role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    Online,
    OfflineUnlock,
}

#[derive(Clone)]
pub struct SessionContext {
    pub user: SessionUser,
    token: Zeroizing<String>,
    pub origin: SessionOrigin,
    pub started_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(user: SessionUser, token: impl Into<String>, origin: SessionOrigin) -> Self {
        Self {
            user,
            token: Zeroizing::new(token.into()),
            origin,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn restored(
        user: SessionUser,
        token: String,
        origin: SessionOrigin,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user,
            token: Zeroizing::new(token),
            origin,
            started_at,
        }
    }

    /// Bearer token captured for this session.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether orders must go through the local queue regardless of
    /// connectivity.
    pub fn must_queue(&self, policy: OfflineUnlockPolicy) -> bool {
        self.origin == SessionOrigin::OfflineUnlock && policy == OfflineUnlockPolicy::QueueAlways
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("user", &self.user)
            .field("token", &mask_token(&self.token))
            .field("origin", &self.origin)
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Authenticate against the server and capture the issued token.
///
/// Failing to cache the credential does not fail the login; the user simply
/// won't be offered for offline unlock until the next successful login.
pub async fn login_online(
    api: &ApiClient,
    store: &LocalStore,
    username: &str,
    password: &str,
) -> Result<SessionContext, SessionError> {
    let response = api.login(username.trim(), password).await?;
    let token = response.token;
    let user = response.user;

    let existing = store.staff().get(user.id).await.unwrap_or_else(|e| {
        warn!(user_id = user.id, error = %e, "login: failed to read cached profile");
        None
    });
    let mut entry = match existing {
        Some(cached) => cached.merged_with_remote(user),
        None => user,
    };
    entry.last_known_token = Some(token.clone());

    if let Err(e) = cache_profile(store, entry.clone()).await {
        warn!(user_id = entry.id, error = %e, "login: failed to cache credential for offline unlock");
    }

    info!(user_id = entry.id, role = %entry.role, "Online session established");
    Ok(SessionContext::new(
        SessionUser::from(&entry),
        token,
        SessionOrigin::Online,
    ))
}

/// Upsert a profile, evicting a stale row that still holds its username.
async fn cache_profile(store: &LocalStore, entry: StaffCacheEntry) -> Result<(), StoreError> {
    let staff = store.staff();
    match staff.put(entry.clone()).await {
        Err(StoreError::Constraint(reason)) => {
            if let Some(stale) = staff.find_by("username", entry.username.clone()).await? {
                if stale.id != entry.id {
                    warn!(
                        stale_id = stale.id,
                        user_id = entry.id,
                        "evicting cached profile that reused username"
                    );
                    staff.delete(stale.id).await?;
                    staff.put(entry).await?;
                    return Ok(());
                }
            }
            Err(StoreError::Constraint(reason))
        }
        other => other.map(|_| ()),
    }
}

/// Staff that can be unlocked without the server, sorted by name.
pub async fn offline_profiles(store: &LocalStore) -> Result<Vec<StaffCacheEntry>, StoreError> {
    let mut profiles: Vec<StaffCacheEntry> = store
        .staff()
        .get_all()
        .await?
        .into_iter()
        .filter(|s| s.is_active && matches!(s.role, Role::Waiter | Role::Manager))
        .filter(StaffCacheEntry::can_unlock_offline)
        .collect();
    profiles.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
    Ok(profiles)
}

/// Restore a session from a cached profile, without contacting the server.
pub async fn unlock_offline(
    store: &LocalStore,
    user_id: i64,
) -> Result<SessionContext, SessionError> {
    let entry = store
        .staff()
        .get(user_id)
        .await?
        .filter(|s| s.is_active)
        .ok_or(SessionError::NotEligible(user_id))?;
    let token = entry
        .last_known_token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .ok_or(SessionError::NotEligible(user_id))?;

    info!(
        user_id,
        token = %mask_token(&token),
        "Offline session unlocked from cached credential"
    );
    Ok(SessionContext::new(
        SessionUser::from(&entry),
        token,
        SessionOrigin::OfflineUnlock,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock;
    use crate::store::test_store;
    use serde_json::json;
    use std::time::Duration;

    fn cached(id: i64, username: &str, role: Role, token: Option<&str>) -> StaffCacheEntry {
        StaffCacheEntry {
            id,
            username: username.to_string(),
            full_name: format!("{username} full"),
            role,
            is_active: true,
            last_known_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn online_login_captures_token_in_staff_cache() {
        let api = mock::spawn().await;
        api.add_user(
            "nikos",
            "pw",
            json!({ "id": 11, "username": "nikos", "full_name": "Nikos A", "role": "waiter" }),
            "tok-nikos",
        );
        let client = ApiClient::new(&api.base_url(), Duration::from_secs(5)).unwrap();
        let store = test_store();

        let session = login_online(&client, &store, "nikos", "pw").await.unwrap();
        assert_eq!(session.origin, SessionOrigin::Online);
        assert_eq!(session.token(), "tok-nikos");

        let entry = store.staff().get(11).await.unwrap().unwrap();
        assert_eq!(entry.last_known_token.as_deref(), Some("tok-nikos"));
        assert!(entry.is_active);
    }

    #[tokio::test]
    async fn failed_login_caches_nothing() {
        let api = mock::spawn().await;
        let client = ApiClient::new(&api.base_url(), Duration::from_secs(5)).unwrap();
        let store = test_store();

        let err = login_online(&client, &store, "ghost", "pw")
            .await
            .expect_err("unknown user");
        assert!(matches!(err, SessionError::Remote(_)));
        assert_eq!(store.staff().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn login_evicts_stale_profile_with_same_username() {
        let api = mock::spawn().await;
        api.add_user(
            "maria",
            "pw",
            json!({ "id": 20, "username": "maria", "full_name": "Maria New", "role": "waiter" }),
            "tok-new",
        );
        let client = ApiClient::new(&api.base_url(), Duration::from_secs(5)).unwrap();
        let store = test_store();
        store
            .staff()
            .put(cached(7, "maria", Role::Waiter, Some("tok-old")))
            .await
            .unwrap();

        login_online(&client, &store, "maria", "pw").await.unwrap();

        assert!(store.staff().get(7).await.unwrap().is_none());
        let fresh = store.staff().get(20).await.unwrap().unwrap();
        assert_eq!(fresh.last_known_token.as_deref(), Some("tok-new"));
    }

    #[tokio::test]
    async fn offline_profiles_filters_ineligible_staff() {
        let store = test_store();
        let mut inactive = cached(4, "dimitra", Role::Waiter, Some("tok-d"));
        inactive.is_active = false;
        store
            .staff()
            .bulk_put(vec![
                cached(1, "zoe", Role::Waiter, Some("tok-z")),
                cached(2, "admin", Role::Admin, Some("tok-a")),
                cached(3, "bill", Role::Manager, Some("tok-b")),
                inactive,
                cached(5, "yannis", Role::Waiter, None),
            ])
            .await
            .unwrap();

        let names: Vec<String> = offline_profiles(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.username)
            .collect();
        assert_eq!(names, vec!["bill", "zoe"]);
    }

    #[tokio::test]
    async fn unlock_offline_uses_cached_credential() {
        let store = test_store();
        store
            .staff()
            .bulk_put(vec![
                cached(1, "zoe", Role::Waiter, Some("tok-z")),
                cached(2, "yannis", Role::Waiter, None),
            ])
            .await
            .unwrap();

        let session = unlock_offline(&store, 1).await.unwrap();
        assert_eq!(session.origin, SessionOrigin::OfflineUnlock);
        assert_eq!(session.token(), "tok-z");
        assert!(session.must_queue(OfflineUnlockPolicy::QueueAlways));
        assert!(!session.must_queue(OfflineUnlockPolicy::DirectWhenOnline));

        assert!(matches!(
            unlock_offline(&store, 2).await,
            Err(SessionError::NotEligible(2))
        ));
        assert!(matches!(
            unlock_offline(&store, 99).await,
            Err(SessionError::NotEligible(99))
        ));
    }

    #[test]
    fn debug_masks_token() {
        let session = SessionContext::new(
            SessionUser {
                id: 1,
                username: "a".into(),
                full_name: "A".into(),
                role: Role::Waiter,
            },
            "very-secret-9876",
            SessionOrigin::Online,
        );
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("***9876"));
    }
}
