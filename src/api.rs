//! Restaurant REST API client.
//!
//! Thin reqwest wrapper for the four endpoints the offline subsystem needs:
//! menu list, staff list, order creation and login. Every authenticated call
//! takes the bearer token explicitly; there is no ambient session header, so
//! a queued order is always replayed with the credential it was captured
//! with.

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{
    mask_token, LoginResponse, MenuCacheEntry, OrderPayload, OrderReceipt, StaffCacheEntry,
};

pub const MENU_PATH: &str = "/menu";
pub const STAFF_PATH: &str = "/users/staff";
pub const ORDERS_PATH: &str = "/orders";
pub const LOGIN_PATH: &str = "/auth/login";

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise a base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_api_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a transport failure into a retryable network error.
fn friendly_error(url: &str, err: &reqwest::Error) -> SyncError {
    let message = if err.is_connect() {
        format!("Cannot reach API at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else if err.is_builder() {
        format!("Invalid API URL: {url}")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    SyncError::Network(message)
}

/// Fallback message for a status code when the body carries none.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Credential is invalid or expired".to_string(),
        403 => "Not authorized".to_string(),
        404 => "API endpoint not found".to_string(),
        s if s >= 500 => format!("API server error (HTTP {s})"),
        s => format!("Unexpected response from API (HTTP {s})"),
    }
}

fn rejection(status: StatusCode, body_text: &str) -> SyncError {
    let message = serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| status_message(status));
    SyncError::Rejected {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    pub fn with_client(base_url: &str, http: Client) -> Self {
        Self {
            base_url: normalize_api_url(base_url),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// `GET /menu`
    pub async fn fetch_menu(&self, token: &str) -> Result<Vec<MenuCacheEntry>, SyncError> {
        self.request(Method::GET, MENU_PATH, Some(token), None::<&()>)
            .await
    }

    /// `GET /users/staff`
    pub async fn fetch_staff(&self, token: &str) -> Result<Vec<StaffCacheEntry>, SyncError> {
        self.request(Method::GET, STAFF_PATH, Some(token), None::<&()>)
            .await
    }

    /// `POST /orders` authorised by `token`.
    ///
    /// Any 2xx is a delivery. The receipt is `None` when the body is empty
    /// or carries no order id.
    pub async fn post_order(
        &self,
        payload: &OrderPayload,
        token: &str,
    ) -> Result<Option<OrderReceipt>, SyncError> {
        let body_text = self
            .send(Method::POST, ORDERS_PATH, Some(token), Some(payload))
            .await?;
        if body_text.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<OrderReceipt>(&body_text) {
            Ok(receipt) => Ok(Some(receipt)),
            Err(e) => {
                debug!(error = %e, "order accepted without a readable receipt");
                Ok(None)
            }
        }
    }

    /// `POST /auth/login`
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, SyncError> {
        let body = serde_json::json!({ "username": username, "password": password });
        self.request(Method::POST, LOGIN_PATH, None, Some(&body))
            .await
    }

    async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&B>,
    ) -> Result<T, SyncError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body_text = self.send(method, path, token, body).await?;
        serde_json::from_str(&body_text)
            .map_err(|e| SyncError::InvalidResponse(format!("{path}: {e}")))
    }

    /// Send a request and return the body of a 2xx response.
    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&B>,
    ) -> Result<String, SyncError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(
            method = %method,
            path,
            token = %token.map(mask_token).unwrap_or_else(|| "<none>".into()),
            "api request"
        );

        let mut req = self
            .http
            .request(method, &url)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        if !status.is_success() {
            let err = rejection(status, &body_text);
            warn!(path, status = status.as_u16(), error = %err, "api request rejected");
            return Err(err);
        }
        Ok(body_text)
    }
}

// ---------------------------------------------------------------------------
// Mock API shared by tests across modules
// ---------------------------------------------------------------------------
