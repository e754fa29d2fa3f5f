//! Records mirrored or queued in the local durable store, plus the JSON
//! shapes exchanged with the remote API.
//!
//! The remote API is backed by MySQL, so decimals frequently arrive as
//! strings (`"12.50"`) and flags as `0`/`1`. The `de_*` helpers accept both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::OrderError;

// ---------------------------------------------------------------------------
// Lenient field decoders
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn de_decimal<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(d)?;
    let parsed = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => Some(0.0),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
        Some(v) => Err(serde::de::Error::custom(format!(
            "decimal must be non-negative, got {v}"
        ))),
        None => Err(serde::de::Error::custom(format!(
            "expected decimal, got {value}"
        ))),
    }
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        Value::String(s) => matches!(s.trim(), "1" | "true" | "TRUE" | "yes"),
        _ => false,
    })
}

/// Non-negative counter; negatives and garbage clamp to zero.
fn de_count<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(d)?;
    let raw = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    Ok(raw.unwrap_or(0).max(0))
}

fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(d)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn de_id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected order id, got {other}"
        ))),
    }
}

/// Show only the last four characters of a bearer token.
pub fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<none>".to_string();
    }
    let suffix: String = trimmed
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<char>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{suffix}")
}

// ---------------------------------------------------------------------------
// Menu
// ---------------------------------------------------------------------------

/// Mirror of a remote menu item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuCacheEntry {
    pub id: i64,
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub category: Option<String>,
    #[serde(deserialize_with = "de_decimal")]
    pub price: f64,
    #[serde(default = "default_true", deserialize_with = "de_flag")]
    pub is_available: bool,
    #[serde(default, deserialize_with = "de_flag")]
    pub track_quantity: bool,
    #[serde(default, deserialize_with = "de_count")]
    pub quantity: i64,
    #[serde(default, deserialize_with = "de_count")]
    pub low_stock_threshold: i64,
}

impl MenuCacheEntry {
    /// Whether a line for this item may be added to an order.
    pub fn is_orderable(&self) -> bool {
        self.is_available && !self.is_out_of_stock()
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.track_quantity && self.quantity <= 0
    }

    pub fn is_low_stock(&self) -> bool {
        self.track_quantity && self.quantity > 0 && self.quantity <= self.low_stock_threshold
    }

    /// Grouping key; blank categories group under "Uncategorized".
    pub fn category_label(&self) -> &str {
        self.category.as_deref().unwrap_or("Uncategorized")
    }
}

// ---------------------------------------------------------------------------
// Staff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Waiter,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Waiter => "waiter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mirror of a remote user plus the bearer token captured at their most
/// recent successful login on this device.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffCacheEntry {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    pub role: Role,
    #[serde(default = "default_true", deserialize_with = "de_flag")]
    pub is_active: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_string"
    )]
    pub last_known_token: Option<String>,
}

impl StaffCacheEntry {
    /// Eligible for a degraded login that never contacts the server.
    pub fn can_unlock_offline(&self) -> bool {
        self.last_known_token
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }

    /// Take fresh profile fields from `remote` but keep the locally captured
    /// credential, which the staff listing never carries.
    pub fn merged_with_remote(&self, remote: StaffCacheEntry) -> StaffCacheEntry {
        StaffCacheEntry {
            last_known_token: remote
                .last_known_token
                .or_else(|| self.last_known_token.clone()),
            ..remote
        }
    }
}

impl fmt::Debug for StaffCacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaffCacheEntry")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("full_name", &self.full_name)
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .field(
                "last_known_token",
                &self.last_known_token.as_deref().map(mask_token),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// One line of an order, with the unit price snapshotted at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub menu_item_id: i64,
    pub quantity: u32,
    pub price: f64,
}

/// Body of `POST /orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    /// Client-generated idempotency key, stable across replays.
    #[serde(default = "Uuid::new_v4")]
    pub client_order_id: Uuid,
    pub items: Vec<OrderLine>,
    /// Order-level fields passed through untouched (table number, notes, ...).
    #[serde(flatten, default)]
    pub metadata: Map<String, Value>,
}

impl OrderPayload {
    pub fn new(items: Vec<OrderLine>) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            items,
            metadata: Map::new(),
        }
    }

    /// At least one line, and every line orders at least one unit.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::Empty);
        }
        match self.items.iter().find(|line| line.quantity == 0) {
            Some(line) => Err(OrderError::InvalidQuantity {
                item_id: line.menu_item_id,
                quantity: 0,
            }),
            None => Ok(()),
        }
    }
}

/// An order waiting in the local queue for delivery.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    /// Assigned by the store on insert.
    #[serde(skip)]
    pub id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub token: String,
    pub data: OrderPayload,
}

impl PendingOrder {
    pub fn new(data: OrderPayload, token: impl Into<String>) -> Self {
        Self {
            id: None,
            created_at: Utc::now(),
            token: token.into(),
            data,
        }
    }
}

impl fmt::Debug for PendingOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOrder")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("token", &mask_token(&self.token))
            .field("data", &self.data)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Remote API responses
// ---------------------------------------------------------------------------

/// `POST /orders` success body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderReceipt {
    #[serde(rename = "orderId", alias = "order_id", deserialize_with = "de_id_string")]
    pub order_id: String,
}

/// `POST /auth/login` success body.
#[derive(Clone, Deserialize)]
pub struct LoginResponse {
    pub user: StaffCacheEntry,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn menu_entry_accepts_mysql_shapes() {
        let entry: MenuCacheEntry = serde_json::from_value(json!({
            "id": 7,
            "name": "Espresso",
            "category": "  ",
            "price": "2.50",
            "is_available": 1,
            "track_quantity": 0,
            "quantity": null,
            "low_stock_threshold": "-3"
        }))
        .expect("decode menu item");

        assert_eq!(entry.price, 2.5);
        assert!(entry.is_available);
        assert!(!entry.track_quantity);
        assert_eq!(entry.quantity, 0);
        assert_eq!(entry.low_stock_threshold, 0);
        assert_eq!(entry.category, None);
        assert_eq!(entry.category_label(), "Uncategorized");
        assert!(entry.is_orderable());
    }

    #[test]
    fn negative_price_is_rejected() {
        let err = serde_json::from_value::<MenuCacheEntry>(json!({
            "id": 1, "name": "Refund", "price": -1
        }))
        .expect_err("negative price");
        assert!(err.to_string().contains("non-negative"), "{err}");
    }

    #[test]
    fn stock_helpers() {
        let mut entry: MenuCacheEntry = serde_json::from_value(json!({
            "id": 3, "name": "Cheesecake", "price": 5,
            "track_quantity": true, "quantity": 2, "low_stock_threshold": 3
        }))
        .unwrap();
        assert!(entry.is_low_stock());
        assert!(entry.is_orderable());

        entry.quantity = 0;
        assert!(entry.is_out_of_stock());
        assert!(!entry.is_orderable());
        assert!(!entry.is_low_stock());
    }

    #[test]
    fn staff_merge_keeps_local_credential() {
        let cached = StaffCacheEntry {
            id: 4,
            username: "maria".into(),
            full_name: "Maria K".into(),
            role: Role::Waiter,
            is_active: true,
            last_known_token: Some("tok-maria".into()),
        };
        let remote: StaffCacheEntry = serde_json::from_value(json!({
            "id": 4, "username": "maria", "full_name": "Maria Kostas",
            "role": "waiter", "is_active": 0
        }))
        .unwrap();

        let merged = cached.merged_with_remote(remote);
        assert_eq!(merged.full_name, "Maria Kostas");
        assert!(!merged.is_active);
        assert_eq!(merged.last_known_token.as_deref(), Some("tok-maria"));
        assert!(merged.can_unlock_offline());
    }

    #[test]
    fn unknown_role_fails_to_decode() {
        let res = serde_json::from_value::<StaffCacheEntry>(json!({
            "id": 1, "username": "x", "role": "chef"
        }));
        assert!(res.is_err());
    }

    #[test]
    fn debug_output_masks_tokens() {
        let order = PendingOrder::new(OrderPayload::new(vec![]), "secret-token-abcd");
        let rendered = format!("{order:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("***abcd"));
    }

    #[test]
    fn payload_validation_requires_positive_quantities() {
        let line = |quantity| OrderLine {
            menu_item_id: 7,
            quantity,
            price: 1.5,
        };
        assert_eq!(OrderPayload::new(vec![line(1), line(3)]).validate(), Ok(()));
        assert_eq!(
            OrderPayload::new(vec![line(2), line(0)]).validate(),
            Err(OrderError::InvalidQuantity {
                item_id: 7,
                quantity: 0
            })
        );
        assert_eq!(OrderPayload::new(vec![]).validate(), Err(OrderError::Empty));
    }

    #[test]
    fn payload_metadata_round_trips_flattened() {
        let payload: OrderPayload = serde_json::from_value(json!({
            "items": [{ "menu_item_id": 1, "quantity": 2, "price": 3.5 }],
            "table_number": "12"
        }))
        .unwrap();
        assert_eq!(payload.metadata.get("table_number"), Some(&json!("12")));

        let body = serde_json::to_value(&payload).unwrap();
        assert_eq!(body["table_number"], json!("12"));
        assert!(body["client_order_id"].is_string());
    }

    #[test]
    fn receipt_accepts_numeric_order_id() {
        let receipt: OrderReceipt = serde_json::from_value(json!({ "orderId": 981 })).unwrap();
        assert_eq!(receipt.order_id, "981");
    }
}
