//! Order drafting against the cached menu.
//!
//! Lines snapshot the unit price at the moment an item is added; later menu
//! refreshes do not reprice an open draft or a queued order.

use std::collections::BTreeSet;

use crate::error::OrderError;
use crate::models::{MenuCacheEntry, OrderLine, OrderPayload};

pub const TAX_RATE: f64 = 0.08;

#[derive(Debug, Clone, PartialEq)]
pub struct DraftLine {
    pub menu_item_id: i64,
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

impl DraftLine {
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderDraft {
    lines: Vec<DraftLine>,
}

impl OrderDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[DraftLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Add one unit of `item`, or bump the existing line.
    pub fn add_item(&mut self, item: &MenuCacheEntry) -> Result<(), OrderError> {
        if !item.is_available {
            return Err(OrderError::Unavailable {
                item_id: item.id,
                name: item.name.clone(),
            });
        }
        if item.is_out_of_stock() {
            return Err(OrderError::OutOfStock {
                item_id: item.id,
                name: item.name.clone(),
            });
        }

        match self.lines.iter_mut().find(|l| l.menu_item_id == item.id) {
            Some(line) => {
                if item.track_quantity && i64::from(line.quantity) >= item.quantity {
                    return Err(OrderError::OutOfStock {
                        item_id: item.id,
                        name: item.name.clone(),
                    });
                }
                line.quantity += 1;
            }
            None => self.lines.push(DraftLine {
                menu_item_id: item.id,
                name: item.name.clone(),
                quantity: 1,
                price: item.price,
            }),
        }
        Ok(())
    }

    /// Change a line's quantity by `delta`. The line is dropped when it
    /// reaches zero.
    pub fn update_quantity(&mut self, item_id: i64, delta: i64) -> Result<(), OrderError> {
        let idx = self
            .lines
            .iter()
            .position(|l| l.menu_item_id == item_id)
            .ok_or(OrderError::UnknownItem(item_id))?;

        let next = i64::from(self.lines[idx].quantity) + delta;
        if next <= 0 {
            self.lines.remove(idx);
            return Ok(());
        }
        self.lines[idx].quantity = u32::try_from(next).map_err(|_| OrderError::InvalidQuantity {
            item_id,
            quantity: next,
        })?;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn subtotal(&self) -> f64 {
        round_cents(self.lines.iter().map(DraftLine::line_total).sum())
    }

    pub fn tax(&self) -> f64 {
        round_cents(self.subtotal() * TAX_RATE)
    }

    pub fn total(&self) -> f64 {
        round_cents(self.subtotal() + self.tax())
    }

    /// Turn the draft into a payload with a fresh idempotency key.
    pub fn finalize(&self) -> Result<OrderPayload, OrderError> {
        if self.lines.is_empty() {
            return Err(OrderError::Empty);
        }
        let items = self
            .lines
            .iter()
            .map(|l| OrderLine {
                menu_item_id: l.menu_item_id,
                quantity: l.quantity,
                price: l.price,
            })
            .collect();
        Ok(OrderPayload::new(items))
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Distinct category labels, sorted.
pub fn menu_categories(entries: &[MenuCacheEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| e.category_label().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Entries in `category` (all when `None`) whose name contains `search`,
/// case-insensitively.
pub fn filter_menu<'a>(
    entries: &'a [MenuCacheEntry],
    category: Option<&str>,
    search: &str,
) -> Vec<&'a MenuCacheEntry> {
    let needle = search.trim().to_lowercase();
    entries
        .iter()
        .filter(|e| category.map_or(true, |c| e.category_label() == c))
        .filter(|e| needle.is_empty() || e.name.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, name: &str, category: Option<&str>, price: f64) -> MenuCacheEntry {
        MenuCacheEntry {
            id,
            name: name.to_string(),
            category: category.map(str::to_string),
            price,
            is_available: true,
            track_quantity: false,
            quantity: 0,
            low_stock_threshold: 0,
        }
    }

    #[test]
    fn totals_apply_eight_percent_tax() {
        let mut draft = OrderDraft::new();
        let burger = item(1, "Burger", Some("Mains"), 12.50);
        let cola = item(2, "Cola", Some("Drinks"), 2.25);
        draft.add_item(&burger).unwrap();
        draft.add_item(&burger).unwrap();
        draft.add_item(&cola).unwrap();

        assert_eq!(draft.lines().len(), 2);
        assert_eq!(draft.lines()[0].quantity, 2);
        assert_eq!(draft.subtotal(), 27.25);
        assert_eq!(draft.tax(), 2.18);
        assert_eq!(draft.total(), 29.43);
    }

    #[test]
    fn unavailable_and_out_of_stock_items_are_rejected() {
        let mut draft = OrderDraft::new();
        let mut off = item(1, "Lobster", None, 40.0);
        off.is_available = false;
        assert!(matches!(
            draft.add_item(&off),
            Err(OrderError::Unavailable { item_id: 1, .. })
        ));

        let mut pie = item(2, "Pie", None, 5.0);
        pie.track_quantity = true;
        pie.quantity = 1;
        draft.add_item(&pie).unwrap();
        assert!(matches!(
            draft.add_item(&pie),
            Err(OrderError::OutOfStock { item_id: 2, .. })
        ));
        assert_eq!(draft.lines()[0].quantity, 1);
    }

    #[test]
    fn quantity_updates_drop_empty_lines() {
        let mut draft = OrderDraft::new();
        draft.add_item(&item(1, "Tea", None, 2.0)).unwrap();
        draft.update_quantity(1, 3).unwrap();
        assert_eq!(draft.lines()[0].quantity, 4);

        draft.update_quantity(1, -4).unwrap();
        assert!(draft.is_empty());
        assert_eq!(draft.update_quantity(1, 1), Err(OrderError::UnknownItem(1)));
    }

    #[test]
    fn finalize_snapshots_prices_and_rejects_empty() {
        let mut draft = OrderDraft::new();
        assert_eq!(draft.finalize(), Err(OrderError::Empty));

        let mut soup = item(3, "Soup", None, 4.0);
        draft.add_item(&soup).unwrap();
        soup.price = 9.0;

        let first = draft.finalize().unwrap();
        let second = draft.finalize().unwrap();
        assert_eq!(
            first.items,
            vec![OrderLine {
                menu_item_id: 3,
                quantity: 1,
                price: 4.0
            }]
        );
        assert_ne!(first.client_order_id, second.client_order_id);
    }

    #[test]
    fn categories_and_filters() {
        let menu = vec![
            item(1, "Greek Salad", Some("Starters"), 7.0),
            item(2, "Moussaka", Some("Mains"), 14.0),
            item(3, "Water", None, 1.0),
            item(4, "Salad Bowl", Some("Mains"), 9.0),
        ];
        assert_eq!(
            menu_categories(&menu),
            vec!["Mains", "Starters", "Uncategorized"]
        );

        let salads: Vec<i64> = filter_menu(&menu, None, "SALAD").iter().map(|e| e.id).collect();
        assert_eq!(salads, vec![1, 4]);
        let mains: Vec<i64> = filter_menu(&menu, Some("Mains"), "").iter().map(|e| e.id).collect();
        assert_eq!(mains, vec![2, 4]);
        assert_eq!(filter_menu(&menu, Some("Uncategorized"), "wat").len(), 1);
    }
}
