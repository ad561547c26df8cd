//! # Domain Types
//!
//! Core domain types used throughout Keel POS.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   StockItem     │   │  StockMovement  │   │  SalePayload    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  product_id     │◄──│  product_id     │   │  local_id       │       │
//! │  │  current_stock  │   │  sequence       │   │  terminal_id    │       │
//! │  │  reserved_stock │   │  quantity (±)   │   │  lines[]        │       │
//! │  │  reorder_level  │   │  transaction_id │──►│  total_cents    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  MovementType   │   │ CatalogProduct  │   │ LowStockAlert   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Sale      (-)  │   │  remote row     │   │  priority       │       │
//! │  │  Restock   (+)  │   │  sku, name      │   │  shortfall      │       │
//! │  │  Adjustment(±)  │   │  stock          │   │  suggested      │       │
//! │  │  Return    (+)  │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! - `product_id`: the authority's product key, stable across terminals
//! - movement `id` and sale `local_id`: UUID v4 minted on this terminal,
//!   never reused (the local id doubles as the push idempotency key)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

// =============================================================================
// Movement Type
// =============================================================================

/// The reason a stock level changed.
///
/// The sign of a movement's quantity is fixed by its type, except for
/// adjustments which may go either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Stock leaving with a sale (negative).
    Sale,
    /// Stock arriving from a supplier (positive).
    Restock,
    /// Manual correction after a count (either sign, never zero).
    Adjustment,
    /// Stock coming back from a cancelled sale (positive).
    Return,
}

impl MovementType {
    /// Returns true if `quantity` has a sign this type allows.
    pub fn accepts(&self, quantity: i64) -> bool {
        match self {
            MovementType::Sale => quantity < 0,
            MovementType::Restock | MovementType::Return => quantity > 0,
            MovementType::Adjustment => quantity != 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Sale => "sale",
            MovementType::Restock => "restock",
            MovementType::Adjustment => "adjustment",
            MovementType::Return => "return",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stock Item
// =============================================================================

/// Per-product stock state owned by the ledger.
///
/// ## Invariants
/// - `current_stock >= 0`
/// - `0 <= reserved_stock <= current_stock`
/// - only changed through a logged movement (or a reservation counter)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockItem {
    pub product_id: String,
    pub current_stock: i64,
    pub reserved_stock: i64,
    pub reorder_level: i64,
    pub reorder_quantity: i64,
    /// Stock when the item was first seen; the base for movement replay.
    pub opening_stock: i64,
    #[ts(as = "Option<String>")]
    pub last_restocked_at: Option<DateTime<Utc>>,
    /// Set once a low-stock alert has been raised, cleared on recovery.
    pub low_stock_alerted: bool,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl StockItem {
    /// Stock that can still be sold or reserved.
    #[inline]
    pub fn available(&self) -> i64 {
        self.current_stock - self.reserved_stock
    }

    /// Whether the item is at or below its reorder level.
    #[inline]
    pub fn is_low_stock(&self) -> bool {
        self.current_stock <= self.reorder_level
    }
}

// =============================================================================
// Stock Movement
// =============================================================================

/// An immutable record of one stock change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockMovement {
    pub id: String,
    /// Ledger-assigned, strictly increasing; orders replay.
    pub sequence: i64,
    pub product_id: String,
    pub movement_type: MovementType,
    /// Signed quantity (negative for stock leaving).
    pub quantity: i64,
    pub previous_stock: i64,
    pub new_stock: i64,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    /// Outbox local id for sale and return movements.
    pub transaction_id: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

// =============================================================================
// Availability
// =============================================================================

/// A request for a quantity of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockRequest {
    pub product_id: String,
    pub quantity: i64,
}

impl StockRequest {
    pub fn new(product_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// A product that cannot cover its requested quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Shortfall {
    pub product_id: String,
    pub requested: i64,
    pub available: i64,
}

/// Result of an availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Availability {
    pub available: bool,
    pub shortfalls: Vec<Shortfall>,
}

// =============================================================================
// Sale Payload
// =============================================================================

/// One line of a locally created sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

impl SaleLine {
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_price_cents: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
        }
    }

    #[inline]
    pub fn line_total_cents(&self) -> i64 {
        self.quantity * self.unit_price_cents
    }
}

/// The sale body pushed to the remote authority.
///
/// `local_id` is the idempotency key: a retried push carries the same id and
/// the authority must treat it as the same sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalePayload {
    pub local_id: String,
    pub terminal_id: String,
    pub actor_id: String,
    pub lines: Vec<SaleLine>,
    pub total_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SalePayload {
    /// Builds a payload with a fresh local id and the computed total.
    pub fn new(
        terminal_id: impl Into<String>,
        actor_id: impl Into<String>,
        lines: Vec<SaleLine>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total_cents = lines.iter().map(SaleLine::line_total_cents).sum();
        Self {
            local_id: Uuid::new_v4().to_string(),
            terminal_id: terminal_id.into(),
            actor_id: actor_id.into(),
            lines,
            total_cents,
            created_at,
        }
    }

    /// The stock this sale consumes, one request per line.
    pub fn stock_requests(&self) -> Vec<StockRequest> {
        self.lines
            .iter()
            .map(|l| StockRequest::new(l.product_id.clone(), l.quantity))
            .collect()
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// One row of the remote catalog snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CatalogProduct {
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    /// Stock as reported by the authority at snapshot time.
    pub stock: i64,
    #[serde(default)]
    pub reorder_level: Option<i64>,
    #[serde(default)]
    pub reorder_quantity: Option<i64>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Low Stock Alerts
// =============================================================================

/// Urgency of a low-stock alert. Ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertPriority::Low => "low",
            AlertPriority::Medium => "medium",
            AlertPriority::High => "high",
            AlertPriority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A product at or below its reorder level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LowStockAlert {
    pub product_id: String,
    pub current_stock: i64,
    pub reorder_level: i64,
    /// `max(reorder_level - current_stock, 0)`
    pub shortfall: i64,
    pub suggested_reorder: i64,
    pub priority: AlertPriority,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movement_sign_rules() {
        assert!(MovementType::Sale.accepts(-1));
        assert!(!MovementType::Sale.accepts(1));
        assert!(MovementType::Restock.accepts(5));
        assert!(!MovementType::Restock.accepts(-5));
        assert!(MovementType::Return.accepts(2));
        assert!(MovementType::Adjustment.accepts(-3));
        assert!(MovementType::Adjustment.accepts(3));
        assert!(!MovementType::Adjustment.accepts(0));
    }

    #[test]
    fn test_sale_payload_total() {
        let payload = SalePayload::new(
            "T-1",
            "cashier-1",
            vec![SaleLine::new("A", 2, 150), SaleLine::new("B", 1, 99)],
            Utc::now(),
        );
        assert_eq!(payload.total_cents, 399);
        assert_eq!(payload.stock_requests().len(), 2);
        assert!(Uuid::parse_str(&payload.local_id).is_ok());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(AlertPriority::Critical > AlertPriority::High);
        assert!(AlertPriority::High > AlertPriority::Medium);
        assert!(AlertPriority::Medium > AlertPriority::Low);
    }

    #[test]
    fn test_movement_type_serde() {
        let json = serde_json::to_string(&MovementType::Adjustment).unwrap();
        assert_eq!(json, "\"adjustment\"");
    }
}
