//! # Ledger Book
//!
//! The in-memory stock ledger state machine. Every mutation is a
//! [`LedgerCommand`] applied through [`LedgerBook::execute`], which either
//! fails without touching anything or returns the [`ChangeSet`] that the
//! caller must persist.
//!
//! ## Command Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   LedgerCommand ──► validate input ──► check rules ──► mutate + log     │
//! │                          │                  │               │           │
//! │                          ▼                  ▼               ▼           │
//! │                   ValidationError   InsufficientStock   ChangeSet       │
//! │                                     ProductNotFound     + raised alerts │
//! │                                                                         │
//! │   Errors are returned BEFORE the first mutation, so a failed command    │
//! │   leaves items, reservations and the movement log exactly as they were. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Low-Stock Debounce
//! ```text
//!   above level ──(drop to ≤ level)──► alerted = true, alert raised
//!   alerted     ──(further drops)────► nothing raised
//!   alerted     ──(rise above level)─► alerted = false
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::alerts::{alert_for, sort_alerts};
use crate::changes::ChangeSet;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{
    Availability, LowStockAlert, MovementType, SaleLine, Shortfall, StockItem, StockMovement,
    StockRequest,
};
use crate::validation::{
    validate_actor_id, validate_movement_quantity, validate_opening_stock, validate_product_id,
    validate_reorder_policy, validate_requests, validate_sale_lines, validate_stock_level,
};

// =============================================================================
// Commands
// =============================================================================

/// A single stock movement to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub product_id: String,
    /// Signed quantity; the sign must match `movement_type`.
    pub quantity: i64,
    pub movement_type: MovementType,
    pub actor_id: String,
    pub reason: Option<String>,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

impl MovementRequest {
    pub fn new(
        product_id: impl Into<String>,
        quantity: i64,
        movement_type: MovementType,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            movement_type,
            actor_id: actor_id.into(),
            reason: None,
            transaction_id: None,
            notes: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A product first seen in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedItem {
    pub product_id: String,
    pub opening_stock: i64,
    pub reorder_level: i64,
    pub reorder_quantity: i64,
}

impl SeedItem {
    pub fn new(
        product_id: impl Into<String>,
        opening_stock: i64,
        reorder_level: i64,
        reorder_quantity: i64,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            opening_stock,
            reorder_level,
            reorder_quantity,
        }
    }
}

/// Every way the ledger can change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCommand {
    /// Hold stock for an open cart; all-or-nothing.
    Reserve(Vec<StockRequest>),
    /// Drop holds; reserved stock never goes below zero.
    Release(Vec<StockRequest>),
    /// One logged movement.
    ApplyMovement(MovementRequest),
    /// One `sale` movement per product of a locally created sale.
    RecordSale {
        transaction_id: String,
        actor_id: String,
        lines: Vec<SaleLine>,
        /// The lines were reserved beforehand; consume those holds.
        consume_reservation: bool,
    },
    /// One `return` movement per product of a cancelled sale.
    ReverseSale {
        transaction_id: String,
        actor_id: String,
        lines: Vec<SaleLine>,
        reason: Option<String>,
    },
    SetReorderPolicy {
        product_id: String,
        reorder_level: i64,
        reorder_quantity: i64,
    },
    /// Register a product with its opening stock. No movement is logged.
    SeedItem(SeedItem),
}

impl LedgerCommand {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCommand::Reserve(_) => "reserve",
            LedgerCommand::Release(_) => "release",
            LedgerCommand::ApplyMovement(_) => "apply_movement",
            LedgerCommand::RecordSale { .. } => "record_sale",
            LedgerCommand::ReverseSale { .. } => "reverse_sale",
            LedgerCommand::SetReorderPolicy { .. } => "set_reorder_policy",
            LedgerCommand::SeedItem(_) => "seed_item",
        }
    }
}

/// What a successful command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub changes: ChangeSet,
    /// Alerts for items that just crossed into low stock.
    pub raised_alerts: Vec<LowStockAlert>,
}

// =============================================================================
// Ledger Book
// =============================================================================

/// Per-product stock state plus the next movement sequence.
#[derive(Debug, Clone, Default)]
pub struct LedgerBook {
    items: BTreeMap<String, StockItem>,
    next_sequence: i64,
}

impl LedgerBook {
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
            next_sequence: 1,
        }
    }

    /// Rebuilds a book from persisted items and the highest stored sequence.
    pub fn from_parts(items: Vec<StockItem>, last_sequence: i64) -> Self {
        Self {
            items: items
                .into_iter()
                .map(|i| (i.product_id.clone(), i))
                .collect(),
            next_sequence: last_sequence.max(0) + 1,
        }
    }

    pub fn item(&self, product_id: &str) -> Option<&StockItem> {
        self.items.get(product_id)
    }

    /// All items ordered by product id.
    pub fn items(&self) -> Vec<StockItem> {
        self.items.values().cloned().collect()
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.items.contains_key(product_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sequence of the most recent movement (0 if none).
    pub fn last_sequence(&self) -> i64 {
        self.next_sequence - 1
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Checks requests against `current - reserved`. Never mutates.
    ///
    /// Requests for the same product are summed before the check.
    pub fn check_availability(&self, requests: &[StockRequest]) -> CoreResult<Availability> {
        validate_requests(requests)?;
        let shortfalls = self.shortfalls(&aggregate(requests), false)?;
        Ok(Availability {
            available: shortfalls.is_empty(),
            shortfalls,
        })
    }

    /// Items at or below their reorder level, most urgent first.
    pub fn low_stock_alerts(&self) -> Vec<LowStockAlert> {
        let mut alerts: Vec<_> = self.items.values().filter_map(alert_for).collect();
        sort_alerts(&mut alerts);
        alerts
    }

    // -------------------------------------------------------------------------
    // Mutation entry point
    // -------------------------------------------------------------------------

    /// Applies `cmd` at time `now`.
    pub fn execute(&mut self, cmd: LedgerCommand, now: DateTime<Utc>) -> CoreResult<CommandOutcome> {
        let mut out = CommandOutcome::default();

        match cmd {
            LedgerCommand::Reserve(requests) => {
                validate_requests(&requests)?;
                let wanted = aggregate(&requests);
                let shortfalls = self.shortfalls(&wanted, false)?;
                if !shortfalls.is_empty() {
                    return Err(CoreError::InsufficientStock { shortfalls });
                }
                for (product_id, qty) in wanted {
                    let item = self.item_mut(&product_id)?;
                    item.reserved_stock += qty;
                    item.updated_at = now;
                    out.changes.upsert_item(item.clone());
                }
            }

            LedgerCommand::Release(requests) => {
                validate_requests(&requests)?;
                let wanted = aggregate(&requests);
                self.require_known(wanted.iter().map(|(id, _)| id.as_str()))?;
                for (product_id, qty) in wanted {
                    let item = self.item_mut(&product_id)?;
                    item.reserved_stock = (item.reserved_stock - qty).max(0);
                    item.updated_at = now;
                    out.changes.upsert_item(item.clone());
                }
            }

            LedgerCommand::ApplyMovement(req) => {
                validate_product_id(&req.product_id)?;
                validate_actor_id(&req.actor_id)?;
                validate_movement_quantity(req.movement_type, req.quantity)?;

                let item = self
                    .items
                    .get(&req.product_id)
                    .ok_or_else(|| CoreError::ProductNotFound(req.product_id.clone()))?;
                if item.current_stock + req.quantity < item.reserved_stock {
                    return Err(CoreError::insufficient(
                        &req.product_id,
                        -req.quantity,
                        item.available(),
                    ));
                }
                validate_stock_level("current_stock", item.current_stock + req.quantity)?;

                self.apply(req, false, now, &mut out)?;
            }

            LedgerCommand::RecordSale {
                transaction_id,
                actor_id,
                lines,
                consume_reservation,
            } => {
                validate_actor_id(&actor_id)?;
                validate_sale_lines(&lines)?;
                let wanted = aggregate_lines(&lines);
                let shortfalls = self.shortfalls(&wanted, consume_reservation)?;
                if !shortfalls.is_empty() {
                    return Err(CoreError::InsufficientStock { shortfalls });
                }

                for (product_id, qty) in wanted {
                    let req = MovementRequest::new(product_id, -qty, MovementType::Sale, &actor_id)
                        .with_transaction(&transaction_id);
                    self.apply(req, consume_reservation, now, &mut out)?;
                }
            }

            LedgerCommand::ReverseSale {
                transaction_id,
                actor_id,
                lines,
                reason,
            } => {
                validate_actor_id(&actor_id)?;
                validate_sale_lines(&lines)?;
                let wanted = aggregate_lines(&lines);
                self.require_known(wanted.iter().map(|(id, _)| id.as_str()))?;
                for (product_id, qty) in &wanted {
                    validate_stock_level("current_stock", self.items[product_id].current_stock + qty)?;
                }

                for (product_id, qty) in wanted {
                    let mut req =
                        MovementRequest::new(product_id, qty, MovementType::Return, &actor_id)
                            .with_transaction(&transaction_id);
                    req.reason = reason.clone();
                    self.apply(req, false, now, &mut out)?;
                }
            }

            LedgerCommand::SetReorderPolicy {
                product_id,
                reorder_level,
                reorder_quantity,
            } => {
                validate_reorder_policy(reorder_level, reorder_quantity)?;
                let item = self.item_mut(&product_id)?;
                item.reorder_level = reorder_level;
                item.reorder_quantity = reorder_quantity;
                item.updated_at = now;
                evaluate_low_stock(item, &mut out.raised_alerts);
                out.changes.upsert_item(item.clone());
            }

            LedgerCommand::SeedItem(seed) => {
                validate_product_id(&seed.product_id)?;
                validate_opening_stock(seed.opening_stock)?;
                validate_reorder_policy(seed.reorder_level, seed.reorder_quantity)?;
                if self.items.contains_key(&seed.product_id) {
                    return Err(ValidationError::Duplicate {
                        field: "product_id".to_string(),
                        value: seed.product_id,
                    }
                    .into());
                }

                let mut item = StockItem {
                    product_id: seed.product_id.clone(),
                    current_stock: seed.opening_stock,
                    reserved_stock: 0,
                    reorder_level: seed.reorder_level,
                    reorder_quantity: seed.reorder_quantity,
                    opening_stock: seed.opening_stock,
                    last_restocked_at: None,
                    low_stock_alerted: false,
                    updated_at: now,
                };
                evaluate_low_stock(&mut item, &mut out.raised_alerts);
                out.changes.upsert_item(item.clone());
                self.items.insert(seed.product_id, item);
            }
        }

        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn item_mut(&mut self, product_id: &str) -> CoreResult<&mut StockItem> {
        self.items
            .get_mut(product_id)
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))
    }

    fn require_known<'a>(&self, mut ids: impl Iterator<Item = &'a str>) -> CoreResult<()> {
        match ids.find(|id| !self.items.contains_key(*id)) {
            Some(id) => Err(CoreError::ProductNotFound(id.to_string())),
            None => Ok(()),
        }
    }

    /// Shortfalls for aggregated requests. With `count_reserved`, stock
    /// already held for the caller counts as available.
    fn shortfalls(&self, wanted: &[(String, i64)], count_reserved: bool) -> CoreResult<Vec<Shortfall>> {
        let mut shortfalls = Vec::new();
        for (product_id, qty) in wanted {
            let item = self
                .items
                .get(product_id)
                .ok_or_else(|| CoreError::ProductNotFound(product_id.clone()))?;
            let available = if count_reserved {
                item.available() + item.reserved_stock.min(*qty)
            } else {
                item.available()
            };
            if *qty > available {
                shortfalls.push(Shortfall {
                    product_id: product_id.clone(),
                    requested: *qty,
                    available,
                });
            }
        }
        Ok(shortfalls)
    }

    /// Mutates one item and logs the movement. Callers have already checked
    /// every rule, so this cannot leave a partial state behind.
    fn apply(
        &mut self,
        req: MovementRequest,
        consume_reservation: bool,
        now: DateTime<Utc>,
        out: &mut CommandOutcome,
    ) -> CoreResult<()> {
        let sequence = self.next_sequence;
        let item = self.item_mut(&req.product_id)?;

        let previous_stock = item.current_stock;
        item.current_stock += req.quantity;
        if consume_reservation && req.quantity < 0 {
            item.reserved_stock = (item.reserved_stock + req.quantity).max(0);
        }
        if req.movement_type == MovementType::Restock {
            item.last_restocked_at = Some(now);
        }
        item.updated_at = now;
        evaluate_low_stock(item, &mut out.raised_alerts);

        out.changes.upsert_item(item.clone());
        out.changes.movements.push(StockMovement {
            id: Uuid::new_v4().to_string(),
            sequence,
            product_id: req.product_id,
            movement_type: req.movement_type,
            quantity: req.quantity,
            previous_stock,
            new_stock: previous_stock + req.quantity,
            timestamp: now,
            actor_id: req.actor_id,
            transaction_id: req.transaction_id,
            reason: req.reason,
            notes: req.notes,
        });
        self.next_sequence += 1;
        Ok(())
    }
}

fn evaluate_low_stock(item: &mut StockItem, raised: &mut Vec<LowStockAlert>) {
    if item.is_low_stock() {
        if !item.low_stock_alerted {
            item.low_stock_alerted = true;
            raised.extend(alert_for(item));
        }
    } else {
        item.low_stock_alerted = false;
    }
}

/// Sums quantities per product, keeping first-seen order.
fn aggregate(requests: &[StockRequest]) -> Vec<(String, i64)> {
    let mut out: Vec<(String, i64)> = Vec::new();
    for r in requests {
        match out.iter_mut().find(|(id, _)| *id == r.product_id) {
            Some((_, qty)) => *qty += r.quantity,
            None => out.push((r.product_id.clone(), r.quantity)),
        }
    }
    out
}

fn aggregate_lines(lines: &[SaleLine]) -> Vec<(String, i64)> {
    let requests: Vec<_> = lines
        .iter()
        .map(|l| StockRequest::new(l.product_id.clone(), l.quantity))
        .collect();
    aggregate(&requests)
}

/// Recomputes stock from an opening figure and a product's movements.
///
/// Movements are applied in sequence order regardless of input order.
pub fn replay(opening_stock: i64, movements: &[StockMovement]) -> i64 {
    let mut ordered: Vec<&StockMovement> = movements.iter().collect();
    ordered.sort_by_key(|m| m.sequence);
    ordered
        .into_iter()
        .fold(opening_stock, |stock, m| stock + m.quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertPriority;

    fn seeded(stock: &[(&str, i64)]) -> LedgerBook {
        let mut book = LedgerBook::new();
        for (id, qty) in stock {
            book.execute(
                LedgerCommand::SeedItem(SeedItem::new(*id, *qty, 10, 20)),
                Utc::now(),
            )
            .unwrap();
        }
        book
    }

    fn sale(id: &str, qty: i64) -> LedgerCommand {
        LedgerCommand::RecordSale {
            transaction_id: "txn-1".to_string(),
            actor_id: "cashier".to_string(),
            lines: vec![SaleLine::new(id, qty, 100)],
            consume_reservation: false,
        }
    }

    #[test]
    fn test_check_availability_reports_shortfalls() {
        let book = seeded(&[("A", 5), ("B", 50)]);
        let check = book
            .check_availability(&[StockRequest::new("A", 3), StockRequest::new("A", 3)])
            .unwrap();
        assert!(!check.available);
        assert_eq!(
            check.shortfalls,
            vec![Shortfall {
                product_id: "A".to_string(),
                requested: 6,
                available: 5
            }]
        );

        assert!(book
            .check_availability(&[StockRequest::new("B", 50)])
            .unwrap()
            .available);
        assert!(matches!(
            book.check_availability(&[StockRequest::new("Z", 1)]),
            Err(CoreError::ProductNotFound(_))
        ));
    }

    #[test]
    fn test_reserve_is_all_or_nothing() {
        let mut book = seeded(&[("A", 5), ("B", 2)]);
        let err = book
            .execute(
                LedgerCommand::Reserve(vec![StockRequest::new("A", 2), StockRequest::new("B", 3)]),
                Utc::now(),
            )
            .unwrap_err();
        assert!(err.is_insufficient_stock());
        assert_eq!(book.item("A").unwrap().reserved_stock, 0);

        book.execute(LedgerCommand::Reserve(vec![StockRequest::new("A", 4)]), Utc::now())
            .unwrap();
        assert_eq!(book.item("A").unwrap().available(), 1);
    }

    #[test]
    fn test_check_and_reserve_agree() {
        let mut book = seeded(&[("A", 5)]);
        let req = vec![StockRequest::new("A", 5)];
        assert!(book.check_availability(&req).unwrap().available);
        assert!(book.execute(LedgerCommand::Reserve(req.clone()), Utc::now()).is_ok());
        assert!(!book.check_availability(&req).unwrap().available);
        assert!(book.execute(LedgerCommand::Reserve(req), Utc::now()).is_err());
    }

    #[test]
    fn test_release_floors_at_zero() {
        let mut book = seeded(&[("A", 5)]);
        book.execute(LedgerCommand::Reserve(vec![StockRequest::new("A", 2)]), Utc::now())
            .unwrap();
        book.execute(LedgerCommand::Release(vec![StockRequest::new("A", 9)]), Utc::now())
            .unwrap();
        assert_eq!(book.item("A").unwrap().reserved_stock, 0);

        assert!(matches!(
            book.execute(LedgerCommand::Release(vec![StockRequest::new("Q", 1)]), Utc::now()),
            Err(CoreError::ProductNotFound(_))
        ));
    }

    #[test]
    fn test_apply_movement_rejects_negative_stock() {
        let mut book = seeded(&[("A", 3)]);
        let before = book.clone();
        let err = book
            .execute(
                LedgerCommand::ApplyMovement(MovementRequest::new(
                    "A",
                    -4,
                    MovementType::Adjustment,
                    "manager",
                )),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, CoreError::insufficient("A", 4, 3));
        assert_eq!(book.item("A"), before.item("A"));
        assert_eq!(book.last_sequence(), before.last_sequence());
    }

    #[test]
    fn test_apply_movement_respects_reservations() {
        let mut book = seeded(&[("A", 5)]);
        book.execute(LedgerCommand::Reserve(vec![StockRequest::new("A", 4)]), Utc::now())
            .unwrap();
        let err = book
            .execute(
                LedgerCommand::ApplyMovement(MovementRequest::new(
                    "A",
                    -2,
                    MovementType::Adjustment,
                    "manager",
                )),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, CoreError::insufficient("A", 2, 1));
    }

    #[test]
    fn test_restock_logs_movement() {
        let mut book = seeded(&[("A", 3)]);
        let out = book
            .execute(
                LedgerCommand::ApplyMovement(
                    MovementRequest::new("A", 12, MovementType::Restock, "manager")
                        .with_reason("delivery"),
                ),
                Utc::now(),
            )
            .unwrap();

        let m = &out.changes.movements[0];
        assert_eq!((m.previous_stock, m.new_stock), (3, 15));
        assert_eq!(m.sequence, 1);
        assert_eq!(m.reason.as_deref(), Some("delivery"));
        let item = book.item("A").unwrap();
        assert!(item.last_restocked_at.is_some());
        assert!(!item.low_stock_alerted);
    }

    #[test]
    fn test_sale_scenario_raises_alert_once() {
        // stock 5, level 2: selling 4 leaves 1, one alert; selling 1 more leaves 0, none
        let mut book = LedgerBook::new();
        book.execute(LedgerCommand::SeedItem(SeedItem::new("A", 5, 2, 10)), Utc::now())
            .unwrap();

        let out = book.execute(sale("A", 4), Utc::now()).unwrap();
        assert_eq!(out.raised_alerts.len(), 1);
        assert_eq!(out.raised_alerts[0].priority, AlertPriority::Medium);
        assert_eq!(out.changes.movements[0].quantity, -4);
        assert_eq!(out.changes.movements[0].transaction_id.as_deref(), Some("txn-1"));

        let out = book.execute(sale("A", 1), Utc::now()).unwrap();
        assert!(out.raised_alerts.is_empty());
        assert_eq!(book.item("A").unwrap().current_stock, 0);
        assert_eq!(book.low_stock_alerts()[0].priority, AlertPriority::Critical);

        assert!(book.execute(sale("A", 1), Utc::now()).unwrap_err().is_insufficient_stock());
    }

    #[test]
    fn test_alert_flag_resets_on_recovery() {
        let mut book = seeded(&[("A", 11)]);
        book.execute(sale("A", 5), Utc::now()).unwrap();
        assert!(book.item("A").unwrap().low_stock_alerted);

        book.execute(
            LedgerCommand::ApplyMovement(MovementRequest::new("A", 20, MovementType::Restock, "m")),
            Utc::now(),
        )
        .unwrap();
        assert!(!book.item("A").unwrap().low_stock_alerted);

        let out = book.execute(sale("A", 20), Utc::now()).unwrap();
        assert_eq!(out.raised_alerts.len(), 1);
    }

    #[test]
    fn test_record_sale_consumes_reservation() {
        let mut book = seeded(&[("A", 5)]);
        book.execute(LedgerCommand::Reserve(vec![StockRequest::new("A", 5)]), Utc::now())
            .unwrap();

        assert!(book.execute(sale("A", 5), Utc::now()).is_err());

        book.execute(
            LedgerCommand::RecordSale {
                transaction_id: "t".to_string(),
                actor_id: "c".to_string(),
                lines: vec![SaleLine::new("A", 5, 1)],
                consume_reservation: true,
            },
            Utc::now(),
        )
        .unwrap();
        let item = book.item("A").unwrap();
        assert_eq!((item.current_stock, item.reserved_stock), (0, 0));
    }

    #[test]
    fn test_record_sale_multi_line_is_atomic() {
        let mut book = seeded(&[("A", 5), ("B", 1)]);
        let err = book
            .execute(
                LedgerCommand::RecordSale {
                    transaction_id: "t".to_string(),
                    actor_id: "c".to_string(),
                    lines: vec![SaleLine::new("A", 2, 1), SaleLine::new("B", 2, 1)],
                    consume_reservation: false,
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(err.is_insufficient_stock());
        assert_eq!(book.item("A").unwrap().current_stock, 5);
        assert_eq!(book.last_sequence(), 0);
    }

    #[test]
    fn test_reverse_sale_returns_stock() {
        let mut book = seeded(&[("A", 5)]);
        book.execute(sale("A", 3), Utc::now()).unwrap();
        let out = book
            .execute(
                LedgerCommand::ReverseSale {
                    transaction_id: "txn-1".to_string(),
                    actor_id: "c".to_string(),
                    lines: vec![SaleLine::new("A", 3, 100)],
                    reason: Some("cancelled".to_string()),
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(out.changes.movements[0].movement_type, MovementType::Return);
        assert_eq!(book.item("A").unwrap().current_stock, 5);
    }

    #[test]
    fn test_set_reorder_policy() {
        let mut book = seeded(&[("A", 15)]);
        assert!(book
            .execute(
                LedgerCommand::SetReorderPolicy {
                    product_id: "A".to_string(),
                    reorder_level: 0,
                    reorder_quantity: 5,
                },
                Utc::now(),
            )
            .is_err());

        let out = book
            .execute(
                LedgerCommand::SetReorderPolicy {
                    product_id: "A".to_string(),
                    reorder_level: 20,
                    reorder_quantity: 40,
                },
                Utc::now(),
            )
            .unwrap();
        assert_eq!(out.raised_alerts.len(), 1);
        assert!(out.changes.movements.is_empty());
        assert_eq!(out.raised_alerts[0].suggested_reorder, 40);
    }

    #[test]
    fn test_seed_duplicate_rejected() {
        let mut book = seeded(&[("A", 1)]);
        let err = book
            .execute(LedgerCommand::SeedItem(SeedItem::new("A", 9, 1, 1)), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_replay_reproduces_stock() {
        let mut book = seeded(&[("A", 40)]);
        let mut log = Vec::new();
        for (qty, kind) in [
            (-3, MovementType::Sale),
            (10, MovementType::Restock),
            (-7, MovementType::Adjustment),
            (2, MovementType::Return),
        ] {
            let out = book
                .execute(
                    LedgerCommand::ApplyMovement(MovementRequest::new("A", qty, kind, "x")),
                    Utc::now(),
                )
                .unwrap();
            log.extend(out.changes.movements);
        }
        log.reverse();
        assert_eq!(replay(40, &log), book.item("A").unwrap().current_stock);
        assert_eq!(book.last_sequence(), 4);
    }

    #[test]
    fn test_mixed_command_sequence_keeps_stock_invariants() {
        let opening = [("A", 12), ("B", 3)];
        let mut book = seeded(&opening);
        let mut log: Vec<StockMovement> = Vec::new();

        // fixed-seed LCG: the same varied sequence on every run
        let mut seed: u64 = 0x5eed_1e55;
        let mut next = move |bound: u64| -> i64 {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((seed >> 33) % bound) as i64
        };

        let mut failures = 0;
        for _ in 0..500 {
            let id = ["A", "B", "Z"][next(3) as usize];
            let qty = next(9) + 1;
            let cmd = match next(6) {
                0 => LedgerCommand::Reserve(vec![StockRequest::new(id, qty)]),
                1 => LedgerCommand::Release(vec![StockRequest::new(id, qty)]),
                2 => LedgerCommand::ApplyMovement(MovementRequest::new(
                    id,
                    qty,
                    MovementType::Restock,
                    "clerk",
                )),
                3 => LedgerCommand::ApplyMovement(MovementRequest::new(
                    id,
                    -qty,
                    MovementType::Adjustment,
                    "clerk",
                )),
                4 => LedgerCommand::ApplyMovement(MovementRequest::new(
                    id,
                    qty,
                    MovementType::Return,
                    "clerk",
                )),
                _ => sale(id, qty),
            };

            let before = book.items();
            match book.execute(cmd, Utc::now()) {
                Ok(out) => log.extend(out.changes.movements),
                Err(_) => {
                    failures += 1;
                    assert_eq!(book.items(), before);
                }
            }

            for (product_id, opening_stock) in opening {
                let item = book.item(product_id).unwrap();
                assert!(item.current_stock >= 0);
                assert!(item.reserved_stock >= 0);
                assert!(item.reserved_stock <= item.current_stock);

                let movements: Vec<StockMovement> = log
                    .iter()
                    .filter(|m| m.product_id == product_id)
                    .cloned()
                    .collect();
                assert_eq!(replay(opening_stock, &movements), item.current_stock);
            }
        }

        // rejected commands were exercised too
        assert!(failures > 0);
        assert!(!log.is_empty());
    }

    #[test]
    fn test_stock_cannot_exceed_upper_bound() {
        let mut book = LedgerBook::new();
        book.execute(
            LedgerCommand::SeedItem(SeedItem::new("A", crate::MAX_STOCK_LEVEL, 10, 20)),
            Utc::now(),
        )
        .unwrap();

        let err = book
            .execute(
                LedgerCommand::ApplyMovement(MovementRequest::new(
                    "A",
                    1,
                    MovementType::Restock,
                    "clerk",
                )),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::OutOfRange { .. })
        ));
        assert_eq!(book.item("A").unwrap().current_stock, crate::MAX_STOCK_LEVEL);

        let err = book
            .execute(
                LedgerCommand::SeedItem(SeedItem::new("B", i64::MAX, 10, 20)),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_from_parts_continues_sequence() {
        let book = seeded(&[("A", 1)]);
        let restored = LedgerBook::from_parts(book.items(), 41);
        assert_eq!(restored.last_sequence(), 41);
        assert!(restored.contains("A"));
    }
}
