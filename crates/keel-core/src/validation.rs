//! # Validation Module
//!
//! Input validation for ledger and outbox commands.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Terminal (apps/terminal)                                     │
//! │  └── Shape of UI input (lines present, ids non-empty)                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Quantity bounds and signs                                         │
//! │  └── Reorder policy rules                                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: LedgerBook rules                                             │
//! │  └── Stock availability, known products                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: Database (SQLite CHECK / PRIMARY KEY constraints)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use keel_core::validation::{validate_product_id, validate_quantity};
//!
//! validate_product_id("COKE-330").unwrap();
//! validate_quantity(5).unwrap();
//! ```

use crate::error::ValidationError;
use crate::types::{MovementType, SaleLine, StockRequest};
use crate::{MAX_ITEM_QUANTITY, MAX_MOVEMENT_QUANTITY, MAX_SALE_LINES, MAX_STOCK_LEVEL};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a product id.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Letters, numbers, hyphens, underscores, dots
///
/// ## Example
/// ```rust
/// use keel_core::validation::validate_product_id;
///
/// assert!(validate_product_id("COKE-330").is_ok());
/// assert!(validate_product_id("").is_err());
/// assert!(validate_product_id("has space").is_err());
/// ```
pub fn validate_product_id(product_id: &str) -> ValidationResult<()> {
    if product_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "product_id".to_string(),
        });
    }

    if product_id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "product_id".to_string(),
            max: 64,
        });
    }

    if !product_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ValidationError::InvalidFormat {
            field: "product_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, underscores, and dots"
                .to_string(),
        });
    }

    Ok(())
}

/// Validates an actor id (the cashier or process responsible for a change).
pub fn validate_actor_id(actor_id: &str) -> ValidationResult<()> {
    if actor_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "actor_id".to_string(),
        });
    }
    if actor_id.len() > 128 {
        return Err(ValidationError::TooLong {
            field: "actor_id".to_string(),
            max: 128,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a requested item quantity (sale line, reservation).
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates the signed quantity of a movement against its type.
pub fn validate_movement_quantity(kind: MovementType, quantity: i64) -> ValidationResult<()> {
    if !kind.accepts(quantity) {
        return Err(ValidationError::WrongSign {
            movement_type: kind.to_string(),
            quantity,
        });
    }

    if quantity.abs() > MAX_MOVEMENT_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: -MAX_MOVEMENT_QUANTITY,
            max: MAX_MOVEMENT_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a reorder policy. Both values must be strictly positive and at
/// most [`MAX_STOCK_LEVEL`].
pub fn validate_reorder_policy(level: i64, quantity: i64) -> ValidationResult<()> {
    if level <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "reorder_level".to_string(),
        });
    }
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "reorder_quantity".to_string(),
        });
    }
    validate_stock_level("reorder_level", level)?;
    validate_stock_level("reorder_quantity", quantity)
}

/// Validates an opening stock figure (from the catalog snapshot).
pub fn validate_opening_stock(stock: i64) -> ValidationResult<()> {
    validate_stock_level("opening_stock", stock)
}

/// Checks `value` lies in `0..=MAX_STOCK_LEVEL`.
pub fn validate_stock_level(field: &str, value: i64) -> ValidationResult<()> {
    if !(0..=MAX_STOCK_LEVEL).contains(&value) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_STOCK_LEVEL,
        });
    }
    Ok(())
}

/// Validates a unit price in cents (zero is allowed for free items).
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "unit_price_cents".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

// =============================================================================
// Composite Validators
// =============================================================================

/// Validates a batch of stock requests.
pub fn validate_requests(requests: &[StockRequest]) -> ValidationResult<()> {
    if requests.is_empty() {
        return Err(ValidationError::Required {
            field: "requests".to_string(),
        });
    }
    for r in requests {
        validate_product_id(&r.product_id)?;
        validate_quantity(r.quantity)?;
    }
    Ok(())
}

/// Validates the lines of a sale.
///
/// ## Rules
/// - At least one line, at most MAX_SALE_LINES
/// - Every line has a valid product id, quantity and price
pub fn validate_sale_lines(lines: &[SaleLine]) -> ValidationResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::Required {
            field: "lines".to_string(),
        });
    }

    if lines.len() > MAX_SALE_LINES {
        return Err(ValidationError::OutOfRange {
            field: "lines".to_string(),
            min: 1,
            max: MAX_SALE_LINES as i64,
        });
    }

    for line in lines {
        validate_product_id(&line.product_id)?;
        validate_quantity(line.quantity)?;
        validate_price_cents(line.unit_price_cents)?;
    }

    Ok(())
}

/// Validates a UUID string (outbox local ids).
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_product_id() {
        assert!(validate_product_id("COKE-330").is_ok());
        assert!(validate_product_id("sku_1.5").is_ok());

        assert!(validate_product_id("").is_err());
        assert!(validate_product_id("   ").is_err());
        assert!(validate_product_id("has space").is_err());
        assert!(validate_product_id(&"A".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_movement_quantity() {
        assert!(validate_movement_quantity(MovementType::Restock, 50).is_ok());
        assert!(validate_movement_quantity(MovementType::Adjustment, -4).is_ok());

        assert!(matches!(
            validate_movement_quantity(MovementType::Restock, -1),
            Err(ValidationError::WrongSign { .. })
        ));
        assert!(validate_movement_quantity(MovementType::Adjustment, 0).is_err());
        assert!(validate_movement_quantity(MovementType::Restock, 100_001).is_err());
    }

    #[test]
    fn test_validate_reorder_policy() {
        assert!(validate_reorder_policy(10, 20).is_ok());
        assert!(validate_reorder_policy(0, 20).is_err());
        assert!(validate_reorder_policy(10, -1).is_err());
        assert!(validate_reorder_policy(MAX_STOCK_LEVEL + 1, 20).is_err());
        assert!(validate_reorder_policy(10, i64::MAX).is_err());
    }

    #[test]
    fn test_validate_opening_stock_bounds() {
        assert!(validate_opening_stock(0).is_ok());
        assert!(validate_opening_stock(MAX_STOCK_LEVEL).is_ok());
        assert!(validate_opening_stock(-1).is_err());
        assert!(matches!(
            validate_opening_stock(i64::MAX),
            Err(ValidationError::OutOfRange { max: MAX_STOCK_LEVEL, .. })
        ));
    }

    #[test]
    fn test_validate_sale_lines() {
        assert!(validate_sale_lines(&[SaleLine::new("A", 1, 100)]).is_ok());
        assert!(validate_sale_lines(&[]).is_err());
        assert!(validate_sale_lines(&[SaleLine::new("A", 0, 100)]).is_err());
        assert!(validate_sale_lines(&[SaleLine::new("A", 1, -5)]).is_err());

        let too_many: Vec<_> = (0..=MAX_SALE_LINES)
            .map(|i| SaleLine::new(format!("P{i}"), 1, 1))
            .collect();
        assert!(validate_sale_lines(&too_many).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
    }
}
