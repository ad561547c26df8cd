//! # Low-Stock Alerts
//!
//! Priority rules for items at or below their reorder level.
//!
//! ```text
//!   current ≤ 0                      → Critical
//!   shortfall > 50% of reorder level → High
//!   shortfall > 20% of reorder level → Medium
//!   otherwise                        → Low
//!
//!   shortfall         = max(reorder_level - current, 0)
//!   suggested_reorder = max(shortfall, reorder_quantity)
//! ```
//!
//! Percentages are compared in widened integer arithmetic (`shortfall * 100 >
//! level * 50`) so that a shortfall of exactly half the level is `Medium`.

use crate::types::{AlertPriority, LowStockAlert, StockItem};

/// Priority for an item with `current` stock against `reorder_level`.
pub fn priority_for(current: i64, reorder_level: i64) -> AlertPriority {
    if current <= 0 {
        return AlertPriority::Critical;
    }

    // widened so extreme levels cannot overflow
    let level = i128::from(reorder_level);
    let shortfall = (level - i128::from(current)).max(0) * 100;
    if shortfall > level * 50 {
        AlertPriority::High
    } else if shortfall > level * 20 {
        AlertPriority::Medium
    } else {
        AlertPriority::Low
    }
}

/// Builds the alert for `item`, or `None` if it is above its reorder level.
pub fn alert_for(item: &StockItem) -> Option<LowStockAlert> {
    if !item.is_low_stock() {
        return None;
    }

    let shortfall = item.reorder_level.saturating_sub(item.current_stock).max(0);
    Some(LowStockAlert {
        product_id: item.product_id.clone(),
        current_stock: item.current_stock,
        reorder_level: item.reorder_level,
        shortfall,
        suggested_reorder: shortfall.max(item.reorder_quantity),
        priority: priority_for(item.current_stock, item.reorder_level),
    })
}

/// Orders alerts most urgent first, then by product id.
pub fn sort_alerts(alerts: &mut [LowStockAlert]) {
    alerts.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(current: i64, level: i64, qty: i64) -> StockItem {
        StockItem {
            product_id: "P".to_string(),
            current_stock: current,
            reserved_stock: 0,
            reorder_level: level,
            reorder_quantity: qty,
            opening_stock: current,
            last_restocked_at: None,
            low_stock_alerted: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_priority_examples() {
        assert_eq!(priority_for(0, 10), AlertPriority::Critical);
        assert_eq!(priority_for(6, 10), AlertPriority::Medium);
        assert_eq!(priority_for(4, 10), AlertPriority::High);
        assert_eq!(priority_for(5, 10), AlertPriority::Medium);
        assert_eq!(priority_for(8, 10), AlertPriority::Low);
        assert_eq!(priority_for(10, 10), AlertPriority::Low);
    }

    #[test]
    fn test_priority_with_extreme_levels() {
        assert_eq!(priority_for(1, i64::MAX), AlertPriority::High);
        assert_eq!(priority_for(i64::MAX, i64::MAX), AlertPriority::Low);
        assert_eq!(priority_for(i64::MIN, 10), AlertPriority::Critical);
    }

    #[test]
    fn test_alert_for_item() {
        assert!(alert_for(&item(11, 10, 20)).is_none());

        let alert = alert_for(&item(2, 10, 5)).unwrap();
        assert_eq!(alert.shortfall, 8);
        assert_eq!(alert.suggested_reorder, 8);
        assert_eq!(alert.priority, AlertPriority::High);

        let alert = alert_for(&item(9, 10, 20)).unwrap();
        assert_eq!(alert.suggested_reorder, 20);
    }

    #[test]
    fn test_sort_alerts() {
        let mut alerts = vec![
            alert_for(&item(9, 10, 1)).unwrap(),
            alert_for(&item(0, 10, 1)).unwrap(),
        ];
        sort_alerts(&mut alerts);
        assert_eq!(alerts[0].priority, AlertPriority::Critical);
    }
}
