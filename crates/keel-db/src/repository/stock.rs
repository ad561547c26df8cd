//! # Stock Item Repository
//!
//! One row per product. Rows are only ever written as part of a change set
//! commit, together with the movements that explain them.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use keel_core::StockItem;

const SELECT_ITEM: &str = r#"
    SELECT product_id, current_stock, reserved_stock, reorder_level,
           reorder_quantity, opening_stock, last_restocked_at,
           low_stock_alerted, updated_at
    FROM stock_items
"#;

/// Repository for stock item rows.
#[derive(Debug, Clone)]
pub struct StockItemRepository {
    pool: SqlitePool,
}

impl StockItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StockItemRepository { pool }
    }

    /// All items ordered by product id.
    pub async fn list(&self) -> DbResult<Vec<StockItem>> {
        let items = sqlx::query_as::<_, StockItem>(&format!("{SELECT_ITEM} ORDER BY product_id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    pub async fn get(&self, product_id: &str) -> DbResult<Option<StockItem>> {
        let item = sqlx::query_as::<_, StockItem>(&format!("{SELECT_ITEM} WHERE product_id = ?1"))
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Inserts or replaces one item.
    ///
    /// `ON CONFLICT DO UPDATE` rather than `INSERT OR REPLACE`: a replace
    /// deletes the row first, which the movement foreign key rejects.
    pub async fn upsert(conn: &mut SqliteConnection, item: &StockItem) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_items (
                product_id, current_stock, reserved_stock, reorder_level,
                reorder_quantity, opening_stock, last_restocked_at,
                low_stock_alerted, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(product_id) DO UPDATE SET
                current_stock = excluded.current_stock,
                reserved_stock = excluded.reserved_stock,
                reorder_level = excluded.reorder_level,
                reorder_quantity = excluded.reorder_quantity,
                opening_stock = excluded.opening_stock,
                last_restocked_at = excluded.last_restocked_at,
                low_stock_alerted = excluded.low_stock_alerted,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.product_id)
        .bind(item.current_stock)
        .bind(item.reserved_stock)
        .bind(item.reorder_level)
        .bind(item.reorder_quantity)
        .bind(item.opening_stock)
        .bind(item.last_restocked_at)
        .bind(item.low_stock_alerted)
        .bind(item.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }
}
