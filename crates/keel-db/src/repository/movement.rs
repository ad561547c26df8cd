//! # Movement Repository
//!
//! The append-only stock movement log. There is no update or delete: a
//! correction is a new `adjustment` movement.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use keel_core::StockMovement;

const SELECT_MOVEMENT: &str = r#"
    SELECT id, sequence, product_id, movement_type, quantity, previous_stock,
           new_stock, timestamp, actor_id, transaction_id, reason, notes
    FROM stock_movements
"#;

/// Repository for movement rows.
#[derive(Debug, Clone)]
pub struct MovementRepository {
    pool: SqlitePool,
}

impl MovementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MovementRepository { pool }
    }

    /// Every movement in sequence order.
    pub async fn list(&self) -> DbResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, StockMovement>(&format!("{SELECT_MOVEMENT} ORDER BY sequence"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Movements of one product in sequence order.
    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, StockMovement>(&format!(
            "{SELECT_MOVEMENT} WHERE product_id = ?1 ORDER BY sequence"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Movements written for one sale (its sale and return movements).
    pub async fn list_for_transaction(&self, transaction_id: &str) -> DbResult<Vec<StockMovement>> {
        let rows = sqlx::query_as::<_, StockMovement>(&format!(
            "{SELECT_MOVEMENT} WHERE transaction_id = ?1 ORDER BY sequence"
        ))
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Highest sequence written so far (0 for an empty log).
    pub async fn last_sequence(&self) -> DbResult<i64> {
        let last: Option<i64> = sqlx::query_scalar("SELECT MAX(sequence) FROM stock_movements")
            .fetch_one(&self.pool)
            .await?;
        Ok(last.unwrap_or(0))
    }

    pub async fn append(conn: &mut SqliteConnection, movement: &StockMovement) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, sequence, product_id, movement_type, quantity, previous_stock,
                new_stock, timestamp, actor_id, transaction_id, reason, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&movement.id)
        .bind(movement.sequence)
        .bind(&movement.product_id)
        .bind(movement.movement_type)
        .bind(movement.quantity)
        .bind(movement.previous_stock)
        .bind(movement.new_stock)
        .bind(movement.timestamp)
        .bind(&movement.actor_id)
        .bind(&movement.transaction_id)
        .bind(&movement.reason)
        .bind(&movement.notes)
        .execute(conn)
        .await?;
        Ok(())
    }
}
