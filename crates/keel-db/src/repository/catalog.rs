//! # Catalog Repository
//!
//! Local cache of the remote catalog snapshot.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use keel_core::CatalogProduct;

/// Repository for cached catalog rows.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    pub async fn list(&self) -> DbResult<Vec<CatalogProduct>> {
        let rows = sqlx::query_as::<_, CatalogProduct>(
            r#"
            SELECT product_id, sku, name, price_cents, stock,
                   reorder_level, reorder_quantity, updated_at
            FROM catalog_products
            ORDER BY product_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, product_id: &str) -> DbResult<Option<CatalogProduct>> {
        let row = sqlx::query_as::<_, CatalogProduct>(
            r#"
            SELECT product_id, sku, name, price_cents, stock,
                   reorder_level, reorder_quantity, updated_at
            FROM catalog_products
            WHERE product_id = ?1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Replaces cached rows for the given products in one transaction.
    pub async fn upsert_many(&self, products: &[CatalogProduct]) -> DbResult<()> {
        if products.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for p in products {
            sqlx::query(
                r#"
                INSERT INTO catalog_products (
                    product_id, sku, name, price_cents, stock,
                    reorder_level, reorder_quantity, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(product_id) DO UPDATE SET
                    sku = excluded.sku,
                    name = excluded.name,
                    price_cents = excluded.price_cents,
                    stock = excluded.stock,
                    reorder_level = excluded.reorder_level,
                    reorder_quantity = excluded.reorder_quantity,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&p.product_id)
            .bind(&p.sku)
            .bind(&p.name)
            .bind(p.price_cents)
            .bind(p.stock)
            .bind(p.reorder_level)
            .bind(p.reorder_quantity)
            .bind(p.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = products.len(), "Catalog cache updated");
        Ok(())
    }

    /// Newest `updated_at` in the cache; the next pull asks for rows after it.
    pub async fn watermark(&self) -> DbResult<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT updated_at FROM catalog_products ORDER BY updated_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(latest)
    }
}
