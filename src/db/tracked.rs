use sqlx::SqlitePool;

use crate::error::{AppError, Result};
use crate::types::{RowId, TrackedItem, MAX_RARITY};

/// CRUD over `tracked_items`. The in-memory `ItemStore` mirrors this table.
#[derive(Clone)]
pub struct TrackedItemRepo {
    pool: SqlitePool,
}

impl TrackedItemRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, item_id: &str, target_price: i64, target_rarity: i64) -> Result<TrackedItem> {
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(AppError::InvalidInput("item_id must not be empty".into()));
        }
        validate_price(target_price)?;
        validate_rarity(target_rarity)?;

        let res = sqlx::query(
            "INSERT INTO tracked_items (item_id, target_price, target_rarity) VALUES (?, ?, ?)",
        )
        .bind(item_id)
        .bind(target_price)
        .bind(target_rarity)
        .execute(&self.pool)
        .await?;

        Ok(TrackedItem {
            row_id: res.last_insert_rowid(),
            item_id: item_id.to_string(),
            target_price,
            target_rarity,
        })
    }

    /// False when no such row existed.
    pub async fn remove(&self, row_id: RowId) -> Result<bool> {
        let res = sqlx::query("DELETE FROM tracked_items WHERE id = ?")
            .bind(row_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn list(&self) -> Result<Vec<TrackedItem>> {
        let rows = sqlx::query_as::<_, TrackedItem>(
            r#"
            SELECT id AS row_id, item_id, target_price, target_rarity
            FROM tracked_items
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Apply a target price and/or tier edit to one row. Both values are
    /// validated before anything is written; the writes share one transaction.
    pub async fn update_targets(
        &self,
        row_id: RowId,
        target_price: Option<i64>,
        target_rarity: Option<i64>,
    ) -> Result<()> {
        if let Some(price) = target_price {
            validate_price(price)?;
        }
        if let Some(rarity) = target_rarity {
            validate_rarity(rarity)?;
        }

        let mut tx = self.pool.begin().await?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM tracked_items WHERE id = ?")
            .bind(row_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("tracked row {row_id}")));
        }

        if let Some(price) = target_price {
            sqlx::query("UPDATE tracked_items SET target_price = ? WHERE id = ?")
                .bind(price)
                .bind(row_id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(rarity) = target_rarity {
            sqlx::query("UPDATE tracked_items SET target_rarity = ? WHERE id = ?")
                .bind(rarity)
                .bind(row_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn validate_price(price: i64) -> Result<()> {
    if price < 0 {
        return Err(AppError::InvalidInput(format!("target price {price} is negative")));
    }
    Ok(())
}

fn validate_rarity(rarity: i64) -> Result<()> {
    if !(0..=MAX_RARITY).contains(&rarity) {
        return Err(AppError::InvalidInput(format!(
            "rarity {rarity} outside 0..={MAX_RARITY}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    #[tokio::test]
    async fn same_item_id_gets_independent_rows() {
        let repo = TrackedItemRepo::new(memory_pool().await);
        let a = repo.add("y1q9", 100, 0).await.unwrap();
        let b = repo.add("y1q9", 250, 3).await.unwrap();
        assert_ne!(a.row_id, b.row_id);

        let rows = repo.list().await.unwrap();
        assert_eq!(rows, vec![a, b]);
    }

    #[tokio::test]
    async fn updates_and_remove_address_one_row() {
        let repo = TrackedItemRepo::new(memory_pool().await);
        let a = repo.add("y1q9", 100, 0).await.unwrap();
        let b = repo.add("y1q9", 100, 0).await.unwrap();

        repo.update_targets(b.row_id, Some(75), None).await.unwrap();
        repo.update_targets(b.row_id, None, Some(5)).await.unwrap();
        assert!(repo.remove(a.row_id).await.unwrap());
        assert!(!repo.remove(a.row_id).await.unwrap());

        let rows = repo.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].target_price, 75);
        assert_eq!(rows[0].target_rarity, 5);
    }

    #[tokio::test]
    async fn invalid_values_are_rejected() {
        let repo = TrackedItemRepo::new(memory_pool().await);
        let a = repo.add("y1q9", 0, 0).await.unwrap();

        assert!(matches!(repo.update_targets(a.row_id, None, Some(6)).await, Err(AppError::InvalidInput(_))));
        assert!(matches!(repo.update_targets(a.row_id, None, Some(-1)).await, Err(AppError::InvalidInput(_))));
        assert!(matches!(repo.update_targets(a.row_id, Some(-5), None).await, Err(AppError::InvalidInput(_))));
        assert!(matches!(repo.add("  ", 0, 0).await, Err(AppError::InvalidInput(_))));
        assert!(matches!(repo.update_targets(999, Some(5), None).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn bad_tier_leaves_price_untouched() {
        let repo = TrackedItemRepo::new(memory_pool().await);
        let a = repo.add("y1q9", 100, 1).await.unwrap();

        let res = repo.update_targets(a.row_id, Some(40), Some(9)).await;
        assert!(matches!(res, Err(AppError::InvalidInput(_))));

        let rows = repo.list().await.unwrap();
        assert_eq!(rows[0].target_price, 100);
        assert_eq!(rows[0].target_rarity, 1);
    }
}
