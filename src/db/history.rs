use chrono::{DateTime, NaiveDateTime};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::HISTORY_RETENTION;
use crate::error::Result;
use crate::types::{HistoryEntry, PriceHistoryRecord};

/// Deduplicated, capped per-item sale history backed by `price_history`.
///
/// A record is identified by `(item_id, time, price, amount, qlt)`; inserting
/// the same tuple again is a no-op. After every batch only the newest
/// `HISTORY_RETENTION` rows per item survive, ties on `time` broken by row id.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a batch and enforce the retention cap in the same transaction.
    /// Returns how many records were new. Entries with an unparseable time are skipped.
    pub async fn append_history(&self, item_id: &str, entries: &[HistoryEntry]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for entry in entries {
            let Some(time) = normalize_time(&entry.time) else {
                debug!(item_id = %item_id, time = %entry.time, "skipping history entry with bad time");
                continue;
            };
            let res = sqlx::query(
                r#"
                INSERT OR IGNORE INTO price_history (item_id, time, price, amount, qlt)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(item_id)
            .bind(time)
            .bind(entry.price)
            .bind(entry.amount)
            .bind(entry.additional.qlt)
            .execute(&mut *tx)
            .await?;
            inserted += res.rows_affected();
        }

        sqlx::query(
            r#"
            DELETE FROM price_history
            WHERE item_id = ? AND id NOT IN (
                SELECT id FROM price_history
                WHERE item_id = ?
                ORDER BY time DESC, id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(item_id)
        .bind(item_id)
        .bind(HISTORY_RETENTION)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Newest first, optionally restricted to one quality tier.
    pub async fn read_history(
        &self,
        item_id: &str,
        limit: i64,
        quality: Option<i64>,
    ) -> Result<Vec<PriceHistoryRecord>> {
        let rows = sqlx::query_as::<_, PriceHistoryRecord>(
            r#"
            SELECT item_id, time, price, amount, qlt AS quality
            FROM price_history
            WHERE item_id = ? AND (? IS NULL OR qlt = ?)
            ORDER BY time DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(item_id)
        .bind(quality)
        .bind(quality)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete_history(&self, item_id: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM price_history WHERE item_id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    #[cfg(test)]
    pub async fn count(&self, item_id: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history WHERE item_id = ?")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

/// Unix seconds from an ISO-8601 string or a numeric epoch (number or numeric string).
/// Naive timestamps are taken as UTC.
pub fn normalize_time(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        serde_json::Value::String(s) => parse_time_str(s.trim()),
        _ => None,
    }
}

fn parse_time_str(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp());
        }
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;
    use crate::types::Additional;
    use serde_json::json;

    fn entry(time: serde_json::Value, price: i64, amount: i64, qlt: i64) -> HistoryEntry {
        HistoryEntry {
            time,
            price,
            amount,
            additional: Additional { qlt },
        }
    }

    async fn store() -> HistoryStore {
        HistoryStore::new(memory_pool().await)
    }

    #[tokio::test]
    async fn identical_tuple_is_inserted_once() {
        let store = store().await;
        let e = entry(json!(1_714_557_600), 500, 2, 1);

        assert_eq!(store.append_history("y1q9", &[e.clone()]).await.unwrap(), 1);
        assert_eq!(store.append_history("y1q9", &[e.clone(), e]).await.unwrap(), 0);
        assert_eq!(store.count("y1q9").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn iso_and_numeric_times_dedup_against_each_other() {
        let store = store().await;
        let iso = entry(json!("2024-05-01T10:00:00Z"), 500, 2, 1);
        let num = entry(json!(1_714_557_600), 500, 2, 1);

        assert_eq!(store.append_history("y1q9", &[iso, num]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unparseable_time_is_skipped_not_fatal() {
        let store = store().await;
        let batch = vec![
            entry(json!("yesterday-ish"), 1, 1, 0),
            entry(json!(null), 2, 1, 0),
            entry(json!(1_700_000_000), 3, 1, 0),
        ];
        assert_eq!(store.append_history("y1q9", &batch).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cap_keeps_the_newest_thousand() {
        let store = store().await;
        let batch: Vec<_> = (0..1500).map(|t| entry(json!(t), 100, 1, 0)).collect();

        let inserted = store.append_history("y1q9", &batch).await.unwrap();
        assert_eq!(inserted, 1500);

        let rows = store.read_history("y1q9", 5000, None).await.unwrap();
        assert_eq!(rows.len(), 1000);
        assert_eq!(rows.first().unwrap().time, 1499);
        assert_eq!(rows.last().unwrap().time, 500);
    }

    #[tokio::test]
    async fn cap_is_per_item() {
        let store = store().await;
        let batch: Vec<_> = (0..1200).map(|t| entry(json!(t), 100, 1, 0)).collect();
        store.append_history("a", &batch).await.unwrap();
        store.append_history("b", &batch[..10]).await.unwrap();

        assert_eq!(store.count("a").await.unwrap(), 1000);
        assert_eq!(store.count("b").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn read_is_newest_first_and_filters_quality() {
        let store = store().await;
        let batch = vec![
            entry(json!(100), 10, 1, 0),
            entry(json!(300), 30, 1, 2),
            entry(json!(200), 20, 1, 0),
            entry(json!(400), 40, 1, 2),
        ];
        store.append_history("y1q9", &batch).await.unwrap();

        let all = store.read_history("y1q9", 1000, None).await.unwrap();
        let times: Vec<_> = all.iter().map(|r| r.time).collect();
        assert_eq!(times, vec![400, 300, 200, 100]);

        let tier2 = store.read_history("y1q9", 1000, Some(2)).await.unwrap();
        assert_eq!(tier2.iter().map(|r| r.price).collect::<Vec<_>>(), vec![40, 30]);
        assert!(tier2.iter().all(|r| r.quality == 2));

        let limited = store.read_history("y1q9", 1, Some(0)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].time, 200);
    }

    #[tokio::test]
    async fn delete_reports_removed_rows() {
        let store = store().await;
        let batch: Vec<_> = (0..5).map(|t| entry(json!(t), 1, 1, 0)).collect();
        store.append_history("y1q9", &batch).await.unwrap();
        store.append_history("other", &batch).await.unwrap();

        assert_eq!(store.delete_history("y1q9").await.unwrap(), 5);
        assert_eq!(store.delete_history("y1q9").await.unwrap(), 0);
        assert_eq!(store.count("other").await.unwrap(), 5);
    }

    #[test]
    fn normalize_time_accepts_common_shapes() {
        assert_eq!(normalize_time(&json!("2024-05-01T10:00:00Z")), Some(1_714_557_600));
        assert_eq!(normalize_time(&json!("2024-05-01T13:00:00+03:00")), Some(1_714_557_600));
        assert_eq!(normalize_time(&json!("2024-05-01T10:00:00.123456Z")), Some(1_714_557_600));
        assert_eq!(normalize_time(&json!("2024-05-01T10:00:00")), Some(1_714_557_600));
        assert_eq!(normalize_time(&json!("1714557600")), Some(1_714_557_600));
        assert_eq!(normalize_time(&json!(1_714_557_600.9)), Some(1_714_557_600));
        assert_eq!(normalize_time(&json!("not a time")), None);
        assert_eq!(normalize_time(&json!(true)), None);
    }
}
