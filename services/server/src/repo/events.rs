use super::{like_pattern, EventSearch, EventStore, StoreError, StoreResult};
use crate::model::{NewCapturedEvent, OwnerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use wt_protocol::{BodyKind, CapturedEvent};

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &PgRow) -> StoreResult<CapturedEvent> {
    let kind: String = row.try_get("body_kind")?;
    let body_kind = BodyKind::parse(&kind)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown body_kind '{kind}'")))?;
    let Json(headers): Json<BTreeMap<String, String>> = row.try_get("headers")?;
    let Json(body): Json<Value> = row.try_get("body")?;
    let Json(query_params): Json<BTreeMap<String, String>> = row.try_get("query_params")?;
    let timestamp: DateTime<Utc> = row.try_get("captured_at")?;
    Ok(CapturedEvent {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        webhook_id: row.try_get("channel_id")?,
        method: row.try_get("method")?,
        headers,
        body_kind,
        body,
        query_params,
        timestamp,
        client_ip: row.try_get("client_ip")?,
        is_read: row.try_get("is_read")?,
    })
}

fn events_from_rows(rows: &[PgRow]) -> StoreResult<Vec<CapturedEvent>> {
    rows.iter().map(event_from_row).collect()
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert_event(&self, event: NewCapturedEvent) -> StoreResult<CapturedEvent> {
        let row = sqlx::query(
            r#"INSERT INTO captured_events
                   (owner_id, channel_id, method, headers, body_kind, body, query_params,
                    captured_at, client_ip)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING id, owner_id, channel_id, method, headers, body_kind, body,
                         query_params, captured_at, client_ip, is_read"#,
        )
        .bind(event.owner_id)
        .bind(&event.channel_id)
        .bind(&event.method)
        .bind(Json(&event.headers))
        .bind(event.body_kind.as_str())
        .bind(Json(&event.body))
        .bind(Json(&event.query_params))
        .bind(event.captured_at)
        .bind(event.client_ip.as_deref())
        .fetch_one(&self.pool)
        .await?;
        event_from_row(&row)
    }

    async fn recent_for_channel(
        &self,
        owner_id: OwnerId,
        channel_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<CapturedEvent>> {
        let rows = sqlx::query(
            r#"SELECT id, owner_id, channel_id, method, headers, body_kind, body,
                      query_params, captured_at, client_ip, is_read
               FROM captured_events
               WHERE owner_id = $1 AND channel_id = $2
               ORDER BY captured_at DESC, id DESC
               LIMIT $3"#,
        )
        .bind(owner_id)
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        events_from_rows(&rows)
    }

    async fn channel_ids(&self, owner_id: OwnerId) -> StoreResult<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"SELECT channel_id
               FROM captured_events
               WHERE owner_id = $1
               GROUP BY channel_id
               ORDER BY MAX(captured_at) DESC, MAX(id) DESC"#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn search(
        &self,
        owner_id: OwnerId,
        search: &EventSearch,
    ) -> StoreResult<Vec<CapturedEvent>> {
        let pattern = search.term.as_deref().map(like_pattern);
        let rows = sqlx::query(
            r#"SELECT id, owner_id, channel_id, method, headers, body_kind, body,
                      query_params, captured_at, client_ip, is_read
               FROM captured_events
               WHERE owner_id = $1
                 AND ($2::text IS NULL
                      OR body::text ILIKE $2 ESCAPE '\'
                      OR headers::text ILIKE $2 ESCAPE '\'
                      OR query_params::text ILIKE $2 ESCAPE '\'
                      OR channel_id ILIKE $2 ESCAPE '\'
                      OR method ILIKE $2 ESCAPE '\')
                 AND ($3::timestamptz IS NULL OR captured_at >= $3)
                 AND ($4::timestamptz IS NULL OR captured_at <= $4)
               ORDER BY captured_at DESC, id DESC
               LIMIT $5"#,
        )
        .bind(owner_id)
        .bind(pattern)
        .bind(search.start)
        .bind(search.end)
        .bind(search.limit)
        .fetch_all(&self.pool)
        .await?;
        events_from_rows(&rows)
    }

    async fn recent_unread(
        &self,
        owner_id: OwnerId,
        limit: i64,
    ) -> StoreResult<Vec<CapturedEvent>> {
        let rows = sqlx::query(
            r#"SELECT id, owner_id, channel_id, method, headers, body_kind, body,
                      query_params, captured_at, client_ip, is_read
               FROM captured_events
               WHERE owner_id = $1 AND NOT is_read
               ORDER BY captured_at DESC, id DESC
               LIMIT $2"#,
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        events_from_rows(&rows)
    }

    async fn unread_count(&self, owner_id: OwnerId) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM captured_events WHERE owner_id = $1 AND NOT is_read",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn mark_read(&self, owner_id: OwnerId, event_id: i64) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE captured_events SET is_read = TRUE WHERE id = $1 AND owner_id = $2")
                .bind(event_id)
                .bind(owner_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_all_read(&self, owner_id: OwnerId) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE captured_events SET is_read = TRUE WHERE owner_id = $1 AND NOT is_read",
        )
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_event(&self, owner_id: OwnerId, event_id: i64) -> StoreResult<Option<String>> {
        let channel: Option<String> = sqlx::query_scalar(
            "DELETE FROM captured_events WHERE id = $1 AND owner_id = $2 RETURNING channel_id",
        )
        .bind(event_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(channel)
    }
}
