//! Postgres sequence endpoints.
//!
//! A claim holds a session-level advisory lock keyed by the endpoint id on a
//! dedicated pool connection.  The cursor advance commits immediately; the
//! lock is only dropped once the caller releases the claim.
//!
//! Callers in this process first queue on a per-endpoint gate, so at most one
//! pooled connection per endpoint sits on the advisory lock.  Waiters hold no
//! connection.

use super::{
    advance_index, normalize_index, SequenceStore, StepClaim, StepLease, StoreError, StoreResult,
};
use crate::model::{
    NewSequenceEndpoint, OwnerId, SequenceEndpoint, SequenceEndpointPatch, SequenceStep,
};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Connection, PgPool, Postgres, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

type GateMap = parking_lot::Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>;

pub struct PgSequenceStore {
    pool: PgPool,
    gates: Arc<GateMap>,
}

impl PgSequenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            gates: Arc::default(),
        }
    }

    async fn enter_gate(&self, endpoint_id: i64) -> EndpointGate {
        let gate = Arc::clone(self.gates.lock().entry(endpoint_id).or_default());
        let guard = gate.lock_owned().await;
        EndpointGate {
            guard: Some(guard),
            gates: Arc::clone(&self.gates),
            key: endpoint_id,
        }
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.lock().len()
    }
}

/// In-process turn on one endpoint; the map entry is dropped with the last user.
struct EndpointGate {
    guard: Option<OwnedMutexGuard<()>>,
    gates: Arc<GateMap>,
    key: i64,
}

impl Drop for EndpointGate {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let gate = Arc::clone(OwnedMutexGuard::mutex(&guard));
        drop(guard);
        let mut gates = self.gates.lock();
        // Map entry plus `gate`: nobody else is queued.
        if Arc::strong_count(&gate) == 2 {
            gates.remove(&self.key);
        }
    }
}

fn endpoint_from_row(row: &PgRow) -> StoreResult<SequenceEndpoint> {
    let Json(steps): Json<Vec<SequenceStep>> = row.try_get("steps")?;
    let current_index: i32 = row.try_get("current_index")?;
    let current_index = usize::try_from(current_index)
        .map_err(|_| StoreError::Corrupt(format!("negative current_index {current_index}")))?;
    Ok(SequenceEndpoint {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        endpoint_name: row.try_get("endpoint_name")?,
        description: row.try_get("description")?,
        current_index: normalize_index(current_index, steps.len()),
        sequence_config: steps,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_unique_violation(err: sqlx::Error, name: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("endpoint name '{name}' already exists"))
        }
        _ => StoreError::Database(err),
    }
}

fn index_to_db(index: usize) -> StoreResult<i32> {
    i32::try_from(index).map_err(|_| StoreError::Corrupt(format!("cursor {index} out of range")))
}

#[async_trait]
impl SequenceStore for PgSequenceStore {
    async fn list_endpoints(&self, owner_id: OwnerId) -> StoreResult<Vec<SequenceEndpoint>> {
        let rows = sqlx::query(
            r#"SELECT id, owner_id, endpoint_name, description, steps, current_index,
                      is_active, created_at, updated_at
               FROM sequence_endpoints
               WHERE owner_id = $1
               ORDER BY created_at DESC, id DESC"#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(endpoint_from_row).collect()
    }

    async fn create_endpoint(
        &self,
        owner_id: OwnerId,
        endpoint: NewSequenceEndpoint,
    ) -> StoreResult<SequenceEndpoint> {
        let row = sqlx::query(
            r#"INSERT INTO sequence_endpoints (owner_id, endpoint_name, description, steps)
               VALUES ($1, $2, $3, $4)
               RETURNING id, owner_id, endpoint_name, description, steps, current_index,
                         is_active, created_at, updated_at"#,
        )
        .bind(owner_id)
        .bind(&endpoint.endpoint_name)
        .bind(&endpoint.description)
        .bind(Json(&endpoint.steps))
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, &endpoint.endpoint_name))?;
        endpoint_from_row(&row)
    }

    async fn update_endpoint(
        &self,
        owner_id: OwnerId,
        endpoint_id: i64,
        patch: SequenceEndpointPatch,
    ) -> StoreResult<Option<SequenceEndpoint>> {
        let name = patch.endpoint_name.clone().unwrap_or_default();
        let row = sqlx::query(
            r#"UPDATE sequence_endpoints
               SET endpoint_name = COALESCE($3, endpoint_name),
                   description = COALESCE($4, description),
                   steps = COALESCE($5::jsonb, steps),
                   current_index = CASE WHEN $5::jsonb IS NULL THEN current_index ELSE 0 END,
                   is_active = COALESCE($6, is_active),
                   updated_at = now()
               WHERE id = $1 AND owner_id = $2
               RETURNING id, owner_id, endpoint_name, description, steps, current_index,
                         is_active, created_at, updated_at"#,
        )
        .bind(endpoint_id)
        .bind(owner_id)
        .bind(patch.endpoint_name)
        .bind(patch.description)
        .bind(patch.steps.map(Json))
        .bind(patch.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, &name))?;
        row.as_ref().map(endpoint_from_row).transpose()
    }

    async fn delete_endpoint(&self, owner_id: OwnerId, endpoint_id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sequence_endpoints WHERE id = $1 AND owner_id = $2")
            .bind(endpoint_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_endpoint(
        &self,
        owner_id: OwnerId,
        endpoint_id: i64,
    ) -> StoreResult<Option<SequenceEndpoint>> {
        let row = sqlx::query(
            r#"UPDATE sequence_endpoints
               SET current_index = 0, updated_at = now()
               WHERE id = $1 AND owner_id = $2
               RETURNING id, owner_id, endpoint_name, description, steps, current_index,
                         is_active, created_at, updated_at"#,
        )
        .bind(endpoint_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(endpoint_from_row).transpose()
    }

    async fn claim_step(
        &self,
        owner_id: OwnerId,
        endpoint_name: &str,
    ) -> StoreResult<Option<StepClaim>> {
        let endpoint_id: Option<i64> = sqlx::query_scalar(
            r#"SELECT id FROM sequence_endpoints
               WHERE owner_id = $1 AND endpoint_name = $2 AND is_active"#,
        )
        .bind(owner_id)
        .bind(endpoint_name)
        .fetch_optional(&self.pool)
        .await?;
        let Some(endpoint_id) = endpoint_id else {
            return Ok(None);
        };

        let gate = self.enter_gate(endpoint_id).await;
        let mut conn = self.pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(endpoint_id)
            .execute(&mut *conn)
            .await?;
        let mut lease = PgAdvisoryLease {
            conn: Some(conn),
            key: endpoint_id,
            _gate: gate,
        };

        let advanced = match lease.conn.as_mut() {
            Some(conn) => advance_locked(conn, owner_id, endpoint_id).await,
            None => Ok(None),
        };
        match advanced {
            Ok(Some((endpoint, step_index, step))) => Ok(Some(StepClaim::new(
                endpoint,
                step_index,
                step,
                Box::new(lease),
            ))),
            Ok(None) => {
                Box::new(lease).release().await;
                Ok(None)
            }
            Err(err) => {
                Box::new(lease).release().await;
                Err(err)
            }
        }
    }
}

/// Read the cursor, advance it and commit, while holding the advisory lock.
async fn advance_locked(
    conn: &mut PoolConnection<Postgres>,
    owner_id: OwnerId,
    endpoint_id: i64,
) -> StoreResult<Option<(SequenceEndpoint, usize, SequenceStep)>> {
    let mut tx = Connection::begin(&mut **conn).await?;
    let row = sqlx::query(
        r#"SELECT id, owner_id, endpoint_name, description, steps, current_index,
                  is_active, created_at, updated_at
           FROM sequence_endpoints
           WHERE id = $1 AND owner_id = $2
           FOR UPDATE"#,
    )
    .bind(endpoint_id)
    .bind(owner_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let current = endpoint_from_row(&row)?;
    if !current.is_active || current.sequence_config.is_empty() {
        return Ok(None);
    }

    let len = current.sequence_config.len();
    let step_index = normalize_index(current.current_index, len);
    let step = current.sequence_config[step_index].clone();
    let next_index = advance_index(step_index, len);

    let row = sqlx::query(
        r#"UPDATE sequence_endpoints
           SET current_index = $2, updated_at = now()
           WHERE id = $1
           RETURNING id, owner_id, endpoint_name, description, steps, current_index,
                     is_active, created_at, updated_at"#,
    )
    .bind(endpoint_id)
    .bind(index_to_db(next_index)?)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Some((endpoint_from_row(&row)?, step_index, step)))
}

/// Fields drop in order: the connection is detached before the gate opens.
struct PgAdvisoryLease {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
    _gate: EndpointGate,
}

#[async_trait]
impl StepLease for PgAdvisoryLease {
    async fn release(mut self: Box<Self>) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *conn)
            .await;
        if let Err(err) = unlocked {
            // Closing the session drops every lock it holds.
            warn!(key = self.key, error = %err, "advisory unlock failed; closing connection");
            drop(conn.detach());
        }
    }
}

impl Drop for PgAdvisoryLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Never return a connection that still holds the lock to the pool.
            drop(conn.detach());
        }
    }
}
