use super::{AccountStore, StoreResult};
use crate::model::OwnerId;
use async_trait::async_trait;
use sqlx::PgPool;

pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn owner_exists(&self, owner_id: OwnerId) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn resolve_token_hash(&self, token_hash: &[u8]) -> StoreResult<Option<OwnerId>> {
        let owner: Option<OwnerId> = sqlx::query_scalar(
            r#"SELECT owner_id
               FROM api_tokens
               WHERE token_hash = $1
                 AND revoked_at IS NULL"#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(owner)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
