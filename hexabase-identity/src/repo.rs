//! Refresh-token storage (spec §3 `AuthToken`, §4.2 refresh rotation).

use crate::model::AuthToken;
use async_trait::async_trait;
use hexabase_common::ids::{TokenFamilyId, TokenId, UserId};
use hexabase_service_base::db::PostgresPool;
use hexabase_service_base::RepoError;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait AuthTokenRepo: Send + Sync {
    async fn insert(&self, token: &AuthToken) -> Result<(), RepoError>;
    async fn get(&self, id: TokenId) -> Result<Option<AuthToken>, RepoError>;

    /// Marks `id` consumed only if it is still `consumed = false`,
    /// returning whether the compare-and-swap won. Two concurrent refresh
    /// attempts against the same token must not both succeed (spec §5
    /// "at most one rotation completes (CAS on `consumed`)").
    async fn try_consume(&self, id: TokenId) -> Result<bool, RepoError>;

    async fn revoke_family(&self, family_id: TokenFamilyId) -> Result<(), RepoError>;
    async fn is_family_revoked(&self, family_id: TokenFamilyId) -> Result<bool, RepoError>;
}

pub struct DbAuthTokenRepo {
    pool: PostgresPool,
}

impl DbAuthTokenRepo {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AuthTokenRow {
    id: uuid::Uuid,
    family_id: uuid::Uuid,
    user_id: uuid::Uuid,
    secret_hash: String,
    fingerprint_hash: String,
    issued_at: chrono::DateTime<chrono::Utc>,
    expires_at: chrono::DateTime<chrono::Utc>,
    consumed: bool,
    revoked: bool,
}

impl From<AuthTokenRow> for AuthToken {
    fn from(row: AuthTokenRow) -> Self {
        AuthToken {
            id: TokenId(row.id),
            family_id: TokenFamilyId(row.family_id),
            user_id: UserId(row.user_id),
            secret_hash: row.secret_hash,
            fingerprint_hash: row.fingerprint_hash,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            consumed: row.consumed,
            revoked: row.revoked,
        }
    }
}

#[async_trait]
impl AuthTokenRepo for DbAuthTokenRepo {
    async fn insert(&self, token: &AuthToken) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO auth_tokens (id, family_id, user_id, secret_hash, fingerprint_hash, \
             issued_at, expires_at, consumed, revoked) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(token.id.0)
        .bind(token.family_id.0)
        .bind(token.user_id.0)
        .bind(&token.secret_hash)
        .bind(&token.fingerprint_hash)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(token.consumed)
        .bind(token.revoked)
        .execute(self.pool.inner())
        .await?;
        Ok(())
    }

    async fn get(&self, id: TokenId) -> Result<Option<AuthToken>, RepoError> {
        let row: Option<AuthTokenRow> = sqlx::query_as("SELECT * FROM auth_tokens WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool.inner())
            .await?;
        Ok(row.map(AuthToken::from))
    }

    async fn try_consume(&self, id: TokenId) -> Result<bool, RepoError> {
        let result = sqlx::query("UPDATE auth_tokens SET consumed = true WHERE id = $1 AND consumed = false")
            .bind(id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_family(&self, family_id: TokenFamilyId) -> Result<(), RepoError> {
        sqlx::query("UPDATE auth_tokens SET revoked = true WHERE family_id = $1")
            .bind(family_id.0)
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn is_family_revoked(&self, family_id: TokenFamilyId) -> Result<bool, RepoError> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT revoked FROM auth_tokens WHERE family_id = $1 AND revoked = true LIMIT 1")
                .bind(family_id.0)
                .fetch_optional(self.pool.inner())
                .await?;
        Ok(row.is_some())
    }
}

#[derive(Default)]
pub struct InMemoryAuthTokenRepo {
    tokens: Mutex<HashMap<TokenId, AuthToken>>,
}

impl InMemoryAuthTokenRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthTokenRepo for InMemoryAuthTokenRepo {
    async fn insert(&self, token: &AuthToken) -> Result<(), RepoError> {
        self.tokens.lock().expect("lock poisoned").insert(token.id, token.clone());
        Ok(())
    }

    async fn get(&self, id: TokenId) -> Result<Option<AuthToken>, RepoError> {
        Ok(self.tokens.lock().expect("lock poisoned").get(&id).cloned())
    }

    async fn try_consume(&self, id: TokenId) -> Result<bool, RepoError> {
        let mut tokens = self.tokens.lock().expect("lock poisoned");
        match tokens.get_mut(&id) {
            Some(token) if !token.consumed => {
                token.consumed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_family(&self, family_id: TokenFamilyId) -> Result<(), RepoError> {
        let mut tokens = self.tokens.lock().expect("lock poisoned");
        for token in tokens.values_mut() {
            if token.family_id == family_id {
                token.revoked = true;
            }
        }
        Ok(())
    }

    async fn is_family_revoked(&self, family_id: TokenFamilyId) -> Result<bool, RepoError> {
        let tokens = self.tokens.lock().expect("lock poisoned");
        Ok(tokens.values().any(|t| t.family_id == family_id && t.revoked))
    }
}
