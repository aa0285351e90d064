use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Connection, Executor, PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{
    AuthStore, InsertOutcome, NewToken, NewUser, Role, Session, SessionStore, TokenForm,
    TokenPurpose, TokenRecord, TokenStore, User, UserStore, SCHEMA_SQL,
};

const USER_COLUMNS: &str =
    "id, name, email, password_hash, federated_id, role, email_verified, created_at";

/// Postgres-backed store. Ids are generated here so inserts never depend on extensions.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema. Every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn migrate(&self) -> Result<()> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "MIGRATE"
        );
        self.pool
            .execute(SCHEMA_SQL)
            .instrument(span)
            .await
            .context("failed to apply database schema")?;
        Ok(())
    }

    async fn find_user_where(&self, clause: &str, value: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user")?;
        row.as_ref().map(user_from_row).transpose()
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &PgRow) -> Result<User> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        federated_id: row.try_get("federated_id")?,
        role: Role::parse(&role).ok_or_else(|| anyhow!("unknown role: {role}"))?,
        email_verified: row.try_get("email_verified")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        device: row.try_get("device")?,
        created_at: row.try_get("created_at")?,
    })
}

fn token_from_row(row: &PgRow) -> Result<TokenRecord> {
    let purpose: String = row.try_get("purpose")?;
    let form: String = row.try_get("form")?;
    Ok(TokenRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        purpose: TokenPurpose::parse(&purpose)
            .ok_or_else(|| anyhow!("unknown token purpose: {purpose}"))?,
        form: TokenForm::parse(&form).ok_or_else(|| anyhow!("unknown token form: {form}"))?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn update_user(pool: &PgPool, query: &str, id: Uuid, value: Option<&str>) -> Result<bool> {
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let mut statement = sqlx::query(query).bind(id);
    if let Some(value) = value {
        statement = statement.bind(value);
    }
    let result = statement
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update user")?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: NewUser) -> Result<InsertOutcome<User>> {
        let query = format!(
            r"
            INSERT INTO users
                (id, name, email, password_hash, federated_id, role, email_verified)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
        "
        );
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.federated_id)
            .bind(user.role.as_str())
            .bind(user.email_verified)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(InsertOutcome::Created(user_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_user_where("LOWER(email) = LOWER($1)", email).await
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_federated_id(&self, federated_id: &str) -> Result<Option<User>> {
        self.find_user_where("federated_id = $1", federated_id).await
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<bool> {
        update_user(
            &self.pool,
            "UPDATE users SET email_verified = TRUE WHERE id = $1",
            id,
            None,
        )
        .await
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool> {
        update_user(
            &self.pool,
            "UPDATE users SET password_hash = $2 WHERE id = $1",
            id,
            Some(password_hash),
        )
        .await
    }

    async fn link_federated_id(&self, id: Uuid, federated_id: &str) -> Result<bool> {
        update_user(
            &self.pool,
            "UPDATE users SET federated_id = $2, email_verified = TRUE WHERE id = $1",
            id,
            Some(federated_id),
        )
        .await
    }

    async fn set_role(&self, id: Uuid, role: Role) -> Result<bool> {
        update_user(
            &self.pool,
            "UPDATE users SET role = $2 WHERE id = $1",
            id,
            Some(role.as_str()),
        )
        .await
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(
        &self,
        user_id: Uuid,
        token_hash: &[u8],
        device: &str,
    ) -> Result<InsertOutcome<Session>> {
        let query = r"
            INSERT INTO sessions (id, user_id, token_hash, device)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, device, created_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(token_hash)
            .bind(device)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(InsertOutcome::Created(session_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert session"),
        }
    }

    async fn find_session(&self, token_hash: &[u8]) -> Result<Option<Session>> {
        let query = "SELECT id, user_id, device, created_at FROM sessions WHERE token_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>> {
        let query = r"
            SELECT id, user_id, device, created_at
            FROM sessions
            WHERE user_id = $1
            ORDER BY created_at DESC
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list sessions")?;
        rows.iter().map(session_from_row).collect()
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<bool> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE user_id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete user sessions")?;
        Ok(result.rows_affected())
    }

    async fn delete_sessions_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE created_at < $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(cutoff)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete stale sessions")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn insert_token(&self, token: NewToken) -> Result<InsertOutcome<TokenRecord>> {
        let query = r"
            INSERT INTO tokens (id, user_id, token_hash, purpose, form, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, purpose, form, expires_at, created_at
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(token.user_id)
            .bind(&token.token_hash)
            .bind(token.purpose.as_str())
            .bind(token.form.as_str())
            .bind(token.expires_at)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(row) => Ok(InsertOutcome::Created(token_from_row(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert token"),
        }
    }

    async fn find_live_token(
        &self,
        token_hash: &[u8],
        purpose: TokenPurpose,
    ) -> Result<Option<TokenRecord>> {
        let query = r"
            SELECT id, user_id, purpose, form, expires_at, created_at
            FROM tokens
            WHERE token_hash = $1 AND purpose = $2 AND expires_at > NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup token")?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn delete_token(&self, token_hash: &[u8]) -> Result<bool> {
        let query = "DELETE FROM tokens WHERE token_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_tokens(&self, user_id: Uuid, purpose: TokenPurpose) -> Result<u64> {
        let query = "DELETE FROM tokens WHERE user_id = $1 AND purpose = $2";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(purpose.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete user tokens")?;
        Ok(result.rows_affected())
    }

    async fn delete_expired_tokens(&self) -> Result<u64> {
        let query = "DELETE FROM tokens WHERE expires_at <= NOW()";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete expired tokens")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("40001"),
        }));
        assert!(!is_unique_violation(&err));

        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn schema_declares_every_table() {
        for table in ["users", "sessions", "tokens", "kv_entries"] {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing table {table}"
            );
        }
    }
}
