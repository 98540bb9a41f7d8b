//! Credential store: principals and their single refresh credential.

use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct PrincipalStore {
    pool: SqlitePool,
}

/// Identity record. The refresh credential lives on the same row but is
/// deliberately not loaded here; see [`PrincipalStore::refresh_hash`].
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: i64,
    pub uuid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub external_provider: Option<String>,
    pub external_subject: Option<String>,
}

impl Principal {
    /// Whether this principal carries an external-identity marker.
    pub fn is_external(&self) -> bool {
        self.external_provider.is_some()
    }
}

#[derive(sqlx::FromRow)]
struct PrincipalRow {
    id: i64,
    uuid: String,
    email: String,
    display_name: Option<String>,
    password_hash: Option<String>,
    external_provider: Option<String>,
    external_subject: Option<String>,
}

impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            email: row.email,
            display_name: row.display_name,
            password_hash: row.password_hash,
            external_provider: row.external_provider,
            external_subject: row.external_subject,
        }
    }
}

const PRINCIPAL_COLUMNS: &str =
    "id, uuid, email, display_name, password_hash, external_provider, external_subject";

/// Case-normalize an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Whether an insert failed because of a UNIQUE constraint.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl PrincipalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        bind: &str,
    ) -> Result<Option<Principal>, sqlx::Error> {
        let sql = format!("SELECT {} FROM principals WHERE {}", PRINCIPAL_COLUMNS, clause);
        let row: Option<PrincipalRow> = sqlx::query_as(&sql)
            .bind(bind)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Principal::from))
    }

    /// Create a password principal. Returns the row ID.
    pub async fn create(
        &self,
        uuid: &str,
        email: &str,
        display_name: Option<&str>,
        password_hash: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO principals (uuid, email, display_name, password_hash) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(normalize_email(email))
        .bind(display_name)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Create a principal known only through an external identity provider.
    pub async fn create_external(
        &self,
        uuid: &str,
        email: &str,
        display_name: Option<&str>,
        provider: &str,
        subject: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO principals (uuid, email, display_name, external_provider, external_subject)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(normalize_email(email))
        .bind(display_name)
        .bind(provider)
        .bind(subject)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Attach an external-identity marker to a principal that has none.
    pub async fn link_external(
        &self,
        id: i64,
        provider: &str,
        subject: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE principals SET external_provider = ?, external_subject = ?
             WHERE id = ? AND external_provider IS NULL",
        )
        .bind(provider)
        .bind(subject)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Principal>, sqlx::Error> {
        let sql = format!("SELECT {} FROM principals WHERE id = ?", PRINCIPAL_COLUMNS);
        let row: Option<PrincipalRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Principal::from))
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Principal>, sqlx::Error> {
        self.fetch_one_where("uuid = ?", uuid).await
    }

    /// Look up by email (normalized before comparison).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<Principal>, sqlx::Error> {
        self.fetch_one_where("email = ?", &normalize_email(email))
            .await
    }

    pub async fn get_by_external(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<Principal>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM principals WHERE external_provider = ? AND external_subject = ?",
            PRINCIPAL_COLUMNS
        );
        let row: Option<PrincipalRow> = sqlx::query_as(&sql)
            .bind(provider)
            .bind(subject)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Principal::from))
    }

    pub async fn is_email_available(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM principals WHERE email = ?")
            .bind(normalize_email(email))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 == 0)
    }

    /// Current refresh credential hash, if a session is active.
    pub async fn refresh_hash(&self, id: i64) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT refresh_hash FROM principals WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|r| r.0))
    }

    /// Unconditionally overwrite the refresh credential (login).
    pub async fn set_refresh_hash(
        &self,
        id: i64,
        hash: &str,
        expires_at: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE principals SET refresh_hash = ?, refresh_expires_at = ? WHERE id = ?",
        )
        .bind(hash)
        .bind(expires_at as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the refresh credential only if it still equals `expected`.
    /// Returns false when another writer replaced or cleared it first.
    pub async fn swap_refresh_hash(
        &self,
        id: i64,
        expected: &str,
        new_hash: &str,
        expires_at: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE principals SET refresh_hash = ?, refresh_expires_at = ?
             WHERE id = ? AND refresh_hash = ?",
        )
        .bind(new_hash)
        .bind(expires_at as i64)
        .bind(id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop the refresh credential (logout, reuse detection).
    pub async fn clear_refresh_hash(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE principals SET refresh_hash = NULL, refresh_expires_at = NULL
             WHERE id = ? AND refresh_hash IS NOT NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear refresh credentials whose token has expired anyway.
    pub async fn clear_expired_refresh_hashes(&self, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE principals SET refresh_hash = NULL, refresh_expires_at = NULL
             WHERE refresh_hash IS NOT NULL AND refresh_expires_at < ?",
        )
        .bind(now as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
