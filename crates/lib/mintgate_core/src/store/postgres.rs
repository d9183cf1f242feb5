//! PostgreSQL store backend.
//!
//! Mutations that must be audited run in one transaction with their audit
//! insert; a failed audit insert rolls the mutation back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{
    AccountStore, AuditStore, GrantOutcome, NonceStore, PermissionStore, RoleChange,
    SettingsStore, StatusChange, StoreError,
};
use crate::audit::{self, AuditContext};
use crate::models::{
    Account, AccountStatus, Address, AuditEntry, AuditFilter, NewAuditEntry, Permission,
    PermissionGrant, Role, Setting,
};
use crate::session::nonce::NonceStatus;

const ACCOUNT_COLUMNS: &str =
    "id, address, role, status, username, avatar_url, fid, created_at, last_seen_at";

type AccountRow = (
    Uuid,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

type AuditRow = (
    Uuid,
    Option<Uuid>,
    String,
    String,
    Option<String>,
    Option<serde_json::Value>,
    Option<serde_json::Value>,
    bool,
    Option<String>,
    Uuid,
    DateTime<Utc>,
);

fn account_from_row(row: AccountRow) -> Result<Account, StoreError> {
    let (id, address, role, status, username, avatar_url, fid, created_at, last_seen_at) = row;
    Ok(Account {
        id,
        address: address
            .parse::<Address>()
            .map_err(|e| StoreError::Database(format!("bad address in row {id}: {e}")))?,
        role: role.parse::<Role>().map_err(StoreError::Database)?,
        status: status.parse::<AccountStatus>().map_err(StoreError::Database)?,
        username,
        avatar_url,
        fid: fid.and_then(|f| u64::try_from(f).ok()),
        created_at,
        last_seen_at,
    })
}

fn audit_from_row(row: AuditRow) -> AuditEntry {
    let (
        id,
        actor_id,
        action,
        resource_type,
        resource_id,
        before,
        after,
        success,
        error_message,
        correlation_id,
        created_at,
    ) = row;
    AuditEntry {
        id,
        actor_id,
        action,
        resource_type,
        resource_id,
        before,
        after,
        success,
        error_message,
        correlation_id,
        created_at,
    }
}

fn fid_param(fid: Option<u64>) -> Option<i64> {
    fid.and_then(|f| i64::try_from(f).ok())
}

/// Insert an audit row on an existing connection or transaction.
async fn insert_audit(
    conn: &mut PgConnection,
    entry: NewAuditEntry,
) -> Result<AuditEntry, StoreError> {
    let entry = entry.into_entry();
    sqlx::query(
        r#"
        INSERT INTO audit_log
            (id, actor_id, action, resource_type, resource_id, before, after,
             success, error_message, correlation_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(entry.id)
    .bind(entry.actor_id)
    .bind(&entry.action)
    .bind(&entry.resource_type)
    .bind(&entry.resource_id)
    .bind(&entry.before)
    .bind(&entry.after)
    .bind(entry.success)
    .bind(&entry.error_message)
    .bind(entry.correlation_id)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(entry)
}

/// Lock and fetch an account inside a transaction.
async fn lock_account(conn: &mut PgConnection, account_id: Uuid) -> Result<Account, StoreError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR UPDATE");
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("account {account_id}")))?;
    account_from_row(row)
}

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NonceStore for PgStore {
    async fn issue(&self, nonce_hash: &str, expires_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO auth_nonces (nonce_hash, expires_at) VALUES ($1, $2) \
             ON CONFLICT (nonce_hash) DO UPDATE SET expires_at = EXCLUDED.expires_at",
        )
        .bind(nonce_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume(&self, nonce_hash: &str) -> Result<NonceStatus, StoreError> {
        // DELETE ... RETURNING: only one concurrent statement gets the row.
        let expires_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "DELETE FROM auth_nonces WHERE nonce_hash = $1 RETURNING expires_at",
        )
        .bind(nonce_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match expires_at {
            None => NonceStatus::Unknown,
            Some(t) if t <= Utc::now() => NonceStatus::Expired,
            Some(_) => NonceStatus::Consumed,
        })
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM auth_nonces WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_address(&self, address: &Address) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE address = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(address.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(account_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(account_from_row).transpose()
    }

    async fn record_login(
        &self,
        address: &Address,
        fid: Option<u64>,
    ) -> Result<Account, StoreError> {
        let sql = format!(
            "INSERT INTO accounts (address, fid, last_seen_at) VALUES ($1, $2, now()) \
             ON CONFLICT (address) DO UPDATE \
                SET last_seen_at = now(), fid = COALESCE(EXCLUDED.fid, accounts.fid) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(address.to_string())
            .bind(fid_param(fid))
            .fetch_one(&self.pool)
            .await?;
        account_from_row(row)
    }

    async fn update_role(
        &self,
        account_id: Uuid,
        role: Role,
        ctx: &AuditContext,
    ) -> Result<RoleChange, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut account = lock_account(&mut tx, account_id).await?;
        let previous = account.role;
        sqlx::query("UPDATE accounts SET role = $2 WHERE id = $1")
            .bind(account_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
        insert_audit(
            &mut tx,
            audit::role_update_entry(ctx, account_id, previous, role),
        )
        .await?;
        tx.commit().await?;
        account.role = role;
        Ok(RoleChange { account, previous })
    }

    async fn set_status(
        &self,
        account_id: Uuid,
        status: AccountStatus,
        ctx: &AuditContext,
    ) -> Result<StatusChange, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut account = lock_account(&mut tx, account_id).await?;
        let previous = account.status;
        sqlx::query("UPDATE accounts SET status = $2 WHERE id = $1")
            .bind(account_id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        insert_audit(
            &mut tx,
            audit::status_change_entry(ctx, account_id, previous, status),
        )
        .await?;
        tx.commit().await?;
        account.status = status;
        Ok(StatusChange { account, previous })
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn list_grants(&self, account_id: Uuid) -> Result<Vec<PermissionGrant>, StoreError> {
        let rows = sqlx::query_as::<_, (String, Option<Uuid>, DateTime<Utc>)>(
            "SELECT permission, granted_by, granted_at FROM permission_grants \
             WHERE account_id = $1 ORDER BY permission",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        let mut grants = Vec::with_capacity(rows.len());
        for (permission, granted_by, granted_at) in rows {
            // Rows naming a permission this build does not know are skipped,
            // never widened into access.
            match permission.parse::<Permission>() {
                Ok(permission) => grants.push(PermissionGrant {
                    account_id,
                    permission,
                    granted_by,
                    granted_at,
                }),
                Err(e) => tracing::warn!(%account_id, error = %e, "ignoring unknown grant"),
            }
        }
        Ok(grants)
    }

    async fn grant(
        &self,
        account_id: Uuid,
        permission: Permission,
        ctx: &AuditContext,
    ) -> Result<GrantOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let account = lock_account(&mut tx, account_id).await?;
        let inserted = sqlx::query(
            "INSERT INTO permission_grants (account_id, permission, granted_by) \
             VALUES ($1, $2, $3) ON CONFLICT (account_id, permission) DO NOTHING",
        )
        .bind(account_id)
        .bind(permission.as_str())
        .bind(ctx.actor_id)
        .execute(&mut *tx)
        .await?;
        let changed = inserted.rows_affected() == 1;
        insert_audit(
            &mut tx,
            audit::permission_grant_entry(ctx, account_id, permission, changed),
        )
        .await?;
        tx.commit().await?;
        Ok(GrantOutcome { account, changed })
    }

    async fn revoke(
        &self,
        account_id: Uuid,
        permission: Permission,
        ctx: &AuditContext,
    ) -> Result<GrantOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let account = lock_account(&mut tx, account_id).await?;
        let deleted = sqlx::query(
            "DELETE FROM permission_grants WHERE account_id = $1 AND permission = $2",
        )
        .bind(account_id)
        .bind(permission.as_str())
        .execute(&mut *tx)
        .await?;
        let changed = deleted.rows_affected() == 1;
        insert_audit(
            &mut tx,
            audit::permission_revoke_entry(ctx, account_id, permission, changed),
        )
        .await?;
        tx.commit().await?;
        Ok(GrantOutcome { account, changed })
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_audit(&mut conn, entry).await
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, actor_id, action, resource_type, resource_id, before, after,
                   success, error_message, correlation_id, created_at
            FROM audit_log
            WHERE ($1::uuid IS NULL OR actor_id = $1)
              AND ($2::text IS NULL OR action = $2)
              AND ($3::text IS NULL OR resource_type = $3)
              AND ($4::text IS NULL OR resource_id = $4)
            ORDER BY created_at DESC, id DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(filter.account_id)
        .bind(&filter.action)
        .bind(&filter.resource_type)
        .bind(&filter.resource_id)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(audit_from_row).collect())
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn list_settings(&self) -> Result<Vec<Setting>, StoreError> {
        let rows = sqlx::query_as::<_, (String, serde_json::Value, Option<Uuid>, DateTime<Utc>)>(
            "SELECT key, value, updated_by, updated_at FROM app_settings ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(key, value, updated_by, updated_at)| Setting {
                key,
                value,
                updated_by,
                updated_at,
            })
            .collect())
    }

    async fn put_setting(
        &self,
        key: &str,
        value: serde_json::Value,
        ctx: &AuditContext,
    ) -> Result<Setting, StoreError> {
        let mut tx = self.pool.begin().await?;
        let previous = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT value FROM app_settings WHERE key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;
        let updated_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "INSERT INTO app_settings (key, value, updated_by, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (key) DO UPDATE \
                SET value = EXCLUDED.value, updated_by = EXCLUDED.updated_by, updated_at = now() \
             RETURNING updated_at",
        )
        .bind(key)
        .bind(&value)
        .bind(ctx.actor_id)
        .fetch_one(&mut *tx)
        .await?;
        insert_audit(
            &mut tx,
            audit::setting_update_entry(ctx, key, previous.as_ref(), &value),
        )
        .await?;
        tx.commit().await?;
        Ok(Setting {
            key: key.to_string(),
            value,
            updated_by: ctx.actor_id,
            updated_at,
        })
    }
}
