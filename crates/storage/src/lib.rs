use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    CaseClientRole, CaseId, CaseStatus, CaseUserRole, ClientId, InviteId, MessageId, Role,
    SenderRef, TenantId, UserId,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct StoredPermission {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredClient {
    pub client_id: ClientId,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewClient<'a> {
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: Option<&'a str>,
    pub phone_number: Option<&'a str>,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientChanges<'a> {
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub phone_number: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRemoval {
    Removed,
    NotFound,
    /// Still a case's primary client or a message party.
    InUse,
}

#[derive(Debug, Clone)]
pub struct StoredCase {
    pub case_id: CaseId,
    pub tenant_id: TenantId,
    pub title: String,
    pub description: Option<String>,
    pub status: CaseStatus,
    pub lawyer_primary_id: UserId,
    pub client_primary_id: ClientId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCase<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub status: CaseStatus,
    pub lawyer_primary_id: UserId,
    pub client_primary_id: ClientId,
}

#[derive(Debug, Clone, Default)]
pub struct CaseChanges<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub status: Option<CaseStatus>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CaseListFilter {
    /// Only cases where this client is primary or participant.
    pub visible_to_client: Option<ClientId>,
    /// Only cases whose primary client is this client.
    pub primary_client: Option<ClientId>,
}

/// Effective participant sets of a case: primary fields unioned with the join tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseParticipants {
    pub case_id: CaseId,
    pub tenant_id: TenantId,
    pub primary_lawyer: UserId,
    pub primary_client: ClientId,
    pub lawyer_ids: BTreeSet<UserId>,
    pub client_ids: BTreeSet<ClientId>,
}

#[derive(Debug, Clone)]
pub struct StoredParticipantUser {
    pub user_id: UserId,
    pub role_in_case: CaseUserRole,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone)]
pub struct StoredParticipantClient {
    pub client_id: ClientId,
    pub participation: CaseClientRole,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub tenant_id: TenantId,
    pub case_id: CaseId,
    pub content: String,
    pub sender: SenderRef,
    pub receiver_client_id: ClientId,
    pub viewed: bool,
    pub viewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub tenant_id: TenantId,
    pub case_id: CaseId,
    pub content: &'a str,
    pub sender: SenderRef,
    pub receiver_client_id: ClientId,
}

/// Outcome of a mark-viewed request. Only one caller ever observes `Transitioned`.
#[derive(Debug, Clone)]
pub enum ViewTransition {
    Transitioned(StoredMessage),
    AlreadyViewed(StoredMessage),
}

impl ViewTransition {
    pub fn message(&self) -> &StoredMessage {
        match self {
            ViewTransition::Transitioned(message) | ViewTransition::AlreadyViewed(message) => {
                message
            }
        }
    }

    pub fn into_message(self) -> StoredMessage {
        match self {
            ViewTransition::Transitioned(message) | ViewTransition::AlreadyViewed(message) => {
                message
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageVisibility {
    All,
    Client(ClientId),
}

/// Everything needed to notify a receiver about an unviewed message, read at fire time.
#[derive(Debug, Clone)]
pub struct NotificationTarget {
    pub message_id: MessageId,
    pub tenant_id: TenantId,
    pub viewed: bool,
    pub content: String,
    pub case_title: String,
    pub receiver_client_id: ClientId,
    pub receiver_first_name: String,
    pub receiver_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredInvite {
    pub invite_id: InviteId,
    pub tenant_id: TenantId,
    pub case_id: CaseId,
    pub email: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
}

#[derive(Debug, Clone)]
pub struct NewInvite<'a> {
    pub tenant_id: TenantId,
    pub case_id: CaseId,
    pub email: &'a str,
    pub token: &'a str,
    pub expires_at: DateTime<Utc>,
}

const CASE_COLUMNS: &str = "id, tenant_id, title, description, status, lawyer_primary_id, client_primary_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, tenant_id, case_id, content, sender_user_id, sender_client_id, receiver_client_id, viewed, viewed_at, created_at";
const USER_COLUMNS: &str = "id, tenant_id, email, first_name, last_name, role, is_active, created_at";
const CLIENT_COLUMNS: &str =
    "id, tenant_id, user_id, first_name, last_name, email, phone_number, created_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Each in-memory connection would otherwise see its own empty database.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_tenant(&self, name: &str) -> Result<TenantId> {
        let rec = sqlx::query(
            "INSERT INTO tenants (name, created_at) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET name=excluded.name
             RETURNING id",
        )
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(TenantId(rec.get::<i64, _>(0)))
    }

    pub async fn upsert_permission(&self, name: &str, description: Option<&str>) -> Result<i64> {
        let rec = sqlx::query(
            "INSERT INTO permissions (name, description) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET description=excluded.description
             RETURNING id",
        )
        .bind(name)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec.get::<i64, _>(0))
    }

    pub async fn list_permissions(&self) -> Result<Vec<StoredPermission>> {
        let rows = sqlx::query("SELECT id, name, description FROM permissions ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredPermission {
                id: r.get("id"),
                name: r.get("name"),
                description: r.get("description"),
            })
            .collect())
    }

    pub async fn create_user(&self, tenant_id: TenantId, user: NewUser<'_>) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (tenant_id, email, first_name, last_name, role, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?)
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(user.email)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.role.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn set_user_active(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        is_active: bool,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ? AND tenant_id = ?")
            .bind(is_active)
            .bind(user_id.0)
            .bind(tenant_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_user(&self, tenant_id: TenantId, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ? AND tenant_id = ?"
        ))
        .bind(user_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn list_users(&self, tenant_id: TenantId) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE tenant_id = ? ORDER BY lower(first_name) ASC, id ASC"
        ))
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    pub async fn grant_permission(&self, user_id: UserId, permission_name: &str) -> Result<()> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_permissions (user_id, permission_id)
             SELECT ?, id FROM permissions WHERE name = ?",
        )
        .bind(user_id.0)
        .bind(permission_name)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            let known: Option<i64> =
                sqlx::query_scalar("SELECT id FROM permissions WHERE name = ?")
                    .bind(permission_name)
                    .fetch_optional(&self.pool)
                    .await?;
            if known.is_none() {
                bail!("unknown permission '{permission_name}'");
            }
        }
        Ok(())
    }

    pub async fn permissions_for_user(&self, user_id: UserId) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT p.name
             FROM user_permissions up
             INNER JOIN permissions p ON p.id = up.permission_id
             WHERE up.user_id = ?
             ORDER BY p.name ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>(0)).collect())
    }

    pub async fn create_client(&self, tenant_id: TenantId, client: NewClient<'_>) -> Result<ClientId> {
        let rec = sqlx::query(
            "INSERT INTO clients (tenant_id, user_id, first_name, last_name, email, phone_number, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(client.user_id.map(|id| id.0))
        .bind(client.first_name)
        .bind(client.last_name)
        .bind(client.email)
        .bind(client.phone_number)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(ClientId(rec.get::<i64, _>(0)))
    }

    pub async fn get_client(
        &self,
        tenant_id: TenantId,
        client_id: ClientId,
    ) -> Result<Option<StoredClient>> {
        let row = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ? AND tenant_id = ?"
        ))
        .bind(client_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(client_from_row))
    }

    pub async fn list_clients(&self, tenant_id: TenantId) -> Result<Vec<StoredClient>> {
        let rows = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE tenant_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(client_from_row).collect())
    }

    pub async fn find_client_by_email(
        &self,
        tenant_id: TenantId,
        email: &str,
    ) -> Result<Option<StoredClient>> {
        let row = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE tenant_id = ? AND lower(email) = lower(?)"
        ))
        .bind(tenant_id.0)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(client_from_row))
    }

    pub async fn update_client(
        &self,
        tenant_id: TenantId,
        client_id: ClientId,
        changes: ClientChanges<'_>,
    ) -> Result<Option<StoredClient>> {
        let row = sqlx::query(&format!(
            "UPDATE clients SET
                first_name = COALESCE(?, first_name),
                last_name = COALESCE(?, last_name),
                email = COALESCE(?, email),
                phone_number = COALESCE(?, phone_number)
             WHERE id = ? AND tenant_id = ?
             RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(changes.first_name)
        .bind(changes.last_name)
        .bind(changes.email)
        .bind(changes.phone_number)
        .bind(client_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(client_from_row))
    }

    /// Removes the client and its case participations. Clients that are still a case's
    /// primary client or a message party are left alone.
    pub async fn delete_client(
        &self,
        tenant_id: TenantId,
        client_id: ClientId,
    ) -> Result<ClientRemoval> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM clients WHERE id = ? AND tenant_id = ?")
            .bind(client_id.0)
            .bind(tenant_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Ok(ClientRemoval::NotFound);
        }
        let in_use: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM cases WHERE client_primary_id = ?1)
                 OR EXISTS (
                     SELECT 1 FROM messages
                     WHERE sender_client_id = ?1 OR receiver_client_id = ?1
                 )",
        )
        .bind(client_id.0)
        .fetch_one(&mut *tx)
        .await?;
        if in_use {
            return Ok(ClientRemoval::InUse);
        }
        sqlx::query("DELETE FROM clients WHERE id = ? AND tenant_id = ?")
            .bind(client_id.0)
            .bind(tenant_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(ClientRemoval::Removed)
    }

    /// Resolves the client record linked to a client-role login.
    pub async fn client_for_user(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Option<ClientId>> {
        let row = sqlx::query("SELECT id FROM clients WHERE user_id = ? AND tenant_id = ?")
            .bind(user_id.0)
            .bind(tenant_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| ClientId(r.get::<i64, _>(0))))
    }

    pub async fn linked_users_for_clients(
        &self,
        tenant_id: TenantId,
        client_ids: &BTreeSet<ClientId>,
    ) -> Result<Vec<UserId>> {
        if client_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; client_ids.len()].join(", ");
        let sql = format!(
            "SELECT user_id FROM clients
             WHERE tenant_id = ? AND user_id IS NOT NULL AND id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(tenant_id.0);
        for client_id in client_ids {
            query = query.bind(client_id.0);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| UserId(r.get::<i64, _>(0)))
            .collect())
    }

    /// Inserts the case together with its lead-lawyer and main-contact participant rows.
    /// All three rows are committed together or not at all.
    pub async fn create_case(&self, tenant_id: TenantId, case: NewCase<'_>) -> Result<CaseId> {
        let mut tx = self.pool.begin().await?;

        let lawyer_tenant: Option<i64> =
            sqlx::query_scalar("SELECT tenant_id FROM users WHERE id = ?")
                .bind(case.lawyer_primary_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let client_tenant: Option<i64> =
            sqlx::query_scalar("SELECT tenant_id FROM clients WHERE id = ?")
                .bind(case.client_primary_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        if lawyer_tenant != Some(tenant_id.0) || client_tenant != Some(tenant_id.0) {
            bail!("primary lawyer and primary client must belong to tenant {tenant_id}");
        }

        let now = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO cases (tenant_id, title, description, status, lawyer_primary_id, client_primary_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(tenant_id.0)
        .bind(case.title)
        .bind(case.description)
        .bind(case.status.as_str())
        .bind(case.lawyer_primary_id.0)
        .bind(case.client_primary_id.0)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let case_id = CaseId(rec.get::<i64, _>(0));

        sqlx::query(
            "INSERT INTO case_participant_users (case_id, user_id, role_in_case) VALUES (?, ?, ?)",
        )
        .bind(case_id.0)
        .bind(case.lawyer_primary_id.0)
        .bind(CaseUserRole::LeadLawyer.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO case_participant_clients (case_id, client_id, participation) VALUES (?, ?, ?)",
        )
        .bind(case_id.0)
        .bind(case.client_primary_id.0)
        .bind(CaseClientRole::MainContact.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(case_id)
    }

    pub async fn get_case(&self, tenant_id: TenantId, case_id: CaseId) -> Result<Option<StoredCase>> {
        let row = sqlx::query(&format!(
            "SELECT {CASE_COLUMNS} FROM cases WHERE id = ? AND tenant_id = ?"
        ))
        .bind(case_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(case_from_row))
    }

    pub async fn list_cases(
        &self,
        tenant_id: TenantId,
        filter: CaseListFilter,
    ) -> Result<Vec<StoredCase>> {
        let mut sql = format!("SELECT {CASE_COLUMNS} FROM cases c WHERE c.tenant_id = ?");
        if filter.visible_to_client.is_some() {
            sql.push_str(
                " AND (c.client_primary_id = ? OR EXISTS (
                    SELECT 1 FROM case_participant_clients pc
                    WHERE pc.case_id = c.id AND pc.client_id = ?))",
            );
        }
        if filter.primary_client.is_some() {
            sql.push_str(" AND c.client_primary_id = ?");
        }
        sql.push_str(" ORDER BY c.created_at DESC, c.id DESC");

        let mut query = sqlx::query(&sql).bind(tenant_id.0);
        if let Some(client_id) = filter.visible_to_client {
            query = query.bind(client_id.0).bind(client_id.0);
        }
        if let Some(client_id) = filter.primary_client {
            query = query.bind(client_id.0);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(case_from_row).collect())
    }

    pub async fn update_case(
        &self,
        tenant_id: TenantId,
        case_id: CaseId,
        changes: CaseChanges<'_>,
    ) -> Result<Option<StoredCase>> {
        let result = sqlx::query(
            "UPDATE cases SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                status = COALESCE(?, status),
                updated_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.status.map(CaseStatus::as_str))
        .bind(Utc::now())
        .bind(case_id.0)
        .bind(tenant_id.0)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_case(tenant_id, case_id).await
    }

    /// Deletes the case; participants, messages and invites cascade with it.
    pub async fn delete_case(&self, tenant_id: TenantId, case_id: CaseId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cases WHERE id = ? AND tenant_id = ?")
            .bind(case_id.0)
            .bind(tenant_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Reads the primary fields and both join tables in one transaction so the two sets
    /// describe the same moment.
    pub async fn case_participants(
        &self,
        tenant_id: TenantId,
        case_id: CaseId,
    ) -> Result<Option<CaseParticipants>> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = sqlx::query(
            "SELECT lawyer_primary_id, client_primary_id FROM cases WHERE id = ? AND tenant_id = ?",
        )
        .bind(case_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };
        let primary_lawyer = UserId(row.get::<i64, _>(0));
        let primary_client = ClientId(row.get::<i64, _>(1));

        let user_rows = sqlx::query("SELECT user_id FROM case_participant_users WHERE case_id = ?")
            .bind(case_id.0)
            .fetch_all(&mut *tx)
            .await?;
        let client_rows =
            sqlx::query("SELECT client_id FROM case_participant_clients WHERE case_id = ?")
                .bind(case_id.0)
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;

        let mut lawyer_ids: BTreeSet<UserId> = user_rows
            .into_iter()
            .map(|r| UserId(r.get::<i64, _>(0)))
            .collect();
        lawyer_ids.insert(primary_lawyer);
        let mut client_ids: BTreeSet<ClientId> = client_rows
            .into_iter()
            .map(|r| ClientId(r.get::<i64, _>(0)))
            .collect();
        client_ids.insert(primary_client);

        Ok(Some(CaseParticipants {
            case_id,
            tenant_id,
            primary_lawyer,
            primary_client,
            lawyer_ids,
            client_ids,
        }))
    }

    pub async fn list_participant_users(&self, case_id: CaseId) -> Result<Vec<StoredParticipantUser>> {
        let rows = sqlx::query(
            "SELECT u.id, pu.role_in_case, u.first_name, u.last_name
             FROM case_participant_users pu
             INNER JOIN users u ON u.id = pu.user_id
             WHERE pu.case_id = ?
             ORDER BY u.id ASC",
        )
        .bind(case_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredParticipantUser {
                user_id: UserId(r.get::<i64, _>(0)),
                role_in_case: CaseUserRole::parse(&r.get::<String, _>(1))
                    .unwrap_or(CaseUserRole::SupportLawyer),
                first_name: r.get(2),
                last_name: r.get(3),
            })
            .collect())
    }

    pub async fn list_participant_clients(
        &self,
        case_id: CaseId,
    ) -> Result<Vec<StoredParticipantClient>> {
        let rows = sqlx::query(
            "SELECT c.id, pc.participation, c.first_name, c.last_name, c.email
             FROM case_participant_clients pc
             INNER JOIN clients c ON c.id = pc.client_id
             WHERE pc.case_id = ?
             ORDER BY c.id ASC",
        )
        .bind(case_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredParticipantClient {
                client_id: ClientId(r.get::<i64, _>(0)),
                participation: CaseClientRole::parse(&r.get::<String, _>(1))
                    .unwrap_or(CaseClientRole::OtherContact),
                first_name: r.get(2),
                last_name: r.get(3),
                email: r.get(4),
            })
            .collect())
    }

    pub async fn add_participant_user(
        &self,
        case_id: CaseId,
        user_id: UserId,
        role_in_case: CaseUserRole,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO case_participant_users (case_id, user_id, role_in_case) VALUES (?, ?, ?)",
        )
        .bind(case_id.0)
        .bind(user_id.0)
        .bind(role_in_case.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_participant_client(
        &self,
        case_id: CaseId,
        client_id: ClientId,
        participation: CaseClientRole,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO case_participant_clients (case_id, client_id, participation) VALUES (?, ?, ?)",
        )
        .bind(case_id.0)
        .bind(client_id.0)
        .bind(participation.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_message(&self, message: NewMessage<'_>) -> Result<StoredMessage> {
        let row = sqlx::query(&format!(
            "INSERT INTO messages (tenant_id, case_id, content, sender_user_id, sender_client_id, receiver_client_id, viewed, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, ?)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message.tenant_id.0)
        .bind(message.case_id.0)
        .bind(message.content)
        .bind(message.sender.user_id().map(|id| id.0))
        .bind(message.sender.client_id().map(|id| id.0))
        .bind(message.receiver_client_id.0)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        message_from_row(&row)
    }

    pub async fn load_message(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
    ) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ? AND tenant_id = ?"
        ))
        .bind(message_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Flips `viewed` with a single conditional update. Concurrent callers race on the
    /// `viewed = 0` predicate, so exactly one of them gets `Transitioned`.
    pub async fn mark_message_viewed(
        &self,
        tenant_id: TenantId,
        message_id: MessageId,
    ) -> Result<Option<ViewTransition>> {
        let updated = sqlx::query(&format!(
            "UPDATE messages SET viewed = 1, viewed_at = ?
             WHERE id = ? AND tenant_id = ? AND viewed = 0
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(message_id.0)
        .bind(tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(Some(ViewTransition::Transitioned(message_from_row(&row)?)));
        }
        Ok(self
            .load_message(tenant_id, message_id)
            .await?
            .map(ViewTransition::AlreadyViewed))
    }

    pub async fn list_case_messages(
        &self,
        tenant_id: TenantId,
        case_id: CaseId,
        visibility: MessageVisibility,
    ) -> Result<Vec<StoredMessage>> {
        let rows = match visibility {
            MessageVisibility::All => {
                sqlx::query(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE tenant_id = ? AND case_id = ?
                     ORDER BY created_at ASC, id ASC"
                ))
                .bind(tenant_id.0)
                .bind(case_id.0)
                .fetch_all(&self.pool)
                .await?
            }
            MessageVisibility::Client(client_id) => {
                sqlx::query(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE tenant_id = ? AND case_id = ?
                       AND (receiver_client_id = ? OR sender_client_id = ?)
                     ORDER BY created_at ASC, id ASC"
                ))
                .bind(tenant_id.0)
                .bind(case_id.0)
                .bind(client_id.0)
                .bind(client_id.0)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(message_from_row).collect()
    }

    pub async fn notification_target(
        &self,
        message_id: MessageId,
    ) -> Result<Option<NotificationTarget>> {
        let row = sqlx::query(
            "SELECT m.id, m.tenant_id, m.viewed, m.content, c.title, cl.id, cl.first_name, cl.email
             FROM messages m
             INNER JOIN cases c ON c.id = m.case_id AND c.tenant_id = m.tenant_id
             INNER JOIN clients cl ON cl.id = m.receiver_client_id AND cl.tenant_id = m.tenant_id
             WHERE m.id = ?",
        )
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| NotificationTarget {
            message_id: MessageId(r.get::<i64, _>(0)),
            tenant_id: TenantId(r.get::<i64, _>(1)),
            viewed: r.get::<bool, _>(2),
            content: r.get(3),
            case_title: r.get(4),
            receiver_client_id: ClientId(r.get::<i64, _>(5)),
            receiver_first_name: r.get(6),
            receiver_email: r.get(7),
        }))
    }

    pub async fn create_invite(&self, invite: NewInvite<'_>) -> Result<InviteId> {
        let rec = sqlx::query(
            "INSERT INTO invites (tenant_id, case_id, email, token, expires_at, is_used, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)
             RETURNING id",
        )
        .bind(invite.tenant_id.0)
        .bind(invite.case_id.0)
        .bind(invite.email)
        .bind(invite.token)
        .bind(invite.expires_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(InviteId(rec.get::<i64, _>(0)))
    }

    pub async fn has_pending_invite(
        &self,
        tenant_id: TenantId,
        case_id: CaseId,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM invites
             WHERE tenant_id = ? AND case_id = ? AND lower(email) = lower(?)
               AND is_used = 0 AND expires_at > ?
             LIMIT 1",
        )
        .bind(tenant_id.0)
        .bind(case_id.0)
        .bind(email)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn load_invite_by_token(&self, token: &str) -> Result<Option<StoredInvite>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, case_id, email, token, expires_at, is_used
             FROM invites WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredInvite {
            invite_id: InviteId(r.get::<i64, _>(0)),
            tenant_id: TenantId(r.get::<i64, _>(1)),
            case_id: CaseId(r.get::<i64, _>(2)),
            email: r.get(3),
            token: r.get(4),
            expires_at: r.get(5),
            is_used: r.get::<bool, _>(6),
        }))
    }

    /// Consumes the invite, then reuses or creates the tenant's client for the invited email
    /// and enrolls it on the invite's case, all in one transaction. Returns `None` when
    /// another redemption already consumed the invite.
    pub async fn redeem_invite(
        &self,
        invite_id: InviteId,
        first_name: &str,
        last_name: &str,
    ) -> Result<Option<ClientId>> {
        let mut tx = self.pool.begin().await?;
        let Some(invite) = sqlx::query(
            "UPDATE invites SET is_used = 1 WHERE id = ? AND is_used = 0
             RETURNING tenant_id, case_id, email",
        )
        .bind(invite_id.0)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };
        let tenant_id: i64 = invite.get(0);
        let case_id: i64 = invite.get(1);
        let email: String = invite.get(2);

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM clients WHERE tenant_id = ? AND lower(email) = lower(?)",
        )
        .bind(tenant_id)
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?;
        let client_id = match existing {
            Some(id) => id,
            None => {
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO clients (tenant_id, first_name, last_name, email, created_at)
                     VALUES (?, ?, ?, ?, ?)
                     RETURNING id",
                )
                .bind(tenant_id)
                .bind(first_name)
                .bind(last_name)
                .bind(&email)
                .bind(Utc::now())
                .fetch_one(&mut *tx)
                .await?
            }
        };

        sqlx::query(
            "INSERT OR IGNORE INTO case_participant_clients (case_id, client_id, participation)
             VALUES (?, ?, ?)",
        )
        .bind(case_id)
        .bind(client_id)
        .bind(CaseClientRole::OtherContact.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(ClientId(client_id)))
    }
}

/// True when the error chain bottoms out in a UNIQUE or PRIMARY KEY violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|e| e.as_database_error())
            .is_some_and(|db| db.is_unique_violation())
    })
}

fn user_from_row(r: &SqliteRow) -> StoredUser {
    StoredUser {
        user_id: UserId(r.get::<i64, _>("id")),
        tenant_id: TenantId(r.get::<i64, _>("tenant_id")),
        email: r.get("email"),
        first_name: r.get("first_name"),
        last_name: r.get("last_name"),
        role: Role::parse(&r.get::<String, _>("role")).unwrap_or(Role::Client),
        is_active: r.get::<bool, _>("is_active"),
        created_at: r.get("created_at"),
    }
}

fn client_from_row(r: &SqliteRow) -> StoredClient {
    StoredClient {
        client_id: ClientId(r.get::<i64, _>("id")),
        tenant_id: TenantId(r.get::<i64, _>("tenant_id")),
        user_id: r.get::<Option<i64>, _>("user_id").map(UserId),
        first_name: r.get("first_name"),
        last_name: r.get("last_name"),
        email: r.get("email"),
        phone_number: r.get("phone_number"),
        created_at: r.get("created_at"),
    }
}

fn case_from_row(r: &SqliteRow) -> StoredCase {
    StoredCase {
        case_id: CaseId(r.get::<i64, _>("id")),
        tenant_id: TenantId(r.get::<i64, _>("tenant_id")),
        title: r.get("title"),
        description: r.get("description"),
        status: CaseStatus::parse(&r.get::<String, _>("status")).unwrap_or(CaseStatus::Open),
        lawyer_primary_id: UserId(r.get::<i64, _>("lawyer_primary_id")),
        client_primary_id: ClientId(r.get::<i64, _>("client_primary_id")),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn message_from_row(r: &SqliteRow) -> Result<StoredMessage> {
    let sender = match (
        r.get::<Option<i64>, _>("sender_user_id"),
        r.get::<Option<i64>, _>("sender_client_id"),
    ) {
        (Some(user_id), None) => SenderRef::User(UserId(user_id)),
        (None, Some(client_id)) => SenderRef::Client(ClientId(client_id)),
        _ => bail!(
            "message {} has an ambiguous sender",
            r.get::<i64, _>("id")
        ),
    };
    Ok(StoredMessage {
        message_id: MessageId(r.get::<i64, _>("id")),
        tenant_id: TenantId(r.get::<i64, _>("tenant_id")),
        case_id: CaseId(r.get::<i64, _>("case_id")),
        content: r.get("content"),
        sender,
        receiver_client_id: ClientId(r.get::<i64, _>("receiver_client_id")),
        viewed: r.get::<bool, _>("viewed"),
        viewed_at: r.get("viewed_at"),
        created_at: r.get("created_at"),
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create sqlite parent directory '{}'",
            parent.display()
        )
    })?;
    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
