//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ClaimRepository` port from the `claims_core` crate. It handles all
//! interactions with the PostgreSQL database using `sqlx`.
//!
//! Multi-statement operations (item insertion, reorder, cascading deletes) run in
//! a transaction that first locks the owning claim row, so concurrent writers to
//! the same claim are serialized.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use claims_core::domain::{
    Attachment, Claim, ClaimDetail, ClaimPatch, ClaimStatus, ClaimSummary, Item, ItemOrder,
    ItemPatch, NewClaim, NewItem, ShareLink,
};
use claims_core::ports::{ClaimRepository, NewAttachment, PortError, PortResult};
use sqlx::{FromRow, PgConnection, PgPool};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

const CLAIM_COLUMNS: &str = "id, claim_number, status, customer, adjustor_name, adjustor_email, \
     adjustor_phone, claimant_name, claimant_email, claimant_phone, user_id, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, claim_id, title, description, sort_order, created_at, updated_at";

const ATTACHMENT_COLUMNS: &str = "id, item_id, filename, url, thumbnail_url, mime_type, size, \
     width, height, storage_key, created_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ClaimRepository` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ClaimRecord {
    id: Uuid,
    claim_number: String,
    status: String,
    customer: Option<String>,
    adjustor_name: Option<String>,
    adjustor_email: Option<String>,
    adjustor_phone: Option<String>,
    claimant_name: Option<String>,
    claimant_email: Option<String>,
    claimant_phone: Option<String>,
    user_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ClaimRecord {
    fn to_domain(self) -> PortResult<Claim> {
        let status = self
            .status
            .parse::<ClaimStatus>()
            .map_err(|e| PortError::Unexpected(format!("Claim {}: {}", self.id, e)))?;
        Ok(Claim {
            id: self.id.into(),
            claim_number: self.claim_number,
            status,
            customer: self.customer,
            adjustor_name: self.adjustor_name,
            adjustor_email: self.adjustor_email,
            adjustor_phone: self.adjustor_phone,
            claimant_name: self.claimant_name,
            claimant_email: self.claimant_email,
            claimant_phone: self.claimant_phone,
            user_id: self.user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ClaimSummaryRecord {
    #[sqlx(flatten)]
    claim: ClaimRecord,
    item_count: i64,
}

#[derive(FromRow)]
struct ItemRecord {
    id: Uuid,
    claim_id: Uuid,
    title: String,
    description: Option<String>,
    sort_order: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ItemRecord {
    fn to_domain(self, attachments: Vec<Attachment>) -> Item {
        Item {
            id: self.id.into(),
            claim_id: self.claim_id.into(),
            title: self.title,
            description: self.description,
            order: self.sort_order,
            attachments,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct AttachmentRecord {
    id: Uuid,
    item_id: Uuid,
    filename: String,
    url: String,
    thumbnail_url: Option<String>,
    mime_type: String,
    size: i64,
    width: Option<i32>,
    height: Option<i32>,
    storage_key: String,
    created_at: DateTime<Utc>,
}
impl AttachmentRecord {
    fn to_domain(self) -> Attachment {
        Attachment {
            id: self.id.into(),
            item_id: self.item_id.into(),
            filename: self.filename,
            url: self.url,
            thumbnail_url: self.thumbnail_url,
            mime_type: self.mime_type,
            size: self.size,
            width: self.width,
            height: self.height,
            storage_key: self.storage_key,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ShareLinkRecord {
    id: Uuid,
    token: String,
    claim_id: Uuid,
    created_at: DateTime<Utc>,
}
impl ShareLinkRecord {
    fn to_domain(self) -> ShareLink {
        ShareLink {
            id: self.id,
            token: self.token,
            claim_id: self.claim_id,
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// Error Mapping and Shared Queries
//=========================================================================================

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Maps constraint violations on writes onto the port's error vocabulary.
fn write_error(e: sqlx::Error, conflict: impl FnOnce() -> String) -> PortError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => PortError::Conflict(conflict()),
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            PortError::NotFound(format!("Referenced record not found: {}", db.message()))
        }
        _ => unexpected(e),
    }
}

fn claim_not_found(claim_id: Uuid) -> PortError {
    PortError::NotFound(format!("Claim {} not found", claim_id))
}

fn item_not_found(item_id: Uuid) -> PortError {
    PortError::NotFound(format!("Item {} not found", item_id))
}

/// Locks the claim row for the rest of the transaction.
async fn lock_claim(conn: &mut PgConnection, claim_id: Uuid) -> PortResult<ClaimRecord> {
    sqlx::query_as::<_, ClaimRecord>(&format!(
        "SELECT {} FROM claims WHERE id = $1 FOR UPDATE",
        CLAIM_COLUMNS
    ))
    .bind(claim_id)
    .fetch_optional(conn)
    .await
    .map_err(unexpected)?
    .ok_or_else(|| claim_not_found(claim_id))
}

async fn fetch_attachments(
    conn: &mut PgConnection,
    item_ids: &[Uuid],
) -> PortResult<HashMap<Uuid, Vec<Attachment>>> {
    let records = sqlx::query_as::<_, AttachmentRecord>(&format!(
        "SELECT {} FROM attachments WHERE item_id = ANY($1) ORDER BY created_at, id",
        ATTACHMENT_COLUMNS
    ))
    .bind(item_ids)
    .fetch_all(conn)
    .await
    .map_err(unexpected)?;

    let mut by_item: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
    for record in records {
        by_item
            .entry(record.item_id)
            .or_default()
            .push(record.to_domain());
    }
    Ok(by_item)
}

async fn fetch_detail(conn: &mut PgConnection, claim_id: Uuid) -> PortResult<ClaimDetail> {
    let claim = sqlx::query_as::<_, ClaimRecord>(&format!(
        "SELECT {} FROM claims WHERE id = $1",
        CLAIM_COLUMNS
    ))
    .bind(claim_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(unexpected)?
    .ok_or_else(|| claim_not_found(claim_id))?
    .to_domain()?;

    let items = sqlx::query_as::<_, ItemRecord>(&format!(
        "SELECT {} FROM items WHERE claim_id = $1 ORDER BY sort_order, created_at, id",
        ITEM_COLUMNS
    ))
    .bind(claim_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(unexpected)?;

    let item_ids: Vec<Uuid> = items.iter().map(|item| item.id).collect();
    let mut attachments = fetch_attachments(conn, &item_ids).await?;
    let items = items
        .into_iter()
        .map(|item| {
            let files = attachments.remove(&item.id).unwrap_or_default();
            item.to_domain(files)
        })
        .collect();
    Ok(ClaimDetail { claim, items })
}

/// Storage keys of every attachment under the matching items.
async fn attachment_keys(
    conn: &mut PgConnection,
    claim_id: Uuid,
    item_id: Option<Uuid>,
) -> PortResult<Vec<String>> {
    sqlx::query_scalar::<_, String>(
        "SELECT a.storage_key FROM attachments a JOIN items i ON i.id = a.item_id \
         WHERE i.claim_id = $1 AND ($2::uuid IS NULL OR i.id = $2)",
    )
    .bind(claim_id)
    .bind(item_id)
    .fetch_all(conn)
    .await
    .map_err(unexpected)
}

//=========================================================================================
// `ClaimRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl ClaimRepository for DbAdapter {
    async fn list_claims(&self) -> PortResult<Vec<ClaimSummary>> {
        let records = sqlx::query_as::<_, ClaimSummaryRecord>(&format!(
            "SELECT {}, (SELECT COUNT(*) FROM items WHERE items.claim_id = claims.id) AS item_count \
             FROM claims ORDER BY created_at DESC",
            CLAIM_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records
            .into_iter()
            .map(|record| {
                Ok(ClaimSummary {
                    claim: record.claim.to_domain()?,
                    item_count: record.item_count,
                })
            })
            .collect()
    }

    async fn get_claim_detail(&self, claim_id: Uuid) -> PortResult<ClaimDetail> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        fetch_detail(&mut conn, claim_id).await
    }

    async fn create_claim(&self, user_id: Option<Uuid>, input: &NewClaim) -> PortResult<Claim> {
        sqlx::query_as::<_, ClaimRecord>(&format!(
            "INSERT INTO claims (id, claim_number, status, customer, adjustor_name, adjustor_email, \
             adjustor_phone, claimant_name, claimant_email, claimant_phone, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {}",
            CLAIM_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&input.claim_number)
        .bind(input.status.as_str())
        .bind(&input.customer)
        .bind(&input.adjustor_name)
        .bind(&input.adjustor_email)
        .bind(&input.adjustor_phone)
        .bind(&input.claimant_name)
        .bind(&input.claimant_email)
        .bind(&input.claimant_phone)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            write_error(e, || {
                format!("Claim number {} already exists", input.claim_number)
            })
        })?
        .to_domain()
    }

    async fn update_claim(&self, claim_id: Uuid, patch: &ClaimPatch) -> PortResult<Claim> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let mut claim = lock_claim(&mut tx, claim_id).await?.to_domain()?;
        patch.apply_to(&mut claim);

        let record = sqlx::query_as::<_, ClaimRecord>(&format!(
            "UPDATE claims SET claim_number = $2, status = $3, customer = $4, adjustor_name = $5, \
             adjustor_email = $6, adjustor_phone = $7, claimant_name = $8, claimant_email = $9, \
             claimant_phone = $10, updated_at = NOW() WHERE id = $1 RETURNING {}",
            CLAIM_COLUMNS
        ))
        .bind(claim_id)
        .bind(&claim.claim_number)
        .bind(claim.status.as_str())
        .bind(&claim.customer)
        .bind(&claim.adjustor_name)
        .bind(&claim.adjustor_email)
        .bind(&claim.adjustor_phone)
        .bind(&claim.claimant_name)
        .bind(&claim.claimant_email)
        .bind(&claim.claimant_phone)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            write_error(e, || {
                format!("Claim number {} already exists", claim.claim_number)
            })
        })?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn delete_claim(&self, claim_id: Uuid) -> PortResult<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        lock_claim(&mut tx, claim_id).await?;
        let keys = attachment_keys(&mut tx, claim_id, None).await?;

        // Items, attachments and the share link go with the claim via ON DELETE CASCADE.
        sqlx::query("DELETE FROM claims WHERE id = $1")
            .bind(claim_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        debug!(%claim_id, objects = keys.len(), "Claim rows deleted");
        Ok(keys)
    }

    async fn create_item(&self, claim_id: Uuid, input: &NewItem) -> PortResult<Item> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        lock_claim(&mut tx, claim_id).await?;

        sqlx::query("UPDATE items SET sort_order = sort_order + 1 WHERE claim_id = $1")
            .bind(claim_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let record = sqlx::query_as::<_, ItemRecord>(&format!(
            "INSERT INTO items (id, claim_id, title, description, sort_order) \
             VALUES ($1, $2, $3, $4, 0) RETURNING {}",
            ITEM_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(claim_id)
        .bind(&input.title)
        .bind(&input.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain(Vec::new()))
    }

    async fn update_item(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        patch: &ItemPatch,
    ) -> PortResult<Item> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let current = sqlx::query_as::<_, ItemRecord>(&format!(
            "SELECT {} FROM items WHERE id = $1 AND claim_id = $2 FOR UPDATE",
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .bind(claim_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| item_not_found(item_id))?;

        let mut item = current.to_domain(Vec::new());
        patch.apply_to(&mut item);

        let record = sqlx::query_as::<_, ItemRecord>(&format!(
            "UPDATE items SET title = $2, description = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            ITEM_COLUMNS
        ))
        .bind(item_id)
        .bind(&item.title)
        .bind(&item.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        let mut attachments = fetch_attachments(&mut tx, &[item_id]).await?;
        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain(attachments.remove(&item_id).unwrap_or_default()))
    }

    async fn delete_item(&self, claim_id: Uuid, item_id: Uuid) -> PortResult<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        lock_claim(&mut tx, claim_id).await?;
        let keys = attachment_keys(&mut tx, claim_id, Some(item_id)).await?;

        let deleted = sqlx::query("DELETE FROM items WHERE id = $1 AND claim_id = $2")
            .bind(item_id)
            .bind(claim_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        if deleted.rows_affected() == 0 {
            return Err(item_not_found(item_id));
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(keys)
    }

    async fn reorder_items(&self, claim_id: Uuid, order: &[ItemOrder]) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        lock_claim(&mut tx, claim_id).await?;

        let existing: HashSet<Uuid> =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM items WHERE claim_id = $1")
                .bind(claim_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(unexpected)?
                .into_iter()
                .collect();
        let requested: HashSet<Uuid> = order.iter().map(|entry| entry.id).collect();
        if existing != requested || requested.len() != order.len() {
            return Err(PortError::Invalid(
                "Reorder must list every item of the claim exactly once".to_string(),
            ));
        }

        let ids: Vec<Uuid> = order.iter().map(|entry| entry.id).collect();
        let positions: Vec<i32> = order.iter().map(|entry| entry.order).collect();
        sqlx::query(
            "UPDATE items SET sort_order = v.sort_order, updated_at = NOW() \
             FROM UNNEST($1::uuid[], $2::int4[]) AS v(id, sort_order) \
             WHERE items.id = v.id AND items.claim_id = $3",
        )
        .bind(&ids)
        .bind(&positions)
        .bind(claim_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn create_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment: NewAttachment,
    ) -> PortResult<Attachment> {
        let record = sqlx::query_as::<_, AttachmentRecord>(&format!(
            "INSERT INTO attachments (id, item_id, filename, url, thumbnail_url, mime_type, size, \
             width, height, storage_key) \
             SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10 \
             WHERE EXISTS (SELECT 1 FROM items WHERE id = $2 AND claim_id = $11) \
             RETURNING {}",
            ATTACHMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(item_id)
        .bind(&attachment.filename)
        .bind(&attachment.url)
        .bind(&attachment.thumbnail_url)
        .bind(&attachment.mime_type)
        .bind(attachment.size)
        .bind(attachment.width)
        .bind(attachment.height)
        .bind(&attachment.storage_key)
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| item_not_found(item_id))?;
        Ok(record.to_domain())
    }

    async fn delete_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment_id: Uuid,
    ) -> PortResult<Attachment> {
        let record = sqlx::query_as::<_, AttachmentRecord>(&format!(
            "DELETE FROM attachments WHERE id = $1 AND item_id = $2 \
             AND EXISTS (SELECT 1 FROM items WHERE id = $2 AND claim_id = $3) \
             RETURNING {}",
            ATTACHMENT_COLUMNS
        ))
        .bind(attachment_id)
        .bind(item_id)
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Attachment {} not found", attachment_id)))?;
        Ok(record.to_domain())
    }

    async fn create_share_link(&self, claim_id: Uuid, token: &str) -> PortResult<ShareLink> {
        // Concurrent creators race on the unique claim_id; the loser inserts nothing
        // and reads the winner's row.
        sqlx::query(
            "INSERT INTO share_links (id, token, claim_id) VALUES ($1, $2, $3) \
             ON CONFLICT (claim_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(token)
        .bind(claim_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match write_error(e, || "Share token collision".to_string()) {
            PortError::NotFound(_) => claim_not_found(claim_id),
            other => other,
        })?;

        self.get_share_link(claim_id)
            .await?
            .ok_or_else(|| claim_not_found(claim_id))
    }

    async fn get_share_link(&self, claim_id: Uuid) -> PortResult<Option<ShareLink>> {
        let record = sqlx::query_as::<_, ShareLinkRecord>(
            "SELECT id, token, claim_id, created_at FROM share_links WHERE claim_id = $1",
        )
        .bind(claim_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(ShareLinkRecord::to_domain))
    }

    async fn delete_share_link(&self, claim_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM share_links WHERE claim_id = $1")
            .bind(claim_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn get_claim_by_share_token(&self, token: &str) -> PortResult<ClaimDetail> {
        let mut conn = self.pool.acquire().await.map_err(unexpected)?;
        let claim_id =
            sqlx::query_scalar::<_, Uuid>("SELECT claim_id FROM share_links WHERE token = $1")
                .bind(token)
                .fetch_optional(&mut *conn)
                .await
                .map_err(unexpected)?
                .ok_or_else(|| PortError::NotFound("Share link not found".to_string()))?;
        fetch_detail(&mut conn, claim_id).await
    }
}
