//! API key persistence.

use remembr_core::{AgentId, ApiKey, ApiKeyId, EntityIdType, OrgId, Timestamp, UserId};
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use crate::error::ApiResult;

const API_KEY_COLUMNS: &str =
    "id, org_id, user_id, agent_id, key_hash, name, last_used_at, expires_at, created_at";

fn api_key_from_row(row: &Row) -> ApiKey {
    ApiKey {
        api_key_id: ApiKeyId::new(row.get("id")),
        org_id: OrgId::new(row.get("org_id")),
        user_id: row.get::<_, Option<Uuid>>("user_id").map(UserId::new),
        agent_id: row.get::<_, Option<Uuid>>("agent_id").map(AgentId::new),
        key_hash: row.get("key_hash"),
        name: row.get("name"),
        last_used_at: row.get("last_used_at"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

/// Persist a new API key (the raw value never reaches storage).
pub async fn insert_api_key<C: GenericClient>(
    client: &C,
    org_id: OrgId,
    user_id: Option<UserId>,
    agent_id: Option<AgentId>,
    key_hash: &str,
    name: &str,
    expires_at: Option<Timestamp>,
) -> ApiResult<ApiKey> {
    let row = client
        .query_one(
            &format!(
                "INSERT INTO api_keys (org_id, user_id, agent_id, key_hash, name, expires_at) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING {API_KEY_COLUMNS}"
            ),
            &[
                &org_id.as_uuid(),
                &user_id.map(|id| id.as_uuid()),
                &agent_id.map(|id| id.as_uuid()),
                &key_hash,
                &name,
                &expires_at,
            ],
        )
        .await?;
    Ok(api_key_from_row(&row))
}

/// Find an API key by its stored hash.
pub async fn find_by_hash<C: GenericClient>(
    client: &C,
    key_hash: &str,
) -> ApiResult<Option<ApiKey>> {
    let row = client
        .query_opt(
            &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = $1"),
            &[&key_hash],
        )
        .await?;
    Ok(row.as_ref().map(api_key_from_row))
}

/// Get an API key by id within an organization.
pub async fn get_for_org<C: GenericClient>(
    client: &C,
    key_id: ApiKeyId,
    org_id: OrgId,
) -> ApiResult<Option<ApiKey>> {
    let row = client
        .query_opt(
            &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1 AND org_id = $2"),
            &[&key_id.as_uuid(), &org_id.as_uuid()],
        )
        .await?;
    Ok(row.as_ref().map(api_key_from_row))
}

/// List an organization's API keys, newest first.
pub async fn list_for_org<C: GenericClient>(client: &C, org_id: OrgId) -> ApiResult<Vec<ApiKey>> {
    let rows = client
        .query(
            &format!(
                "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE org_id = $1 \
                 ORDER BY created_at DESC"
            ),
            &[&org_id.as_uuid()],
        )
        .await?;
    Ok(rows.iter().map(api_key_from_row).collect())
}

/// Record a successful use of the key.
pub async fn touch_last_used<C: GenericClient>(
    client: &C,
    key_id: ApiKeyId,
    now: Timestamp,
) -> ApiResult<()> {
    client
        .execute(
            "UPDATE api_keys SET last_used_at = $2 WHERE id = $1",
            &[&key_id.as_uuid(), &now],
        )
        .await?;
    Ok(())
}

/// Revoke a key by expiring it now. Returns true when a row changed.
pub async fn revoke<C: GenericClient>(
    client: &C,
    key_id: ApiKeyId,
    org_id: OrgId,
    now: Timestamp,
) -> ApiResult<bool> {
    let updated = client
        .execute(
            "UPDATE api_keys SET expires_at = $3 WHERE id = $1 AND org_id = $2",
            &[&key_id.as_uuid(), &org_id.as_uuid(), &now],
        )
        .await?;
    Ok(updated > 0)
}
