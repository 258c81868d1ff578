//! Append-only audit log writes.

use remembr_core::{AuditAction, AuditStatus, EntityIdType, OrgId, UserId};
use tokio_postgres::GenericClient;

use crate::error::ApiResult;

/// Fields of one audit record.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub org_id: Option<OrgId>,
    pub actor_user_id: Option<UserId>,
    pub action: AuditAction,
    pub status: AuditStatus,
    pub target_type: &'a str,
    pub target_id: Option<String>,
    pub request_id: &'a str,
    pub details: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// Insert one audit row.
///
/// Callers run this on a connection independent of the mutating transaction
/// so the record survives a rollback.
pub async fn write_audit<C: GenericClient>(client: &C, record: &AuditRecord<'_>) -> ApiResult<()> {
    client
        .execute(
            "INSERT INTO audit_log \
             (org_id, actor_user_id, action, status, target_type, target_id, \
              request_id, details, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &record.org_id.map(|id| id.as_uuid()),
                &record.actor_user_id.map(|id| id.as_uuid()),
                &record.action.as_str(),
                &record.status.as_str(),
                &record.target_type,
                &record.target_id,
                &record.request_id,
                &record.details,
                &record.error_message,
            ],
        )
        .await?;
    Ok(())
}
