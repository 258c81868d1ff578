//! Organization and user persistence.

use remembr_core::{EntityIdType, OrgId, Organization, TeamId, User, UserId};
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use crate::error::ApiResult;

const USER_COLUMNS: &str =
    "id, org_id, team_id, email, hashed_password, is_active, created_at, updated_at";

fn user_from_row(row: &Row) -> User {
    User {
        user_id: UserId::new(row.get("id")),
        org_id: OrgId::new(row.get("org_id")),
        team_id: row.get::<_, Option<Uuid>>("team_id").map(TeamId::new),
        email: row.get("email"),
        hashed_password: row.get("hashed_password"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Create an organization.
pub async fn create_org<C: GenericClient>(client: &C, name: &str) -> ApiResult<Organization> {
    let row = client
        .query_one(
            "INSERT INTO organizations (name) VALUES ($1) \
             RETURNING id, name, created_at, updated_at",
            &[&name],
        )
        .await?;

    Ok(Organization {
        org_id: OrgId::new(row.get("id")),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Create a user in an organization. The email column's unique constraint
/// surfaces duplicates as a conflict.
pub async fn create_user<C: GenericClient>(
    client: &C,
    org_id: OrgId,
    email: &str,
    hashed_password: &str,
) -> ApiResult<User> {
    let row = client
        .query_one(
            &format!(
                "INSERT INTO users (org_id, email, hashed_password, is_active) \
                 VALUES ($1, $2, $3, TRUE) RETURNING {USER_COLUMNS}"
            ),
            &[&org_id.as_uuid(), &email, &hashed_password],
        )
        .await?;
    Ok(user_from_row(&row))
}

/// Find a user by email.
pub async fn find_user_by_email<C: GenericClient>(
    client: &C,
    email: &str,
) -> ApiResult<Option<User>> {
    let row = client
        .query_opt(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"),
            &[&email],
        )
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

/// Get a user by id.
pub async fn get_user<C: GenericClient>(client: &C, user_id: UserId) -> ApiResult<Option<User>> {
    let row = client
        .query_opt(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"),
            &[&user_id.as_uuid()],
        )
        .await?;
    Ok(row.as_ref().map(user_from_row))
}
