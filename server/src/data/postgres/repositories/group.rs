//! Group repository for PostgreSQL operations
//!
//! Read-only: group CRUD belongs to the collaborating group service. The
//! core needs member lists for fan-out and membership checks for
//! authorization and visibility.

use sqlx::PgPool;
use uuid::Uuid;

use crate::data::postgres::PostgresError;

/// Usernames of every member of a group
pub async fn group_members(pool: &PgPool, group_id: &str) -> Result<Vec<String>, PostgresError> {
    let group_id = parse_uuid(group_id)?;
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT u.username
        FROM group_members gm
        JOIN users u ON u.id = gm.user_id
        WHERE gm.group_id = $1
        "#,
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(username,)| username).collect())
}

/// Whether a user belongs to a group
pub async fn is_member(pool: &PgPool, group_id: &str, username: &str) -> Result<bool, PostgresError> {
    let group_id = parse_uuid(group_id)?;
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM group_members gm
            JOIN users u ON u.id = gm.user_id
            WHERE gm.group_id = $1 AND u.username = $2
        )
        "#,
    )
    .bind(group_id)
    .bind(username)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

/// Ids of every group a user belongs to (captured at WS connect time)
pub async fn member_group_ids(pool: &PgPool, username: &str) -> Result<Vec<String>, PostgresError> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT gm.group_id
        FROM group_members gm
        JOIN users u ON u.id = gm.user_id
        WHERE u.username = $1
        "#,
    )
    .bind(username)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id.to_string()).collect())
}

fn parse_uuid(value: &str) -> Result<Uuid, PostgresError> {
    Uuid::parse_str(value).map_err(|_| PostgresError::InvalidId(value.to_string()))
}
