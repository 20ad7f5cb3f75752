//! Message repository for PostgreSQL operations
//!
//! Messages reference users by UUID in the schema, while the core works
//! with usernames everywhere else; the queries here resolve usernames via
//! joins so callers never see raw user ids.

use sqlx::PgPool;
use uuid::Uuid;

use crate::data::postgres::PostgresError;
use crate::data::types::ChatMessage;

/// Row shape shared by the history queries
type MessageRow = (String, String, Option<String>, Option<Uuid>, bool, String, i64);

fn row_to_message(row: MessageRow) -> ChatMessage {
    let (id, from, to, group_id, is_group, content, timestamp) = row;
    ChatMessage {
        id,
        from,
        to: to.unwrap_or_default(),
        group_id: group_id.map(|g| g.to_string()).unwrap_or_default(),
        content,
        timestamp,
        is_group,
    }
}

/// Insert a message row, resolving usernames to user ids
pub async fn insert_message(pool: &PgPool, msg: &ChatMessage) -> Result<(), PostgresError> {
    if msg.is_group {
        let group_id = parse_uuid(&msg.group_id)?;
        sqlx::query(
            r#"
            INSERT INTO messages (message_id, from_user_id, group_id, is_group, content, created_at)
            SELECT $1, u.id, $3, TRUE, $4, $5
            FROM users u WHERE u.username = $2
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.from)
        .bind(group_id)
        .bind(&msg.content)
        .bind(msg.timestamp)
        .execute(pool)
        .await?;
    } else {
        sqlx::query(
            r#"
            INSERT INTO messages (message_id, from_user_id, to_user_id, is_group, content, created_at)
            SELECT $1, fu.id, tu.id, FALSE, $4, $5
            FROM users fu, users tu
            WHERE fu.username = $2 AND tu.username = $3
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.from)
        .bind(&msg.to)
        .bind(&msg.content)
        .bind(msg.timestamp)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Most recent direct messages between two users, newest first
pub async fn recent_direct_messages(
    pool: &PgPool,
    a: &str,
    b: &str,
    limit: usize,
) -> Result<Vec<ChatMessage>, PostgresError> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        r#"
        SELECT m.message_id, fu.username, tu.username, m.group_id, m.is_group, m.content, m.created_at
        FROM messages m
        JOIN users fu ON fu.id = m.from_user_id
        JOIN users tu ON tu.id = m.to_user_id
        WHERE m.is_group = FALSE
          AND ((fu.username = $1 AND tu.username = $2)
            OR (fu.username = $2 AND tu.username = $1))
        ORDER BY m.created_at DESC
        LIMIT $3
        "#,
    )
    .bind(a)
    .bind(b)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_message).collect())
}

/// Direct messages older than `before_ts`, newest first
pub async fn direct_messages_before(
    pool: &PgPool,
    a: &str,
    b: &str,
    before_ts: i64,
    limit: usize,
) -> Result<Vec<ChatMessage>, PostgresError> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        r#"
        SELECT m.message_id, fu.username, tu.username, m.group_id, m.is_group, m.content, m.created_at
        FROM messages m
        JOIN users fu ON fu.id = m.from_user_id
        JOIN users tu ON tu.id = m.to_user_id
        WHERE m.is_group = FALSE
          AND m.created_at < $3
          AND ((fu.username = $1 AND tu.username = $2)
            OR (fu.username = $2 AND tu.username = $1))
        ORDER BY m.created_at DESC
        LIMIT $4
        "#,
    )
    .bind(a)
    .bind(b)
    .bind(before_ts)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_message).collect())
}

/// Most recent group messages, newest first
pub async fn recent_group_messages(
    pool: &PgPool,
    group_id: &str,
    limit: usize,
) -> Result<Vec<ChatMessage>, PostgresError> {
    let group_id = parse_uuid(group_id)?;
    let rows: Vec<MessageRow> = sqlx::query_as(
        r#"
        SELECT m.message_id, fu.username, NULL::text, m.group_id, m.is_group, m.content, m.created_at
        FROM messages m
        JOIN users fu ON fu.id = m.from_user_id
        WHERE m.is_group = TRUE AND m.group_id = $1
        ORDER BY m.created_at DESC
        LIMIT $2
        "#,
    )
    .bind(group_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_message).collect())
}

/// Group messages older than `before_ts`, newest first
pub async fn group_messages_before(
    pool: &PgPool,
    group_id: &str,
    before_ts: i64,
    limit: usize,
) -> Result<Vec<ChatMessage>, PostgresError> {
    let group_id = parse_uuid(group_id)?;
    let rows: Vec<MessageRow> = sqlx::query_as(
        r#"
        SELECT m.message_id, fu.username, NULL::text, m.group_id, m.is_group, m.content, m.created_at
        FROM messages m
        JOIN users fu ON fu.id = m.from_user_id
        WHERE m.is_group = TRUE AND m.group_id = $1 AND m.created_at < $2
        ORDER BY m.created_at DESC
        LIMIT $3
        "#,
    )
    .bind(group_id)
    .bind(before_ts)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_message).collect())
}

fn parse_uuid(value: &str) -> Result<Uuid, PostgresError> {
    Uuid::parse_str(value).map_err(|_| PostgresError::InvalidId(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_to_message_direct() {
        let row = (
            "m1".to_string(),
            "alice".to_string(),
            Some("bob".to_string()),
            None,
            false,
            "hi".to_string(),
            42,
        );
        let msg = row_to_message(row);
        assert_eq!(msg.to, "bob");
        assert!(msg.group_id.is_empty());
        assert!(!msg.is_group);
    }

    #[test]
    fn test_row_to_message_group() {
        let gid = Uuid::new_v4();
        let row = (
            "m2".to_string(),
            "alice".to_string(),
            None,
            Some(gid),
            true,
            "hi all".to_string(),
            42,
        );
        let msg = row_to_message(row);
        assert!(msg.to.is_empty());
        assert_eq!(msg.group_id, gid.to_string());
        assert!(msg.is_group);
    }

    #[test]
    fn test_parse_uuid_rejects_garbage() {
        assert!(parse_uuid("not-a-uuid").is_err());
        assert!(parse_uuid(&Uuid::new_v4().to_string()).is_ok());
    }
}
