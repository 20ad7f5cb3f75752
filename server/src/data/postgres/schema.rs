//! PostgreSQL schema
//!
//! The table layout is shared with the account/group services; the core
//! only writes `messages` and reads the rest.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initial schema
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id            UUID PRIMARY KEY,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    icon          TEXT,
    custom_icon   TEXT,
    created_at    BIGINT NOT NULL,
    updated_at    BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT,
    icon        TEXT,
    custom_icon TEXT,
    created_by  UUID NOT NULL REFERENCES users(id),
    created_at  BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id  UUID NOT NULL REFERENCES groups(id),
    user_id   UUID NOT NULL REFERENCES users(id),
    role      TEXT NOT NULL DEFAULT 'member',
    joined_at BIGINT NOT NULL,
    PRIMARY KEY (group_id, user_id)
);

CREATE TABLE IF NOT EXISTS friends (
    user_id    UUID NOT NULL REFERENCES users(id),
    friend_id  UUID NOT NULL REFERENCES users(id),
    accepted   BOOLEAN NOT NULL DEFAULT FALSE,
    created_at BIGINT NOT NULL,
    PRIMARY KEY (user_id, friend_id)
);

CREATE TABLE IF NOT EXISTS messages (
    message_id   TEXT PRIMARY KEY,
    from_user_id UUID NOT NULL REFERENCES users(id),
    to_user_id   UUID REFERENCES users(id),
    group_id     UUID REFERENCES groups(id),
    is_group     BOOLEAN NOT NULL DEFAULT FALSE,
    content      TEXT NOT NULL,
    created_at   BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_direct
    ON messages (from_user_id, to_user_id, created_at DESC)
    WHERE is_group = FALSE;

CREATE INDEX IF NOT EXISTS idx_messages_group
    ON messages (group_id, created_at DESC)
    WHERE is_group = TRUE;
"#;
