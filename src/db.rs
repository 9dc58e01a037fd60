use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

/// Schema is applied at startup. Membership, and the category/theme
/// back-references written on room creation, live in join tables keyed
/// `(parent, room)` so inserts stay idempotent under retries.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        display_name TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS categories (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        image TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS themes (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        image TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        theme TEXT NOT NULL,
        duration INTEGER NOT NULL,
        start_time TEXT,
        kind TEXT NOT NULL,
        is_sponsored INTEGER NOT NULL DEFAULT 0,
        sponsor_name TEXT,
        owner TEXT NOT NULL,
        max_participants INTEGER NOT NULL DEFAULT 10,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS room_participants (
        room_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        joined_at TEXT NOT NULL,
        UNIQUE(room_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS category_rooms (
        category_id TEXT NOT NULL,
        room_id TEXT NOT NULL,
        UNIQUE(category_id, room_id)
    )",
    "CREATE TABLE IF NOT EXISTS theme_rooms (
        theme_id TEXT NOT NULL,
        room_id TEXT NOT NULL,
        UNIQUE(theme_id, room_id)
    )",
    "CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        recipient TEXT NOT NULL,
        sender TEXT NOT NULL,
        kind TEXT NOT NULL,
        room_id TEXT NOT NULL,
        is_read INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_rooms_start_time ON rooms (start_time)",
    "CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications (recipient, created_at)",
];

pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(url)
        .await?;
    init(&pool).await?;
    Ok(pool)
}

pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_twice() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init(&pool).await.unwrap();
        init(&pool).await.unwrap();

        sqlx::query("INSERT INTO rooms (id, category, theme, duration, kind, owner, max_participants, created_at, updated_at) VALUES ('r', 'c', 't', 30, 'public', 'u', 10, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();
    }
}
