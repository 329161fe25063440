use anyhow::Result;
use sqlx::SqlitePool;

/// Create every table and index. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per (url, version). `id` is assigned monotonically, so a
    // predecessor always has a smaller id than its successor.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            filename TEXT NOT NULL,
            local_path TEXT NOT NULL,
            filesize_bytes INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            checksum TEXT NOT NULL,
            version INTEGER NOT NULL CHECK (version >= 1),
            previous_version_id INTEGER REFERENCES documents(id),
            first_seen_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            downloaded_at INTEGER NOT NULL,
            UNIQUE(url, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_texts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL REFERENCES documents(id),
            language TEXT NOT NULL,
            is_original INTEGER NOT NULL DEFAULT 1,
            full_text TEXT NOT NULL,
            summary TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keyword_configs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            keyword TEXT NOT NULL UNIQUE,
            category TEXT NOT NULL DEFAULT 'technical',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keyword_matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL REFERENCES documents(id),
            text_id INTEGER NOT NULL REFERENCES document_texts(id),
            keyword_id INTEGER NOT NULL REFERENCES keyword_configs(id),
            occurrences INTEGER NOT NULL DEFAULT 1,
            context_snippet TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL REFERENCES documents(id),
            subject TEXT NOT NULL,
            recipients TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_url ON documents(url, version DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_checksum ON documents(checksum)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_texts_document_id ON document_texts(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_keyword_matches_document_id ON keyword_matches(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notification_logs_document_id ON notification_logs(document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
