use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// comparison in SQL matches chronological order.
async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    // Connected platform accounts
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            platform TEXT NOT NULL,
            external_user_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT,
            token_expires_at TEXT,
            status TEXT NOT NULL DEFAULT 'healthy',
            last_error TEXT,
            connected_at TEXT NOT NULL,
            last_refreshed_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (owner, platform, external_user_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create accounts table")?;

    // Publishable pages / identities under an account
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS sub_accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            external_id TEXT NOT NULL,
            name TEXT NOT NULL,
            platform TEXT NOT NULL,
            follower_count INTEGER NOT NULL DEFAULT 0,
            can_post INTEGER NOT NULL DEFAULT 1,
            can_schedule INTEGER NOT NULL DEFAULT 1,
            can_upload_media INTEGER NOT NULL DEFAULT 1,
            max_media_count INTEGER NOT NULL,
            max_characters INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'healthy',
            access_token TEXT,
            created_at TEXT NOT NULL,
            UNIQUE (account_id, external_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create sub_accounts table")?;

    // Authored posts
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            content TEXT NOT NULL,
            channel_overrides TEXT NOT NULL DEFAULT '{}',
            platform_options TEXT,
            status TEXT NOT NULL,
            scheduled_for TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            published_at TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    // Per sub-account publishing targets; next_attempt_at doubles as the queue
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS post_targets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            sub_account_id INTEGER REFERENCES sub_accounts(id) ON DELETE SET NULL,
            platform TEXT NOT NULL,
            account_name TEXT NOT NULL,
            status TEXT NOT NULL,
            published_url TEXT,
            published_at TEXT,
            platform_post_id TEXT,
            error TEXT,
            scheduled_for TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT,
            claimed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create post_targets table")?;

    // Uploaded media
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS media (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            kind TEXT NOT NULL,
            file_name TEXT NOT NULL,
            url TEXT NOT NULL,
            thumbnail_url TEXT,
            width INTEGER,
            height INTEGER,
            size_bytes INTEGER NOT NULL,
            content_type TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create media table")?;

    // Ordered media attached to a post
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS post_media (
            post_id INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            media_id INTEGER NOT NULL REFERENCES media(id),
            position INTEGER NOT NULL,
            PRIMARY KEY (post_id, position)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create post_media table")?;

    // Pending OAuth authorizations
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS oauth_states (
            state TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            platform TEXT NOT NULL,
            code_verifier TEXT NOT NULL,
            frontend_origin TEXT,
            created_at TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create oauth_states table")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: adding indexes");

    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_accounts_owner ON accounts(owner)",
        "CREATE INDEX IF NOT EXISTS idx_sub_accounts_account ON sub_accounts(account_id)",
        "CREATE INDEX IF NOT EXISTS idx_posts_owner_created ON posts(owner, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_post_targets_post ON post_targets(post_id)",
        "CREATE INDEX IF NOT EXISTS idx_post_targets_sub_account ON post_targets(sub_account_id)",
        "CREATE INDEX IF NOT EXISTS idx_post_targets_queue ON post_targets(next_attempt_at) WHERE next_attempt_at IS NOT NULL",
        "CREATE INDEX IF NOT EXISTS idx_post_media_media ON post_media(media_id)",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to run: {statement}"))?;
    }

    Ok(())
}
