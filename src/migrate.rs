use anyhow::Result;
use sqlx::SqlitePool;

/// Creates the history schema. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // `seq` carries insertion order; timestamps can collide
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            file_json TEXT NOT NULL,
            analysis_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
