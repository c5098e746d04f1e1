use anyhow::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Migrations in application order, embedded at build time
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_cctvs.sql",
        include_str!("sql/001_create_cctvs.sql"),
    ),
    ("002_add_indexes.sql", include_str!("sql/002_add_indexes.sql")),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        execute_migration(pool, name, sql).await?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}

async fn execute_migration(pool: &PgPool, name: &str, sql: &str) -> Result<()> {
    pool.execute(sql)
        .await
        .map_err(|e| crate::Error::Database(format!("Migration {} failed: {}", name, e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_by_prefix() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(MIGRATIONS[0].1.contains("CREATE TABLE IF NOT EXISTS cctvs"));
    }
}
