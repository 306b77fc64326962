use anyhow::Result;
use log::info;
use sqlx::{Executor, PgPool};

/// Migration files, embedded at compile time and executed in order.
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_channels.sql", include_str!("sql/001_channels.sql")),
    (
        "002_violation_events.sql",
        include_str!("sql/002_violation_events.sql"),
    ),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql).await?;
        info!("applied migration: {}", name);
    }
    Ok(())
}
