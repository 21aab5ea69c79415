use anyhow::Context;
use sqlx::MySqlPool;
use sqlx::migrate::Migrator;
use sqlx::mysql::MySqlPoolOptions;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    User,
    Rbac,
}

pub async fn connect_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> anyhow::Result<MySqlPool> {
    MySqlPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .context("connecting to MySQL")
}

pub async fn run_migrations(pool: &MySqlPool, schema: Schema) -> anyhow::Result<()> {
    // Versions are unique across both sets so standalone mode can share one database.
    let mut migrator: Migrator = match schema {
        Schema::User => sqlx::migrate!("./migrations/user"),
        Schema::Rbac => sqlx::migrate!("./migrations/rbac"),
    };
    migrator.set_ignore_missing(true);
    migrator
        .run(pool)
        .await
        .with_context(|| format!("running {:?} migrations", schema))?;
    tracing::info!(?schema, "migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_versions_do_not_overlap() {
        let user: Migrator = sqlx::migrate!("./migrations/user");
        let rbac: Migrator = sqlx::migrate!("./migrations/rbac");
        for m in rbac.iter() {
            assert!(user.iter().all(|u| u.version != m.version), "{}", m.version);
        }
    }

    #[test]
    fn rbac_names_use_a_binary_collation() {
        let rbac: Migrator = sqlx::migrate!("./migrations/rbac");
        let latest = rbac.iter().max_by_key(|m| m.version).unwrap();
        for table in ["roles", "permissions"] {
            assert!(latest.sql.contains(&format!("ALTER TABLE {}", table)));
        }
        assert_eq!(latest.sql.matches("COLLATE utf8mb4_bin").count(), 4);
    }
}
