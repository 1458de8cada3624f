use std::{path::Path, str::FromStr, sync::Arc};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::info;
use uuid::Uuid;

use crate::{config::AppConfig, web::storage};

#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
    config: Arc<AppConfig>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("invalid DATABASE_URL `{}`", config.database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("failed to open SQLite database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        storage::ensure_storage_root(&config.upload_dir).await?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    pub async fn ensure_seed_admin(&self) -> Result<()> {
        let has_admin: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE is_admin = 1)")
                .fetch_one(&self.pool)
                .await
                .context("failed to verify admin presence")?;

        if has_admin {
            return Ok(());
        }

        let username = self.config.seed_admin_username.as_str();
        let password_hash = crate::web::auth::hash_password(&self.config.seed_admin_password)
            .map_err(|err| anyhow!("failed to hash seed admin password: {err}"))?;
        let invite_code = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO users (username, password_hash, is_admin, invite_code, created_at)
             VALUES (?, ?, 1, ?, ?)",
        )
        .bind(username)
        .bind(password_hash)
        .bind(&invite_code)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to insert seed admin user")?;

        info!(
            %username,
            %invite_code,
            "Seeded default admin user. Change its password promptly."
        );

        Ok(())
    }

    pub fn pool_ref(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn upload_dir(&self) -> &Path {
        &self.config.upload_dir
    }
}
