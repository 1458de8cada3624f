use std::{env, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite://worksharing.db";
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
const DEFAULT_SEED_ADMIN_USERNAME: &str = "admin";
const DEFAULT_SEED_ADMIN_PASSWORD: &str = "change-me";

/// Runtime configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub upload_dir: PathBuf,
    /// Absolute origin used for share links, e.g. `https://share.example.org`.
    pub public_base_url: Option<String>,
    pub max_upload_bytes: usize,
    pub seed_admin_username: String,
    pub seed_admin_password: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env_or("DATABASE_URL", DEFAULT_DATABASE_URL);
        let upload_dir = PathBuf::from(env_or("UPLOAD_DIR", DEFAULT_UPLOAD_DIR));
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty());
        let max_upload_bytes = parse_env("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        Ok(Self {
            database_url,
            upload_dir,
            public_base_url,
            max_upload_bytes,
            seed_admin_username: env_or("SEED_ADMIN_USERNAME", DEFAULT_SEED_ADMIN_USERNAME),
            seed_admin_password: env_or("SEED_ADMIN_PASSWORD", DEFAULT_SEED_ADMIN_PASSWORD),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number, got `{raw}`")),
        _ => Ok(default),
    }
}
