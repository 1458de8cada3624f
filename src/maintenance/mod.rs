use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tokio::time::{Duration as TokioDuration, sleep};
use tracing::{error, info};

use crate::web::AppState;

const CLEANUP_INTERVAL_MINUTES: u64 = 15;

pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let interval = TokioDuration::from_secs(CLEANUP_INTERVAL_MINUTES * 60);
        loop {
            if let Err(err) = run_cleanup_cycle(&state).await {
                error!(?err, "session cleanup cycle failed");
            }
            sleep(interval).await;
        }
    });
}

async fn run_cleanup_cycle(state: &AppState) -> Result<()> {
    let removed = purge_expired_sessions(state.pool_ref()).await?;

    if removed > 0 {
        info!(removed, "expired sessions purged");
    }

    Ok(())
}

/// Deletes session rows whose expiry has passed and returns how many went.
pub async fn purge_expired_sessions(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await
        .context("failed to purge expired sessions")?;

    Ok(result.rows_affected())
}
