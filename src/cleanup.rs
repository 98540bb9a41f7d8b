//! Scheduled cleanup of expired refresh credentials.

use crate::db::Database;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database) {
    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(e) => {
            error!(error = %e, "System clock is before the unix epoch");
            return;
        }
    };

    // Hashes of refresh tokens that expired without being used or revoked
    match db.principals().clear_expired_refresh_hashes(now).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired refresh credentials", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired refresh credentials: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(db: Database) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db).await;
        }
    })
}
