use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::auth::AppState;

/// Background task flipping lapsed `pending` invitations to `expired`.
///
/// Reads already report lapsed invitations as expired; this keeps the
/// stored status and the sender quotas in line with them.
pub async fn run_sweep_loop(state: AppState, period: Duration) {
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        match sweep_once(&state).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: expired {} invitations", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}

pub async fn sweep_once(state: &AppState) -> Result<usize, crate::error::ApiError> {
    let now = muse_db::to_db_time(Utc::now());
    state.with_db(move |db| db.expire_stale_invitations(&now)).await
}
