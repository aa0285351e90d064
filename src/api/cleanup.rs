//! Periodic sweep of expired tokens, stale sessions and dead KV entries.
//!
//! Every step is idempotent, so several instances may run the job concurrently.

use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info};

use super::handlers::auth::AuthState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tokens: u64,
    pub sessions: u64,
    pub kv_entries: u64,
}

/// Run one sweep now and then every `interval`.
pub fn spawn_cleanup_job(auth_state: Arc<AuthState>, interval: Duration) -> JoinHandle<()> {
    let interval = if interval.is_zero() {
        Duration::from_secs(1)
    } else {
        interval
    };

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep(&auth_state).await {
                Ok(report) => info!(
                    tokens = report.tokens,
                    sessions = report.sessions,
                    kv_entries = report.kv_entries,
                    "cleanup sweep finished"
                ),
                Err(err) => error!("cleanup sweep failed: {err:#}"),
            }
        }
    })
}

pub(crate) async fn sweep(auth_state: &AuthState) -> Result<SweepReport> {
    let report = auth_state.service().cleanup().await?;
    let kv_entries = auth_state.kv().purge_expired().await?;
    Ok(SweepReport {
        tokens: report.tokens,
        sessions: report.sessions,
        kv_entries,
    })
}
