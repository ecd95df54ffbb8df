//! Background retention: crash recovery, request/detail expiry, bucket
//! TTLs, and cooldown garbage collection.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use maxx_stats::StatsService;
use maxx_storage::Store;
use maxx_storage::store::settings::{
    DEFAULT_REQUEST_DETAIL_RETENTION_SECONDS, DEFAULT_REQUEST_RETENTION_HOURS,
    REQUEST_DETAIL_RETENTION_SECONDS, REQUEST_RETENTION_HOURS,
};

const TICK: Duration = Duration::from_secs(60);
/// In-flight rows older than this are treated as stuck regardless of
/// owner.
const STUCK_AFTER: time::Duration = time::Duration::from_secs(30 * 60);

pub struct Janitor {
    store: Store,
    stats: StatsService,
    instance_id: String,
}

impl Janitor {
    pub fn new(store: Store, stats: StatsService, instance_id: String) -> Self {
        Self {
            store,
            stats,
            instance_id,
        }
    }

    /// Runs once at startup, then every minute.
    pub async fn run_loop(self: Arc<Self>) {
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once(OffsetDateTime::now_utc()).await;
        }
    }

    pub async fn run_once(&self, now: OffsetDateTime) {
        match self
            .store
            .mark_stale_as_failed(&self.instance_id, now - stuck_cutoff())
            .await
        {
            Ok(0) => {}
            Ok(marked) => info!(marked, "stale in-flight requests failed over"),
            Err(err) => warn!(error = %err, "stale sweep failed"),
        }

        match self
            .store
            .setting_i64(REQUEST_RETENTION_HOURS, DEFAULT_REQUEST_RETENTION_HOURS)
            .await
        {
            Ok(hours) if hours > 0 => {
                match self
                    .store
                    .delete_requests_before(now - time::Duration::hours(hours))
                    .await
                {
                    Ok(0) => {}
                    Ok(deleted) => info!(deleted, "expired requests removed"),
                    Err(err) => warn!(error = %err, "request retention sweep failed"),
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "retention setting read failed"),
        }

        match self
            .store
            .setting_i64(
                REQUEST_DETAIL_RETENTION_SECONDS,
                DEFAULT_REQUEST_DETAIL_RETENTION_SECONDS,
            )
            .await
        {
            // -1 keeps detail blobs forever.
            Ok(seconds) if seconds >= 0 => {
                if let Err(err) = self
                    .store
                    .strip_request_details_before(now - time::Duration::seconds(seconds))
                    .await
                {
                    warn!(error = %err, "detail strip failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "detail retention setting read failed"),
        }

        if let Err(err) = self.stats.enforce_retention(now).await {
            warn!(error = %err, "usage bucket retention failed");
        }

        if let Err(err) = self.store.delete_expired_cooldowns(now).await {
            warn!(error = %err, "cooldown expiry sweep failed");
        }
    }
}

fn stuck_cutoff() -> time::Duration {
    STUCK_AFTER
}
