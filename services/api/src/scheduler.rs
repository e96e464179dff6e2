use crate::infra::Tracker;
use case_tracker::tracker::{MailTransport, Portal, RefreshMode, SnapshotStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Starts the periodic change-gated refresh. The first batch runs one full
/// interval after startup; a batch that overruns delays the next tick instead
/// of stacking ticks up.
pub(crate) fn spawn<P, S, T>(tracker: Arc<Tracker<P, S, T>>, every: Duration) -> JoinHandle<()>
where
    P: Portal + 'static,
    S: SnapshotStore + 'static,
    T: MailTransport + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = every.as_secs(),
            applicants = tracker.applicant_count(),
            "refresh scheduler started"
        );

        loop {
            ticker.tick().await;
            debug!("scheduled refresh firing");
            tracker.refresh(RefreshMode::Scheduled).await;
        }
    })
}
