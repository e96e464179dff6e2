use case_tracker::config::{load_applicants, load_mail_server, TrackerConfig};
use case_tracker::error::AppError;
use case_tracker::tracker::{
    sender_identity, ApplicantRequest, BatchSummary, FileSnapshotStore, HttpPortal, MailTransport,
    Notifier, Portal, RefreshMode, RefreshPipeline, RefreshReport, SmtpMailer, SnapshotStore,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// The refresh pipeline together with the applicants it is run for.
pub(crate) struct Tracker<P, S, T> {
    pipeline: RefreshPipeline<P, S, T>,
    applicants: Vec<ApplicantRequest>,
}

impl<P, S, T> Tracker<P, S, T>
where
    P: Portal + 'static,
    S: SnapshotStore + 'static,
    T: MailTransport + 'static,
{
    pub(crate) fn new(pipeline: RefreshPipeline<P, S, T>, applicants: Vec<ApplicantRequest>) -> Self {
        Self {
            pipeline,
            applicants,
        }
    }

    pub(crate) fn applicant_count(&self) -> usize {
        self.applicants.len()
    }

    /// Runs every configured applicant once.
    pub(crate) async fn refresh(&self, mode: RefreshMode) -> BatchSummary {
        self.pipeline.run_all(&self.applicants, mode).await
    }

    /// Runs the applicant whose `type:identifier` key is `key`. Unlike a
    /// batch, a failed cycle is returned to the caller.
    pub(crate) async fn refresh_applicant(
        &self,
        key: &str,
        mode: RefreshMode,
    ) -> Result<RefreshReport, AppError> {
        let request = self
            .applicants
            .iter()
            .find(|applicant| applicant.key() == key)
            .ok_or_else(|| AppError::UnknownApplicant(key.to_string()))?;
        Ok(self.pipeline.run(request, mode).await?)
    }
}

pub(crate) type LiveTracker = Tracker<HttpPortal, FileSnapshotStore, SmtpMailer>;

/// Wires the live portal, on-disk store and SMTP mailer from configuration.
/// Any unreadable or invalid configuration file fails here, before serving.
pub(crate) fn build_tracker(config: &TrackerConfig) -> Result<LiveTracker, AppError> {
    let applicants = load_applicants(&config.applicants_path)?;
    let mail_server = load_mail_server(&config.mail_server_path)?;

    let portal = HttpPortal::new(config.portal_base_url.clone(), config.request_timeout)?;
    let store = FileSnapshotStore::new(config.snapshot_dir.clone());
    let mailer = SmtpMailer::from_config(&mail_server, config.request_timeout)?;

    info!(
        applicants = applicants.len(),
        portal = %config.portal_base_url,
        snapshot_dir = %config.snapshot_dir.display(),
        mail_server = %mail_server.server,
        submission = ?mailer.mode(),
        "case tracker configured"
    );

    let notifier = Notifier::new(Arc::new(mailer), sender_identity(&mail_server));
    let pipeline = RefreshPipeline::new(Arc::new(portal), Arc::new(store), notifier);
    Ok(Tracker::new(pipeline, applicants))
}
