//! One refresh cycle per applicant: sign in, scrape, snapshot, diff, notify.
//!
//! A cycle walks the stages of [`RefreshStage`] in order and stops at the
//! first error. Nothing is written before `Persisting`, so a failed cycle
//! leaves the previous record as it was. For a given case the order is always
//! load previous, save current, decide, notify.
//!
//! Every observation is numbered just before its detail page is requested.
//! A commit whose number is lower than the last one committed for the same
//! case is discarded, so a slow cycle never overwrites a newer observation.
//! Store calls run on the blocking pool.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use super::detect::has_changed;
use super::domain::{ApplicantRequest, CaseSnapshot};
use super::extract::{self, ParsingError};
use super::locks::KeyedLocks;
use super::notify::{MailTransport, NotificationError, Notifier};
use super::portal::{FetchError, Page, Portal, SessionError};
use super::store::{SnapshotStore, StoreError};

/// What triggered a cycle. Only `Forced` bypasses change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    Scheduled,
    OnDemand,
    Forced,
}

impl RefreshMode {
    pub fn label(self) -> &'static str {
        match self {
            RefreshMode::Scheduled => "scheduled",
            RefreshMode::OnDemand => "on_demand",
            RefreshMode::Forced => "forced",
        }
    }

    fn always_notifies(self) -> bool {
        matches!(self, RefreshMode::Forced)
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStage {
    Authenticating,
    FetchingStatus,
    ExtractingStatus,
    FetchingDetails,
    ExtractingDetails,
    Diffing,
    Persisting,
    Notifying,
}

impl RefreshStage {
    pub fn label(self) -> &'static str {
        match self {
            RefreshStage::Authenticating => "authenticating",
            RefreshStage::FetchingStatus => "fetching status",
            RefreshStage::ExtractingStatus => "extracting status",
            RefreshStage::FetchingDetails => "fetching details",
            RefreshStage::ExtractingDetails => "extracting details",
            RefreshStage::Diffing => "diffing",
            RefreshStage::Persisting => "persisting",
            RefreshStage::Notifying => "notifying",
        }
    }
}

impl fmt::Display for RefreshStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The status page listed no case. The portal shows the same page for a
    /// rejected identity and for an identity without a case on file.
    #[error("no case found for applicant {applicant}: identity rejected or no case on file")]
    NoCaseFound { applicant: String },
    #[error(transparent)]
    Parsing(#[from] ParsingError),
    #[error("snapshot store failed while {stage}: {source}")]
    Store {
        stage: RefreshStage,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Notification(#[from] NotificationError),
}

impl RefreshError {
    /// Stage the cycle was in when it failed.
    pub fn stage(&self) -> RefreshStage {
        match self {
            RefreshError::Session(_) => RefreshStage::Authenticating,
            RefreshError::Fetch(FetchError::Transport { page, .. })
            | RefreshError::Fetch(FetchError::Status { page, .. }) => match page {
                Page::StatusListing => RefreshStage::FetchingStatus,
                Page::CaseDetail { .. } => RefreshStage::FetchingDetails,
            },
            RefreshError::NoCaseFound { .. } => RefreshStage::ExtractingStatus,
            RefreshError::Parsing(ParsingError::MissingDetails { .. }) => {
                RefreshStage::ExtractingDetails
            }
            RefreshError::Parsing(_) => RefreshStage::ExtractingStatus,
            RefreshError::Store { stage, .. } => *stage,
            RefreshError::Notification(_) => RefreshStage::Notifying,
        }
    }
}

/// Outcome of a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub case_id: String,
    pub mode: RefreshMode,
    pub changed: bool,
    pub notified: bool,
    /// A newer observation of the same case was committed first; this one
    /// was dropped without touching the store.
    pub superseded: bool,
}

/// A snapshot together with the order in which it was observed.
struct Observation {
    snapshot: CaseSnapshot,
    sequence: u64,
}

/// Counts for one batch over every configured applicant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub mode: RefreshMode,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub notified: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives refresh cycles against a portal, a snapshot store and a notifier.
///
/// Cycles for the same applicant are serialized, and so are the
/// load/save/notify sections for the same case id, so two triggers firing
/// together never interleave on one case.
pub struct RefreshPipeline<P, S, T> {
    portal: Arc<P>,
    store: Arc<S>,
    notifier: Notifier<T>,
    applicant_locks: KeyedLocks,
    case_locks: KeyedLocks,
    observations: AtomicU64,
    committed: Mutex<HashMap<String, u64>>,
}

impl<P, S, T> RefreshPipeline<P, S, T>
where
    P: Portal + 'static,
    S: SnapshotStore + 'static,
    T: MailTransport + 'static,
{
    pub fn new(portal: Arc<P>, store: Arc<S>, notifier: Notifier<T>) -> Self {
        Self {
            portal,
            store,
            notifier,
            applicant_locks: KeyedLocks::new(),
            case_locks: KeyedLocks::new(),
            observations: AtomicU64::new(0),
            committed: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one full cycle for `request`.
    pub async fn run(
        &self,
        request: &ApplicantRequest,
        mode: RefreshMode,
    ) -> Result<RefreshReport, RefreshError> {
        let applicant = request.key();
        let span = info_span!("refresh", %applicant, %mode);

        async {
            let _in_flight = self.applicant_locks.lock(&applicant).await;
            let observation = self.retrieve(request).await?;
            self.commit(observation, mode).await
        }
        .instrument(span)
        .await
    }

    /// Runs every request concurrently. Failures are logged and counted; they
    /// never stop the other requests.
    pub async fn run_all(&self, requests: &[ApplicantRequest], mode: RefreshMode) -> BatchSummary {
        let started_at = Utc::now();
        let outcomes = join_all(requests.iter().map(|request| self.run(request, mode))).await;

        let mut summary = BatchSummary {
            mode,
            attempted: requests.len(),
            succeeded: 0,
            failed: 0,
            notified: 0,
            started_at,
            finished_at: started_at,
        };

        for (request, outcome) in requests.iter().zip(outcomes) {
            match outcome {
                Ok(report) => {
                    summary.succeeded += 1;
                    if report.notified {
                        summary.notified += 1;
                    }
                }
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        applicant = %request.key(),
                        %mode,
                        stage = %err.stage(),
                        error = %err,
                        "refresh failed"
                    );
                }
            }
        }

        summary.finished_at = Utc::now();
        info!(
            %mode,
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            notified = summary.notified,
            "refresh batch finished"
        );
        summary
    }

    /// Stages up to and including `ExtractingDetails`. No side effects.
    async fn retrieve(&self, request: &ApplicantRequest) -> Result<Observation, RefreshError> {
        enter(RefreshStage::Authenticating);
        let session = self.portal.open_session(request).await?;

        enter(RefreshStage::FetchingStatus);
        let status_page = self
            .portal
            .fetch_page(&session, &Page::StatusListing)
            .await?;

        enter(RefreshStage::ExtractingStatus);
        let case_id = extract::case_id(&status_page);
        if case_id.is_empty() {
            return Err(RefreshError::NoCaseFound {
                applicant: request.key(),
            });
        }
        let status = extract::case_status(&status_page, &case_id)?;
        let name = extract::applicant_name(&status_page, &case_id)?;

        enter(RefreshStage::FetchingDetails);
        let sequence = self.observations.fetch_add(1, Ordering::SeqCst);
        let detail_page = self
            .portal
            .fetch_page(
                &session,
                &Page::CaseDetail {
                    case_id: case_id.clone(),
                },
            )
            .await?;

        enter(RefreshStage::ExtractingDetails);
        let details = extract::case_details(&detail_page, &case_id)?;

        Ok(Observation {
            snapshot: CaseSnapshot {
                case_id,
                name,
                status,
                details,
                recipients: request.recipients.clone(),
            },
            sequence,
        })
    }

    async fn commit(
        &self,
        observation: Observation,
        mode: RefreshMode,
    ) -> Result<RefreshReport, RefreshError> {
        let Observation { snapshot, sequence } = observation;
        let _case = self.case_locks.lock(&snapshot.case_id).await;

        enter(RefreshStage::Diffing);
        if let Some(newer) = self.newer_commit(&snapshot.case_id, sequence) {
            info!(
                case_id = %snapshot.case_id,
                sequence,
                newer,
                "discarding superseded observation"
            );
            return Ok(RefreshReport {
                case_id: snapshot.case_id,
                mode,
                changed: false,
                notified: false,
                superseded: true,
            });
        }

        let case_id = snapshot.case_id.clone();
        let previous = self
            .with_store(RefreshStage::Diffing, move |store| store.load(&case_id))
            .await?;

        enter(RefreshStage::Persisting);
        let record = snapshot.clone();
        self.with_store(RefreshStage::Persisting, move |store| store.save(&record))
            .await?;
        self.committed
            .lock()
            .expect("commit table poisoned")
            .insert(snapshot.case_id.clone(), sequence);

        let changed = has_changed(previous.as_ref(), &snapshot);
        let notify = changed || mode.always_notifies();
        if notify {
            enter(RefreshStage::Notifying);
            self.notifier.notify(&snapshot).await?;
        }

        info!(
            case_id = %snapshot.case_id,
            first_observation = previous.is_none(),
            changed,
            notified = notify,
            "refresh complete"
        );
        Ok(RefreshReport {
            case_id: snapshot.case_id,
            mode,
            changed,
            notified: notify,
            superseded: false,
        })
    }

    /// Sequence of a later observation already committed for `case_id`.
    fn newer_commit(&self, case_id: &str, sequence: u64) -> Option<u64> {
        let committed = self.committed.lock().expect("commit table poisoned");
        committed
            .get(case_id)
            .copied()
            .filter(|&last| last > sequence)
    }

    /// Runs a store call on the blocking pool; file stores fsync and rename.
    async fn with_store<R, F>(&self, stage: RefreshStage, call: F) -> Result<R, RefreshError>
    where
        F: FnOnce(&S) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let outcome = match tokio::task::spawn_blocking(move || call(&store)).await {
            Ok(outcome) => outcome,
            Err(join) => Err(StoreError::Worker(join)),
        };
        outcome.map_err(|source| RefreshError::Store { stage, source })
    }
}

fn enter(stage: RefreshStage) {
    debug!(%stage, "entering stage");
}
