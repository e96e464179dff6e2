use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use async_trait::async_trait;

use crate::tracker::domain::{ApplicantRequest, CaseSnapshot};
use crate::tracker::notify::{
    MailTransport, NotificationError, Notifier, OutgoingMessage, SenderIdentity,
};
use crate::tracker::pipeline::RefreshPipeline;
use crate::tracker::portal::{FetchError, Page, Portal, Session, SessionError};
use crate::tracker::store::{SnapshotStore, StoreError};

pub(super) const STATUS_PAGE: &str = include_str!("../../../tests/fixtures/status_page.html");
pub(super) const DETAILS_PAGE: &str = include_str!("../../../tests/fixtures/details_page.html");
pub(super) const SIGNED_OUT_PAGE: &str =
    include_str!("../../../tests/fixtures/signed_out_page.html");

pub(super) fn applicant() -> ApplicantRequest {
    ApplicantRequest {
        identifier_type: "3".to_string(),
        identifier: "A1234567".to_string(),
        surname: "Doe".to_string(),
        date_of_birth: "1990-01-01".to_string(),
        country: "CA".to_string(),
        recipients: vec!["a@example.com".to_string()],
    }
}

/// Portal answering with canned pages.
pub(super) struct StubPortal {
    status_page: Mutex<String>,
    detail_page: Mutex<String>,
    reject_session: bool,
    pub(super) requested: Mutex<Vec<Page>>,
}

impl StubPortal {
    pub(super) fn new(status_page: &str, detail_page: &str) -> Self {
        Self {
            status_page: Mutex::new(status_page.to_string()),
            detail_page: Mutex::new(detail_page.to_string()),
            reject_session: false,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn without_session_cookie() -> Self {
        Self {
            reject_session: true,
            ..Self::new(STATUS_PAGE, DETAILS_PAGE)
        }
    }

    pub(super) fn set_detail_page(&self, page: &str) {
        *self.detail_page.lock().expect("portal mutex poisoned") = page.to_string();
    }

    pub(super) fn requested(&self) -> Vec<Page> {
        self.requested.lock().expect("portal mutex poisoned").clone()
    }
}

#[async_trait]
impl Portal for StubPortal {
    async fn open_session(&self, _request: &ApplicantRequest) -> Result<Session, SessionError> {
        if self.reject_session {
            return Err(SessionError::MissingCookie);
        }
        Ok(Session::new("stub-session"))
    }

    async fn fetch_page(&self, _session: &Session, page: &Page) -> Result<String, FetchError> {
        self.requested
            .lock()
            .expect("portal mutex poisoned")
            .push(page.clone());
        let body = match page {
            Page::StatusListing => &self.status_page,
            Page::CaseDetail { .. } => &self.detail_page,
        };
        Ok(body.lock().expect("portal mutex poisoned").clone())
    }
}

/// Serves detail pages in request order and stalls the response for one
/// identity, so two applicants sharing a case can finish out of order.
pub(super) struct StaggeredPortal {
    detail_pages: Mutex<VecDeque<String>>,
    slow_identifier: String,
    stall: Duration,
}

impl StaggeredPortal {
    pub(super) fn new(detail_pages: &[&str], slow_identifier: &str, stall: Duration) -> Self {
        Self {
            detail_pages: Mutex::new(detail_pages.iter().map(|page| page.to_string()).collect()),
            slow_identifier: slow_identifier.to_string(),
            stall,
        }
    }
}

#[async_trait]
impl Portal for StaggeredPortal {
    async fn open_session(&self, request: &ApplicantRequest) -> Result<Session, SessionError> {
        Ok(Session::new(&request.identifier))
    }

    async fn fetch_page(&self, session: &Session, page: &Page) -> Result<String, FetchError> {
        match page {
            Page::StatusListing => Ok(STATUS_PAGE.to_string()),
            Page::CaseDetail { .. } => {
                let body = self
                    .detail_pages
                    .lock()
                    .expect("portal mutex poisoned")
                    .pop_front()
                    .unwrap_or_default();
                if session.cookie().ends_with(&self.slow_identifier) {
                    tokio::time::sleep(self.stall).await;
                }
                Ok(body)
            }
        }
    }
}

/// Snapshot store kept in memory, counting operations.
#[derive(Default)]
pub(super) struct MemoryStore {
    records: Mutex<HashMap<String, CaseSnapshot>>,
    pub(super) loads: Mutex<usize>,
    pub(super) saves: Mutex<usize>,
    pub(super) fail_saves: bool,
    io_threads: Mutex<Vec<ThreadId>>,
}

impl MemoryStore {
    pub(super) fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub(super) fn seed(&self, snapshot: CaseSnapshot) {
        self.records
            .lock()
            .expect("store mutex poisoned")
            .insert(snapshot.case_id.clone(), snapshot);
    }

    pub(super) fn get(&self, case_id: &str) -> Option<CaseSnapshot> {
        self.records
            .lock()
            .expect("store mutex poisoned")
            .get(case_id)
            .cloned()
    }

    pub(super) fn loads(&self) -> usize {
        *self.loads.lock().expect("store mutex poisoned")
    }

    pub(super) fn saves(&self) -> usize {
        *self.saves.lock().expect("store mutex poisoned")
    }

    /// Threads every load and save ran on.
    pub(super) fn io_threads(&self) -> Vec<ThreadId> {
        self.io_threads.lock().expect("store mutex poisoned").clone()
    }

    fn record_thread(&self) {
        self.io_threads
            .lock()
            .expect("store mutex poisoned")
            .push(thread::current().id());
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, case_id: &str) -> Result<Option<CaseSnapshot>, StoreError> {
        self.record_thread();
        *self.loads.lock().expect("store mutex poisoned") += 1;
        Ok(self.get(case_id))
    }

    fn save(&self, snapshot: &CaseSnapshot) -> Result<(), StoreError> {
        self.record_thread();
        if self.fail_saves {
            return Err(StoreError::InvalidKey(snapshot.case_id.clone()));
        }
        *self.saves.lock().expect("store mutex poisoned") += 1;
        self.seed(snapshot.clone());
        Ok(())
    }
}

/// Transport recording every message instead of sending it.
#[derive(Default)]
pub(super) struct MemoryTransport {
    sent: Mutex<Vec<OutgoingMessage>>,
    pub(super) fail: bool,
}

impl MemoryTransport {
    pub(super) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(super) fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().expect("transport mutex poisoned").clone()
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), NotificationError> {
        if self.fail {
            return Err(NotificationError::Delivery("relay refused".to_string()));
        }
        self.sent
            .lock()
            .expect("transport mutex poisoned")
            .push(message.clone());
        Ok(())
    }
}

pub(super) fn pipeline<P: Portal + 'static>(
    portal: Arc<P>,
    store: Arc<MemoryStore>,
    transport: Arc<MemoryTransport>,
) -> RefreshPipeline<P, MemoryStore, MemoryTransport> {
    let notifier = Notifier::new(
        transport,
        SenderIdentity {
            address: "bot@example.com".to_string(),
            signature: "Case Tracker".to_string(),
        },
    );
    RefreshPipeline::new(portal, store, notifier)
}
