//! Case-status tracking: portal access, field extraction, snapshot storage,
//! change detection and notification, tied together by the refresh pipeline.

pub mod detect;
pub mod domain;
pub mod extract;
pub mod locks;
pub(crate) mod markup;
pub mod notify;
pub mod pipeline;
pub mod portal;
pub mod smtp;
pub mod store;

#[cfg(test)]
mod tests;

pub use detect::has_changed;
pub use domain::{ApplicantRequest, CaseSnapshot};
pub use extract::ParsingError;
pub use locks::KeyedLocks;
pub use notify::{MailTransport, NotificationError, Notifier, OutgoingMessage, SenderIdentity};
pub use pipeline::{BatchSummary, RefreshError, RefreshMode, RefreshPipeline, RefreshReport, RefreshStage};
pub use portal::{FetchError, HttpPortal, Page, Portal, Session, SessionError};
pub use smtp::{sender_identity, SmtpMailer, SubmissionMode};
pub use store::{FileSnapshotStore, SnapshotStore, StoreError};
