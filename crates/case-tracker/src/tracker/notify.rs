use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::domain::CaseSnapshot;

pub const UPDATE_SUBJECT: &str = "Citizenship Update";

/// Fully composed message handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub from_name: String,
    pub from_address: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("case {case_id} has no recipients")]
    NoRecipients { case_id: String },
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("message could not be built: {0}")]
    Compose(String),
    #[error("mail transport could not be set up: {0}")]
    Setup(String),
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Outbound message delivery, e.g. SMTP.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), NotificationError>;
}

/// Who the update mails appear to come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub address: String,
    pub signature: String,
}

/// Turns snapshots into update mails and hands them to a transport.
pub struct Notifier<T> {
    transport: Arc<T>,
    sender: SenderIdentity,
}

impl<T> Notifier<T>
where
    T: MailTransport + 'static,
{
    pub fn new(transport: Arc<T>, sender: SenderIdentity) -> Self {
        Self { transport, sender }
    }

    pub fn compose(&self, snapshot: &CaseSnapshot) -> OutgoingMessage {
        OutgoingMessage {
            from_name: format!("{} Citizenship [Automated]", snapshot.first_name()),
            from_address: self.sender.address.clone(),
            to: snapshot.recipients.clone(),
            subject: UPDATE_SUBJECT.to_string(),
            body: format!(
                "Name: {}\n\nStatus: {}\n\nDetails:\n{}\n\n{}\n",
                snapshot.name, snapshot.status, snapshot.details, self.sender.signature
            ),
        }
    }

    pub async fn notify(&self, snapshot: &CaseSnapshot) -> Result<(), NotificationError> {
        if snapshot.recipients.is_empty() {
            return Err(NotificationError::NoRecipients {
                case_id: snapshot.case_id.clone(),
            });
        }
        let message = self.compose(snapshot);
        self.transport.send(&message).await
    }
}
