use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use super::notify::{MailTransport, NotificationError, OutgoingMessage, SenderIdentity};
use crate::config::MailServerConfig;

/// Port on which the server expects TLS from the first byte.
pub const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
    /// Plain connection upgraded with STARTTLS when the server offers it.
    Negotiated,
    /// TLS wrapper from connect.
    ImplicitTls,
}

impl SubmissionMode {
    pub fn for_port(port: u16) -> Self {
        if port == IMPLICIT_TLS_PORT {
            Self::ImplicitTls
        } else {
            Self::Negotiated
        }
    }
}

/// Authenticated SMTP submission through lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    mode: SubmissionMode,
}

impl SmtpMailer {
    pub fn from_config(
        config: &MailServerConfig,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let mode = SubmissionMode::for_port(config.port);
        let tls = TlsParameters::new(config.server.clone()).map_err(|err| {
            NotificationError::Setup(format!("tls for {:?}: {err}", config.server))
        })?;
        let tls = match mode {
            SubmissionMode::ImplicitTls => Tls::Wrapper(tls),
            SubmissionMode::Negotiated => Tls::Opportunistic(tls),
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.server)
            .port(config.port)
            .tls(tls)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(timeout))
            .build();

        Ok(Self { transport, mode })
    }

    pub fn mode(&self) -> SubmissionMode {
        self.mode
    }
}

/// Sender identity for a configured mail account.
pub fn sender_identity(config: &MailServerConfig) -> SenderIdentity {
    SenderIdentity {
        address: config.username.clone(),
        signature: config.signature.clone(),
    }
}

fn parse_address(raw: &str) -> Result<Address, NotificationError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|err| NotificationError::InvalidAddress {
            address: raw.to_string(),
            reason: err.to_string(),
        })
}

/// Builds the RFC 5322 message for `outgoing`.
pub fn build_message(outgoing: &OutgoingMessage) -> Result<Message, NotificationError> {
    let from = Mailbox::new(
        Some(outgoing.from_name.clone()),
        parse_address(&outgoing.from_address)?,
    );

    let mut builder = Message::builder()
        .from(from)
        .subject(outgoing.subject.clone())
        .header(ContentType::TEXT_PLAIN);
    for recipient in &outgoing.to {
        builder = builder.to(Mailbox::new(None, parse_address(recipient)?));
    }

    builder
        .body(outgoing.body.clone())
        .map_err(|err| NotificationError::Compose(err.to_string()))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, outgoing: &OutgoingMessage) -> Result<(), NotificationError> {
        let message = build_message(outgoing)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|err| NotificationError::Delivery(err.to_string()))?;
        info!(
            recipients = outgoing.to.len(),
            code = %response.code(),
            "update mail accepted"
        );
        Ok(())
    }
}
