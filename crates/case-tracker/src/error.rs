use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::tracker::{NotificationError, RefreshError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    PortalClient(reqwest::Error),
    Mailer(NotificationError),
    Refresh(RefreshError),
    /// No configured applicant has this `type:identifier` key.
    UnknownApplicant(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::PortalClient(err) => write!(f, "portal client error: {}", err),
            AppError::Mailer(err) => write!(f, "mailer error: {}", err),
            AppError::Refresh(err) => write!(f, "refresh failed while {}: {}", err.stage(), err),
            AppError::UnknownApplicant(key) => write!(f, "no applicant is configured as {}", key),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::PortalClient(err) => Some(err),
            AppError::Mailer(err) => Some(err),
            AppError::Refresh(err) => Some(err),
            AppError::UnknownApplicant(_) => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Refresh(_) => StatusCode::BAD_GATEWAY,
            AppError::UnknownApplicant(_) => StatusCode::NOT_FOUND,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::PortalClient(_)
            | AppError::Mailer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::PortalClient(value)
    }
}

impl From<NotificationError> for AppError {
    fn from(value: NotificationError) -> Self {
        Self::Mailer(value)
    }
}

impl From<RefreshError> for AppError {
    fn from(value: RefreshError) -> Self {
        Self::Refresh(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::SessionError;

    #[test]
    fn refresh_failure_maps_to_bad_gateway() {
        let error = AppError::from(RefreshError::Session(SessionError::MissingCookie));
        assert!(error.to_string().starts_with("refresh failed while authenticating"));
        assert_eq!(error.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn unknown_applicant_is_not_found() {
        let error = AppError::UnknownApplicant("9:nobody".to_string());
        assert_eq!(error.to_string(), "no applicant is configured as 9:nobody");
        assert!(std::error::Error::source(&error).is_none());
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn config_failure_is_internal() {
        let error = AppError::from(ConfigError::InvalidPort);
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
