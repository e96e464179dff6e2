use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::tracker::ApplicantRequest;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub tracker: TrackerConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let ansi = environment == AppEnvironment::Development;

        let tracker = TrackerConfig {
            applicants_path: env_path("APP_APPLICANTS_PATH", "cicapplications.json"),
            mail_server_path: env_path("APP_MAIL_SERVER_PATH", "mailserver.json"),
            snapshot_dir: env_path("APP_SNAPSHOT_DIR", "snapshots"),
            portal_base_url: env::var("APP_PORTAL_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PORTAL_BASE_URL.to_string()),
            refresh_interval: env_seconds("APP_REFRESH_INTERVAL_SECS", 15 * 60)?,
            request_timeout: env_seconds("APP_HTTP_TIMEOUT_SECS", 30)?,
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level, ansi },
            tracker,
        })
    }
}

pub const DEFAULT_PORTAL_BASE_URL: &str = "https://services3.cic.gc.ca/ecas";

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_seconds(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let seconds = match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidDuration { key })?,
        Err(_) => default,
    };
    if seconds == 0 {
        return Err(ConfigError::InvalidDuration { key });
    }
    Ok(Duration::from_secs(seconds))
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub ansi: bool,
}

/// Where the tracker finds its inputs and how hard it leans on the portal.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub applicants_path: PathBuf,
    pub mail_server_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub portal_base_url: String,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
}

/// Credentials and endpoint of the outgoing mail server.
#[derive(Clone, Deserialize)]
pub struct MailServerConfig {
    #[serde(alias = "Username")]
    pub username: String,
    #[serde(alias = "Password")]
    pub password: String,
    #[serde(alias = "EmailServer")]
    pub server: String,
    #[serde(alias = "Port")]
    pub port: u16,
    #[serde(default = "default_signature", alias = "Signature")]
    pub signature: String,
}

fn default_signature() -> String {
    "Automated Case Tracker".to_string()
}

impl fmt::Debug for MailServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailServerConfig")
            .field("username", &self.username)
            .field("server", &self.server)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Reads the applicant list. Every entry must carry a `YYYY-MM-DD` birth date
/// and at least one recipient.
pub fn load_applicants(path: &Path) -> Result<Vec<ApplicantRequest>, ConfigError> {
    let requests: Vec<ApplicantRequest> = read_json(path)?;

    for (index, request) in requests.iter().enumerate() {
        NaiveDate::parse_from_str(request.date_of_birth.trim(), "%Y-%m-%d").map_err(|_| {
            ConfigError::InvalidApplicant {
                index,
                reason: format!("date of birth '{}' is not YYYY-MM-DD", request.date_of_birth),
            }
        })?;
        if request.recipients.is_empty() {
            return Err(ConfigError::InvalidApplicant {
                index,
                reason: "no notification recipients configured".to_string(),
            });
        }
        if request.identifier.trim().is_empty() {
            return Err(ConfigError::InvalidApplicant {
                index,
                reason: "identifier is empty".to_string(),
            });
        }
    }

    Ok(requests)
}

pub fn load_mail_server(path: &Path) -> Result<MailServerConfig, ConfigError> {
    read_json(path)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::ParseFile {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost {
        source: std::net::AddrParseError,
    },
    InvalidDuration {
        key: &'static str,
    },
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseFile {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidApplicant {
        index: usize,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidDuration { key } => {
                write!(f, "{key} must be a positive number of seconds")
            }
            ConfigError::ReadFile { path, .. } => {
                write!(f, "unable to read {}", path.display())
            }
            ConfigError::ParseFile { path, source } => {
                write!(f, "malformed {}: {source}", path.display())
            }
            ConfigError::InvalidApplicant { index, reason } => {
                write!(f, "applicant #{index}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidDuration { .. }
            | ConfigError::InvalidApplicant { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::ReadFile { source, .. } => Some(source),
            ConfigError::ParseFile { source, .. } => Some(source),
        }
    }
}
