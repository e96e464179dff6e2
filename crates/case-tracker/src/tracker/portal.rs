use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::Client;
use tracing::debug;

use super::domain::ApplicantRequest;

const SESSION_COOKIE: &str = "JSESSIONID";

/// Authenticated portal session. Valid for one refresh cycle only.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    cookie: String,
}

impl Session {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            cookie: format!("{SESSION_COOKIE}={}", id.as_ref()),
        }
    }

    /// Value for the `Cookie` request header.
    pub fn cookie(&self) -> &str {
        &self.cookie
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Page of the portal to retrieve with a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    StatusListing,
    CaseDetail { case_id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("portal entry request failed: {0}")]
    Entry(#[source] reqwest::Error),
    #[error("portal response carried no JSESSIONID cookie")]
    MissingCookie,
    #[error("authentication request failed: {0}")]
    Authenticate(#[source] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request for {page:?} failed: {source}")]
    Transport {
        page: Page,
        #[source]
        source: reqwest::Error,
    },
    #[error("portal answered {status} for {page:?}")]
    Status { page: Page, status: u16 },
}

/// Access to the case-status portal.
///
/// `open_session` performs the whole sign-in. The portal does not say whether
/// the identity was accepted; a rejected identity only shows up later as a
/// status page without any case on it.
#[async_trait]
pub trait Portal: Send + Sync {
    async fn open_session(&self, request: &ApplicantRequest) -> Result<Session, SessionError>;
    async fn fetch_page(&self, session: &Session, page: &Page) -> Result<String, FetchError>;
}

/// `Portal` backed by the live web service.
#[derive(Debug, Clone)]
pub struct HttpPortal {
    client: Client,
    base_url: String,
}

impl HttpPortal {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("case-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn page_url(&self, page: &Page) -> String {
        match page {
            Page::StatusListing => format!("{}/viewcasestatus.do?app=ecas", self.base_url),
            Page::CaseDetail { case_id } => format!(
                "{}/viewcasehistory.do?id={case_id}&type=citCases&source=db&app=ecas&lang=en",
                self.base_url
            ),
        }
    }

    async fn anonymous_session(&self) -> Result<Session, SessionError> {
        let url = format!("{}/authenticate.do?app=ecas", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(SessionError::Entry)?;

        let cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok());
        session_from_set_cookie(cookies).ok_or(SessionError::MissingCookie)
    }

    async fn authenticate(
        &self,
        session: &Session,
        request: &ApplicantRequest,
    ) -> Result<(), SessionError> {
        let url = format!("{}/authenticate.do", self.base_url);
        let form = [
            ("lang", ""),
            ("_page", "_target0"),
            ("app", "ecas"),
            ("identifierType", request.identifier_type.as_str()),
            ("identifier", request.identifier.as_str()),
            ("surname", request.surname.as_str()),
            ("dateOfBirth", request.date_of_birth.as_str()),
            ("countryOfBirth", request.country.as_str()),
            ("_submit", "Continue"),
        ];

        let response = self
            .client
            .post(&url)
            .header(COOKIE, session.cookie())
            .form(&form)
            .send()
            .await
            .map_err(SessionError::Authenticate)?;
        debug!(status = response.status().as_u16(), "authentication form submitted");
        Ok(())
    }
}

#[async_trait]
impl Portal for HttpPortal {
    async fn open_session(&self, request: &ApplicantRequest) -> Result<Session, SessionError> {
        let session = self.anonymous_session().await?;
        self.authenticate(&session, request).await?;
        Ok(session)
    }

    async fn fetch_page(&self, session: &Session, page: &Page) -> Result<String, FetchError> {
        let transport = |source| FetchError::Transport {
            page: page.clone(),
            source,
        };

        let response = self
            .client
            .get(self.page_url(page))
            .header(COOKIE, session.cookie())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                page: page.clone(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(transport)
    }
}

/// Finds the session id among `Set-Cookie` header values.
pub fn session_from_set_cookie<'a, I>(headers: I) -> Option<Session>
where
    I: IntoIterator<Item = &'a str>,
{
    headers.into_iter().find_map(|header| {
        let pair = header.split(';').next()?;
        let (name, value) = pair.split_once('=')?;
        let value = value.trim().trim_matches('"');
        (name.trim() == SESSION_COOKIE && !value.is_empty()).then(|| Session::new(value))
    })
}
