use serde::{Deserialize, Serialize};

/// Identity an applicant uses to sign in to the portal, plus who hears about
/// changes to their case.
///
/// `identifier_type` is the portal's numeric code for what `identifier` holds:
/// 1 client ID / UCI, 2 receipt number (IMM 5401), 3 application or case
/// number, 4 record of landing, 5 PR card, 6 citizenship receipt, 7
/// citizenship file or group number, 8 confirmation of PR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantRequest {
    #[serde(alias = "Id_Type")]
    pub identifier_type: String,
    #[serde(alias = "ID")]
    pub identifier: String,
    #[serde(alias = "LastName")]
    pub surname: String,
    /// `YYYY-MM-DD`.
    #[serde(alias = "Dob")]
    pub date_of_birth: String,
    /// Portal country-of-birth option value.
    #[serde(alias = "Country")]
    pub country: String,
    #[serde(alias = "Emails")]
    pub recipients: Vec<String>,
}

impl ApplicantRequest {
    /// Stable key used to serialize refreshes of the same applicant.
    pub fn key(&self) -> String {
        format!("{}:{}", self.identifier_type, self.identifier)
    }
}

/// Everything extracted about one case during one refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSnapshot {
    pub case_id: String,
    pub name: String,
    pub status: String,
    pub details: String,
    pub recipients: Vec<String>,
}

impl CaseSnapshot {
    /// First word of the applicant name, used for the sender display name.
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or("")
    }
}
