//! Marker-based field extraction from portal pages.
//!
//! The portal's markup is matched line by line against a handful of fixed
//! markers. Anything that does not carry those markers is ignored, and a
//! missing marker is reported as an error rather than guessed around.

use super::markup::{contains_ci, find_ci, normalize_ws, rfind_ci, strip_tags};

/// Start of the anchor linking a case to its history page.
pub const CASE_ANCHOR_PREFIX: &str = r#"<a href="viewcasehistory.do?id="#;
/// Class carried by every history entry on the case-detail page.
pub const DETAIL_ITEM_MARKER: &str = r#"<li class="margin-bottom-medium">"#;

const BOLD_CLOSE: &str = "</b>";
const BOLD_SEPARATOR: &str = "-";
const BULLET: &str = "* ";
/// The applicant name sits this many lines above the case anchor.
const NAME_WINDOW: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParsingError {
    #[error("no status text found for case {case_id}")]
    MissingStatus { case_id: String },
    #[error("no applicant name found above case {case_id}")]
    MissingName { case_id: String },
    #[error("no history entries found for case {case_id}; portal markup may have changed")]
    MissingDetails { case_id: String },
}

/// Case id from the first case anchor on the status page.
///
/// An empty string means no anchor was found. The portal answers failed
/// sign-ins with a normal page, so this is also the only sign that the
/// identity data was rejected.
pub fn case_id(status_page: &str) -> String {
    status_page
        .lines()
        .find_map(|line| {
            let at = find_ci(line, CASE_ANCHOR_PREFIX)?;
            let value = &line[at + CASE_ANCHOR_PREFIX.len()..];
            value.split(['=', '&']).next().map(str::trim)
        })
        .unwrap_or_default()
        .to_string()
}

fn case_anchor(case_id: &str) -> String {
    format!("{CASE_ANCHOR_PREFIX}{case_id}")
}

/// Status text from every line that carries the case anchor.
pub fn case_status(status_page: &str, case_id: &str) -> Result<String, ParsingError> {
    let anchor = case_anchor(case_id);
    let status = status_page
        .lines()
        .filter(|line| contains_ci(line, &anchor))
        .map(status_from_line)
        .collect::<Vec<_>>()
        .join("\n");

    if status.trim().is_empty() {
        return Err(ParsingError::MissingStatus {
            case_id: case_id.to_string(),
        });
    }
    Ok(status)
}

fn status_from_line(line: &str) -> String {
    let tail = match line.find('>') {
        Some(close) => &line[close + 1..],
        None => line,
    };
    strip_tags(&tail.replace(BOLD_CLOSE, BOLD_SEPARATOR))
}

/// Upper-cased applicant name taken from the two first non-empty lines in the
/// window above the case anchor.
pub fn applicant_name(status_page: &str, case_id: &str) -> Result<String, ParsingError> {
    let missing = || ParsingError::MissingName {
        case_id: case_id.to_string(),
    };

    let anchor = case_anchor(case_id);
    let lines: Vec<&str> = status_page.lines().collect();
    let anchor_at = lines
        .iter()
        .position(|line| contains_ci(line, &anchor))
        .ok_or_else(missing)?;
    let start = anchor_at.saturating_sub(NAME_WINDOW);

    let name = lines[start..anchor_at]
        .iter()
        .map(|line| normalize_ws(line))
        .filter(|line| !line.is_empty())
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();

    if name.is_empty() {
        return Err(missing());
    }
    Ok(name)
}

/// History entries of the case-detail page, one `* ` bullet per line.
pub fn case_details(detail_page: &str, case_id: &str) -> Result<String, ParsingError> {
    let details = detail_page
        .lines()
        .filter_map(|line| {
            let at = rfind_ci(line, DETAIL_ITEM_MARKER)?;
            let entry = format!("{BULLET}{}", &line[at + DETAIL_ITEM_MARKER.len()..]);
            Some(strip_tags(&entry.replace(BOLD_CLOSE, BOLD_SEPARATOR)))
        })
        .collect::<Vec<_>>()
        .join("\n");

    if details.is_empty() {
        return Err(ParsingError::MissingDetails {
            case_id: case_id.to_string(),
        });
    }
    Ok(details)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_PAGE: &str = include_str!("../../tests/fixtures/status_page.html");
    const DETAILS_PAGE: &str = include_str!("../../tests/fixtures/details_page.html");
    const SIGNED_OUT_PAGE: &str = include_str!("../../tests/fixtures/signed_out_page.html");

    #[test]
    fn case_id_reads_first_anchor_parameter() {
        assert_eq!(case_id(STATUS_PAGE), "987");
    }

    #[test]
    fn case_id_is_empty_without_anchor() {
        assert_eq!(case_id(SIGNED_OUT_PAGE), "");
        assert_eq!(case_id(""), "");
    }

    #[test]
    fn case_id_prefix_match_ignores_case() {
        let page = "<A HREF=\"ViewCaseHistory.do?id=42&type=citCases\">x</a>";
        assert_eq!(case_id(page), "42");
    }

    #[test]
    fn case_id_uses_first_of_several_anchors() {
        let page = "<a href=\"viewcasehistory.do?id=11&a=b\">one</a>\n\
<a href=\"viewcasehistory.do?id=22&a=b\">two</a>";
        assert_eq!(case_id(page), "11");
    }

    #[test]
    fn status_strips_markup_and_marks_bold_end() {
        let status = case_status(STATUS_PAGE, "987").expect("status present");
        assert_eq!(status, "In Progress- We are processing your application.");
    }

    #[test]
    fn status_without_anchor_line_is_an_error() {
        let error = case_status(STATUS_PAGE, "123").expect_err("no such case");
        assert_eq!(
            error,
            ParsingError::MissingStatus {
                case_id: "123".to_string()
            }
        );
    }

    #[test]
    fn name_comes_from_window_above_anchor() {
        let name = applicant_name(STATUS_PAGE, "987").expect("name present");
        assert_eq!(name, "JOHN DOE");
    }

    #[test]
    fn name_collapses_internal_whitespace() {
        let page = "  Mary   Ann \n\n  Smith\t Jones \n<td>\n\
<a href=\"viewcasehistory.do?id=5&x=y\">Open</a>";
        assert_eq!(applicant_name(page, "5").expect("name"), "MARY ANN SMITH JONES");
    }

    #[test]
    fn name_missing_when_anchor_is_first_line() {
        let page = "<a href=\"viewcasehistory.do?id=5&x=y\">Open</a>";
        assert!(matches!(
            applicant_name(page, "5"),
            Err(ParsingError::MissingName { .. })
        ));
    }

    #[test]
    fn details_become_bullets() {
        let details = case_details(DETAILS_PAGE, "987").expect("details present");
        assert_eq!(
            details,
            "* Jan 5, 2024- We received your application.\n\
* Feb 1, 2024- We sent you an invitation to write the citizenship test."
        );
    }

    #[test]
    fn details_without_marker_are_an_error() {
        let error = case_details(STATUS_PAGE, "987").expect_err("no history items");
        assert!(error.to_string().contains("markup may have changed"));
    }
}
