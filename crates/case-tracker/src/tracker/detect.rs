use super::domain::CaseSnapshot;

/// Whether `current` warrants a notification given the last persisted snapshot.
///
/// Only status and details are compared, byte for byte. Name and recipients
/// are ignored, and a missing previous snapshot always counts as a change.
pub fn has_changed(previous: Option<&CaseSnapshot>, current: &CaseSnapshot) -> bool {
    match previous {
        None => true,
        Some(previous) => {
            previous.status != current.status || previous.details != current.details
        }
    }
}
