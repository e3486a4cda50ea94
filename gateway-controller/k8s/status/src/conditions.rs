//! Gateway API condition vocabulary and merging.

use varnish_gateway_controller_k8s_api::{Condition, Time};

pub mod type_ {
    pub const ACCEPTED: &str = "Accepted";
    pub const PROGRAMMED: &str = "Programmed";
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
}

pub mod reason {
    pub const ACCEPTED: &str = "Accepted";
    pub const PROGRAMMED: &str = "Programmed";
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    pub const INVALID: &str = "Invalid";
    pub const INVALID_ROUTE_KINDS: &str = "InvalidRouteKinds";
    pub const NO_MATCHING_PARENT: &str = "NoMatchingParent";
    pub const PENDING: &str = "Pending";
    pub const INVALID_KIND: &str = "InvalidKind";
    pub const BACKEND_NOT_FOUND: &str = "BackendNotFound";
}

pub fn new(
    type_: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
    now: &Time,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status { "True" } else { "False" }.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        observed_generation,
        last_transition_time: now.clone(),
    }
}

pub fn is_true(condition: &Condition) -> bool {
    condition.status == "True"
}

/// Sets a condition in place, replacing any condition of the same type.
///
/// If the replaced condition had the same status, its transition time is
/// retained.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Returns the desired conditions, each carrying the transition time of the
/// matching existing condition when its status has not changed.
pub fn merge(existing: &[Condition], desired: impl IntoIterator<Item = Condition>) -> Vec<Condition> {
    desired
        .into_iter()
        .map(|mut condition| {
            let unchanged = existing
                .iter()
                .find(|c| c.type_ == condition.type_ && c.status == condition.status);
            if let Some(prior) = unchanged {
                condition.last_transition_time = prior.last_transition_time.clone();
            }
            condition
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> Time {
        Time(DateTime::<Utc>::from_timestamp(secs, 0).unwrap())
    }

    #[test]
    fn merge_keeps_time_when_status_is_unchanged() {
        let existing = vec![new(type_::ACCEPTED, true, reason::ACCEPTED, "old", Some(1), &at(10))];
        let merged = merge(
            &existing,
            [new(type_::ACCEPTED, true, reason::ACCEPTED, "new", Some(2), &at(20))],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].last_transition_time, at(10));
        assert_eq!(merged[0].message, "new");
        assert_eq!(merged[0].observed_generation, Some(2));
    }

    #[test]
    fn merge_stamps_time_on_flip() {
        let existing = vec![new(type_::ACCEPTED, true, reason::ACCEPTED, "ok", None, &at(10))];
        let merged = merge(
            &existing,
            [new(type_::ACCEPTED, false, reason::INVALID, "bad", None, &at(20))],
        );
        assert_eq!(merged[0].last_transition_time, at(20));
        assert!(!is_true(&merged[0]));
    }

    #[test]
    fn merge_drops_undesired_types() {
        let existing = vec![
            new(type_::ACCEPTED, true, reason::ACCEPTED, "", None, &at(1)),
            new("Legacy", true, "Legacy", "", None, &at(1)),
        ];
        let merged = merge(
            &existing,
            [new(type_::ACCEPTED, true, reason::ACCEPTED, "", None, &at(2))],
        );
        assert_eq!(
            merged.iter().map(|c| c.type_.as_str()).collect::<Vec<_>>(),
            vec![type_::ACCEPTED]
        );
    }

    #[test]
    fn set_replaces_in_place() {
        let mut conditions = vec![
            new("Other", true, "Other", "", None, &at(1)),
            new(type_::ACCEPTED, false, reason::PENDING, "", None, &at(1)),
        ];

        set(
            &mut conditions,
            new(type_::ACCEPTED, false, reason::PENDING, "still", None, &at(5)),
        );
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[1].last_transition_time, at(1));
        assert_eq!(conditions[1].message, "still");

        set(
            &mut conditions,
            new(type_::ACCEPTED, true, reason::ACCEPTED, "", None, &at(9)),
        );
        assert_eq!(conditions[1].last_transition_time, at(9));
        assert_eq!(conditions[0].type_, "Other");

        set(
            &mut conditions,
            new(type_::PROGRAMMED, true, reason::PROGRAMMED, "", None, &at(9)),
        );
        assert_eq!(conditions.len(), 3);
    }
}
