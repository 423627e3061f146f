// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ExternalSecret, SecretStore};

pub const READY_CONDITION: &str = "Ready";

/// ESO status conditions. Unlike `metav1.Condition`, only `type` and `status`
/// are guaranteed to be present.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

pub fn find_condition<'a>(
    conditions: &'a [StatusCondition],
    type_: &str,
) -> Option<&'a StatusCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_ready(conditions: &[StatusCondition]) -> bool {
    find_condition(conditions, READY_CONDITION).is_some_and(|c| c.status == "True")
}

pub fn external_secret_ready(es: &ExternalSecret) -> bool {
    es.status.as_ref().is_some_and(|s| is_ready(&s.conditions))
}

pub fn secret_store_ready(store: &SecretStore) -> bool {
    store.status.as_ref().is_some_and(|s| is_ready(&s.conditions))
}

/// Human-readable reason for a resource not being ready, for failure reports.
pub fn not_ready_reason(conditions: &[StatusCondition]) -> String {
    match find_condition(conditions, READY_CONDITION) {
        Some(c) => format!(
            "Ready={} reason={} message={}",
            c.status,
            c.reason.as_deref().unwrap_or("<none>"),
            c.message.as_deref().unwrap_or("")
        ),
        None => "no Ready condition reported".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(type_: &str, status: &str) -> StatusCondition {
        StatusCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_ready() {
        assert!(is_ready(&[condition("Ready", "True")]));
        assert!(!is_ready(&[condition("Ready", "False")]));
        assert!(!is_ready(&[condition("Deleted", "True")]));
        assert!(!is_ready(&[]));
    }

    #[test]
    fn test_not_ready_reason() {
        let mut cond = condition("Ready", "False");
        cond.reason = Some("SecretSyncedError".to_string());
        cond.message = Some("could not get secret data from provider".to_string());
        assert_eq!(
            not_ready_reason(&[cond]),
            "Ready=False reason=SecretSyncedError message=could not get secret data from provider"
        );
        assert_eq!(not_ready_reason(&[]), "no Ready condition reported");
    }

    #[test]
    fn test_external_secret_without_status_is_not_ready() {
        let es = ExternalSecret::new("kv-single-key", Default::default());
        assert!(!external_secret_ready(&es));
    }
}
