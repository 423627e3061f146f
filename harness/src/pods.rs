// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

//! Resolving a deployment to the names of the pods it currently owns.
//!
//! The selector is derived from the deployment spec by a pure function so the
//! formatting can be tested without a cluster; listing goes through the
//! [`PodLister`] seam so the convergence watcher can run against fakes.

use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use crate::HarnessError;

/// A deployment, by name, within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadSelector {
    pub namespace: String,
    pub name: String,
}

impl WorkloadSelector {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A label selector in the string form accepted by the list API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector(String);

impl Selector {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render the pod selector of a deployment spec.
///
/// Requirements are sorted by key and values within a set requirement are
/// sorted, matching how the API server prints selectors.
pub fn selector_of(
    workload: &WorkloadSelector,
    spec: &DeploymentSpec,
) -> Result<Selector, HarnessError> {
    format_label_selector(&spec.selector).and_then(|s| {
        if s.is_empty() {
            Err(HarnessError::EmptySelector {
                workload: workload.to_string(),
            })
        } else {
            Ok(Selector(s))
        }
    })
}

fn format_label_selector(selector: &LabelSelector) -> Result<String, HarnessError> {
    let mut requirements: Vec<(String, String)> = Vec::new();

    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            requirements.push((key.clone(), format!("{key}={value}")));
        }
    }

    for expr in selector.match_expressions.iter().flatten() {
        let mut values: Vec<&str> = expr.values.iter().flatten().map(String::as_str).collect();
        values.sort_unstable();
        let key = &expr.key;
        let rendered = match expr.operator.as_str() {
            "In" => format!("{key} in ({})", values.join(",")),
            "NotIn" => format!("{key} notin ({})", values.join(",")),
            "Exists" => key.clone(),
            "DoesNotExist" => format!("!{key}"),
            other => {
                return Err(HarnessError::InvalidSelector {
                    key: key.clone(),
                    operator: other.to_string(),
                });
            }
        };
        requirements.push((key.clone(), rendered));
    }

    requirements.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(requirements
        .into_iter()
        .map(|(_, r)| r)
        .collect::<Vec<_>>()
        .join(","))
}

/// Lists the pods currently selected by a deployment.
pub trait PodLister: Send + Sync {
    /// Pod names in listing order; the order is not stable across calls.
    fn pod_names(
        &self,
        workload: &WorkloadSelector,
    ) -> impl Future<Output = Result<Vec<String>, HarnessError>> + Send;
}

/// Pod names observed at one point in time. Immutable once captured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSet(BTreeSet<String>);

impl PodSet {
    /// Snapshot the workload's pods. Must happen before the mutation whose
    /// effect is being watched for.
    pub async fn capture<L: PodLister>(
        lister: &L,
        workload: &WorkloadSelector,
    ) -> Result<Self, HarnessError> {
        Ok(lister.pod_names(workload).await?.into_iter().collect())
    }

    pub fn contains(&self, pod: &str) -> bool {
        self.0.contains(pod)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// First pod of `current`, in its order, that is not in this set.
    pub fn first_new<I, S>(&self, current: I) -> Option<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        current
            .into_iter()
            .map(Into::into)
            .find(|pod| !self.contains(pod))
    }
}

impl<S: Into<String>> FromIterator<S> for PodSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use std::collections::BTreeMap;

    fn workload() -> WorkloadSelector {
        WorkloadSelector::new("reloader-test-ns", "example-deployment")
    }

    fn spec_with(selector: LabelSelector) -> DeploymentSpec {
        DeploymentSpec {
            selector,
            ..Default::default()
        }
    }

    fn requirement(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| v.to_string()).collect())
            },
        }
    }

    #[test]
    fn test_selector_of_match_labels() {
        let spec = spec_with(LabelSelector {
            match_labels: Some(BTreeMap::from([
                ("tier".to_string(), "web".to_string()),
                ("app".to_string(), "example".to_string()),
            ])),
            ..Default::default()
        });
        let selector = selector_of(&workload(), &spec).unwrap();
        assert_eq!(selector.as_str(), "app=example,tier=web");
    }

    #[test]
    fn test_selector_of_match_expressions_sorted() {
        let spec = spec_with(LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "example".to_string())])),
            match_expressions: Some(vec![
                requirement("zone", "NotIn", &["us-south-2", "eu-de-1"]),
                requirement("canary", "DoesNotExist", &[]),
                requirement("env", "In", &["prod", "dev"]),
                requirement("owner", "Exists", &[]),
            ]),
        });
        let selector = selector_of(&workload(), &spec).unwrap();
        assert_eq!(
            selector.to_string(),
            "app=example,!canary,env in (dev,prod),owner,zone notin (eu-de-1,us-south-2)"
        );
    }

    #[test]
    fn test_selector_of_empty_is_precondition_error() {
        let err = selector_of(&workload(), &spec_with(LabelSelector::default())).unwrap_err();
        assert!(matches!(err, HarnessError::EmptySelector { .. }));
        assert!(err.to_string().contains("reloader-test-ns/example-deployment"));
    }

    #[test]
    fn test_selector_of_unknown_operator() {
        let spec = spec_with(LabelSelector {
            match_expressions: Some(vec![requirement("app", "Matches", &["x"])]),
            ..Default::default()
        });
        let err = selector_of(&workload(), &spec).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::InvalidSelector { ref operator, .. } if operator == "Matches"
        ));
    }

    #[test]
    fn test_first_new_uses_listing_order() {
        let known: PodSet = ["pod-abc"].into_iter().collect();
        assert_eq!(known.first_new(["pod-abc"]), None);
        assert_eq!(
            known.first_new(["pod-abc", "pod-xyz", "pod-def"]),
            Some("pod-xyz".to_string())
        );
        assert_eq!(PodSet::default().first_new(["pod-abc"]), Some("pod-abc".to_string()));
    }
}
