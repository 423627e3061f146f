// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

//! Which secrets each example is expected to materialise, and checks that
//! they did.

use eso_crds::conditions::{external_secret_ready, not_ready_reason, secret_store_ready};
use eso_crds::{ExternalSecret, SecretStore};
use futures_util::{StreamExt, stream};
use kube::Api;
use kube::api::ListParams;
use log::{info, warn};
use std::fmt;

use crate::cluster::Cluster;
use crate::{HarnessError, name_or_default};

const DOCKERCONFIGJSON: &str = "kubernetes.io/dockerconfigjson";
const TLS: &str = "kubernetes.io/tls";

const APIKEY_NAMESPACES: [&str; 3] = ["apikeynspace1", "apikeynspace3", "apikeynspace4"];

/// Secrets fetched at the same time.
pub const CONCURRENT_CHECKS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretExpectation {
    pub name: String,
    pub namespace: String,
    pub secret_type: Option<&'static str>,
}

impl SecretExpectation {
    fn new(name: impl Into<String>, namespace: &str) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.to_string(),
            secret_type: None,
        }
    }

    fn of_type(mut self, secret_type: &'static str) -> Self {
        self.secret_type = Some(secret_type);
        self
    }
}

impl fmt::Display for SecretExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Example {
    AllCombined,
    ServiceMesh,
}

/// Trusted-profile secrets are named after the run prefix.
fn trusted_profile_secrets(prefix: &str) -> Vec<SecretExpectation> {
    [
        ("tp-0", "tpnspace1"),
        ("tp-1", "tpnspace2"),
        ("tp-multisg-1", "tpns-multisg"),
        ("tp-multisg-2", "tpns-multisg"),
        ("tp-nosg", "tpns-nosg"),
    ]
    .into_iter()
    .map(|(suffix, ns)| SecretExpectation::new(format!("{prefix}-arbitrary-arb-{suffix}"), ns))
    .collect()
}

pub fn expected_secrets(example: Example, prefix: &str) -> Vec<SecretExpectation> {
    let [ns1, ns3, ns4] = APIKEY_NAMESPACES;
    let mut expected = vec![
        SecretExpectation::new("dockerconfigjson-uc", ns1).of_type(DOCKERCONFIGJSON),
        SecretExpectation::new("dockerconfigjson-arb", ns3).of_type(DOCKERCONFIGJSON),
    ];
    if example == Example::AllCombined {
        expected.extend([
            SecretExpectation::new("pvtcertificate-tls", ns3).of_type(TLS),
            SecretExpectation::new("kv-single-key", ns4),
            SecretExpectation::new("kv-multiple-keys", ns4),
            SecretExpectation::new("dockerconfigjson-iam", ns4).of_type(DOCKERCONFIGJSON),
            SecretExpectation::new("dockerconfigjson-chain", ns4).of_type(DOCKERCONFIGJSON),
        ]);
    }
    expected.extend(trusted_profile_secrets(prefix));
    if example == Example::AllCombined {
        expected.push(SecretExpectation::new(
            format!("{prefix}-arbitrary-arb-cstore-tp"),
            "eso-cstore-tp-namespace",
        ));
    }
    expected
}

/// Failed expectations, each with the reason it failed.
#[derive(Debug, Default)]
pub struct SecretReport {
    pub checked: usize,
    pub failures: Vec<(SecretExpectation, String)>,
}

impl SecretReport {
    pub fn into_result(self) -> Result<(), HarnessError> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let actual = self
            .failures
            .iter()
            .map(|(e, reason)| format!("{e} ({reason})"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(HarnessError::Assertion {
            context: format!("{} of {} secrets", self.failures.len(), self.checked),
            expected: "every secret present".to_string(),
            actual,
        })
    }
}

async fn check_secret(cluster: &Cluster, expected: &SecretExpectation) -> Result<(), String> {
    let secret = cluster
        .get_secret(&expected.namespace, &expected.name)
        .await
        .map_err(|e| format!("error retrieving secret: {e}"))?;
    match (expected.secret_type, secret.type_.as_deref()) {
        (Some(want), got) if got != Some(want) => {
            Err(format!("type {} instead of {want}", got.unwrap_or("<unset>")))
        }
        _ => Ok(()),
    }
}

/// Fetch every expected secret, at most `CONCURRENT_CHECKS` at a time, and
/// report all failures together.
pub async fn verify_secrets(cluster: &Cluster, expected: &[SecretExpectation]) -> SecretReport {
    let failures: Vec<_> = stream::iter(expected)
        .map(|e| async move {
            info!("Testing secret {e}");
            check_secret(cluster, e)
                .await
                .err()
                .map(|reason| (e.clone(), reason))
        })
        .buffer_unordered(CONCURRENT_CHECKS)
        .filter_map(|failure| async move { failure })
        .collect()
        .await;

    for (e, reason) in &failures {
        warn!("Secret {e} failed: {reason}");
    }
    SecretReport {
        checked: expected.len(),
        failures,
    }
}

/// Every SecretStore and ExternalSecret in `namespace` must report Ready.
/// Returns the names of those that do not, with the reason.
pub async fn verify_sync_status(
    cluster: &Cluster,
    namespace: &str,
) -> anyhow::Result<Vec<String>> {
    let lp = ListParams::default();
    let mut not_ready = Vec::new();

    let stores: Api<SecretStore> = Api::namespaced(cluster.client().clone(), namespace);
    for store in stores.list(&lp).await? {
        if !secret_store_ready(&store) {
            let conditions = store.status.map(|s| s.conditions).unwrap_or_default();
            not_ready.push(format!(
                "SecretStore {namespace}/{}: {}",
                name_or_default(&store.metadata),
                not_ready_reason(&conditions)
            ));
        }
    }

    let external_secrets: Api<ExternalSecret> =
        Api::namespaced(cluster.client().clone(), namespace);
    for es in external_secrets.list(&lp).await? {
        if !external_secret_ready(&es) {
            let conditions = es.status.map(|s| s.conditions).unwrap_or_default();
            not_ready.push(format!(
                "ExternalSecret {namespace}/{}: {}",
                name_or_default(&es.metadata),
                not_ready_reason(&conditions)
            ));
        }
    }

    if not_ready.is_empty() {
        info!("All secret stores and external secrets in {namespace} are ready");
    }
    Ok(not_ready)
}

/// Namespaces the examples create secrets in.
pub fn namespaces(expected: &[SecretExpectation]) -> Vec<String> {
    let mut namespaces: Vec<String> = expected.iter().map(|e| e.namespace.clone()).collect();
    namespaces.sort();
    namespaces.dedup();
    namespaces
}
