// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

use anyhow::Context;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use log::info;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::HarnessError;
use crate::pods::{PodLister, Selector, WorkloadSelector, selector_of};
use crate::poller::Poller;

/// Reason set on the Progressing condition once the newest ReplicaSet is
/// fully rolled out.
const NEW_REPLICA_SET_AVAILABLE: &str = "NewReplicaSetAvailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Deployment,
    Secret,
    Pod,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::Secret => "secret",
            ResourceKind::Pod => "pod",
        };
        f.write_str(kind)
    }
}

/// Read access to the cluster under test, plus `kubectl apply` for the
/// sample manifests.
#[derive(Clone)]
pub struct Cluster {
    client: Client,
    kubeconfig: Option<PathBuf>,
}

impl Cluster {
    /// Connect using an explicit kubeconfig, or the default inference chain
    /// (`KUBECONFIG`, `~/.kube/config`, in-cluster) when none is given.
    pub async fn connect(kubeconfig: Option<&Path>) -> anyhow::Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kc = Kubeconfig::read_from(path)
                    .with_context(|| format!("reading kubeconfig {}", path.display()))?;
                let config =
                    Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default()).await?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self::new(client, kubeconfig.map(Path::to_path_buf)))
    }

    pub fn new(client: Client, kubeconfig: Option<PathBuf>) -> Self {
        Self { client, kubeconfig }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn apply_manifest(&self, namespace: &str, manifest: &Path) -> anyhow::Result<()> {
        let manifest_str = manifest
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path: {manifest:?}"))?;

        let mut cmd = Command::new("kubectl");
        if let Some(kubeconfig) = &self.kubeconfig {
            cmd.arg("--kubeconfig").arg(kubeconfig);
        }
        let output = cmd
            .args(["apply", "--namespace", namespace, "-f", manifest_str])
            .output()
            .await
            .context("running kubectl")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to apply {manifest_str}: {stderr}");
        }
        info!("Applied {manifest_str} in {namespace}");
        Ok(())
    }

    pub async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<Pod>, HarnessError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    pub async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, HarnessError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(pods.get(name).await?)
    }

    pub async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
    ) -> Result<String, HarnessError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        Ok(pods.logs(pod, &params).await?)
    }

    pub async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, HarnessError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(secrets.get(name).await?)
    }

    pub async fn workload_selector(
        &self,
        workload: &WorkloadSelector,
    ) -> Result<Selector, HarnessError> {
        let deployments: Api<Deployment> =
            Api::namespaced(self.client.clone(), &workload.namespace);
        let deployment = deployments.get(&workload.name).await?;
        let spec = deployment.spec.ok_or_else(|| HarnessError::MissingSpec {
            workload: workload.to_string(),
        })?;
        selector_of(workload, &spec)
    }

    /// Poll until the resource is ready for use. Gives up after `retries`
    /// checks however long each check takes.
    pub async fn wait_until_available(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        retries: u32,
        interval: Duration,
    ) -> anyhow::Result<()> {
        let poller = Poller::new()
            .without_timeout()
            .with_max_attempts(retries)
            .with_interval(interval)
            .with_error_message(format!(
                "{kind} {namespace}/{name} not available after {retries} retries"
            ));

        poller
            .poll_async(|| async move { self.check_available(kind, namespace, name).await })
            .await?;
        info!("{kind} {namespace}/{name} is available");
        Ok(())
    }

    async fn check_available(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<()> {
        match kind {
            ResourceKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let deployment = api.get(name).await?;
                if deployment_available(&deployment) {
                    Ok(())
                } else {
                    anyhow::bail!("deployment {name} has not finished rolling out")
                }
            }
            ResourceKind::Secret => {
                self.get_secret(namespace, name).await?;
                Ok(())
            }
            ResourceKind::Pod => {
                let pod = self.get_pod(namespace, name).await?;
                if pod_available(&pod) {
                    Ok(())
                } else {
                    anyhow::bail!("pod {name} is not running with all containers ready")
                }
            }
        }
    }
}

impl PodLister for Cluster {
    async fn pod_names(&self, workload: &WorkloadSelector) -> Result<Vec<String>, HarnessError> {
        let selector = self.workload_selector(workload).await?;
        let pods = self
            .list_pods(&workload.namespace, selector.as_str())
            .await?;
        Ok(pods
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }
}

/// Rollout finished: the latest spec has been observed, the new ReplicaSet is
/// available and so is the deployment. Mid-rollout deployments are not.
pub fn deployment_available(deployment: &Deployment) -> bool {
    let Some(status) = &deployment.status else {
        return false;
    };
    if status.observed_generation < deployment.metadata.generation {
        return false;
    }
    let conditions = status.conditions.as_deref().unwrap_or_default();
    let is_true = |type_: &str, reason: Option<&str>| {
        conditions.iter().any(|c| {
            c.type_ == type_
                && c.status == "True"
                && reason.is_none_or(|r| c.reason.as_deref() == Some(r))
        })
    };
    is_true("Available", None) && is_true("Progressing", Some(NEW_REPLICA_SET_AVAILABLE))
}

pub fn pod_available(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    if status.phase.as_deref() != Some("Running") {
        return false;
    }
    match &status.container_statuses {
        Some(containers) if !containers.is_empty() => containers.iter().all(|c| c.ready),
        _ => false,
    }
}
