// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

//! Checks that Reloader runs the configured image and restarts workloads
//! when a secret they consume changes.

use log::info;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cluster::{Cluster, ResourceKind};
use crate::config::TerraformVars;
use crate::pods::{PodLister, PodSet, WorkloadSelector};
use crate::samples::{SAMPLE_MANIFEST, SampleApp, UPDATED_SECRET_MANIFEST};
use crate::variables::resolve_variable;
use crate::watcher::ConvergenceWatcher;
use crate::{HarnessError, info_ok, name_or_default};

pub const RELOADER_SELECTOR: &str = "provider=stakater,group=com.stakater.platform";
pub const ESO_NAMESPACE: &str = "apikeynspace1";

const IMAGE_VAR: &str = "reloader_image";
const IMAGE_VERSION_VAR: &str = "reloader_image_version";

/// `<image>:<version>` as the example would deploy it.
pub fn resolve_reloader_image(
    overrides: &TerraformVars,
    example_dir: &Path,
) -> anyhow::Result<String> {
    let lookup = |name| {
        resolve_variable(overrides, example_dir, name).ok_or_else(|| {
            anyhow::anyhow!(
                "no value for {name} in inputs or variables.tf under {}",
                example_dir.display()
            )
        })
    };
    Ok(format!("{}:{}", lookup(IMAGE_VAR)?, lookup(IMAGE_VERSION_VAR)?))
}

/// The first Reloader pod's first container must run `expected`.
pub async fn verify_reloader_image(cluster: &Cluster, expected: &str) -> Result<(), HarnessError> {
    let pods = cluster.list_pods(ESO_NAMESPACE, RELOADER_SELECTOR).await?;
    let pod = pods.first().ok_or_else(|| HarnessError::Assertion {
        context: format!("reloader pods in {ESO_NAMESPACE}"),
        expected: format!("a pod matching {RELOADER_SELECTOR}"),
        actual: "none".to_string(),
    })?;
    let pod_name = name_or_default(&pod.metadata);
    let image = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();

    if image != expected {
        return Err(HarnessError::Assertion {
            context: format!("image of reloader pod {pod_name}"),
            expected: expected.to_string(),
            actual: image,
        });
    }
    info!("Reloader pod {pod_name} runs {image}");
    Ok(())
}

/// First pod in listing order, as the API server returned them.
fn first_listed<'a>(
    listed: &'a [String],
    workload: &WorkloadSelector,
) -> Result<&'a str, HarnessError> {
    listed
        .first()
        .map(String::as_str)
        .ok_or_else(|| HarnessError::Assertion {
            context: format!("pods of {workload}"),
            expected: "at least one pod".to_string(),
            actual: "none".to_string(),
        })
}

fn expect_logged(logs: &str, value: &str, pod: &str) -> Result<(), HarnessError> {
    if logs.contains(value) {
        return Ok(());
    }
    Err(HarnessError::Assertion {
        context: format!("logs of pod {pod}"),
        expected: format!("to contain {value:?}"),
        actual: logs.trim_end().to_string(),
    })
}

/// Sample app rollout driven by a secret update.
#[derive(Debug, Clone)]
pub struct ReloaderScenario {
    pub app: SampleApp,
    pub sample_manifest: PathBuf,
    pub updated_secret_manifest: PathBuf,
    pub retries: u32,
    pub retry_interval: Duration,
    pub watch_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReloaderScenario {
    fn default() -> Self {
        Self {
            app: SampleApp::default(),
            sample_manifest: PathBuf::from(SAMPLE_MANIFEST),
            updated_secret_manifest: PathBuf::from(UPDATED_SECRET_MANIFEST),
            retries: 20,
            retry_interval: Duration::from_secs(20),
            watch_timeout: crate::watcher::DEFAULT_TIMEOUT,
            poll_interval: crate::watcher::DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ReloaderScenario {
    fn workload(&self) -> WorkloadSelector {
        WorkloadSelector::new(&self.app.namespace, &self.app.deployment)
    }

    async fn wait(
        &self,
        cluster: &Cluster,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), HarnessError> {
        let ns = &self.app.namespace;
        Ok(cluster
            .wait_until_available(kind, ns, name, self.retries, self.retry_interval)
            .await?)
    }

    async fn check_pod_logs(
        &self,
        cluster: &Cluster,
        pod: &str,
        value: &str,
    ) -> Result<(), HarnessError> {
        self.wait(cluster, ResourceKind::Pod, pod).await?;
        let logs = cluster
            .pod_logs(&self.app.namespace, pod, &self.app.container)
            .await?;
        expect_logged(&logs, value, pod)
    }

    /// Returns the name of the pod started by the rollout.
    pub async fn run(&self, cluster: &Cluster) -> Result<String, HarnessError> {
        let app = &self.app;
        let workload = self.workload();

        info_ok!(
            cluster
                .apply_manifest(&app.namespace, &self.sample_manifest)
                .await,
            "Deployed sample app {workload}"
        );
        self.wait(cluster, ResourceKind::Deployment, &app.deployment)
            .await?;
        self.wait(cluster, ResourceKind::Secret, &app.secret).await?;

        // captured before the secret update
        let listed = cluster.pod_names(&workload).await?;
        let known: PodSet = listed.iter().cloned().collect();
        let initial = first_listed(&listed, &workload)?;
        self.check_pod_logs(cluster, initial, &app.initial_value)
            .await?;
        info!("Pod {initial} logged the initial secret value");

        info_ok!(
            cluster
                .apply_manifest(&app.namespace, &self.updated_secret_manifest)
                .await,
            "Updated secret {}/{}",
            app.namespace,
            app.secret
        );

        let watcher = ConvergenceWatcher::new(cluster)
            .with_timeout(self.watch_timeout)
            .with_poll_interval(self.poll_interval);
        let new_pod = watcher
            .wait_for_new_pod(&workload, &known)
            .await
            .into_new_pod(&workload, watcher.timeout())?;

        self.wait(cluster, ResourceKind::Deployment, &app.deployment)
            .await?;
        self.check_pod_logs(cluster, &new_pod, &app.updated_value)
            .await?;
        info!("Pod {new_pod} logged the updated secret value");
        Ok(new_pod)
    }
}
