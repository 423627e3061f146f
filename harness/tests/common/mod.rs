// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

use eso_harness::config::TestConfig;
use eso_harness::{Cluster, Poller};
use k8s_openapi::api::core::v1::Namespace;
use kube::Api;
use kube::api::DeleteParams;
use log::info;
use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

pub const PREFIX_ENV: &str = "ESO_TEST_PREFIX";

pub struct TestContext {
    cluster: Cluster,
    config: TestConfig,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });

        let kubeconfig = std::env::var_os("KUBECONFIG").map(PathBuf::from);
        let cluster = Cluster::connect(kubeconfig.as_deref()).await?;
        let config = TestConfig::load(&TestConfig::default_path())?;

        Ok(Self { cluster, config })
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Prefix the examples were applied with.
    pub fn prefix(&self) -> anyhow::Result<String> {
        std::env::var(PREFIX_ENV).map_err(|_| anyhow::anyhow!("{PREFIX_ENV} is not set"))
    }
}

#[macro_export]
macro_rules! setup {
    () => {{ $crate::common::TestContext::new() }};
}

pub fn scratch_dir() -> anyhow::Result<PathBuf> {
    let id = uuid::Uuid::new_v4().to_string();
    let dir = std::env::temp_dir().join(format!("eso-{}", &id[..8]));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub async fn delete_namespace(
    cluster: &Cluster,
    name: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let namespace_api: Api<Namespace> = Api::all(cluster.client().clone());

    match namespace_api.delete(name, &DeleteParams::default()).await {
        Ok(_) => info!("Deleting namespace {name}"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            info!("Namespace {name} already deleted");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let poller = Poller::new()
        .with_timeout(timeout)
        .with_interval(Duration::from_secs(5))
        .with_error_message(format!("waiting for namespace {name} to be deleted"));

    poller
        .poll_async(|| {
            let api = namespace_api.clone();
            let name = name.to_string();
            async move {
                match api.get(&name).await {
                    Ok(_) => Err(format!("{name} still exists, retrying...")),
                    Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
                    Err(e) => Err(format!("unexpected error while fetching {name}: {e}")),
                }
            }
        })
        .await
}
