// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

//! Permanent test resources shared by every run, and the Terraform inputs
//! derived from them. Loaded once at start-up and passed to whoever needs it.

use anyhow::Context;
use log::info;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const RESOURCES_FILE_ENV: &str = "ESO_TEST_RESOURCES_FILE";
pub const DEFAULT_RESOURCES_FILE: &str =
    "../common-dev-assets/common-go-assets/common-permanent-resources.yaml";

pub const RESOURCE_GROUP: &str = "geretain-test-ext-secrets-sync";
pub const ALL_COMBINED_EXAMPLE: &str = "examples/all-combined";
pub const BASIC_EXAMPLE: &str = "examples/basic";
pub const SERVICE_MESH_EXAMPLE: &str = "examples/eso-enroll-into-servicemesh";
pub const FULLY_CONFIGURABLE_SOLUTION: &str = "solutions/fully-configurable";
/// Provisions the cluster the fully-configurable solution deploys into.
pub const EXISTING_RESOURCES_DIR: &str = "tests/existing-resources";

/// Common name used for the private and public certificates in the examples.
const CERT_COMMON_NAME: &str = "goldeneye.dev.cloud.ibm.com";

pub type TerraformVars = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestConfig {
    #[serde(rename = "secretsManagerGuid")]
    pub sm_guid: String,
    #[serde(rename = "secretsManagerCRN")]
    pub sm_crn: String,
    #[serde(rename = "secretsManagerRegion")]
    pub sm_region: String,
    #[serde(rename = "resourceGroupTestPermanentId")]
    pub rg_id: String,
    #[serde(rename = "cisInstanceName")]
    pub cis_name: String,

    #[serde(rename = "imported_certificate_intermediate_secret_id")]
    pub imp_cert_intermediate_secret_id: String,
    #[serde(rename = "imported_certificate_public_secret_id")]
    pub imp_cert_public_secret_id: String,
    #[serde(rename = "imported_certificate_private_secret_id")]
    pub imp_cert_private_secret_id: String,
    #[serde(rename = "imported_certificate_sm_id")]
    pub imp_cert_sm_guid: String,
    #[serde(rename = "imported_certificate_sm_region")]
    pub imp_cert_sm_region: String,

    #[serde(rename = "acme_letsencrypt_private_key_sm_id")]
    pub acme_le_private_key_sm_guid: String,
    #[serde(rename = "acme_letsencrypt_private_key_sm_region")]
    pub acme_le_private_key_sm_region: String,
    #[serde(rename = "acme_letsencrypt_private_key_secret_id")]
    pub acme_le_private_key_secret_id: String,
}

impl TestConfig {
    /// Path from `ESO_TEST_RESOURCES_FILE`, falling back to the shared assets
    /// checkout next to the repository.
    pub fn default_path() -> PathBuf {
        std::env::var_os(RESOURCES_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RESOURCES_FILE))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading test resources {}", path.display()))?;
        let config = Self::from_yaml(&data)
            .with_context(|| format!("parsing test resources {}", path.display()))?;
        info!("Loaded permanent test resources from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Inputs for the all-combined example, also used by its upgrade test.
    pub fn all_combined_vars(&self) -> TerraformVars {
        let vars = json!({
            "existing_cis_instance_name": self.cis_name,
            "existing_cis_instance_resource_group_id": self.rg_id,
            "existing_sm_instance_crn": self.sm_crn,
            "existing_sm_instance_guid": self.sm_guid,
            "existing_sm_instance_region": self.sm_region,
            "imported_certificate_sm_region": self.imp_cert_sm_region,
            "imported_certificate_sm_id": self.imp_cert_sm_guid,
            "imported_certificate_intermediate_secret_id": self.imp_cert_intermediate_secret_id,
            "imported_certificate_public_secret_id": self.imp_cert_public_secret_id,
            "imported_certificate_private_secret_id": self.imp_cert_private_secret_id,
            "acme_letsencrypt_private_key_secret_id": self.acme_le_private_key_secret_id,
            "acme_letsencrypt_private_key_sm_id": self.acme_le_private_key_sm_guid,
            "acme_letsencrypt_private_key_sm_region": self.acme_le_private_key_sm_region,
            // the IAM policy already exists for the permanent instance
            "skip_iam_authorization_policy": true,
            "service_endpoints": "public",
            "pvt_cert_common_name": CERT_COMMON_NAME,
            "pvt_root_ca_common_name": CERT_COMMON_NAME,
            "cert_common_name": CERT_COMMON_NAME,
        });
        into_vars(vars)
    }

    /// Inputs for the basic example used by the reloader checks.
    pub fn reloader_vars(&self) -> TerraformVars {
        into_vars(json!({
            "existing_sm_instance_guid": self.sm_guid,
            "existing_sm_instance_region": self.sm_region,
        }))
    }

    /// Inputs for the fully-configurable solution. `ibmcloud_api_key` is left
    /// to the environment.
    pub fn full_config_solution_vars(&self, prefix: &str, cluster_crn: &str) -> TerraformVars {
        into_vars(json!({
            "prefix": prefix,
            "existing_secrets_manager_crn": self.sm_crn,
            "existing_cluster_crn": cluster_crn,
            "eso_secretsstores_configuration": secrets_stores_configuration(),
        }))
    }

    pub fn service_mesh_vars(&self) -> TerraformVars {
        into_vars(json!({
            "eso_deployment_nodes_configuration": "private",
            "existing_sm_instance_crn": self.sm_crn,
            "existing_sm_instance_guid": self.sm_guid,
            "existing_sm_instance_region": self.sm_region,
        }))
    }
}

/// Store entry with its two service secrets groups, numbered from `first_group`.
fn store_config(
    namespace: &str,
    serviceid: &str,
    account_group: &str,
    service_groups: [&str; 2],
    first_group: usize,
) -> Value {
    let groups: Vec<Value> = service_groups
        .iter()
        .enumerate()
        .map(|(i, name)| {
            json!({
                "name": name,
                "description": format!(
                    "Secrets group {} for secrets used by the ESO",
                    first_group + i
                ),
            })
        })
        .collect();
    json!({
        "namespace": namespace,
        "create_namespace": true,
        "existing_serviceid_id": "",
        "serviceid_name": serviceid,
        "serviceid_description": format!("{serviceid} description"),
        "existing_account_secrets_group_id": "",
        "account_secrets_group_name": account_group,
        "account_secrets_group_description": format!("{account_group} description"),
        "trusted_profile_name": "",
        "trusted_profile_description": "",
        "existing_service_secrets_group_id_list": [],
        "service_secrets_groups_list": groups,
    })
}

fn secrets_stores_configuration() -> Value {
    json!({
        "cluster_secrets_stores": {
            "css-1": store_config(
                "eso-namespace-cs1",
                "esoda-test-css-1-serviceid",
                "esoda-test-cs-accsg-1",
                ["esoda-test-cs-s1-sg", "esoda-test-cs-s2-sg"],
                1,
            ),
            "css-2": store_config(
                "eso-namespace-cs2",
                "esoda-test-css-3-serviceid",
                "esoda-test-cs-accsg-3",
                ["esoda-test-cs-s3-sg", "esoda-test-cs-s4-sg"],
                3,
            ),
        },
        "secrets_stores": {
            "ss-1": store_config(
                "eso-namespace-ss1",
                "esoda-test-ss-1-serviceid",
                "esoda-test-ss-accsg-1",
                ["esoda-test-ss-s1-sg", "esoda-test-ss-s2-sg"],
                1,
            ),
            "ss-2": store_config(
                "eso-namespace-ss2",
                "esoda-test-ss-2-serviceid",
                "esoda-test-ss-accsg-2",
                ["esoda-test-ss-s3-sg", "esoda-test-ss-s4-sg"],
                3,
            ),
        },
    })
}

fn into_vars(value: Value) -> TerraformVars {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => TerraformVars::new(),
    }
}
