// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;

use crate::HarnessError;

pub const CLUSTER_ID_OUTPUT: &str = "cluster_id";
/// Set by the existing-resources configuration.
pub const CLUSTER_CRN_OUTPUT: &str = "cluster_crn";

#[derive(Debug, Clone, Deserialize)]
struct OutputValue {
    value: Value,
}

/// Outputs of an applied Terraform configuration, as printed by
/// `terraform output -json`.
#[derive(Debug, Clone, Default)]
pub struct TerraformOutputs(BTreeMap<String, Value>);

impl TerraformOutputs {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let raw: BTreeMap<String, OutputValue> = serde_json::from_str(json)?;
        Ok(Self(raw.into_iter().map(|(k, v)| (k, v.value)).collect()))
    }

    pub async fn read(terraform_dir: &Path) -> anyhow::Result<Self> {
        let output = Command::new("terraform")
            .arg(format!("-chdir={}", terraform_dir.display()))
            .args(["output", "-json"])
            .output()
            .await
            .context("running terraform")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "terraform output failed in {}: {stderr}",
                terraform_dir.display()
            );
        }
        Self::from_json(&String::from_utf8_lossy(&output.stdout))
    }

    /// Fails listing every key that is absent or null.
    pub fn validate(&self, keys: &[&str]) -> Result<(), HarnessError> {
        let missing: Vec<String> = keys
            .iter()
            .filter(|k| self.0.get(**k).is_none_or(Value::is_null))
            .map(|k| k.to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::MissingOutputs(missing))
        }
    }

    pub fn string(&self, key: &str) -> Result<&str, HarnessError> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| HarnessError::MissingOutputs(vec![key.to_string()]))
    }
}
