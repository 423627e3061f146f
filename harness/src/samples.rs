// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

//! The sample application used to observe Reloader: a busybox deployment that
//! prints a secret value from its environment once at start-up. Reloader
//! restarts it whenever the secret changes, so a new pod logging the new
//! value proves the rollout happened.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, Namespace, PodSpec, PodTemplateSpec, Secret,
    SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use serde::Serialize;
use std::collections::BTreeMap;

pub const SAMPLE_MANIFEST: &str = "samples/sample.yaml";
pub const UPDATED_SECRET_MANIFEST: &str = "samples/updated_secret.yaml";

const RELOADER_AUTO_ANNOTATION: &str = "reloader.stakater.com/auto";
const SECRET_KEY: &str = "secret-value";
const SECRET_ENV: &str = "SECRET_VALUE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleApp {
    pub namespace: String,
    pub deployment: String,
    pub container: String,
    pub secret: String,
    pub initial_value: String,
    pub updated_value: String,
}

impl Default for SampleApp {
    fn default() -> Self {
        Self {
            namespace: "reloader-test-ns".to_string(),
            deployment: "example-deployment".to_string(),
            container: "busybox-container".to_string(),
            secret: "example-secret".to_string(),
            initial_value: "top-secret".to_string(),
            updated_value: "updated-secret".to_string(),
        }
    }
}

impl SampleApp {
    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), self.deployment.clone())])
    }

    fn secret_with(&self, value: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(BTreeMap::from([(SECRET_KEY.to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    fn namespace_object(&self) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn deployment_object(&self) -> Deployment {
        let env = EnvVar {
            name: SECRET_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: self.secret.clone(),
                    key: SECRET_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let container = Container {
            name: self.container.clone(),
            image: Some("busybox:1.36".to_string()),
            command: Some(vec!["sh".to_string(), "-c".to_string()]),
            args: Some(vec![format!("echo \"secret: ${SECRET_ENV}\"; sleep 3600")]),
            env: Some(vec![env]),
            ..Default::default()
        };

        Deployment {
            metadata: ObjectMeta {
                name: Some(self.deployment.clone()),
                namespace: Some(self.namespace.clone()),
                annotations: Some(BTreeMap::from([(
                    RELOADER_AUTO_ANNOTATION.to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(self.labels()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Namespace, secret holding the initial value, and the deployment.
    pub fn manifest(&self) -> anyhow::Result<String> {
        Ok([
            to_document(&self.namespace_object())?,
            to_document(&self.secret_with(&self.initial_value))?,
            to_document(&self.deployment_object())?,
        ]
        .join(""))
    }

    /// The same secret carrying the updated value.
    pub fn updated_secret_manifest(&self) -> anyhow::Result<String> {
        to_document(&self.secret_with(&self.updated_value))
    }
}

fn to_document<T: Serialize>(object: &T) -> anyhow::Result<String> {
    Ok(format!("---\n{}", serde_yaml::to_string(object)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn documents(yaml: &str) -> Vec<serde_yaml::Value> {
        serde_yaml::Deserializer::from_str(yaml)
            .map(|doc| serde_yaml::Value::deserialize(doc).unwrap())
            .collect()
    }

    #[test]
    fn test_manifest_kinds_in_apply_order() {
        let yaml = SampleApp::default().manifest().unwrap();
        let kinds: Vec<_> = documents(&yaml)
            .iter()
            .map(|d| d["kind"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, ["Namespace", "Secret", "Deployment"]);
    }

    #[test]
    fn test_deployment_is_reloader_annotated_and_reads_secret() {
        let app = SampleApp::default();
        let yaml = app.manifest().unwrap();
        let docs = documents(&yaml);
        let deployment: Deployment = serde_yaml::from_value(docs[2].clone()).unwrap();

        let annotations = deployment.metadata.annotations.unwrap();
        assert_eq!(annotations[RELOADER_AUTO_ANNOTATION], "true");

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.selector.match_labels, Some(app.labels()));
        let pod_spec = spec.template.spec.unwrap();
        let container = &pod_spec.containers[0];
        assert_eq!(container.name, "busybox-container");
        let secret_ref = container.env.as_ref().unwrap()[0]
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(secret_ref.name, "example-secret");
        assert_eq!(secret_ref.key, SECRET_KEY);
    }

    #[test]
    fn test_updated_secret_only_changes_value() {
        let app = SampleApp::default();
        let initial: Secret =
            serde_yaml::from_value(documents(&app.manifest().unwrap())[1].clone()).unwrap();
        let updated: Secret =
            serde_yaml::from_value(documents(&app.updated_secret_manifest().unwrap())[0].clone())
                .unwrap();

        assert_eq!(initial.metadata.name, updated.metadata.name);
        assert_eq!(initial.metadata.namespace, updated.metadata.namespace);
        assert_eq!(initial.string_data.unwrap()[SECRET_KEY], "top-secret");
        assert_eq!(updated.string_data.unwrap()[SECRET_KEY], "updated-secret");
    }
}
