// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;

use eso_harness::Cluster;
use eso_harness::config::{
    ALL_COMBINED_EXAMPLE, BASIC_EXAMPLE, EXISTING_RESOURCES_DIR, FULLY_CONFIGURABLE_SOLUTION,
    SERVICE_MESH_EXAMPLE, TerraformVars, TestConfig,
};
use eso_harness::reloader::{ReloaderScenario, resolve_reloader_image, verify_reloader_image};
use eso_harness::secrets::{
    Example, expected_secrets, namespaces, verify_secrets, verify_sync_status,
};
use eso_harness::terraform::{CLUSTER_CRN_OUTPUT, CLUSTER_ID_OUTPUT, TerraformOutputs};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Verify an External Secrets Operator deployment",
    long_about = None
)]
struct Args {
    /// Kubeconfig of the cluster under test; inferred when absent
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that every secret of an example has been materialised
    Secrets {
        #[arg(long, value_enum, default_value = "all-combined")]
        example: Example,

        /// Resource prefix used when the example was applied
        #[arg(long)]
        prefix: String,

        /// Also require Ready on every SecretStore and ExternalSecret
        #[arg(long)]
        check_sync: bool,
    },
    /// Check the Reloader image and that a secret update restarts the sample app
    Reloader {
        /// Directory of the applied example, for variables.tf lookups
        #[arg(long, default_value = BASIC_EXAMPLE)]
        example_dir: PathBuf,

        /// Directory holding sample.yaml and updated_secret.yaml
        #[arg(long, default_value = ".")]
        samples_dir: PathBuf,

        /// Only check the image
        #[arg(long)]
        image_only: bool,
    },
    /// Print the Terraform inputs of an example as JSON
    Vars(VarsArgs),
    /// Validate `terraform output` of an applied configuration
    Outputs {
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Outputs that must be present and non-null
        #[arg(long, value_delimiter = ',', default_value = CLUSTER_ID_OUTPUT)]
        keys: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
struct VarsArgs {
    #[arg(long, value_enum)]
    example: VarsExample,

    /// Permanent resources YAML; defaults to $ESO_TEST_RESOURCES_FILE
    #[arg(long)]
    resources: Option<PathBuf>,

    /// Resource prefix, required by the fully-configurable solution
    #[arg(long)]
    prefix: Option<String>,

    /// Cluster to deploy into; read from the existing resources when absent
    #[arg(long)]
    cluster_crn: Option<String>,

    /// Applied configuration whose outputs include the cluster CRN
    #[arg(long, default_value = EXISTING_RESOURCES_DIR)]
    existing_resources_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum VarsExample {
    AllCombined,
    Basic,
    ServiceMesh,
    FullyConfigurable,
}

impl VarsExample {
    fn dir(self) -> &'static str {
        match self {
            VarsExample::AllCombined => ALL_COMBINED_EXAMPLE,
            VarsExample::Basic => BASIC_EXAMPLE,
            VarsExample::ServiceMesh => SERVICE_MESH_EXAMPLE,
            VarsExample::FullyConfigurable => FULLY_CONFIGURABLE_SOLUTION,
        }
    }
}

async fn check_secrets(
    cluster: &Cluster,
    example: Example,
    prefix: &str,
    check_sync: bool,
) -> Result<()> {
    let expected = expected_secrets(example, prefix);
    verify_secrets(cluster, &expected).await.into_result()?;
    info!("All {} secrets present", expected.len());

    if !check_sync {
        return Ok(());
    }
    let mut not_ready = Vec::new();
    for ns in namespaces(&expected) {
        not_ready.extend(verify_sync_status(cluster, &ns).await?);
    }
    if !not_ready.is_empty() {
        for resource in &not_ready {
            error!("{resource}");
        }
        bail!("{} secret sync resources not ready", not_ready.len());
    }
    Ok(())
}

async fn check_reloader(
    cluster: &Cluster,
    example_dir: PathBuf,
    samples_dir: PathBuf,
    image_only: bool,
) -> Result<()> {
    let image = resolve_reloader_image(&TerraformVars::new(), &example_dir)?;
    verify_reloader_image(cluster, &image).await?;
    if image_only {
        return Ok(());
    }

    let defaults = ReloaderScenario::default();
    let scenario = ReloaderScenario {
        sample_manifest: samples_dir.join(&defaults.sample_manifest),
        updated_secret_manifest: samples_dir.join(&defaults.updated_secret_manifest),
        ..defaults
    };
    let pod = scenario.run(cluster).await?;
    info!("Reloader restarted {} into {pod}", scenario.app.deployment);
    Ok(())
}

async fn cluster_crn(args: &VarsArgs) -> Result<String> {
    if let Some(crn) = &args.cluster_crn {
        return Ok(crn.clone());
    }
    let outputs = TerraformOutputs::read(&args.existing_resources_dir).await?;
    Ok(outputs.string(CLUSTER_CRN_OUTPUT)?.to_string())
}

async fn vars(args: &VarsArgs, config: &TestConfig) -> Result<TerraformVars> {
    Ok(match args.example {
        VarsExample::AllCombined => config.all_combined_vars(),
        VarsExample::Basic => config.reloader_vars(),
        VarsExample::ServiceMesh => config.service_mesh_vars(),
        VarsExample::FullyConfigurable => {
            let prefix = args
                .prefix
                .as_deref()
                .context("--prefix is required for the fully-configurable solution")?;
            config.full_config_solution_vars(prefix, &cluster_crn(args).await?)
        }
    })
}

async fn print_vars(args: VarsArgs) -> Result<()> {
    let path = args
        .resources
        .clone()
        .unwrap_or_else(TestConfig::default_path);
    let config = TestConfig::load(&path)?;
    info!("Inputs for {}", args.example.dir());
    let vars = vars(&args, &config).await?;
    println!("{}", serde_json::to_string_pretty(&vars)?);
    Ok(())
}

async fn check_outputs(dir: PathBuf, keys: Vec<String>) -> Result<()> {
    let outputs = TerraformOutputs::read(&dir).await?;
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    outputs.validate(&keys)?;
    if let Ok(cluster_id) = outputs.string(CLUSTER_ID_OUTPUT) {
        info!("Cluster ID: {cluster_id}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Secrets {
            example,
            prefix,
            check_sync,
        } => {
            let cluster = Cluster::connect(args.kubeconfig.as_deref()).await?;
            check_secrets(&cluster, example, &prefix, check_sync).await
        }
        Command::Reloader {
            example_dir,
            samples_dir,
            image_only,
        } => {
            let cluster = Cluster::connect(args.kubeconfig.as_deref()).await?;
            check_reloader(&cluster, example_dir, samples_dir, image_only).await
        }
        Command::Vars(vars_args) => print_vars(vars_args).await,
        Command::Outputs { dir, keys } => check_outputs(dir, keys).await,
    }
}
