// SPDX-FileCopyrightText: The eso-harness authors
//
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use eso_harness::samples::{SAMPLE_MANIFEST, SampleApp, UPDATED_SECRET_MANIFEST};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory the samples/ manifests are written under
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Namespace of the sample application
    #[arg(long, default_value = "reloader-test-ns")]
    namespace: String,

    /// Secret value the application starts with
    #[arg(long, default_value = "top-secret")]
    initial_value: String,

    /// Secret value written by the update
    #[arg(long, default_value = "updated-secret")]
    updated_value: String,
}

fn write(output_dir: &Path, relative: &str, yaml: &str) -> Result<()> {
    let path = output_dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, yaml)?;
    info!("Generated {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let app = SampleApp {
        namespace: args.namespace,
        initial_value: args.initial_value,
        updated_value: args.updated_value,
        ..Default::default()
    };
    write(&args.output_dir, SAMPLE_MANIFEST, &app.manifest()?)?;
    write(&args.output_dir, UPDATED_SECRET_MANIFEST, &app.updated_secret_manifest()?)?;

    Ok(())
}
