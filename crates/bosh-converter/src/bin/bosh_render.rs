/*
 * 5D Labs BOSH Converter - Kubernetes workloads for BOSH deployments
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Render compiled BOSH resources as multi-document YAML
//!
//! Usage: bosh-render --help

// CLI binaries legitimately need println! for user output
#![allow(clippy::disallowed_macros)]

use anyhow::{Context, Result};
use bosh_converter::bpm::parse_bpm_configs;
use bosh_converter::converter::variables_to_quarks_secrets;
use bosh_converter::{ConverterConfig, InstanceGroupCompiler, JobFactory, Manifest};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bosh-render")]
#[command(about = "Render Kubernetes objects compiled from a BOSH manifest")]
#[command(version)]
struct Cli {
    /// Converter configuration file (YAML)
    #[arg(short, long, env = "BOSH_CONVERTER_CONFIG")]
    config: Option<PathBuf>,

    /// Operator image, used when no configuration file is given
    #[arg(long, env = "OPERATOR_IMAGE")]
    operator_image: Option<String>,

    /// Resolved deployment manifest
    #[arg(short, long)]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile one instance group
    InstanceGroup {
        /// Instance group name
        #[arg(short, long)]
        name: String,

        /// BPM configs of the instance group (job name -> bpm.yml)
        #[arg(short, long)]
        bpm: PathBuf,

        /// Deployment version
        #[arg(long, default_value = "1")]
        deployment_version: String,
    },

    /// Render the variable interpolation, instance group and BPM gathering jobs
    AutoErrands,

    /// Render the secret requests for the manifest variables
    Variables,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the rendered documents
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config.as_deref(), cli.operator_image.as_deref())?;
    let manifest = Manifest::from_yaml(&read(&cli.manifest)?)
        .with_context(|| format!("failed to parse manifest {}", cli.manifest.display()))?;

    let documents = match cli.command {
        Commands::InstanceGroup {
            name,
            bpm,
            deployment_version,
        } => {
            let instance_group = manifest
                .instance_group(&name)
                .with_context(|| format!("instance group '{name}' not found in manifest"))?;
            let bpm_configs = parse_bpm_configs(&read(&bpm)?)
                .with_context(|| format!("failed to parse bpm configs {}", bpm.display()))?;

            let resources = InstanceGroupCompiler::new(&config).bpm_resources(
                &manifest.name,
                &deployment_version,
                instance_group,
                &manifest,
                &bpm_configs,
            )?;

            let mut documents = Vec::new();
            if let Some(stateful_set) = &resources.stateful_set {
                documents.push(to_yaml(stateful_set)?);
            }
            if let Some(errand) = &resources.errand {
                documents.push(to_yaml(errand)?);
            }
            for service in &resources.services {
                documents.push(to_yaml(service)?);
            }
            documents
        }
        Commands::AutoErrands => {
            let factory = JobFactory::new(&config);
            vec![
                to_yaml(&factory.variable_interpolation_job(&manifest)?)?,
                to_yaml(&factory.instance_group_manifest_job(&manifest, &manifest)?)?,
                to_yaml(&factory.bpm_configs_job(&manifest, &manifest)?)?,
            ]
        }
        Commands::Variables => {
            variables_to_quarks_secrets(&manifest.name, &config.namespace, &manifest.variables)?
                .iter()
                .map(to_yaml)
                .collect::<Result<Vec<_>>>()?
        }
    };

    info!(manifest = %manifest.name, documents = documents.len(), "rendered");
    print!("{}", documents.join("---\n"));
    Ok(())
}

fn load_config(path: Option<&Path>, operator_image: Option<&str>) -> Result<ConverterConfig> {
    let config = match (path, operator_image) {
        (Some(path), _) => ConverterConfig::from_mounted_file(path)?,
        (None, Some(image)) => ConverterConfig::with_operator_image(image),
        (None, None) => ConverterConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_yaml::to_string(value)?)
}
