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

//! BOSH deployment converter
//!
//! This crate compiles a resolved BOSH deployment manifest plus the BPM
//! process configuration of every job into Kubernetes objects: stateful
//! workloads for service instance groups, one-shot jobs for errands, the
//! services exposing them, and the disk topology shared by their pods.
//!
//! Everything here is a pure transformation. Nothing talks to the cluster;
//! the reconciler owns applying the returned objects.

pub mod bpm;
pub mod config;
pub mod converter;
pub mod crds;
pub mod error;
pub mod labels;
pub mod manifest;
pub mod names;

// Re-export commonly used types
pub use bpm::{BpmConfigs, Config as BpmConfig};
pub use config::ConverterConfig;
pub use converter::{
    CompiledResources, ContainerFactory, Disk, Disks, InstanceGroupCompiler, JobFactory,
};
pub use crds::{QuarksJob, QuarksSecret, QuarksStatefulSet};
pub use error::{Error, Result};
pub use manifest::{InstanceGroup, Manifest, ReleaseImageProvider};
