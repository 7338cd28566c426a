//! Conversion of BOSH instance groups into Kubernetes objects

pub mod containers;
pub mod disks;
pub mod drain;
pub mod instance_group;
pub mod jobs;
pub mod services;
pub mod variables;
pub mod volumes;

pub use containers::{ContainerFactory, InitPipeline, InitStage};
pub use disks::{Disk, DiskPlanner, Disks};
pub use instance_group::{CompiledResources, InstanceGroupCompiler};
pub use jobs::JobFactory;
pub use services::ServiceExposer;
pub use variables::variables_to_quarks_secrets;
