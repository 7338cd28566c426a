pub mod quarks_job;
pub mod quarks_secret;
pub mod quarks_statefulset;

pub use quarks_job::*;
pub use quarks_secret::*;
pub use quarks_statefulset::*;
