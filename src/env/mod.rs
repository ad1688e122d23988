//! # Environment Resolution
//!
//! Runs inside mutated containers, in `ssm-env`, before the workload starts.
//!
//! - `parameter`: single-key reads from SSM Parameter Store
//! - `region`: active region from config or EC2 instance metadata
//! - `resolver`: rewrites the process environment, replacing `ssm:` references

pub mod parameter;
pub mod region;
pub mod resolver;

pub use parameter::{ParameterError, ParameterStore, SsmParameterStore};
pub use region::{region_from_instance_metadata, resolve_region};
pub use resolver::{EnvironmentResolver, ParameterCache, ResolveError};
