//! SSM Secrets Webhook Library
//!
//! Two halves share this crate:
//!
//! - the mutating admission webhook (`ssm-secrets-webhook`), which rewrites
//!   pods whose environment references SSM Parameter Store values so that
//!   they start through `ssm-env`
//! - the `ssm-env` launcher, which resolves those references inside the
//!   container and replaces itself with the original command
//!
//! An environment value is a reference when it starts with `ssm:`; the rest
//! is the parameter name.

pub mod config;
pub mod constants;
pub mod env;
pub mod launcher;
pub mod observability;
pub mod reference;
pub mod registry;
pub mod server;
pub mod webhook;
