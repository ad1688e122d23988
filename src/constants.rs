//! # Constants
//!
//! Shared constants used by the webhook and the `ssm-env` launcher.
//!
//! The webhook writes several of these into mutated pod specs and the
//! launcher reads them back at container start, so both halves must agree.

/// Prefix marking an environment value as an SSM Parameter Store reference
pub const SSM_PREFIX: &str = "ssm:";

/// Name of the shared in-memory volume holding the launcher binary
pub const VOLUME_NAME: &str = "ssm-env";

/// Mount path of the shared volume inside every mutated container
pub const MOUNT_PATH: &str = "/mutate/";

/// Path of the launcher binary once the staging init container has copied it
pub const LAUNCHER_PATH: &str = "/mutate/ssm-env";

/// Name of the staging init container
pub const INIT_CONTAINER_NAME: &str = "copy-ssm-env";

/// Shell command run by the staging init container
pub const INIT_CONTAINER_COMMAND: [&str; 3] = ["sh", "-c", "cp /usr/local/bin/ssm-env /mutate/"];

/// CPU request and limit of the staging init container
pub const INIT_CONTAINER_CPU: &str = "50m";

/// Memory request and limit of the staging init container
pub const INIT_CONTAINER_MEMORY: &str = "64Mi";

/// Env var carrying the ignore-missing-secrets policy into mutated containers
pub const ENV_IGNORE_MISSING_SECRETS: &str = "SSM_IGNORE_MISSING_SECRETS";

/// Env var carrying the JSON log policy into mutated containers
pub const ENV_JSON_LOG: &str = "SSM_JSON_LOG";

/// Env var bounding each parameter fetch made by the launcher (seconds, 0 disables)
pub const ENV_FETCH_TIMEOUT_SECS: &str = "SSM_FETCH_TIMEOUT_SECS";

/// Default per-fetch deadline for the launcher (seconds)
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default staging image holding the launcher binary
pub const DEFAULT_SSM_ENV_IMAGE: &str = "pwillie/ssm-env:latest";

/// Default pull policy of the staging image
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Default admission listen address
pub const DEFAULT_LISTEN_ADDRESS: &str = ":8443";

/// EC2 instance metadata endpoint, consulted when no region is configured
pub const EC2_METADATA_ENDPOINT: &str = "http://169.254.169.254";

/// Path of the instance identity document below the metadata endpoint
pub const EC2_IDENTITY_DOCUMENT_PATH: &str = "/latest/dynamic/instance-identity/document";

/// Path of the IMDSv2 session token below the metadata endpoint
pub const EC2_METADATA_TOKEN_PATH: &str = "/latest/api/token";

/// Timeout for the instance metadata request (seconds)
pub const INSTANCE_METADATA_TIMEOUT_SECS: u64 = 5;

/// Timeout for container registry requests (seconds)
pub const REGISTRY_TIMEOUT_SECS: u64 = 10;
