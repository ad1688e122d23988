//! # Secret References
//!
//! An environment value is a secret reference when it starts with the literal,
//! case-sensitive prefix `ssm:`. Everything after the prefix is the Parameter
//! Store name, passed through untouched.
//!
//! There is no escape mechanism: a literal value that happens to begin with
//! `ssm:` is always treated as a reference.

use crate::constants::SSM_PREFIX;

/// Returns true if `value` is an SSM reference
#[must_use]
pub fn is_reference(value: &str) -> bool {
    value.starts_with(SSM_PREFIX)
}

/// Strips the reference prefix, returning the parameter name
///
/// Returns `None` for plain literals. A bare `ssm:` yields `Some("")`; the
/// resolver treats an empty key as "not found".
#[must_use]
pub fn extract_key(value: &str) -> Option<&str> {
    value.strip_prefix(SSM_PREFIX)
}
