//! Branch and repository name validation.
//!
//! Branch names follow git's conventions so that they can be embedded in
//! store keys (`:` is the key separator) and shown in URLs without escaping:
//! no whitespace or `~ ^ : ? * [ \`, no `..` or `@{`, no leading or trailing
//! `.` or `/`, no `.lock` suffix, and every `/`-separated component is
//! non-empty and does not start with `.`.

use arbor_types::RepositoryId;

use crate::error::{RefError, RefResult};

const FORBIDDEN_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// Longest accepted branch name, in bytes.
pub const MAX_BRANCH_NAME_LEN: usize = 255;

/// Validate a branch name.
///
/// ```
/// use arbor_refs::validate_branch_name;
///
/// assert!(validate_branch_name("master").is_ok());
/// assert!(validate_branch_name("feature/history").is_ok());
/// assert!(validate_branch_name("").is_err());
/// assert!(validate_branch_name("a..b").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> RefResult<()> {
    match branch_name_problem(name) {
        None => Ok(()),
        Some(reason) => Err(RefError::InvalidBranchName {
            name: name.to_string(),
            reason,
        }),
    }
}

fn branch_name_problem(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("must not be empty".into());
    }
    if name.len() > MAX_BRANCH_NAME_LEN {
        return Some(format!("longer than {MAX_BRANCH_NAME_LEN} bytes"));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || FORBIDDEN_CHARS.contains(c))
    {
        return Some(format!("contains forbidden character: {ch:?}"));
    }
    for pattern in ["..", "@{"] {
        if name.contains(pattern) {
            return Some(format!("must not contain {pattern:?}"));
        }
    }
    if name.ends_with(".lock") {
        return Some("must not end with \".lock\"".into());
    }
    if name.ends_with('.') || name.ends_with('/') || name.starts_with('/') {
        return Some("must not start with '/' or end with '.' or '/'".into());
    }
    name.split('/').find_map(|component| {
        if component.is_empty() {
            Some("must not contain empty path components".into())
        } else if component.starts_with('.') {
            Some(format!("component {component:?} starts with '.'"))
        } else {
            None
        }
    })
}

/// Parse and validate a repository id.
pub fn validate_repository_id(id: &str) -> RefResult<RepositoryId> {
    Ok(RepositoryId::new(id)?)
}
