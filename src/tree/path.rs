//! Slash-delimited node path helpers.

use crate::KeeperError;

pub const ROOT_PATH: &str = "/";

/// Checks that `path` is an absolute, normalised node path.
///
/// Sequential creates may end with `/` because the server appends the suffix.
pub fn validate_path(
    path: &str,
    is_sequential: bool,
) -> Result<(), KeeperError> {
    if is_sequential {
        // The suffix makes a trailing slash legal
        return validate(&format!("{path}1"));
    }
    validate(path)
}

fn validate(path: &str) -> Result<(), KeeperError> {
    if !path.starts_with('/') {
        return Err(KeeperError::BadArguments);
    }
    if path == ROOT_PATH {
        return Ok(());
    }
    if path.ends_with('/') {
        return Err(KeeperError::BadArguments);
    }

    for segment in path[1..].split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(KeeperError::BadArguments);
        }
        if segment.chars().any(is_forbidden_char) {
            return Err(KeeperError::BadArguments);
        }
    }
    Ok(())
}

fn is_forbidden_char(c: char) -> bool {
    matches!(c,
        '\u{0000}'..='\u{001f}'
        | '\u{007f}'..='\u{009f}'
        | '\u{e000}'..='\u{f8ff}'
        | '\u{fff0}'..='\u{ffff}')
}

/// Parent of a validated path; `None` for the root
pub fn parent_path(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a validated path; empty for the root
pub fn node_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}
