//! Safety checks run before anything is deleted on the remote host.
//!
//! A mapped path that is relative, climbs out of its directory, or sits
//! directly under `/` is refused before any command is built for it.

/// Validates a mapped remote audio path.
///
/// Checks:
/// - Path must be absolute
/// - No NUL bytes or line breaks
/// - No `.` or `..` components
/// - Must name a file inside a directory other than `/`
///
/// # Returns
/// * `Ok(())` if the path is safe to derive sidecar paths from
/// * `Err` with a short reason otherwise
pub fn validate_remote_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("path is not absolute");
    }
    if path.contains(['\0', '\n', '\r']) {
        return Err("path contains control characters");
    }
    if path.ends_with('/') {
        return Err("path names a directory");
    }

    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if components.iter().any(|c| *c == "." || *c == "..") {
        return Err("path contains relative components");
    }
    // The file itself plus at least one directory above it.
    if components.len() < 2 {
        return Err("parent directory is the filesystem root");
    }

    Ok(())
}
