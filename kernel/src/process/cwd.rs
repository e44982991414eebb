//! Path normalization and resolution against a working directory.
//!
//! A thread's current working directory is just the `cwd: String` field on
//! its [`crate::sched::task::UserState`]; these are the free functions that
//! manipulate it.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::string::String;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// Resolve a potentially relative path against a given working directory.
///
/// - If `path` starts with `/`, it is treated as absolute and normalized.
/// - Otherwise, `path` is appended to `cwd` with a `/` separator and
///   normalized.
#[cfg(feature = "alloc")]
pub fn resolve_path(path: &str, cwd: &str) -> String {
    if path.starts_with('/') {
        normalize_path(path)
    } else {
        let mut combined = String::with_capacity(cwd.len() + 1 + path.len());
        combined.push_str(cwd);
        if !cwd.ends_with('/') {
            combined.push('/');
        }
        combined.push_str(path);
        normalize_path(&combined)
    }
}

/// Normalize a path by collapsing redundant separators and resolving `.` and
/// `..`.
///
/// The result is always an absolute path starting with `/`. Trailing slashes
/// are removed (except for the root `/` itself).
#[cfg(feature = "alloc")]
pub fn normalize_path(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => {
                components.push(other);
            }
        }
    }

    if components.is_empty() {
        return String::from("/");
    }

    let mut result = String::with_capacity(path.len());
    for component in &components {
        result.push('/');
        result.push_str(component);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn test_normalize_simple() {
        assert_eq!(normalize_path("/usr/bin"), "/usr/bin");
    }

    #[test]
    fn test_normalize_trailing_slash() {
        assert_eq!(normalize_path("/usr/bin/"), "/usr/bin");
    }

    #[test]
    fn test_normalize_double_slash() {
        assert_eq!(normalize_path("/usr//bin"), "/usr/bin");
    }

    #[test]
    fn test_normalize_triple_slash() {
        assert_eq!(normalize_path("///"), "/");
    }

    #[test]
    fn test_normalize_dot() {
        assert_eq!(normalize_path("/usr/./bin"), "/usr/bin");
    }

    #[test]
    fn test_normalize_dotdot() {
        assert_eq!(normalize_path("/usr/local/../bin"), "/usr/bin");
    }

    #[test]
    fn test_normalize_dotdot_at_root() {
        assert_eq!(normalize_path("/.."), "/");
    }

    #[test]
    fn test_normalize_multiple_dotdot() {
        assert_eq!(normalize_path("/a/b/c/../../d"), "/a/d");
    }

    #[test]
    fn test_normalize_complex() {
        assert_eq!(normalize_path("/usr//local/../bin/./gcc"), "/usr/bin/gcc");
    }

    #[test]
    fn test_normalize_all_dotdot() {
        assert_eq!(normalize_path("/a/b/../../.."), "/");
    }

    #[test]
    fn test_resolve_absolute() {
        assert_eq!(resolve_path("/etc/hosts", "/home"), "/etc/hosts");
    }

    #[test]
    fn test_resolve_relative_simple() {
        assert_eq!(resolve_path("foo", "/home"), "/home/foo");
    }

    #[test]
    fn test_resolve_relative_nested() {
        assert_eq!(resolve_path("foo/bar", "/home"), "/home/foo/bar");
    }

    #[test]
    fn test_resolve_relative_dotdot() {
        assert_eq!(resolve_path("../bin", "/usr/local"), "/usr/bin");
    }

    #[test]
    fn test_resolve_dot() {
        assert_eq!(resolve_path(".", "/var/log"), "/var/log");
    }

    #[test]
    fn test_resolve_relative_from_root() {
        assert_eq!(resolve_path("usr/bin", "/"), "/usr/bin");
    }

    #[test]
    fn test_resolve_dotdot_past_root() {
        assert_eq!(resolve_path("../../..", "/a"), "/");
    }
}
