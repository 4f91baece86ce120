//! Path utilities for Tracewarden
//!
//! Handles tilde expansion and the application root.

use std::path::PathBuf;

/// Expands a leading tilde (~) to the user's home directory.
/// Examples:
/// "~/.tracewarden/inbox" -> "/home/ops/.tracewarden/inbox"
/// "/var/log/traces" -> "/var/log/traces" (no change)
pub fn expand_tilde(path: &str) -> String {
    let path = path.trim();
    if path == "~" {
        return home_dir();
    }

    if let Some(rest) = path.strip_prefix("~/") {
        return format!("{}/{}", home_dir(), rest);
    }

    path.to_string()
}

/// Helper to convert a potentially tilde-containing string into a PathBuf.
pub fn get_path(path: &str) -> PathBuf {
    PathBuf::from(expand_tilde(path))
}

/// Resolves the Tracewarden root using the TRACEWARDEN_ROOT env var.
/// Handles absolute paths, tilde expansion, and bare names relative to $HOME.
pub fn get_app_root() -> PathBuf {
    let root_name =
        std::env::var("TRACEWARDEN_ROOT").unwrap_or_else(|_| ".tracewarden".to_string());

    if root_name.starts_with('/') {
        PathBuf::from(root_name)
    } else if root_name.starts_with('~') {
        get_path(&root_name)
    } else {
        PathBuf::from(home_dir()).join(root_name)
    }
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_untouched() {
        assert_eq!(expand_tilde("/var/log/traces"), "/var/log/traces");
        assert_eq!(get_path("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn leading_tilde_is_expanded() {
        let expanded = expand_tilde("~/inbox");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/inbox"));
    }

    #[test]
    fn tilde_in_the_middle_is_kept() {
        assert_eq!(expand_tilde("/data/~backup"), "/data/~backup");
    }
}
