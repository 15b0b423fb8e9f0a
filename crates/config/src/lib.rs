//! Configuration helpers for Inboxorcist services
//!
//! Provides the shared config/data directory locations and environment
//! override helpers. All runtime tunables come from the environment or the
//! database; there is no config-file format.

use std::path::PathBuf;

/// Get the Inboxorcist config directory (~/.config/inboxorcist/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("inboxorcist"))
}

/// Get the Inboxorcist data directory (~/.local/share/inboxorcist/)
///
/// Databases and other mutable state live here, not in the config dir.
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("inboxorcist"))
}

/// Read an environment variable, treating empty values as unset
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Read an environment variable and parse it, falling back to a default
///
/// Unparseable values fall back too; callers that need to distinguish a
/// malformed override from an absent one should use [`env_var`] directly.
pub fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("inboxorcist"));
    }

    #[test]
    fn test_data_dir() {
        let dir = data_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("inboxorcist"));
    }

    #[test]
    fn test_env_var_unset() {
        assert_eq!(env_var("INBOXORCIST_TEST_UNSET_VAR"), None);
    }

    #[test]
    fn test_env_parsed_default() {
        assert_eq!(env_parsed("INBOXORCIST_TEST_UNSET_VAR", 47u32), 47);
    }
}
