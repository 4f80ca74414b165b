//! Runtime settings loaded from environment variables.

use std::path::PathBuf;

/// Process-wide settings.
///
/// Handed explicitly to the operations that consult them instead of living in
/// global state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    /// When set, forking is refused to conserve storage (from NODE_FOREST_DISK_SAVING_MODE)
    pub disk_saving_mode: bool,
    /// Database file override (from NODE_FOREST_DB)
    pub database_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        let disk_saving_mode = std::env::var("NODE_FOREST_DISK_SAVING_MODE")
            .ok()
            .map(|s| parse_flag(&s))
            .unwrap_or(false);

        let database_path = std::env::var("NODE_FOREST_DB").ok().map(PathBuf::from);

        Self {
            disk_saving_mode,
            database_path,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flag_accepts_common_truthy_values() {
        for value in ["1", "true", "TRUE", " yes ", "on"] {
            assert!(parse_flag(value), "{value} should be truthy");
        }
        for value in ["0", "false", "", "off", "nope"] {
            assert!(!parse_flag(value), "{value} should be falsy");
        }
    }

    #[test]
    fn default_allows_forking() {
        assert!(!Settings::default().disk_saving_mode);
        assert!(Settings::default().database_path.is_none());
    }

    #[test]
    fn disk_saving_is_set_with_struct_update() {
        let settings = Settings {
            disk_saving_mode: true,
            ..Default::default()
        };
        assert!(settings.disk_saving_mode);
        assert!(settings.database_path.is_none());
    }
}
