use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Subscription tier of the backend account. Only affects the copy shown
/// when the backend reports a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    #[default]
    Paid,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. "info", "turnwise=debug")
    pub level: Option<String>,
    /// File that receives tracing output; logging is off when unset
    pub file: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Approve tool calls without asking, for tools the active agent exposes
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub plan: Plan,
    /// Start with tool output and reasoning collapsed
    #[serde(default)]
    pub tools_collapsed: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
