use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::OptionsError;

/// Environment switch that forces [`RefreshOptions::ignore_file_type_changes`] on (`1`/`true`) or
/// off (`0`/`false`).
pub const IGNORE_FILE_TYPE_CHANGES_ENV: &str = "NOVA_VFS_REFRESH_IGNORE_FILE_TYPE_CHANGES";

/// Per-refresh switches.
///
/// ```toml
/// recursive = true
/// ignore_file_type_changes = false
/// max_transient_retries = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshOptions {
    /// Queue dirty subdirectories and mark processed directories clean.
    pub recursive: bool,
    /// Debugging aid: report kind flips as attribute diffs instead of a delete + create pair.
    pub ignore_file_type_changes: bool,
    pub prefer_batched_listing: bool,
    /// Diff the hidden bit. Only Windows tracks it.
    pub platform_tracks_hidden: bool,
    /// Enumerate newly created directories into their create events.
    pub expand_created_directories: bool,
    /// How often a directory whose listing failed is re-queued before it is skipped.
    pub max_transient_retries: u32,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            ignore_file_type_changes: false,
            prefer_batched_listing: true,
            platform_tracks_hidden: cfg!(windows),
            expand_created_directories: true,
            max_transient_retries: 1,
        }
    }
}

impl RefreshOptions {
    pub fn from_toml_str(text: &str) -> Result<Self, OptionsError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| OptionsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Applies [`IGNORE_FILE_TYPE_CHANGES_ENV`] if it is set to a recognizable value.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(IGNORE_FILE_TYPE_CHANGES_ENV) {
            match parse_bool(&raw) {
                Some(value) => self.ignore_file_type_changes = value,
                None => tracing::warn!(
                    target = "nova.vfs.refresh",
                    var = IGNORE_FILE_TYPE_CHANGES_ENV,
                    value = %raw,
                    "ignoring unrecognized boolean override"
                ),
            }
        }
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn ignore_file_type_changes(mut self, ignore: bool) -> Self {
        self.ignore_file_type_changes = ignore;
        self
    }

    pub fn prefer_batched_listing(mut self, prefer: bool) -> Self {
        self.prefer_batched_listing = prefer;
        self
    }

    pub fn platform_tracks_hidden(mut self, tracks: bool) -> Self {
        self.platform_tracks_hidden = tracks;
        self
    }

    pub fn expand_created_directories(mut self, expand: bool) -> Self {
        self.expand_created_directories = expand;
        self
    }

    pub fn max_transient_retries(mut self, retries: u32) -> Self {
        self.max_transient_retries = retries;
        self
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
