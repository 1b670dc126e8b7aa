//! Repository-wide configuration (`ferry.kdl`).
//!
//! ```kdl
//! queue "default"
//! override-queue #false
//! global-timeout 3600
//! default-image "debian:stable"
//! ignore-directories "vendor" "third_party"
//! metadata {
//!     team "infra"
//! }
//! allow-privileged #false
//! ```

use crate::node;
use crate::{ConfigError, ConfigResult};
use ferry_core::queue::DEFAULT_QUEUE;
use ferry_core::task::Resources;
use kdl::KdlDocument;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File name of the repository configuration, read from the parent
/// repository's main branch.
pub const REPO_CONFIG_FILE: &str = "ferry.kdl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub workdir: String,
    pub queue: String,
    pub override_queue: bool,
    /// Seconds; 0 means unset.
    pub global_timeout_secs: u64,
    pub override_timeout: bool,
    /// Task directories under any of these prefixes are never selected.
    pub ignore_directories: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub override_metadata: bool,
    pub default_image: String,
    pub default_resources: Resources,
    pub allow_privileged: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            workdir: String::new(),
            queue: DEFAULT_QUEUE.to_string(),
            override_queue: false,
            global_timeout_secs: 0,
            override_timeout: false,
            ignore_directories: Vec::new(),
            metadata: BTreeMap::new(),
            override_metadata: false,
            default_image: String::new(),
            default_resources: Resources::default(),
            allow_privileged: false,
        }
    }
}

impl RepoConfig {
    /// Whether `dir` falls under one of the ignored prefixes.
    pub fn is_ignored(&self, dir: &str) -> bool {
        self.ignore_directories
            .iter()
            .any(|prefix| !prefix.is_empty() && dir.starts_with(prefix.as_str()))
    }
}

/// Parse a repository configuration from KDL text.
pub fn parse_repo_config(kdl: &str) -> ConfigResult<RepoConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = RepoConfig::default();

    for n in doc.nodes() {
        match node::name(n) {
            "workdir" => config.workdir = node::first_string_arg(n)?,
            "queue" => config.queue = node::first_string_arg(n)?,
            "override-queue" => config.override_queue = node::bool_arg(n)?,
            "global-timeout" => config.global_timeout_secs = node::u64_arg(n)?,
            "override-timeout" => config.override_timeout = node::bool_arg(n)?,
            "ignore-directories" => config.ignore_directories = node::all_string_args(n)?,
            "metadata" => config.metadata = node::string_map(n)?,
            "override-metadata" => config.override_metadata = node::bool_arg(n)?,
            "default-image" => config.default_image = node::first_string_arg(n)?,
            "default-resources" => config.default_resources = node::resources(n)?,
            "allow-privileged" => config.allow_privileged = node::bool_arg(n)?,
            other => return Err(ConfigError::UnknownField(other.to_string())),
        }
    }

    if config.queue.is_empty() {
        config.queue = DEFAULT_QUEUE.to_string();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_defaults() {
        let config = parse_repo_config("").unwrap();
        assert_eq!(config, RepoConfig::default());
        assert_eq!(config.queue, "default");
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            workdir "/src"
            queue "linux"
            override-queue #true
            global-timeout 3600
            override-timeout
            ignore-directories "vendor" "third_party"
            metadata {
                team "infra"
            }
            default-image "debian:stable"
            default-resources cpu=2 memory=4096
            allow-privileged #true
        "#;

        let config = parse_repo_config(kdl).unwrap();
        assert_eq!(config.workdir, "/src");
        assert_eq!(config.queue, "linux");
        assert!(config.override_queue);
        assert_eq!(config.global_timeout_secs, 3600);
        assert!(config.override_timeout);
        assert_eq!(config.ignore_directories, vec!["vendor", "third_party"]);
        assert_eq!(config.metadata["team"], "infra");
        assert_eq!(config.default_resources.cpu, 2);
        assert_eq!(config.default_resources.memory, 4096);
        assert!(config.allow_privileged);
        assert!(config.is_ignored("vendor/github.com/x"));
        assert!(!config.is_ignored("src"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_repo_config("queu \"typo\"").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownField(_)));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let err = parse_repo_config("global-timeout -5").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
