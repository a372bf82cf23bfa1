use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};

/// Default address prefix for file-only entries.
pub const DEFAULT_FS_PREFIX: &str = "/@fs/";

/// Addressing configuration for a module graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Prefix used to synthesize URLs for dependencies that have no served
    /// address of their own.
    pub fs_prefix: String,

    /// URL schemes that mark virtual modules. Virtual modules never get their
    /// extension reconciled with the resolved id.
    pub virtual_prefixes: Vec<String>,

    /// Extensions (without the dot) that make a direct request a stylesheet.
    pub style_extensions: Vec<String>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            fs_prefix: DEFAULT_FS_PREFIX.to_string(),
            virtual_prefixes: vec!["virtual:".to_string()],
            style_extensions: [
                "css", "less", "sass", "scss", "styl", "stylus", "pcss", "postcss", "sss",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

impl GraphConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the file-only address prefix.
    #[must_use]
    pub fn with_fs_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.fs_prefix = prefix.into();
        self
    }

    /// Add a virtual module scheme.
    #[must_use]
    pub fn with_virtual_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.virtual_prefixes.push(prefix.into());
        self
    }

    /// Replace the stylesheet extension list.
    #[must_use]
    pub fn with_style_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.style_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Check that the configuration can address modules.
    pub fn validate(&self) -> Result<()> {
        if !self.fs_prefix.starts_with('/') {
            return Err(GraphError::Config(format!(
                "fs_prefix must start with '/', got {:?}",
                self.fs_prefix
            )));
        }
        if !self.fs_prefix.ends_with('/') {
            return Err(GraphError::Config(format!(
                "fs_prefix must end with '/', got {:?}",
                self.fs_prefix
            )));
        }
        if self.virtual_prefixes.iter().any(String::is_empty) {
            return Err(GraphError::Config(
                "virtual prefixes must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GraphConfig::default();
        assert_eq!(config.fs_prefix, "/@fs/");
        assert!(config.validate().is_ok());
        assert!(config.style_extensions.iter().any(|e| e == "scss"));
    }

    #[test]
    fn test_bad_fs_prefix_rejected() {
        let config = GraphConfig::new().with_fs_prefix("@fs");
        assert!(matches!(config.validate(), Err(GraphError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GraphConfig =
            serde_json::from_str(r#"{"virtual_prefixes":["virtual:","~"]}"#).unwrap();
        assert_eq!(config.fs_prefix, DEFAULT_FS_PREFIX);
        assert_eq!(config.virtual_prefixes.len(), 2);
    }
}
