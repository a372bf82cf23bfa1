use crate::node::NodeId;
use thiserror::Error;

/// Core error type for module graph operations.
///
/// Cloneable so a single in-flight resolution can hand its outcome to every
/// caller that collapsed onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Failed to resolve {url}: {message}")]
    Resolve { url: String, message: String },

    #[error("Could not resolve {url}")]
    Unresolved { url: String },

    #[error("Unknown module {0}")]
    UnknownModule(NodeId),

    #[error("Resolution of {url} was aborted: {message}")]
    Aborted { url: String, message: String },

    #[error("Invalid graph config: {0}")]
    Config(String),
}

impl GraphError {
    #[must_use]
    pub fn resolve(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            url: url.into(),
            message: message.into(),
        }
    }

    /// The URL this error is about, when it concerns a resolution.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Resolve { url, .. } | Self::Unresolved { url } | Self::Aborted { url, .. } => {
                Some(url)
            }
            Self::UnknownModule(_) | Self::Config(_) => None,
        }
    }
}

pub type Result<T, E = GraphError> = std::result::Result<T, E>;
