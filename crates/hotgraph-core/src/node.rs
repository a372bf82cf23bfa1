//! Module nodes: one addressable compiled unit each.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Handle to a node owned by a [`crate::ModuleGraph`].
///
/// Handles are stable for the lifetime of the graph; nodes are never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// What kind of compiled unit a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    #[default]
    Script,
    /// A direct stylesheet request.
    Style,
}

impl ModuleKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Style => "style",
        }
    }
}

/// Cached output of one transform pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransformResult {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub dynamic_deps: Vec<String>,
}

impl TransformResult {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// An evaluated server-side module instance. Opaque to the graph.
#[derive(Clone)]
pub struct SsrModule(Arc<dyn Any + Send + Sync>);

impl SsrModule {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for SsrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SsrModule(..)")
    }
}

/// A dependency reported by the transform pipeline: either a raw URL still
/// to be resolved, or a node already resolved during the same pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImportTarget {
    Url(String),
    Node(NodeId),
}

impl From<&str> for ImportTarget {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for ImportTarget {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

impl From<NodeId> for ImportTarget {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

/// A node in the module graph.
///
/// `importers` is the transpose of every node's client and ssr edges and is
/// only ever edited by the import graph updater.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// Canonical served URL, e.g. `/src/App.vue`.
    pub url: String,
    /// Resolved disk identity including query; `None` for file-only entries.
    pub id: Option<String>,
    /// Physical path with the query stripped.
    pub file: Option<String>,
    pub kind: ModuleKind,
    /// Resolver metadata recorded at creation.
    pub meta: Option<serde_json::Value>,
    pub importers: HashSet<NodeId>,
    pub client_imported_modules: HashSet<NodeId>,
    pub ssr_imported_modules: HashSet<NodeId>,
    pub accepted_hmr_deps: HashSet<NodeId>,
    pub accepted_hmr_exports: Option<HashSet<String>>,
    /// Imported module key (resolved id) to the names bound from it.
    pub imported_bindings: Option<HashMap<String, HashSet<String>>>,
    pub static_imported_urls: Option<HashSet<String>>,
    pub is_self_accepting: Option<bool>,
    pub transform_result: Option<TransformResult>,
    pub ssr_transform_result: Option<TransformResult>,
    pub ssr_module: Option<SsrModule>,
    pub ssr_error: Option<String>,
    pub last_hmr_timestamp: u64,
    pub last_invalidation_timestamp: u64,
}

impl ModuleNode {
    pub(crate) fn new(url: String, kind: ModuleKind, set_is_self_accepting: bool) -> Self {
        Self {
            url,
            id: None,
            file: None,
            kind,
            meta: None,
            importers: HashSet::new(),
            client_imported_modules: HashSet::new(),
            ssr_imported_modules: HashSet::new(),
            accepted_hmr_deps: HashSet::new(),
            accepted_hmr_exports: None,
            imported_bindings: None,
            static_imported_urls: None,
            is_self_accepting: if set_is_self_accepting {
                Some(false)
            } else {
                None
            },
            transform_result: None,
            ssr_transform_result: None,
            ssr_module: None,
            ssr_error: None,
            last_hmr_timestamp: 0,
            last_invalidation_timestamp: 0,
        }
    }

    /// Union of client and ssr edges.
    #[must_use]
    pub fn imported_modules(&self) -> HashSet<NodeId> {
        self.client_imported_modules
            .union(&self.ssr_imported_modules)
            .copied()
            .collect()
    }

    /// Edge set for one execution context.
    #[must_use]
    pub fn imported_modules_for(&self, ssr: bool) -> &HashSet<NodeId> {
        if ssr {
            &self.ssr_imported_modules
        } else {
            &self.client_imported_modules
        }
    }

    /// Whether any compiled artifact or ssr outcome is cached.
    #[must_use]
    pub fn has_cached_artifacts(&self) -> bool {
        self.transform_result.is_some()
            || self.ssr_transform_result.is_some()
            || self.ssr_module.is_some()
            || self.ssr_error.is_some()
    }

    /// Record an HMR or invalidation clock tick. Clocks never go backwards.
    pub(crate) fn bump_timestamp(&mut self, timestamp: u64, is_hmr: bool) {
        let clock = if is_hmr {
            &mut self.last_hmr_timestamp
        } else {
            &mut self.last_invalidation_timestamp
        };
        *clock = (*clock).max(timestamp);
    }

    /// Drop every cached artifact. Returns the client etag that was dropped.
    pub(crate) fn clear_artifacts(&mut self) -> Option<String> {
        let etag = self.transform_result.take().and_then(|r| r.etag);
        self.ssr_transform_result = None;
        self.ssr_module = None;
        self.ssr_error = None;
        etag
    }
}
