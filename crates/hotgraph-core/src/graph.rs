//! The module registry.
//!
//! Holds every node in an arena plus three lookup indexes (served URL,
//! resolved id, physical file) and two pending-resolution caches, one per
//! execution context. Concurrent requests for the same URL collapse onto one
//! in-flight resolution: the first caller publishes its handle into the
//! pending cache before anything suspends.

use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::node::{ModuleKind, ModuleNode, NodeId, SsrModule, TransformResult};
use crate::resolver::UrlResolver;
use crate::url::{clean_url, is_direct_css_request, normalize_path, reconcile_extension};
use crate::url::{remove_timestamp_query, strip_markers};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

type InFlight = Shared<BoxFuture<'static, Result<NodeId>>>;

/// Entry in a pending-resolution cache.
#[derive(Clone)]
enum Pending {
    InFlight(InFlight),
    Ready(NodeId),
}

/// Mutable registry state. Only touched through the graph's lock, and the
/// lock is never held across an `.await`.
#[derive(Default)]
pub(crate) struct GraphInner {
    pub(crate) nodes: Vec<ModuleNode>,
    pub(crate) url_to_module: HashMap<String, NodeId>,
    pub(crate) id_to_module: HashMap<String, NodeId>,
    pub(crate) file_to_modules: HashMap<String, Vec<NodeId>>,
    pub(crate) etag_to_module: HashMap<String, NodeId>,
    pending_client: HashMap<String, Pending>,
    pending_ssr: HashMap<String, Pending>,
}

impl GraphInner {
    pub(crate) fn node(&self, id: NodeId) -> Result<&ModuleNode> {
        self.nodes.get(id.0).ok_or(GraphError::UnknownModule(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut ModuleNode> {
        self.nodes.get_mut(id.0).ok_or(GraphError::UnknownModule(id))
    }

    fn pending(&self, ssr: bool) -> &HashMap<String, Pending> {
        if ssr {
            &self.pending_ssr
        } else {
            &self.pending_client
        }
    }

    fn pending_mut(&mut self, ssr: bool) -> &mut HashMap<String, Pending> {
        if ssr {
            &mut self.pending_ssr
        } else {
            &mut self.pending_client
        }
    }

    pub(crate) fn modules_by_file(&self, file: &str) -> Vec<NodeId> {
        self.file_to_modules
            .get(file)
            .or_else(|| self.file_to_modules.get(&normalize_path(file)))
            .cloned()
            .unwrap_or_default()
    }

    fn push_node(&mut self, node: ModuleNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let Some(file) = &node.file {
            self.file_to_modules.entry(file.clone()).or_default().push(id);
        }
        self.nodes.push(node);
        id
    }

    /// Register the outcome of a resolution. Reuses the node already owning
    /// `resolved_id`, recording `url` as an alias if it is new.
    fn register(
        &mut self,
        config: &GraphConfig,
        url: String,
        resolved_id: String,
        meta: Option<serde_json::Value>,
        set_is_self_accepting: bool,
    ) -> NodeId {
        if let Some(&existing) = self.id_to_module.get(&resolved_id) {
            if !self.url_to_module.contains_key(&url) {
                debug!(url = %url, id = %resolved_id, "Registering URL alias");
                self.url_to_module.insert(url, existing);
            }
            return existing;
        }

        let kind = if is_direct_css_request(&url, config) {
            ModuleKind::Style
        } else {
            ModuleKind::Script
        };
        let mut node = ModuleNode::new(url.clone(), kind, set_is_self_accepting);
        node.file = Some(clean_url(&resolved_id).to_string());
        node.id = Some(resolved_id.clone());
        node.meta = meta;

        let id = self.push_node(node);
        debug!(url = %url, id = %resolved_id, node = %id, "Created module node");
        self.url_to_module.insert(url, id);
        self.id_to_module.insert(resolved_id, id);
        id
    }
}

struct GraphState {
    config: GraphConfig,
    resolver: Arc<dyn UrlResolver>,
    inner: RwLock<GraphInner>,
}

/// In-memory module graph for one dev-server session.
///
/// Cheap to clone: clones share the same registry. A full reset is done by
/// building a new graph.
#[derive(Clone)]
pub struct ModuleGraph {
    state: Arc<GraphState>,
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("config", &self.state.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Size of each registry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub modules: usize,
    pub urls: usize,
    pub ids: usize,
    pub files: usize,
    pub pending_client: usize,
    pub pending_ssr: usize,
}

impl ModuleGraph {
    /// Create an empty graph with the default configuration.
    pub fn new(resolver: impl UrlResolver) -> Self {
        Self::from_parts(GraphConfig::default(), Arc::new(resolver))
    }

    /// Create an empty graph with an explicit configuration.
    pub fn with_config(config: GraphConfig, resolver: impl UrlResolver) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, Arc::new(resolver)))
    }

    fn from_parts(config: GraphConfig, resolver: Arc<dyn UrlResolver>) -> Self {
        Self {
            state: Arc::new(GraphState {
                config,
                resolver,
                inner: RwLock::new(GraphInner::default()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.state.config
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        self.state
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, GraphInner> {
        self.state
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a URL to `(served_url, resolved_id, meta)`.
    ///
    /// Markers are stripped first. When the resolved id carries an extension
    /// the URL lacks, the extension is spliced into the URL so that
    /// `/src/App` and `/src/App.vue` converge on the same node.
    pub async fn resolve_url(
        &self,
        url: &str,
        ssr: bool,
    ) -> Result<(String, String, Option<serde_json::Value>)> {
        let url = strip_markers(url);
        let resolved = self
            .state
            .resolver
            .resolve_id(&url, ssr)
            .await?
            .ok_or_else(|| GraphError::Unresolved { url: url.clone() })?;
        let served = reconcile_extension(&url, &resolved.id, &self.state.config);
        trace!(url = %url, served = %served, id = %resolved.id, ssr, "Resolved URL");
        Ok((served, resolved.id, resolved.meta))
    }

    /// Get or create the node for `raw_url`.
    ///
    /// Concurrent calls for the same URL share one resolver invocation. A
    /// failed resolution leaves no node and no pending entry behind.
    pub async fn ensure_entry_from_url(
        &self,
        raw_url: &str,
        ssr: bool,
        set_is_self_accepting: bool,
    ) -> Result<NodeId> {
        let url = strip_markers(raw_url);
        let in_flight = {
            let mut inner = self.write();
            let existing = inner.pending(ssr).get(&url).cloned();
            match existing {
                Some(Pending::Ready(id)) => return Ok(id),
                Some(Pending::InFlight(in_flight)) => in_flight,
                None => {
                    let in_flight = self.spawn_resolution(url.clone(), ssr, set_is_self_accepting);
                    inner
                        .pending_mut(ssr)
                        .insert(url, Pending::InFlight(in_flight.clone()));
                    in_flight
                }
            }
        };
        in_flight.await
    }

    /// Start resolving `url` on its own task. The task keeps running even if
    /// every caller drops its handle.
    fn spawn_resolution(&self, url: String, ssr: bool, set_is_self_accepting: bool) -> InFlight {
        let graph = self.clone();
        let task_url = url.clone();
        let handle = tokio::spawn(async move {
            graph
                .materialize(task_url, ssr, set_is_self_accepting)
                .await
        });
        async move {
            match handle.await {
                Ok(result) => result,
                Err(err) => Err(GraphError::Aborted {
                    url,
                    message: err.to_string(),
                }),
            }
        }
        .boxed()
        .shared()
    }

    async fn materialize(
        &self,
        url: String,
        ssr: bool,
        set_is_self_accepting: bool,
    ) -> Result<NodeId> {
        let resolved = self.resolve_url(&url, ssr).await;
        let mut inner = self.write();
        match resolved {
            Ok((served, resolved_id, meta)) => {
                let id = inner.register(
                    &self.state.config,
                    served,
                    resolved_id,
                    meta,
                    set_is_self_accepting,
                );
                inner.pending_mut(ssr).insert(url, Pending::Ready(id));
                Ok(id)
            }
            Err(err) => {
                debug!(url = %url, error = %err, "Resolution failed");
                inner.pending_mut(ssr).remove(&url);
                Err(err)
            }
        }
    }

    /// Get or create a node for a dependency that has no served URL of its
    /// own, such as a stylesheet pulled in by another stylesheet.
    pub fn create_file_only_entry(&self, file: &str) -> NodeId {
        let file = normalize_path(file);
        let url = format!(
            "{}{}",
            self.state.config.fs_prefix,
            file.trim_start_matches('/')
        );

        let mut inner = self.write();
        for id in inner.modules_by_file(&file) {
            let node = &inner.nodes[id.0];
            if node.url == url || node.id.as_deref() == Some(file.as_str()) {
                return id;
            }
        }

        let kind = if is_direct_css_request(&url, &self.state.config) {
            ModuleKind::Style
        } else {
            ModuleKind::Script
        };
        let mut node = ModuleNode::new(url.clone(), kind, true);
        node.file = Some(file.clone());
        let id = inner.push_node(node);
        inner.url_to_module.entry(url.clone()).or_insert(id);
        debug!(url = %url, file = %file, node = %id, "Created file-only module node");
        id
    }

    /// Look up a node by URL without creating one.
    ///
    /// Consults the pending cache first, then resolves the URL and checks the
    /// URL and id indexes.
    pub async fn get_module_by_url(&self, raw_url: &str, ssr: bool) -> Result<Option<NodeId>> {
        let url = strip_markers(raw_url);
        let pending = self.read().pending(ssr).get(&url).cloned();
        match pending {
            Some(Pending::Ready(id)) => return Ok(Some(id)),
            Some(Pending::InFlight(in_flight)) => return in_flight.await.map(Some),
            None => {}
        }

        let (served, resolved_id, _) = self.resolve_url(&url, ssr).await?;
        let inner = self.read();
        Ok(inner
            .url_to_module
            .get(&served)
            .or_else(|| inner.id_to_module.get(&resolved_id))
            .copied())
    }

    /// Look up a node by resolved id. The HMR timestamp marker is ignored.
    #[must_use]
    pub fn get_module_by_id(&self, id: &str) -> Option<NodeId> {
        self.read()
            .id_to_module
            .get(&remove_timestamp_query(id))
            .copied()
    }

    /// All nodes backed by a physical file (one per query variant).
    #[must_use]
    pub fn get_modules_by_file(&self, file: &str) -> Vec<NodeId> {
        self.read().modules_by_file(file)
    }

    /// Look up the node whose client transform result carries `etag`.
    #[must_use]
    pub fn get_module_by_etag(&self, etag: &str) -> Option<NodeId> {
        self.read().etag_to_module.get(etag).copied()
    }

    /// Snapshot of a node.
    #[must_use]
    pub fn module(&self, id: NodeId) -> Option<ModuleNode> {
        self.read().nodes.get(id.0).cloned()
    }

    /// Run `f` against a node without cloning it.
    pub fn with_module<R>(&self, id: NodeId, f: impl FnOnce(&ModuleNode) -> R) -> Option<R> {
        self.read().nodes.get(id.0).map(f)
    }

    /// Every node handle, in creation order.
    #[must_use]
    pub fn module_ids(&self) -> Vec<NodeId> {
        (0..self.read().nodes.len()).map(NodeId).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> GraphStats {
        let inner = self.read();
        GraphStats {
            modules: inner.nodes.len(),
            urls: inner.url_to_module.len(),
            ids: inner.id_to_module.len(),
            files: inner.file_to_modules.len(),
            pending_client: inner.pending_client.len(),
            pending_ssr: inner.pending_ssr.len(),
        }
    }

    /// Store a fresh transform result for one execution context.
    ///
    /// Client results are indexed by etag; the previous etag is dropped.
    pub fn update_transform_result(
        &self,
        id: NodeId,
        result: Option<TransformResult>,
        ssr: bool,
    ) -> Result<()> {
        let mut inner = self.write();
        if ssr {
            inner.node_mut(id)?.ssr_transform_result = result;
            return Ok(());
        }

        let previous = inner
            .node_mut(id)?
            .transform_result
            .take()
            .and_then(|r| r.etag);
        if let Some(etag) = previous {
            if inner.etag_to_module.get(&etag) == Some(&id) {
                inner.etag_to_module.remove(&etag);
            }
        }
        if let Some(etag) = result.as_ref().and_then(|r| r.etag.clone()) {
            inner.etag_to_module.insert(etag, id);
        }
        inner.node_mut(id)?.transform_result = result;
        Ok(())
    }

    /// Record the evaluated server-side instance of a node.
    pub fn set_ssr_module(&self, id: NodeId, module: Option<SsrModule>) -> Result<()> {
        self.write().node_mut(id)?.ssr_module = module;
        Ok(())
    }

    /// Record a failed server-side evaluation. Cleared only by invalidation.
    pub fn set_ssr_error(&self, id: NodeId, error: Option<String>) -> Result<()> {
        self.write().node_mut(id)?.ssr_error = error;
        Ok(())
    }
}
