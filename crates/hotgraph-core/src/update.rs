//! Import graph updater.
//!
//! The only code that edits `importers`. After every transform pass the
//! pipeline reports what a node imports and accepts; the updater resolves
//! the raw URLs, then swaps the new edge sets in under a single lock so no
//! reader ever sees a half-built set.

use crate::error::Result;
use crate::graph::{GraphInner, ModuleGraph};
use crate::node::{ImportTarget, NodeId};
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Everything one transform pass learned about a node.
#[derive(Debug, Clone, Default)]
pub struct ModuleInfoUpdate {
    pub imported_modules: Vec<ImportTarget>,
    pub imported_bindings: Option<HashMap<String, HashSet<String>>>,
    pub accepted_modules: Vec<ImportTarget>,
    pub accepted_exports: Option<HashSet<String>>,
    pub is_self_accepting: bool,
    pub ssr: bool,
    pub static_imported_urls: Option<HashSet<String>>,
}

impl ModuleInfoUpdate {
    /// An update for the browser-side graph.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }

    /// An update for the server-side graph.
    #[must_use]
    pub fn ssr() -> Self {
        Self {
            ssr: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn import(mut self, target: impl Into<ImportTarget>) -> Self {
        self.imported_modules.push(target.into());
        self
    }

    #[must_use]
    pub fn imports<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ImportTarget>,
    {
        self.imported_modules
            .extend(targets.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn accept(mut self, target: impl Into<ImportTarget>) -> Self {
        self.accepted_modules.push(target.into());
        self
    }

    #[must_use]
    pub fn accepts<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ImportTarget>,
    {
        self.accepted_modules
            .extend(targets.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn self_accepting(mut self, is_self_accepting: bool) -> Self {
        self.is_self_accepting = is_self_accepting;
        self
    }

    #[must_use]
    pub fn accepted_exports<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_exports = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Record the names bound from the module identified by `key`.
    #[must_use]
    pub fn binding<I, S>(mut self, key: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.imported_bindings
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn static_imported_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.static_imported_urls = Some(urls.into_iter().map(Into::into).collect());
        self
    }
}

impl ModuleGraph {
    async fn resolve_targets(&self, targets: &[ImportTarget], ssr: bool) -> Result<Vec<NodeId>> {
        try_join_all(targets.iter().map(|target| async move {
            match target {
                ImportTarget::Url(url) => self.ensure_entry_from_url(url, ssr, true).await,
                ImportTarget::Node(id) => Ok(*id),
            }
        }))
        .await
    }

    /// Reconcile a node's edges after a transform pass.
    ///
    /// Returns the nodes that lost their last importer. Orphans are only
    /// reported; they stay registered. A dependency dropped here while another
    /// in-flight update of the same batch still imports it is reported too.
    pub async fn update_module_info(
        &self,
        node: NodeId,
        update: ModuleInfoUpdate,
    ) -> Result<HashSet<NodeId>> {
        let ModuleInfoUpdate {
            imported_modules,
            imported_bindings,
            accepted_modules,
            accepted_exports,
            is_self_accepting,
            ssr,
            static_imported_urls,
        } = update;

        self.write().node_mut(node)?.is_self_accepting = Some(is_self_accepting);

        let (imported, accepted) = futures::try_join!(
            self.resolve_targets(&imported_modules, ssr),
            self.resolve_targets(&accepted_modules, ssr),
        )?;

        let mut inner = self.write();
        for id in imported.iter().chain(&accepted) {
            inner.node(*id)?;
        }

        for dep in &imported {
            inner.nodes[dep.0].importers.insert(node);
        }

        let next: HashSet<NodeId> = imported.into_iter().collect();
        let target = &mut inner.nodes[node.0];
        let previous = if ssr {
            std::mem::replace(&mut target.ssr_imported_modules, next)
        } else {
            std::mem::replace(&mut target.client_imported_modules, next)
        };

        let still_imported = target.imported_modules();
        let orphans = detach_importer(&mut inner, node, previous, &still_imported);

        let target = &mut inner.nodes[node.0];
        target.accepted_hmr_deps = accepted.into_iter().collect();
        target.accepted_hmr_exports = accepted_exports;
        target.imported_bindings = imported_bindings;
        target.static_imported_urls = static_imported_urls;

        if !orphans.is_empty() {
            debug!(
                url = %inner.nodes[node.0].url,
                orphans = orphans.len(),
                "Dependencies lost their last importer"
            );
        }
        Ok(orphans)
    }

    /// Detach every node of a deleted file from the modules it imported.
    ///
    /// The nodes stay registered with empty edge sets. Returns dependencies
    /// left without importers.
    pub fn on_file_delete(&self, file: &str) -> HashSet<NodeId> {
        let mut inner = self.write();
        let mut orphans = HashSet::new();
        for id in inner.modules_by_file(file) {
            let node = &mut inner.nodes[id.0];
            let mut previous = std::mem::take(&mut node.client_imported_modules);
            previous.extend(std::mem::take(&mut node.ssr_imported_modules));
            orphans.extend(detach_importer(&mut inner, id, previous, &HashSet::new()));
        }
        debug!(file = %file, orphans = orphans.len(), "Detached deleted file from its imports");
        orphans
    }
}

/// Remove `importer` from every dependency in `previous` that is not in
/// `keep`, collecting the ones whose importer set became empty.
fn detach_importer(
    inner: &mut GraphInner,
    importer: NodeId,
    previous: HashSet<NodeId>,
    keep: &HashSet<NodeId>,
) -> HashSet<NodeId> {
    let mut orphans = HashSet::new();
    for dep in previous {
        if keep.contains(&dep) {
            continue;
        }
        let Some(dep_node) = inner.nodes.get_mut(dep.0) else {
            continue;
        };
        dep_node.importers.remove(&importer);
        if dep_node.importers.is_empty() {
            orphans.insert(dep);
        }
    }
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;

    fn graph() -> ModuleGraph {
        ModuleGraph::new(StaticResolver::new().with_root("/proj"))
    }

    #[tokio::test]
    async fn test_imports_create_importer_links() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();

        let orphans = graph
            .update_module_info(
                main,
                ModuleInfoUpdate::client().imports(["/src/a.ts", "/src/b.ts"]),
            )
            .await
            .unwrap();
        assert!(orphans.is_empty());

        let a = graph.get_module_by_id("/proj/src/a.ts").unwrap();
        let b = graph.get_module_by_id("/proj/src/b.ts").unwrap();
        assert!(graph.module(a).unwrap().importers.contains(&main));
        assert!(graph.module(b).unwrap().importers.contains(&main));
        assert_eq!(
            graph.module(main).unwrap().client_imported_modules,
            HashSet::from([a, b])
        );
    }

    #[tokio::test]
    async fn test_dropped_import_is_orphaned() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();
        graph
            .update_module_info(main, ModuleInfoUpdate::client().imports(["/src/a.ts", "/src/b.ts"]))
            .await
            .unwrap();
        let a = graph.get_module_by_id("/proj/src/a.ts").unwrap();
        let b = graph.get_module_by_id("/proj/src/b.ts").unwrap();

        let orphans = graph
            .update_module_info(main, ModuleInfoUpdate::client().import(a))
            .await
            .unwrap();
        assert_eq!(orphans, HashSet::from([b]));
        assert!(graph.module(b).unwrap().importers.is_empty());
        // Orphans stay registered.
        assert_eq!(graph.get_module_by_id("/proj/src/b.ts"), Some(b));
    }

    #[tokio::test]
    async fn test_ssr_edge_keeps_dependency_alive() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();
        graph
            .update_module_info(main, ModuleInfoUpdate::client().import("/src/a.ts"))
            .await
            .unwrap();
        graph
            .update_module_info(main, ModuleInfoUpdate::ssr().import("/src/a.ts"))
            .await
            .unwrap();
        let a = graph.get_module_by_id("/proj/src/a.ts").unwrap();

        let orphans = graph
            .update_module_info(main, ModuleInfoUpdate::client())
            .await
            .unwrap();
        assert!(orphans.is_empty());
        assert!(graph.module(a).unwrap().importers.contains(&main));

        let orphans = graph
            .update_module_info(main, ModuleInfoUpdate::ssr())
            .await
            .unwrap();
        assert_eq!(orphans, HashSet::from([a]));
    }

    #[tokio::test]
    async fn test_acceptance_and_bindings_replace_previous() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();
        graph
            .update_module_info(
                main,
                ModuleInfoUpdate::client()
                    .import("/src/a.ts")
                    .accept("/src/a.ts")
                    .accepted_exports(["render"])
                    .binding("/proj/src/a.ts", ["x"])
                    .self_accepting(true),
            )
            .await
            .unwrap();
        let a = graph.get_module_by_id("/proj/src/a.ts").unwrap();
        let node = graph.module(main).unwrap();
        assert_eq!(node.is_self_accepting, Some(true));
        assert_eq!(node.accepted_hmr_deps, HashSet::from([a]));
        assert!(node.accepted_hmr_exports.unwrap().contains("render"));

        graph
            .update_module_info(main, ModuleInfoUpdate::client().import(a))
            .await
            .unwrap();
        let node = graph.module(main).unwrap();
        assert_eq!(node.is_self_accepting, Some(false));
        assert!(node.accepted_hmr_deps.is_empty());
        assert!(node.accepted_hmr_exports.is_none());
        assert!(node.imported_bindings.is_none());
    }

    #[tokio::test]
    async fn test_failed_resolution_leaves_edges_untouched() {
        let graph = ModuleGraph::new(
            StaticResolver::new()
                .with_root("/proj")
                .with_failure("/src/broken.ts", "syntax error"),
        );
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();
        graph
            .update_module_info(main, ModuleInfoUpdate::client().import("/src/a.ts"))
            .await
            .unwrap();
        let a = graph.get_module_by_id("/proj/src/a.ts").unwrap();

        let err = graph
            .update_module_info(
                main,
                ModuleInfoUpdate::client().imports(["/src/b.ts", "/src/broken.ts"]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.url(), Some("/src/broken.ts"));
        assert_eq!(
            graph.module(main).unwrap().client_imported_modules,
            HashSet::from([a])
        );
        assert!(graph.module(a).unwrap().importers.contains(&main));
    }

    #[tokio::test]
    async fn test_on_file_delete_detaches_imports() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();
        graph
            .update_module_info(main, ModuleInfoUpdate::client().import("/src/a.ts"))
            .await
            .unwrap();
        let a = graph.get_module_by_id("/proj/src/a.ts").unwrap();

        let orphans = graph.on_file_delete("/proj/src/main.ts");
        assert_eq!(orphans, HashSet::from([a]));
        assert!(graph.module(main).unwrap().imported_modules().is_empty());
        assert!(graph.module(a).unwrap().importers.is_empty());
    }
}
