//! HMR boundary detection.
//!
//! Provides:
//! - upward propagation from a changed module to the modules that accept it
//! - the combined "file changed" handler that finds boundaries and then
//!   invalidates up to them

use crate::config::GraphConfig;
use crate::error::Result;
use crate::graph::{GraphInner, ModuleGraph};
use crate::invalidate::invalidate_in;
use crate::node::{ModuleKind, NodeId};
use crate::url::is_css_request;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// A module that will handle an update, and the module it accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HmrBoundary {
    pub boundary: NodeId,
    pub accepted_via: NodeId,
}

/// Outcome of walking up from one changed module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    /// Every path ended at a boundary.
    Boundaries(Vec<HmrBoundary>),
    /// Some path reached a module nobody accepts.
    DeadEnd,
}

/// A single HMR update for a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HmrUpdate {
    /// URL of the boundary module that re-executes.
    pub path: String,
    /// URL of the module the boundary accepted.
    pub accepted_path: String,
    pub kind: ModuleKind,
    pub timestamp: u64,
}

/// Result of computing HMR updates for a file change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HmrUpdateResult {
    /// Partial update: only these modules need to re-execute.
    Updates(Vec<HmrUpdate>),
    /// No HMR boundary found: full page reload needed.
    FullReload,
}

impl HmrUpdateResult {
    #[must_use]
    pub fn is_full_reload(&self) -> bool {
        matches!(self, Self::FullReload)
    }
}

fn all_imports_accepted(bindings: &HashSet<String>, accepted: &HashSet<String>) -> bool {
    bindings.iter().all(|name| accepted.contains(name))
}

/// Returns `true` on a dead end.
fn propagate(
    inner: &GraphInner,
    config: &GraphConfig,
    id: NodeId,
    traversed: &mut HashSet<NodeId>,
    boundaries: &mut Vec<HmrBoundary>,
    chain: &mut Vec<NodeId>,
) -> bool {
    if !traversed.insert(id) {
        return false;
    }
    let Some(node) = inner.nodes.get(id.0) else {
        return false;
    };

    // Not analyzed yet; nothing to hot-update.
    if node.id.is_some() && node.is_self_accepting.is_none() {
        return false;
    }

    let mut importers: Vec<NodeId> = node.importers.iter().copied().collect();
    importers.sort_unstable();

    if node.is_self_accepting == Some(true) {
        boundaries.push(HmrBoundary {
            boundary: id,
            accepted_via: id,
        });
        // Stylesheets may register any file as a dependency, so they are
        // updated through as well.
        for importer in importers {
            let is_css = is_css_request(&inner.nodes[importer.0].url, config);
            if is_css && !chain.contains(&importer) {
                chain.push(importer);
                propagate(inner, config, importer, traversed, boundaries, chain);
                chain.pop();
            }
        }
        return false;
    }

    if node.accepted_hmr_exports.is_some() {
        // Partially accepting with no importers counts as self-accepting.
        boundaries.push(HmrBoundary {
            boundary: id,
            accepted_via: id,
        });
    } else {
        if importers.is_empty() {
            return true;
        }
        let only_css_importers = importers
            .iter()
            .all(|i| is_css_request(&inner.nodes[i.0].url, config));
        if !is_css_request(&node.url, config) && only_css_importers {
            return true;
        }
    }

    for importer in importers {
        let importer_node = &inner.nodes[importer.0];
        if importer_node.accepted_hmr_deps.contains(&id) {
            boundaries.push(HmrBoundary {
                boundary: importer,
                accepted_via: id,
            });
            continue;
        }

        if let (Some(key), Some(accepted), Some(bindings)) = (
            node.id.as_ref(),
            node.accepted_hmr_exports.as_ref(),
            importer_node.imported_bindings.as_ref(),
        ) {
            if bindings
                .get(key)
                .is_some_and(|names| all_imports_accepted(names, accepted))
            {
                continue;
            }
        }

        if !chain.contains(&importer) {
            chain.push(importer);
            let dead_end = propagate(inner, config, importer, traversed, boundaries, chain);
            chain.pop();
            if dead_end {
                return true;
            }
        }
    }
    false
}

impl ModuleGraph {
    /// Walk up from `id` collecting the boundaries that accept the change.
    pub fn propagate_update(&self, id: NodeId) -> Result<Propagation> {
        let inner = self.read();
        inner.node(id)?;
        let mut boundaries = Vec::new();
        let dead_end = propagate(
            &inner,
            self.config(),
            id,
            &mut HashSet::new(),
            &mut boundaries,
            &mut vec![id],
        );
        Ok(if dead_end {
            Propagation::DeadEnd
        } else {
            Propagation::Boundaries(boundaries)
        })
    }

    /// Handle a source edit: find HMR boundaries for every node of `file`,
    /// then invalidate each node up to its boundaries on the HMR clock.
    ///
    /// A file with no nodes yields an empty update list.
    pub fn handle_hot_update(&self, file: &str, timestamp: u64) -> HmrUpdateResult {
        let mut inner = self.write();
        let mut traversed = HashSet::new();
        let mut invalidated = HashSet::new();
        let mut boundaries_touched = HashSet::new();
        let mut updates = Vec::new();
        let mut full_reload = false;

        for id in inner.modules_by_file(file) {
            let mut boundaries = Vec::new();
            let dead_end = propagate(
                &inner,
                self.config(),
                id,
                &mut traversed,
                &mut boundaries,
                &mut vec![id],
            );
            let stops: Vec<NodeId> = boundaries.iter().map(|b| b.boundary).collect();
            invalidate_in(
                &mut inner,
                id,
                &mut invalidated,
                &mut boundaries_touched,
                timestamp,
                true,
                &stops,
            );

            if full_reload {
                continue;
            }
            if dead_end {
                full_reload = true;
                continue;
            }
            for HmrBoundary {
                boundary,
                accepted_via,
            } in boundaries
            {
                let boundary_node = &inner.nodes[boundary.0];
                updates.push(HmrUpdate {
                    path: boundary_node.url.clone(),
                    accepted_path: inner.nodes[accepted_via.0].url.clone(),
                    kind: boundary_node.kind,
                    timestamp,
                });
            }
        }

        if full_reload {
            debug!(file = %file, "No HMR boundary, full reload");
            HmrUpdateResult::FullReload
        } else {
            debug!(file = %file, updates = updates.len(), "HMR update");
            HmrUpdateResult::Updates(updates)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TransformResult;
    use crate::resolver::StaticResolver;
    use crate::update::ModuleInfoUpdate;

    fn graph() -> ModuleGraph {
        ModuleGraph::new(StaticResolver::new().with_root("/proj"))
    }

    #[tokio::test]
    async fn test_self_accepting_boundary() {
        let graph = graph();
        let app = graph.ensure_entry_from_url("/src/App.tsx", false, true).await.unwrap();
        graph
            .update_module_info(app, ModuleInfoUpdate::client().self_accepting(true))
            .await
            .unwrap();

        let result = graph.handle_hot_update("/proj/src/App.tsx", 42);
        match result {
            HmrUpdateResult::Updates(updates) => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].path, "/src/App.tsx");
                assert_eq!(updates[0].accepted_path, "/src/App.tsx");
                assert_eq!(updates[0].timestamp, 42);
            }
            HmrUpdateResult::FullReload => panic!("Expected partial update"),
        }
        assert_eq!(graph.module(app).unwrap().last_hmr_timestamp, 42);
    }

    #[tokio::test]
    async fn test_importers_above_self_accepting_boundary_keep_artifacts() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();
        graph
            .update_module_info(main, ModuleInfoUpdate::client().import("/src/App.tsx"))
            .await
            .unwrap();
        let app = graph.get_module_by_id("/proj/src/App.tsx").unwrap();
        graph
            .update_module_info(
                app,
                ModuleInfoUpdate::client()
                    .import("/src/Button.tsx")
                    .self_accepting(true),
            )
            .await
            .unwrap();
        let button = graph.get_module_by_id("/proj/src/Button.tsx").unwrap();
        graph
            .update_module_info(button, ModuleInfoUpdate::client())
            .await
            .unwrap();
        for id in [main, app, button] {
            graph
                .update_transform_result(id, Some(TransformResult::new("code")), false)
                .unwrap();
        }

        match graph.handle_hot_update("/proj/src/Button.tsx", 77) {
            HmrUpdateResult::Updates(updates) => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].path, "/src/App.tsx");
            }
            HmrUpdateResult::FullReload => panic!("Expected partial update"),
        }
        assert_eq!(graph.module(button).unwrap().last_hmr_timestamp, 77);
        assert_eq!(graph.module(app).unwrap().last_hmr_timestamp, 77);
        let main_node = graph.module(main).unwrap();
        assert_eq!(main_node.last_hmr_timestamp, 0);
        assert!(main_node.has_cached_artifacts());
    }

    #[tokio::test]
    async fn test_no_boundary_full_reload() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();
        graph
            .update_module_info(main, ModuleInfoUpdate::client().import("/src/utils.ts"))
            .await
            .unwrap();
        let utils = graph.get_module_by_id("/proj/src/utils.ts").unwrap();
        graph
            .update_module_info(utils, ModuleInfoUpdate::client())
            .await
            .unwrap();

        assert_eq!(graph.propagate_update(utils).unwrap(), Propagation::DeadEnd);
        assert!(graph.handle_hot_update("/proj/src/utils.ts", 1).is_full_reload());
        // Still invalidated up to the root.
        assert_eq!(graph.module(main).unwrap().last_hmr_timestamp, 1);
    }

    #[tokio::test]
    async fn test_accepted_dep_boundary() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();
        graph
            .update_module_info(
                main,
                ModuleInfoUpdate::client().import("/src/dep.ts").accept("/src/dep.ts"),
            )
            .await
            .unwrap();
        let dep = graph.get_module_by_id("/proj/src/dep.ts").unwrap();
        graph
            .update_module_info(dep, ModuleInfoUpdate::client())
            .await
            .unwrap();

        assert_eq!(
            graph.propagate_update(dep).unwrap(),
            Propagation::Boundaries(vec![HmrBoundary {
                boundary: main,
                accepted_via: dep,
            }])
        );
    }

    #[tokio::test]
    async fn test_unanalyzed_module_is_skipped() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, false).await.unwrap();
        assert_eq!(
            graph.propagate_update(main).unwrap(),
            Propagation::Boundaries(vec![])
        );
    }

    #[tokio::test]
    async fn test_accepted_exports_cover_importer_bindings() {
        let graph = graph();
        let main = graph.ensure_entry_from_url("/src/main.ts", false, true).await.unwrap();
        let comp = graph.ensure_entry_from_url("/src/comp.ts", false, true).await.unwrap();
        graph
            .update_module_info(
                main,
                ModuleInfoUpdate::client()
                    .import(comp)
                    .binding("/proj/src/comp.ts", ["Button"]),
            )
            .await
            .unwrap();
        graph
            .update_module_info(comp, ModuleInfoUpdate::client().accepted_exports(["Button"]))
            .await
            .unwrap();

        assert_eq!(
            graph.propagate_update(comp).unwrap(),
            Propagation::Boundaries(vec![HmrBoundary {
                boundary: comp,
                accepted_via: comp,
            }])
        );
    }

    #[tokio::test]
    async fn test_script_imported_only_by_css_is_dead_end() {
        let graph = graph();
        let css = graph.ensure_entry_from_url("/src/app.css", false, true).await.unwrap();
        graph
            .update_module_info(css, ModuleInfoUpdate::client().import("/tailwind.config.js"))
            .await
            .unwrap();
        let config = graph.get_module_by_id("/proj/tailwind.config.js").unwrap();
        graph
            .update_module_info(config, ModuleInfoUpdate::client())
            .await
            .unwrap();
        assert_eq!(graph.propagate_update(config).unwrap(), Propagation::DeadEnd);
    }

    #[tokio::test]
    async fn test_import_cycle_terminates() {
        let graph = graph();
        let a = graph.ensure_entry_from_url("/a.ts", false, true).await.unwrap();
        let b = graph.ensure_entry_from_url("/b.ts", false, true).await.unwrap();
        graph
            .update_module_info(a, ModuleInfoUpdate::client().import(b).accept(b))
            .await
            .unwrap();
        graph
            .update_module_info(b, ModuleInfoUpdate::client().import(a))
            .await
            .unwrap();

        let result = graph.propagate_update(b).unwrap();
        assert_eq!(
            result,
            Propagation::Boundaries(vec![HmrBoundary {
                boundary: a,
                accepted_via: b,
            }])
        );
    }

    #[test]
    fn test_unknown_file_yields_no_updates() {
        let graph = graph();
        assert_eq!(
            graph.handle_hot_update("/nope.ts", 1),
            HmrUpdateResult::Updates(vec![])
        );
    }
}
