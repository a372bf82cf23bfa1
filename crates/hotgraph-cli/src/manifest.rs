//! Graph manifests.
//!
//! A manifest describes a dev-server session after one full transform pass:
//! every served URL, the id it resolves to, and what the transform found in
//! it. Replaying it drives the same registry and updater calls a live server
//! would make.

use hotgraph_core::{
    GraphConfig, ModuleGraph, ModuleInfoUpdate, NodeId, ResolvedId, StaticResolver,
    TransformResult,
};
use miette::{miette, IntoDiagnostic, Result, WrapErr};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub config: GraphConfig,
    pub modules: Vec<ManifestModule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestModule {
    pub url: String,
    pub id: String,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub ssr_imports: Option<Vec<String>>,
    #[serde(default)]
    pub accepts: Vec<String>,
    #[serde(default)]
    pub accepted_exports: Option<Vec<String>>,
    #[serde(default)]
    pub self_accepting: bool,
}

impl ManifestModule {
    fn info(&self, imports: &[String], ssr: bool) -> ModuleInfoUpdate {
        let mut update = if ssr {
            ModuleInfoUpdate::ssr()
        } else {
            ModuleInfoUpdate::client()
        };
        update = update
            .imports(imports.iter().map(String::as_str))
            .accepts(self.accepts.iter().map(String::as_str))
            .self_accepting(self.self_accepting);
        if let Some(exports) = &self.accepted_exports {
            update = update.accepted_exports(exports.iter().cloned());
        }
        update
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read manifest {}", path.display()))?;
        Self::parse(&content).wrap_err_with(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(content).into_diagnostic()?;
        if manifest.modules.is_empty() {
            return Err(miette!("Manifest declares no modules"));
        }
        Ok(manifest)
    }

    fn resolver(&self) -> StaticResolver {
        let mut resolver = StaticResolver::new();
        for module in &self.modules {
            let mut resolved = ResolvedId::new(&module.id);
            if let Some(meta) = &module.meta {
                resolved = resolved.with_meta(meta.clone());
            }
            resolver.insert(&module.url, resolved);
        }
        resolver
    }

    /// Replay the manifest into a fresh graph.
    ///
    /// Every module ends up with a cached client transform result, as if it
    /// had been served once, so invalidation has something to clear.
    pub async fn build(&self) -> Result<ModuleGraph> {
        let graph = ModuleGraph::with_config(self.config.clone(), self.resolver()).into_diagnostic()?;

        let mut nodes: Vec<NodeId> = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            let id = graph
                .ensure_entry_from_url(&module.url, false, true)
                .await
                .into_diagnostic()?;
            nodes.push(id);
        }

        for (module, id) in self.modules.iter().zip(&nodes) {
            graph
                .update_module_info(*id, module.info(&module.imports, false))
                .await
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to link {}", module.url))?;
            if let Some(ssr_imports) = &module.ssr_imports {
                graph
                    .update_module_info(*id, module.info(ssr_imports, true))
                    .await
                    .into_diagnostic()
                    .wrap_err_with(|| format!("Failed to link {} (ssr)", module.url))?;
            }
        }

        for id in graph.module_ids() {
            graph
                .update_transform_result(id, Some(TransformResult::default()), false)
                .into_diagnostic()?;
        }

        tracing::debug!(modules = graph.len(), "Replayed manifest");
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "modules": [
            { "url": "/src/main.ts", "id": "/proj/src/main.ts", "imports": ["/src/App"] },
            { "url": "/src/App", "id": "/proj/src/App.vue", "self_accepting": true,
              "meta": { "lang": "vue" } }
        ]
    }"#;

    #[test]
    fn test_parse_defaults() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.modules.len(), 2);
        assert_eq!(manifest.config.fs_prefix, "/@fs/");
        assert!(manifest.modules[1].self_accepting);
        assert!(manifest.modules[0].ssr_imports.is_none());
    }

    #[test]
    fn test_parse_rejects_empty_manifest() {
        assert!(Manifest::parse(r#"{ "modules": [] }"#).is_err());
        assert!(Manifest::parse("not json").is_err());
    }

    #[tokio::test]
    async fn test_build_links_and_seeds_artifacts() {
        let graph = Manifest::parse(SAMPLE).unwrap().build().await.unwrap();
        assert_eq!(graph.len(), 2);

        let main = graph.get_module_by_id("/proj/src/main.ts").unwrap();
        let app = graph.get_module_by_id("/proj/src/App.vue").unwrap();
        let app_node = graph.module(app).unwrap();
        assert_eq!(app_node.url, "/src/App.vue");
        assert!(app_node.importers.contains(&main));
        assert_eq!(app_node.meta, Some(serde_json::json!({ "lang": "vue" })));
        assert!(app_node.has_cached_artifacts());
    }

    #[tokio::test]
    async fn test_build_reports_unknown_import() {
        let manifest = Manifest::parse(
            r#"{ "modules": [ { "url": "/a.ts", "id": "/proj/a.ts", "imports": ["/missing.ts"] } ] }"#,
        )
        .unwrap();
        assert!(manifest.build().await.is_err());
    }
}
