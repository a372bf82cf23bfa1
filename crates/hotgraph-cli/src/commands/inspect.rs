//! `hotgraph inspect` command implementation.
//!
//! Replays a manifest and prints every node with its edges.

use crate::manifest::Manifest;
use hotgraph_core::{ModuleGraph, ModuleKind, NodeId};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// One node as shown to the user. Edges are listed by URL, sorted.
#[derive(Debug, Serialize)]
pub struct NodeReport {
    /// Arena index of the node.
    pub node: usize,
    pub url: String,
    pub id: Option<String>,
    pub file: Option<String>,
    pub kind: ModuleKind,
    pub importers: Vec<String>,
    pub imports: Vec<String>,
    pub ssr_imports: Vec<String>,
    pub accepts: Vec<String>,
    pub self_accepting: Option<bool>,
    pub last_hmr_timestamp: u64,
    pub last_invalidation_timestamp: u64,
}

fn urls(graph: &ModuleGraph, ids: &HashSet<NodeId>) -> Vec<String> {
    let mut urls: Vec<String> = ids
        .iter()
        .filter_map(|id| graph.with_module(*id, |node| node.url.clone()))
        .collect();
    urls.sort();
    urls
}

/// Describe every node in arena order.
pub fn describe(graph: &ModuleGraph) -> Vec<NodeReport> {
    graph
        .module_ids()
        .into_iter()
        .filter_map(|id| graph.module(id).map(|node| (id, node)))
        .map(|(id, node)| NodeReport {
            node: id.index(),
            importers: urls(graph, &node.importers),
            imports: urls(graph, node.imported_modules_for(false)),
            ssr_imports: urls(graph, node.imported_modules_for(true)),
            accepts: urls(graph, &node.accepted_hmr_deps),
            url: node.url,
            id: node.id,
            file: node.file,
            kind: node.kind,
            self_accepting: node.is_self_accepting,
            last_hmr_timestamp: node.last_hmr_timestamp,
            last_invalidation_timestamp: node.last_invalidation_timestamp,
        })
        .collect()
}

/// Run the inspect command.
pub fn run(cwd: &Path, manifest_path: &Path, json: bool) -> Result<()> {
    let manifest = Manifest::load(&cwd.join(manifest_path))?;
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let graph = runtime.block_on(manifest.build())?;
    let modules = describe(&graph);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "stats": graph.stats(),
                "modules": modules,
            })
        );
        return Ok(());
    }

    let stats = graph.stats();
    println!(
        "{} modules ({} urls, {} ids, {} files)",
        stats.modules, stats.urls, stats.ids, stats.files
    );
    for module in &modules {
        println!();
        println!("#{} {} [{}]", module.node, module.url, module.kind.as_str());
        if let Some(file) = &module.file {
            println!("  file: {file}");
        }
        if module.self_accepting == Some(true) {
            println!("  self-accepting");
        }
        for (label, list) in [
            ("imports", &module.imports),
            ("ssr imports", &module.ssr_imports),
            ("imported by", &module.importers),
            ("accepts", &module.accepts),
        ] {
            if !list.is_empty() {
                println!("  {label}: {}", list.join(", "));
            }
        }
    }
    Ok(())
}
