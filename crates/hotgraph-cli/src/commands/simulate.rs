//! `hotgraph simulate` command implementation.
//!
//! Replays a manifest, applies file changes, and reports what a dev server
//! would push to the browser and which cached modules it would drop.

use crate::manifest::Manifest;
use hotgraph_core::invalidate::now_ms;
use hotgraph_core::{HmrUpdate, HmrUpdateResult, ModuleGraph};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct SimulateAction {
    pub cwd: PathBuf,
    pub manifest: PathBuf,
    pub changes: Vec<String>,
    pub full: bool,
}

#[derive(Debug, Serialize)]
pub struct SimulateReport {
    pub mode: &'static str,
    pub timestamp: u64,
    pub changed: Vec<String>,
    pub full_reload: bool,
    pub updates: Vec<HmrUpdate>,
    /// URLs of nodes that lost their cached artifacts.
    pub invalidated: Vec<String>,
    /// Changed files that no node maps to.
    pub unknown_files: Vec<String>,
}

/// Apply `changes` to an already built graph.
pub fn simulate(graph: &ModuleGraph, changes: &[String], full: bool) -> SimulateReport {
    let timestamp = now_ms();
    let unknown_files: Vec<String> = changes
        .iter()
        .filter(|file| graph.get_modules_by_file(file).is_empty())
        .cloned()
        .collect();

    let mut updates = Vec::new();
    let mut full_reload = false;
    if full {
        graph.invalidate_all();
        full_reload = true;
    } else {
        for file in changes {
            match graph.handle_hot_update(file, timestamp) {
                HmrUpdateResult::Updates(found) => updates.extend(found),
                HmrUpdateResult::FullReload => full_reload = true,
            }
        }
        if full_reload {
            updates.clear();
        }
    }

    let mut invalidated: Vec<String> = graph
        .module_ids()
        .into_iter()
        .filter_map(|id| {
            graph.with_module(id, |node| {
                (!node.has_cached_artifacts()).then(|| node.url.clone())
            })
        })
        .flatten()
        .collect();
    invalidated.sort();

    SimulateReport {
        mode: if full { "full" } else { "hmr" },
        timestamp,
        changed: changes.to_vec(),
        full_reload,
        updates,
        invalidated,
        unknown_files,
    }
}

fn print_human(report: &SimulateReport, cwd: &Path) {
    for file in &report.changed {
        let shown = file
            .strip_prefix(&cwd.display().to_string())
            .unwrap_or(file);
        println!("  File changed: {shown}");
    }
    for file in &report.unknown_files {
        println!("  warning: no module maps to {file}");
    }

    if report.full_reload {
        println!("  Full reload");
    } else if report.updates.is_empty() {
        println!("  No modules affected");
    } else {
        for update in &report.updates {
            if update.path == update.accepted_path {
                println!("  HMR update: {}", update.path);
            } else {
                println!("  HMR update: {} (via {})", update.path, update.accepted_path);
            }
        }
    }

    if !report.invalidated.is_empty() {
        println!("  Invalidated {} module(s):", report.invalidated.len());
        for url in &report.invalidated {
            println!("    - {url}");
        }
    }
}

/// Run the simulate command.
pub fn run(action: SimulateAction, json: bool) -> Result<()> {
    let manifest = Manifest::load(&action.cwd.join(&action.manifest))?;
    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let graph = runtime.block_on(manifest.build())?;
    let report = simulate(&graph, &action.changes, action.full);

    if json {
        let mut value = serde_json::to_value(&report).into_diagnostic()?;
        if let Some(object) = value.as_object_mut() {
            object.insert("ok".to_string(), serde_json::Value::Bool(true));
        }
        println!("{value}");
    } else {
        print_human(&report, &action.cwd);
    }
    Ok(())
}
