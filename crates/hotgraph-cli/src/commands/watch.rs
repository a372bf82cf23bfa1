//! `hotgraph watch` command implementation.
//!
//! Replays a manifest, then feeds real file-system events into the graph and
//! logs the HMR outcome of every debounced batch.

use crate::manifest::Manifest;
use hotgraph_core::invalidate::now_ms;
use hotgraph_core::{HmrUpdateResult, ModuleGraph};
use miette::{IntoDiagnostic, Result};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct WatchAction {
    pub cwd: PathBuf,
    pub manifest: PathBuf,
    pub root: Option<PathBuf>,
}

/// Check if a path should be ignored by the watcher.
fn should_ignore(path: &Path) -> bool {
    let path_str = path.to_string_lossy();

    if path_str.contains("/node_modules/")
        || path_str.contains("/target/")
        || path_str.contains("/.git/")
    {
        return true;
    }

    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

/// Map a path on disk to the file key the graph knows it by.
///
/// Manifests may list ids either as absolute paths or relative to the watch
/// root (`/src/main.ts`).
fn graph_file(graph: &ModuleGraph, root: &Path, path: &Path) -> Option<String> {
    let absolute = path.display().to_string();
    if !graph.get_modules_by_file(&absolute).is_empty() {
        return Some(absolute);
    }
    let relative = path.strip_prefix(root).ok()?;
    let rooted = format!("/{}", relative.display());
    (!graph.get_modules_by_file(&rooted).is_empty()).then_some(rooted)
}

#[derive(Default)]
struct Batch {
    changed: HashSet<PathBuf>,
    removed: HashSet<PathBuf>,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

fn apply_batch(graph: &ModuleGraph, root: &Path, batch: Batch) {
    let timestamp = now_ms();

    for path in &batch.removed {
        if let Some(file) = graph_file(graph, root, path) {
            let orphans = graph.on_file_delete(&file);
            graph.on_file_change(&file);
            info!(file = %file, orphans = orphans.len(), "File removed");
        }
    }

    for path in &batch.changed {
        let Some(file) = graph_file(graph, root, path) else {
            continue;
        };
        match graph.handle_hot_update(&file, timestamp) {
            HmrUpdateResult::FullReload => info!(file = %file, "Full reload"),
            HmrUpdateResult::Updates(updates) if updates.is_empty() => {
                info!(file = %file, "No modules affected");
            }
            HmrUpdateResult::Updates(updates) => {
                for update in updates {
                    info!(
                        file = %file,
                        path = %update.path,
                        accepted = %update.accepted_path,
                        kind = update.kind.as_str(),
                        "HMR update"
                    );
                }
            }
        }
    }
}

fn watch_files(graph: &ModuleGraph, root: &Path) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut watcher = RecommendedWatcher::new(tx, Config::default()).into_diagnostic()?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .into_diagnostic()?;
    info!(root = %root.display(), modules = graph.len(), "Watching for changes");

    let mut batch = Batch::default();
    let mut last_event = Instant::now();

    loop {
        match rx.recv_timeout(DEBOUNCE) {
            Ok(Ok(event)) => {
                let removed = matches!(event.kind, EventKind::Remove(_));
                for path in event.paths {
                    if should_ignore(&path) {
                        continue;
                    }
                    if removed {
                        batch.changed.remove(&path);
                        batch.removed.insert(path);
                    } else {
                        batch.removed.remove(&path);
                        batch.changed.insert(path);
                    }
                }
                last_event = Instant::now();
            }
            Ok(Err(e)) => warn!(error = %e, "Watch error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !batch.is_empty() && last_event.elapsed() >= DEBOUNCE {
            apply_batch(graph, root, std::mem::take(&mut batch));
        }
    }

    Ok(())
}

/// Run the watch command until interrupted.
pub fn run(action: WatchAction) -> Result<()> {
    let manifest = Manifest::load(&action.cwd.join(&action.manifest))?;
    let root = action
        .root
        .map_or_else(|| action.cwd.clone(), |root| action.cwd.join(root))
        .canonicalize()
        .into_diagnostic()?;

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let graph = runtime.block_on(manifest.build())?;
    watch_files(&graph, &root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ignore() {
        assert!(should_ignore(Path::new("/proj/node_modules/react/index.js")));
        assert!(should_ignore(Path::new("/proj/.git/HEAD")));
        assert!(should_ignore(Path::new("/proj/src/.App.tsx.swp")));
        assert!(!should_ignore(Path::new("/proj/src/App.tsx")));
    }

    #[tokio::test]
    async fn test_graph_file_accepts_root_relative_ids() {
        let manifest = Manifest::parse(
            r#"{ "modules": [ { "url": "/src/main.ts", "id": "/src/main.ts" } ] }"#,
        )
        .unwrap();
        let graph = manifest.build().await.unwrap();
        let root = Path::new("/home/dev/app");

        assert_eq!(
            graph_file(&graph, root, &root.join("src/main.ts")),
            Some("/src/main.ts".to_string())
        );
        assert_eq!(graph_file(&graph, root, &root.join("src/other.ts")), None);
    }

    #[tokio::test]
    async fn test_apply_batch_removal_detaches_imports() {
        let manifest = Manifest::parse(
            r#"{ "modules": [
                { "url": "/main.ts", "id": "/app/main.ts", "imports": ["/dep.ts"] },
                { "url": "/dep.ts", "id": "/app/dep.ts" }
            ] }"#,
        )
        .unwrap();
        let graph = manifest.build().await.unwrap();
        let dep = graph.get_module_by_id("/app/dep.ts").unwrap();

        let mut batch = Batch::default();
        batch.removed.insert(PathBuf::from("/app/main.ts"));
        apply_batch(&graph, Path::new("/app"), batch);

        assert!(graph.module(dep).unwrap().importers.is_empty());
    }
}
