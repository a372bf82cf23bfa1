//! Module dependency graph and cache-invalidation engine for a native-ESM
//! development server.
//!
//! For every URL a browser requests, the graph tracks which file it maps to,
//! what it imports, what imports it, and which cached compiled artifacts must
//! be discarded when a source file changes.
//!
//! The transform pipeline materializes nodes through
//! [`ModuleGraph::ensure_entry_from_url`], reports discovered imports through
//! [`ModuleGraph::update_module_info`], and the file watcher drives
//! [`ModuleGraph::on_file_change`] or [`ModuleGraph::handle_hot_update`].

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
pub mod graph;
pub mod hmr;
pub mod invalidate;
pub mod node;
pub mod resolver;
pub mod update;
pub mod url;
pub mod version;

pub use config::GraphConfig;
pub use error::{GraphError, Result};
pub use graph::{GraphStats, ModuleGraph};
pub use hmr::{HmrBoundary, HmrUpdate, HmrUpdateResult, Propagation};
pub use node::{ImportTarget, ModuleKind, ModuleNode, NodeId, SsrModule, TransformResult};
pub use resolver::{ResolvedId, StaticResolver, UrlResolver};
pub use update::ModuleInfoUpdate;
pub use version::VERSION;
