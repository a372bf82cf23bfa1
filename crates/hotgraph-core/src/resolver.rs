//! The externally supplied resolver.
//!
//! The graph never looks at disk on its own: every URL is turned into a
//! resolved id by a [`UrlResolver`] injected at construction. The resolver
//! must be referentially stable (same input, equivalent output).

use crate::error::{GraphError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedId {
    /// Resolved disk identity, including any query.
    pub id: String,
    /// Resolver-provided metadata, stored on the node at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ResolvedId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            meta: None,
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Asynchronous `resolve(url, ssr)` callback.
///
/// `Ok(None)` means the URL could not be resolved; the graph reports it as
/// [`GraphError::Unresolved`].
pub trait UrlResolver: Send + Sync + 'static {
    fn resolve_id<'a>(&'a self, url: &'a str, ssr: bool)
        -> BoxFuture<'a, Result<Option<ResolvedId>>>;
}

impl<T: UrlResolver + ?Sized> UrlResolver for Arc<T> {
    fn resolve_id<'a>(
        &'a self,
        url: &'a str,
        ssr: bool,
    ) -> BoxFuture<'a, Result<Option<ResolvedId>>> {
        (**self).resolve_id(url, ssr)
    }
}

/// Table-driven resolver.
///
/// URLs listed in the table resolve to their entry; other absolute URLs
/// resolve under `root` when one is set. Counts every call, which makes it
/// handy for checking request collapsing.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: HashMap<String, ResolvedId>,
    ssr_entries: HashMap<String, ResolvedId>,
    failures: HashMap<String, String>,
    root: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `url` to `id` for both client and ssr requests.
    #[must_use]
    pub fn with_entry(mut self, url: impl Into<String>, id: impl Into<String>) -> Self {
        self.insert(url, ResolvedId::new(id));
        self
    }

    /// Map `url` to `id` for ssr requests only.
    #[must_use]
    pub fn with_ssr_entry(mut self, url: impl Into<String>, id: impl Into<String>) -> Self {
        self.ssr_entries.insert(url.into(), ResolvedId::new(id));
        self
    }

    /// Make `url` fail with `message`.
    #[must_use]
    pub fn with_failure(mut self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(url.into(), message.into());
        self
    }

    /// Resolve unknown absolute URLs as `root + url`.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into().trim_end_matches('/').to_string());
        self
    }

    /// Sleep before answering, so callers genuinely suspend.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, resolved: ResolvedId) {
        self.entries.insert(url.into(), resolved);
    }

    /// Number of resolve calls served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, url: &str, ssr: bool) -> Result<Option<ResolvedId>> {
        if let Some(message) = self.failures.get(url) {
            return Err(GraphError::resolve(url, message.clone()));
        }
        if ssr {
            if let Some(resolved) = self.ssr_entries.get(url) {
                return Ok(Some(resolved.clone()));
            }
        }
        if let Some(resolved) = self.entries.get(url) {
            return Ok(Some(resolved.clone()));
        }
        Ok(match &self.root {
            Some(root) if url.starts_with('/') => Some(ResolvedId::new(format!("{root}{url}"))),
            _ => None,
        })
    }
}

impl UrlResolver for StaticResolver {
    fn resolve_id<'a>(
        &'a self,
        url: &'a str,
        ssr: bool,
    ) -> BoxFuture<'a, Result<Option<ResolvedId>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.lookup(url, ssr)
        }
        .boxed()
    }
}
