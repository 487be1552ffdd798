//! Routing of paths to backends
//!
//! The local backend is always available. Other backends are registered by URL scheme and
//! opened lazily, at most once per run, the first time a path with their scheme is resolved.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::local::LocalBackend;
use crate::storage::Backend;

/// Opens the backend serving one URL scheme (e.g. `googledrive://`).
#[async_trait]
pub trait BackendFactory: Send + Sync {
    fn scheme(&self) -> &str;
    async fn open(&self) -> Result<Arc<dyn Backend>>;
}

struct LazyBackend {
    factory: Box<dyn BackendFactory>,
    backend: tokio::sync::OnceCell<Arc<dyn Backend>>,
}

pub struct Backends {
    local: Arc<dyn Backend>,
    lazy: Vec<LazyBackend>,
}

impl Default for Backends {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field(
                "schemes",
                &self
                    .lazy
                    .iter()
                    .map(|lazy| lazy.factory.scheme())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Backends {
    #[must_use]
    pub fn new() -> Self {
        Self {
            local: Arc::new(LocalBackend::new()),
            lazy: vec![],
        }
    }

    #[must_use]
    pub fn with_factory(mut self, factory: Box<dyn BackendFactory>) -> Self {
        self.lazy.push(LazyBackend {
            factory,
            backend: tokio::sync::OnceCell::new(),
        });
        self
    }

    /// The backend responsible for `path`; paths with no registered scheme are local.
    pub async fn resolve(&self, path: &str) -> Result<Arc<dyn Backend>> {
        for lazy in &self.lazy {
            if path.starts_with(lazy.factory.scheme()) {
                let backend = lazy
                    .backend
                    .get_or_try_init(|| async {
                        tracing::debug!("opening backend for {}", lazy.factory.scheme());
                        lazy.factory.open().await
                    })
                    .await?;
                return Ok(backend.clone());
            }
        }
        Ok(self.local.clone())
    }
}
