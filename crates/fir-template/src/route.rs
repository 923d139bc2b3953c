//! Reloadable per-route template handle.

use std::sync::Arc;

use fir_core::Result;
use parking_lot::RwLock;
use tracing::info;

use crate::cache::TemplateCache;
use crate::config::TemplateConfig;
use crate::engine::{CompiledTemplate, TemplateEngine, TemplateSet};
use crate::loader::TemplateLoader;

/// A route's current compiled set plus what is needed to rebuild it.
///
/// [`RouteTemplates::reload`] swaps the current set; callers that took a
/// snapshot with [`RouteTemplates::current`] keep rendering against it.
pub struct RouteTemplates {
    route_id: String,
    config: TemplateConfig,
    loader: Arc<dyn TemplateLoader>,
    cache: Arc<TemplateCache>,
    current: RwLock<TemplateSet>,
}

impl std::fmt::Debug for RouteTemplates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTemplates")
            .field("route_id", &self.route_id)
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}

impl RouteTemplates {
    /// Compile `config` for `route_id`. Fails on any load, translation or
    /// compile error.
    pub fn load(
        route_id: impl Into<String>,
        config: TemplateConfig,
        loader: Arc<dyn TemplateLoader>,
        cache: Arc<TemplateCache>,
    ) -> Result<Self> {
        let route_id = route_id.into();
        let set = cache.load(&route_id, &config, loader.as_ref())?;
        Ok(Self {
            route_id,
            config,
            loader,
            cache,
            current: RwLock::new(set),
        })
    }

    /// Snapshot of the current set.
    pub fn current(&self) -> TemplateSet {
        self.current.read().clone()
    }

    /// Template configuration.
    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    /// Re-read sources and swap in the resulting set. Returns whether the
    /// set changed. On error the current set stays in place.
    pub fn reload(&self) -> Result<bool> {
        let next = self
            .cache
            .load(&self.route_id, &self.config, self.loader.as_ref())?;
        let mut current = self.current.write();
        if current.ptr_eq(&next) {
            return Ok(false);
        }
        let previous = std::mem::replace(&mut *current, next);
        drop(current);
        // the old entry can never be hit again for this route
        let _ = self.cache.invalidate(previous.fingerprint());
        info!(route_id = %self.route_id, "templates reloaded");
        Ok(true)
    }
}

impl TemplateEngine for RouteTemplates {
    fn execute_template(&self, name: &str, data: &serde_json::Value) -> Result<String> {
        self.current().execute_template(name, data)
    }

    fn get_template(&self, name: &str) -> Result<CompiledTemplate> {
        self.current().get_template(name)
    }
}
