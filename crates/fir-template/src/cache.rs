//! Compiled template cache.
//!
//! Sets are keyed by a SHA-256 fingerprint over the route id, every
//! translated source and every function's name and registration id, so a
//! set compiled for one function map is never served to another. Lookups take a read lock;
//! compilation is serialized behind a separate mutex and re-checks the map
//! before compiling, so concurrent misses on one key compile once.

use std::collections::HashMap;

use fir_core::Result;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::actions::ActionRegistry;
use crate::config::{Scope, TemplateConfig, resolve_sources};
use crate::engine::TemplateSet;
use crate::functions::{FunctionMap, merge_functions};
use crate::loader::TemplateLoader;

/// Fingerprint → compiled set.
pub struct TemplateCache {
    entries: RwLock<HashMap<String, TemplateSet>>,
    compile_lock: Mutex<()>,
    actions: ActionRegistry,
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new(ActionRegistry::default())
    }
}

impl TemplateCache {
    /// Empty cache translating markup with `actions`.
    pub fn new(actions: ActionRegistry) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            compile_lock: Mutex::new(()),
            actions,
        }
    }

    /// Resolve, translate and compile `config` for `route_id`, reusing a
    /// cached set when the fingerprint matches.
    pub fn load(
        &self,
        route_id: &str,
        config: &TemplateConfig,
        loader: &dyn TemplateLoader,
    ) -> Result<TemplateSet> {
        let sources = resolve_sources(config, loader, &self.actions)?;
        let functions = merge_functions(&config.functions);
        let key = fingerprint(route_id, &sources.templates, &functions);

        if let Some(set) = self.entries.read().get(&key) {
            return Ok(set.clone());
        }

        let _guard = self.compile_lock.lock();
        if let Some(set) = self.entries.read().get(&key) {
            return Ok(set.clone());
        }
        debug!(route_id, fingerprint = %key, "compiling templates");
        let set = TemplateSet::compile(&sources, &functions, key.clone())?;
        let _ = self.entries.write().insert(key, set.clone());
        Ok(set)
    }

    /// Drop the entry for `fingerprint`. Returns whether one existed.
    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.entries.write().remove(fingerprint).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached sets.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Hex SHA-256 over route id, sources and function registrations.
pub fn fingerprint(
    route_id: &str,
    templates: &[(Scope, String, String)],
    functions: &FunctionMap,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(route_id.as_bytes());
    for (scope, name, source) in templates {
        hasher.update([0, *scope as u8]);
        hasher.update(name.as_bytes());
        hasher.update([0]);
        hasher.update(source.as_bytes());
    }
    // BTreeMap keys are already sorted
    for (name, function) in functions {
        hasher.update([1]);
        hasher.update(name.as_bytes());
        hasher.update(function.id().to_le_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
