//! Static source registry with per-format priority tables.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::{HtmlSource, JsonSource, SourceAdapter};
use crate::config::{ConfigError, EngineConfig, SourceKind};
use crate::http::ResilientClient;
use crate::identifier::{Format, Identifier, classify};

/// Registered adapters plus the order to try them in for each format.
///
/// Formats without a priority table use registration order.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    priorities: HashMap<Format, Vec<String>>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter; a later adapter with the same name replaces the earlier one.
    #[instrument(skip(self, adapter), fields(source = adapter.name()))]
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        debug!(formats = ?adapter.supported_formats(), "registering source");
        self.adapters.retain(|a| a.name() != adapter.name());
        self.adapters.push(adapter);
    }

    /// Sets the try order for `format`, highest priority first.
    pub fn set_priority(&mut self, format: Format, order: Vec<String>) {
        self.priorities.insert(format, order);
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns true if no adapters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Registered source names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Adapter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.name() == name).cloned()
    }

    /// Adapters that support `identifier`, in priority order.
    ///
    /// Sources named in the format's priority table come first, in table
    /// order; any other eligible source follows in registration order.
    #[must_use]
    pub fn eligible(&self, identifier: &Identifier) -> Vec<Arc<dyn SourceAdapter>> {
        let supported: Vec<&Arc<dyn SourceAdapter>> = self
            .adapters
            .iter()
            .filter(|a| a.is_supported(identifier))
            .collect();

        let mut ordered: Vec<Arc<dyn SourceAdapter>> = Vec::with_capacity(supported.len());
        let order = self
            .priorities
            .get(&classify(identifier.normalized()))
            .or_else(|| self.priorities.get(&identifier.format()));
        if let Some(order) = order {
            for name in order {
                if let Some(adapter) = supported.iter().find(|a| a.name() == name) {
                    ordered.push(Arc::clone(adapter));
                }
            }
        }
        for adapter in supported {
            if !ordered.iter().any(|a| a.name() == adapter.name()) {
                ordered.push(Arc::clone(adapter));
            }
        }
        ordered
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .field("priorities", &self.priorities)
            .finish()
    }
}

/// Builds the registry from the `sources` config section.
///
/// # Errors
///
/// Returns [`ConfigError`] when a source definition is invalid.
pub fn build_registry(
    config: &EngineConfig,
    client: &Arc<ResilientClient>,
) -> Result<SourceRegistry, ConfigError> {
    let mut registry = SourceRegistry::new();
    for definition in &config.sources.definitions {
        let adapter: Arc<dyn SourceAdapter> = match &definition.kind {
            SourceKind::Html(settings) => Arc::new(HtmlSource::new(
                definition.name.clone(),
                definition.formats.clone(),
                settings,
                Arc::clone(client),
            )?),
            SourceKind::Json(settings) => Arc::new(JsonSource::new(
                definition.name.clone(),
                definition.formats.clone(),
                settings,
                Arc::clone(client),
            )?),
        };
        registry.register(adapter);
    }
    for rule in &config.sources.priorities {
        registry.set_priority(rule.format, rule.order.clone());
    }
    Ok(registry)
}
