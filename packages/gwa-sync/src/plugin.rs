//! Per-type conversion plugins and their registry
//!
//! Each domain type the engine can exchange is one [`TypePlugin`]. Plugins
//! are registered explicitly at startup; the registry turns their declared
//! prerequisites into the dependency graph the scheduler runs.

use crate::config::TargetLayer;
use crate::dag::TypeDependencyGraph;
use crate::error::{OrchestratorError, Result};
use gwa_cache::{ExchangeObject, GwaCache};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Model layers a type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layer {
    Design,
    Analysis,
    #[default]
    Both,
}

impl Layer {
    pub fn supports(&self, target: TargetLayer) -> bool {
        match self {
            Layer::Both => true,
            Layer::Design => target == TargetLayer::Design,
            Layer::Analysis => target == TargetLayer::Analysis,
        }
    }
}

/// An object received from the exchange service, tagged with its stream
#[derive(Debug, Clone)]
pub struct ReceivedObject {
    pub stream_id: String,
    pub object: Arc<ExchangeObject>,
}

impl ReceivedObject {
    pub fn new(stream_id: impl Into<String>, object: ExchangeObject) -> Self {
        Self {
            stream_id: stream_id.into(),
            object: Arc::new(object),
        }
    }

    pub fn application_id(&self) -> Option<&str> {
        self.object.application_id.as_deref()
    }
}

/// Conversion between one exchange type and its native records
pub trait TypePlugin: Send + Sync {
    /// Exchange type name; must be unique in a registry
    fn type_name(&self) -> &str;

    /// Native table written and read by this type
    fn keyword(&self) -> &str;

    /// Further tables this type reads (e.g. results, sub-records)
    fn sub_keywords(&self) -> Vec<String> {
        Vec::new()
    }

    /// Stream name objects of this type are bucketed into
    fn stream(&self) -> &str {
        "model"
    }

    fn layer(&self) -> Layer {
        Layer::Both
    }

    /// Types that must be converted from native records first
    fn read_prerequisites(&self) -> Vec<String> {
        Vec::new()
    }

    /// Types that must be written to native records first
    fn write_prerequisites(&self) -> Vec<String> {
        Vec::new()
    }

    /// Convert pending native records into linked objects.
    ///
    /// Returns whether anything new was produced.
    fn convert(&self, cache: &GwaCache) -> anyhow::Result<bool>;

    /// Upsert native records for received objects of this type.
    fn write_back(&self, cache: &GwaCache, objects: &[ReceivedObject]) -> anyhow::Result<()>;
}

#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn TypePlugin>>,
    by_name: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn TypePlugin>) -> Result<()> {
        let name = plugin.type_name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(OrchestratorError::DuplicateType(name));
        }
        self.by_name.insert(name, self.plugins.len());
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn with(mut self, plugin: Arc<dyn TypePlugin>) -> Result<Self> {
        self.register(plugin)?;
        Ok(self)
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn TypePlugin>> {
        self.by_name
            .get(type_name)
            .map(|&i| self.plugins[i].clone())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins supporting a layer, in registration order
    pub fn for_layer(&self, layer: TargetLayer) -> Vec<Arc<dyn TypePlugin>> {
        self.plugins
            .iter()
            .filter(|p| p.layer().supports(layer))
            .cloned()
            .collect()
    }

    pub fn read_graph(&self, layer: TargetLayer) -> Result<TypeDependencyGraph> {
        self.graph(layer, |p| p.read_prerequisites())
    }

    pub fn write_graph(&self, layer: TargetLayer) -> Result<TypeDependencyGraph> {
        self.graph(layer, |p| p.write_prerequisites())
    }

    /// Prerequisites on registered types outside the layer are dropped;
    /// prerequisites on unknown types are an error.
    fn graph<F>(&self, layer: TargetLayer, prerequisites: F) -> Result<TypeDependencyGraph>
    where
        F: Fn(&dyn TypePlugin) -> Vec<String>,
    {
        let active: BTreeSet<String> = self
            .for_layer(layer)
            .iter()
            .map(|p| p.type_name().to_string())
            .collect();

        let mut nodes = Vec::with_capacity(active.len());
        for plugin in self.for_layer(layer) {
            let mut prereqs = Vec::new();
            for prereq in prerequisites(plugin.as_ref()) {
                if active.contains(&prereq) {
                    prereqs.push(prereq);
                } else if !self.by_name.contains_key(&prereq) {
                    return Err(OrchestratorError::MissingDependency(format!(
                        "Type {} depends on unregistered type {}",
                        plugin.type_name(),
                        prereq
                    )));
                }
            }
            nodes.push((plugin.type_name().to_string(), prereqs));
        }
        TypeDependencyGraph::new(nodes)
    }

    /// Keywords and sub-keywords of a layer's plugins, de-duplicated
    pub fn keywords(&self, layer: TargetLayer) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut keywords = Vec::new();
        for plugin in self.for_layer(layer) {
            let own = std::iter::once(plugin.keyword().to_string());
            for keyword in own.chain(plugin.sub_keywords()) {
                if !keyword.is_empty() && seen.insert(keyword.to_ascii_uppercase()) {
                    keywords.push(keyword);
                }
            }
        }
        keywords
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field(
                "types",
                &self.plugins.iter().map(|p| p.type_name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
