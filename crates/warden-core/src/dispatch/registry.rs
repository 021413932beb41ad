//! PluginRegistry - type_id → plugin の対応表
//!
//! Design:
//! - Built during initialization (mutable).
//! - Shared read-only at runtime behind an `Arc`, so lookups take no lock.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, WardenError};
use crate::ports::plugin::{ContentHandler, Distributor, Importer, PluginCapability};
use crate::ports::store::Document;

#[derive(Default)]
pub struct PluginRegistry {
    importers: HashMap<String, Arc<dyn Importer>>,
    distributors: HashMap<String, Arc<dyn Distributor>>,
    handlers: HashMap<String, Arc<dyn ContentHandler>>,
    default_configs: HashMap<(PluginCapability, String), Document>,
}

fn insert_unique<T: ?Sized>(
    map: &mut HashMap<String, Arc<T>>,
    capability: PluginCapability,
    type_id: &str,
    plugin: Arc<T>,
) -> Result<()> {
    if map.contains_key(type_id) {
        return Err(WardenError::DuplicateResource(format!("{capability}:{type_id}")));
    }
    map.insert(type_id.to_string(), plugin);
    Ok(())
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_importer(&mut self, type_id: &str, importer: Arc<dyn Importer>) -> Result<()> {
        insert_unique(&mut self.importers, PluginCapability::Importer, type_id, importer)
    }

    pub fn register_distributor(
        &mut self,
        type_id: &str,
        distributor: Arc<dyn Distributor>,
    ) -> Result<()> {
        insert_unique(
            &mut self.distributors,
            PluginCapability::Distributor,
            type_id,
            distributor,
        )
    }

    pub fn register_handler(&mut self, type_id: &str, handler: Arc<dyn ContentHandler>) -> Result<()> {
        insert_unique(
            &mut self.handlers,
            PluginCapability::ContentHandler,
            type_id,
            handler,
        )
    }

    /// Type-wide configuration passed to every call as `plugin_config`.
    pub fn set_default_config(&mut self, capability: PluginCapability, type_id: &str, config: Document) {
        self.default_configs
            .insert((capability, type_id.to_string()), config);
    }

    pub fn default_config(&self, capability: PluginCapability, type_id: &str) -> Document {
        self.default_configs
            .get(&(capability, type_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn importer(&self, type_id: &str) -> Option<Arc<dyn Importer>> {
        self.importers.get(type_id).cloned()
    }

    pub fn distributor(&self, type_id: &str) -> Option<Arc<dyn Distributor>> {
        self.distributors.get(type_id).cloned()
    }

    pub fn handler(&self, type_id: &str) -> Option<Arc<dyn ContentHandler>> {
        self.handlers.get(type_id).cloned()
    }

    pub fn require_handler(&self, type_id: &str) -> Result<Arc<dyn ContentHandler>> {
        self.handler(type_id).ok_or_else(|| WardenError::MissingPlugin {
            capability: PluginCapability::ContentHandler,
            type_id: type_id.to_string(),
        })
    }

    pub fn has(&self, capability: PluginCapability, type_id: &str) -> bool {
        match capability {
            PluginCapability::Importer => self.importers.contains_key(type_id),
            PluginCapability::Distributor => self.distributors.contains_key(type_id),
            PluginCapability::ContentHandler => self.handlers.contains_key(type_id),
        }
    }

    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Every registered type id, sorted and de-duplicated across capabilities.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .importers
            .keys()
            .chain(self.distributors.keys())
            .chain(self.handlers.keys())
            .cloned()
            .collect();
        types.sort();
        types.dedup();
        types
    }
}
