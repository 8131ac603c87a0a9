use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::module::{Module, ModuleDescriptor};
use crate::{Result, VrackError};

/// Builds a fresh module behaviour for one instance.
pub type ModuleFactory = Box<dyn Fn() -> Box<dyn Module> + Send + Sync>;

struct CatalogEntry {
    descriptor: Arc<ModuleDescriptor>,
    factory: ModuleFactory,
}

/// Registry of module types that can be instantiated by name.
#[derive(Default)]
pub struct ModuleCatalog {
    types: HashMap<String, CatalogEntry>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module type. Type names must be unique.
    pub fn register<F>(&mut self, descriptor: ModuleDescriptor, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        if self.types.contains_key(&descriptor.type_name) {
            return Err(VrackError::InvalidDescriptor(format!(
                "module type `{}` registered twice",
                descriptor.type_name
            )));
        }
        tracing::debug!(module_type = %descriptor.type_name, "registered module type");
        self.types.insert(
            descriptor.type_name.clone(),
            CatalogEntry {
                descriptor: Arc::new(descriptor),
                factory: Box::new(factory),
            },
        );
        Ok(())
    }

    /// Constructs a new behaviour for `type_name` along with its descriptor.
    pub fn instantiate(&self, type_name: &str) -> Result<(Arc<ModuleDescriptor>, Box<dyn Module>)> {
        let entry = self
            .types
            .get(type_name)
            .ok_or_else(|| VrackError::UnknownModuleType(type_name.to_string()))?;
        Ok((entry.descriptor.clone(), (entry.factory)()))
    }

    pub fn descriptor(&self, type_name: &str) -> Option<&ModuleDescriptor> {
        self.types.get(type_name).map(|entry| entry.descriptor.as_ref())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names in sorted order.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("types", &self.type_names())
            .finish()
    }
}
