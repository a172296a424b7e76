//! Provider registry for dynamic provider resolution.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use spanstore_common::{Error, Result};

use crate::adapter::{AdapterConfig, BackendAdapter};
use crate::local::LocalClient;
use crate::memory::MemoryClient;
use crate::provider::StorageProvider;

/// Future returned by a [`ProviderFactory`].
pub type ProviderFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn StorageProvider>>> + Send>>;

/// Factory building an authenticated provider from its configuration.
pub type ProviderFactory = Box<dyn Fn(AdapterConfig) -> ProviderFuture + Send + Sync>;

/// Registry for storage provider factories, keyed by provider-type tag.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Build a provider for `config.provider_type`.
    ///
    /// # Errors
    /// - Provider type not registered
    /// - Configuration invalid
    /// - Authentication failed
    pub async fn resolve(&self, config: AdapterConfig) -> Result<Arc<dyn StorageProvider>> {
        let factory = self.factories.get(&config.provider_type).ok_or_else(|| {
            Error::NotFound(format!(
                "Provider '{}' is not registered",
                config.provider_type
            ))
        })?;
        factory(config).await
    }

    /// Registered provider types, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider type is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn memory_factory() -> ProviderFactory {
    Box::new(|config| {
        Box::pin(async move {
            let adapter = BackendAdapter::connect(config, MemoryClient::new()).await?;
            Ok(Arc::new(adapter) as Arc<dyn StorageProvider>)
        })
    })
}

fn local_factory() -> ProviderFactory {
    Box::new(|config| {
        Box::pin(async move {
            let root = config.option_str("root").ok_or_else(|| {
                Error::InvalidInput("Local provider requires a 'root' option".to_string())
            })?;
            let client = LocalClient::new(root)?;
            let adapter = BackendAdapter::connect(config, client).await?;
            Ok(Arc::new(adapter) as Arc<dyn StorageProvider>)
        })
    })
}

/// Create a registry with the built-in `memory` and `local` providers.
pub fn create_default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.factories.insert("memory".to_string(), memory_factory());
    registry.factories.insert("local".to_string(), local_factory());
    registry
}
