//! Named reader drivers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{BackendDriver, ReaderDriver, ZarrBackend};
use crate::error::{LoaderError, Result};

/// Name of the driver used when a load does not pick one.
pub const DEFAULT_DRIVER: &str = "zarr";

/// Driver lookup by name. Starts with the `zarr` driver registered.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: Arc<RwLock<BTreeMap<String, Arc<dyn ReaderDriver>>>>,
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let registry = Self::empty();
        registry.register(BackendDriver::new(ZarrBackend::new()));
        registry
    }
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no drivers at all.
    pub fn empty() -> Self {
        Self {
            drivers: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Register `driver` under its own name, replacing any previous one.
    pub fn register<D: ReaderDriver + 'static>(&self, driver: D) -> Arc<dyn ReaderDriver> {
        let driver: Arc<dyn ReaderDriver> = Arc::new(driver);
        self.register_shared(driver.clone());
        driver
    }

    pub fn register_shared(&self, driver: Arc<dyn ReaderDriver>) {
        let name = driver.name().to_string();
        tracing::debug!(driver = %name, "registered reader driver");
        self.drivers.write().insert(name, driver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ReaderDriver>> {
        self.drivers.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.drivers.read().keys().cloned().collect()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

/// Which driver a load uses: a registered name or a ready instance.
#[derive(Clone)]
pub enum DriverSelection {
    Named(String),
    Instance(Arc<dyn ReaderDriver>),
}

impl Default for DriverSelection {
    fn default() -> Self {
        DriverSelection::Named(DEFAULT_DRIVER.to_string())
    }
}

impl DriverSelection {
    pub fn resolve(&self, registry: &DriverRegistry) -> Result<Arc<dyn ReaderDriver>> {
        match self {
            DriverSelection::Instance(driver) => Ok(driver.clone()),
            DriverSelection::Named(name) => registry.get(name).ok_or_else(|| {
                LoaderError::invalid_query(format!(
                    "unknown reader driver '{}', known: {}",
                    name,
                    registry.names().join(", ")
                ))
            }),
        }
    }
}

impl fmt::Debug for DriverSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverSelection::Named(name) => f.debug_tuple("Named").field(name).finish(),
            DriverSelection::Instance(d) => f.debug_tuple("Instance").field(&d.name()).finish(),
        }
    }
}

impl From<&str> for DriverSelection {
    fn from(name: &str) -> Self {
        DriverSelection::Named(name.to_string())
    }
}

impl From<Arc<dyn ReaderDriver>> for DriverSelection {
    fn from(driver: Arc<dyn ReaderDriver>) -> Self {
        DriverSelection::Instance(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryBackend;

    #[test]
    fn test_default_has_zarr() {
        let registry = DriverRegistry::new();
        assert_eq!(registry.names(), vec!["zarr".to_string()]);
        assert!(DriverSelection::default().resolve(&registry).is_ok());
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = DriverRegistry::new();
        registry.register(BackendDriver::new(MemoryBackend::new()));

        let driver = DriverSelection::from("memory").resolve(&registry).unwrap();
        assert_eq!(driver.name(), "memory");

        let err = DriverSelection::from("gdal").resolve(&registry).err().unwrap();
        assert!(err.to_string().contains("memory, zarr"));
    }

    #[test]
    fn test_instance_bypasses_registry() {
        let driver: Arc<dyn ReaderDriver> = Arc::new(BackendDriver::new(MemoryBackend::new()));
        let resolved = DriverSelection::from(driver)
            .resolve(&DriverRegistry::empty())
            .unwrap();
        assert_eq!(resolved.name(), "memory");
    }
}
