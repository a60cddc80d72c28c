//! In-memory table of supervised services.
//!
//! Once the daemon is up this is the only answer to "is X running": the
//! table is owned by the daemon and changed only from its main loop.

use crate::error::{Error, Result};
use crate::service::Service;
use std::collections::BTreeMap;

/// Registry of currently supervised services, keyed by name.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Service>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly started service.
    ///
    /// At most one live entry exists per name.
    pub fn insert(&mut self, service: Service) -> Result<()> {
        if self.services.contains_key(&service.name) {
            return Err(Error::AlreadyRunning(service.name));
        }
        self.services.insert(service.name.clone(), service);
        Ok(())
    }

    /// Remove a service, returning its last record.
    pub fn remove(&mut self, name: &str) -> Option<Service> {
        self.services.remove(name)
    }

    /// Look up a service by name.
    pub fn get(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }

    /// Look up a service by name for update.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.get_mut(name)
    }

    /// Whether `name` has a live entry.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Find the service whose current run is `pid`.
    pub fn find_by_pid(&self, pid: u32) -> Option<&Service> {
        self.services.values().find(|s| s.pid == pid)
    }

    /// Names of all registered services, sorted.
    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Iterate over the registered services.
    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
