//! Service directory the monitor advertises itself in
//!
//! On a phone this is DNS-SD; here it is an interface plus an in-process
//! implementation. Registration reports the name actually advertised, which
//! differs from the requested one when another service already holds it.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::DiscoveryError;

/// A service to advertise
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub service_type: String,
    pub port: u16,
}

/// Identifies one registration for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationHandle(u64);

/// Called with the advertised name once registration succeeds
pub type RegisteredCallback = Box<dyn FnOnce(String) + Send>;

pub trait DirectoryService: Send + Sync {
    fn register(
        &self,
        service: ServiceInfo,
        on_registered: RegisteredCallback,
    ) -> Result<RegistrationHandle, DiscoveryError>;

    fn unregister(&self, handle: RegistrationHandle);

    /// Find a registered service by its advertised name
    fn lookup(&self, name: &str) -> Option<ServiceInfo>;
}

/// Directory kept in memory, shared by everything in this process
#[derive(Default)]
pub struct LocalDirectory {
    entries: Mutex<BTreeMap<RegistrationHandle, ServiceInfo>>,
    next_handle: AtomicU64,
}

impl LocalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All registered services, in registration order
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.entries.lock().values().cloned().collect()
    }
}

impl DirectoryService for LocalDirectory {
    fn register(
        &self,
        mut service: ServiceInfo,
        on_registered: RegisteredCallback,
    ) -> Result<RegistrationHandle, DiscoveryError> {
        if service.name.is_empty() {
            return Err(DiscoveryError::RegistrationFailed {
                name: service.name,
                reason: "empty service name".to_string(),
            });
        }

        let handle = RegistrationHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let advertised = {
            let mut entries = self.entries.lock();
            let taken = |name: &str| entries.values().any(|s| s.name == name);

            let base = service.name.clone();
            let mut suffix = 2;
            while taken(&service.name) {
                service.name = format!("{} ({})", base, suffix);
                suffix += 1;
            }

            let advertised = service.name.clone();
            tracing::info!(
                "Registered {} ({}) on port {}",
                advertised,
                service.service_type,
                service.port
            );
            entries.insert(handle, service);
            advertised
        };

        on_registered(advertised);
        Ok(handle)
    }

    fn unregister(&self, handle: RegistrationHandle) {
        if let Some(service) = self.entries.lock().remove(&handle) {
            tracing::info!("Unregistered {}", service.name);
        }
    }

    fn lookup(&self, name: &str) -> Option<ServiceInfo> {
        self.entries.lock().values().find(|s| s.name == name).cloned()
    }
}

/// Unregisters on drop
pub struct Registration<'a> {
    directory: &'a dyn DirectoryService,
    handle: RegistrationHandle,
}

impl<'a> Registration<'a> {
    pub fn new(directory: &'a dyn DirectoryService, handle: RegistrationHandle) -> Self {
        Self { directory, handle }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.directory.unregister(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn service(name: &str, port: u16) -> ServiceInfo {
        ServiceInfo {
            name: name.to_string(),
            service_type: crate::constants::SERVICE_TYPE.to_string(),
            port,
        }
    }

    #[test]
    fn test_register_reports_name_and_lookup_finds_it() {
        let directory = LocalDirectory::new();
        let (tx, rx) = mpsc::channel();

        let handle = directory
            .register(service("ChildMonitor on Pixel", 10000), Box::new(move |name| tx.send(name).unwrap()))
            .unwrap();

        assert_eq!(rx.recv().unwrap(), "ChildMonitor on Pixel");
        assert_eq!(directory.lookup("ChildMonitor on Pixel").unwrap().port, 10000);

        directory.unregister(handle);
        assert!(directory.lookup("ChildMonitor on Pixel").is_none());
    }

    #[test]
    fn test_name_collision_gets_suffix() {
        let directory = LocalDirectory::new();
        let (tx, rx) = mpsc::channel();

        for port in [10000, 10001, 10002] {
            let tx = tx.clone();
            directory
                .register(service("ChildMonitor on Pixel", port), Box::new(move |name| tx.send(name).unwrap()))
                .unwrap();
        }

        let names: Vec<String> = rx.try_iter().collect();
        assert_eq!(
            names,
            vec![
                "ChildMonitor on Pixel",
                "ChildMonitor on Pixel (2)",
                "ChildMonitor on Pixel (3)",
            ]
        );
        assert_eq!(directory.lookup("ChildMonitor on Pixel (3)").unwrap().port, 10002);
    }

    #[test]
    fn test_registration_guard_unregisters() {
        let directory = LocalDirectory::new();
        let handle = directory.register(service("a", 1), Box::new(|_| {})).unwrap();
        {
            let _registration = Registration::new(&directory, handle);
            assert_eq!(directory.services().len(), 1);
        }
        assert!(directory.services().is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let directory = LocalDirectory::new();
        assert!(directory.register(service("", 1), Box::new(|_| {})).is_err());
    }
}
