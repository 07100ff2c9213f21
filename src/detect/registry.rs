use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::Detection;
use crate::frame::Frame;

use super::backend::DetectorBackend;

/// Thread-safe registry of detector backends, selected by name at startup.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: BTreeMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name();
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.backends.insert(
            name.to_string(),
            SharedBackend {
                name,
                inner: Arc::new(Mutex::new(backend)),
            },
        );
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle to a registered backend. Locks the backend per call.
#[derive(Clone)]
pub struct SharedBackend {
    name: &'static str,
    inner: Arc<Mutex<dyn DetectorBackend>>,
}

impl DetectorBackend for SharedBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("backend '{}' lock poisoned", self.name))?;
        guard.detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("backend '{}' lock poisoned", self.name))?;
        guard.warm_up()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ReplayBackend;
    use crate::zone::Point;

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Err(anyhow!("model not loaded"))
        }
    }

    #[test]
    fn first_registered_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(ReplayBackend::new());
        registry.register(FailingBackend);
        assert_eq!(registry.list(), vec!["failing", "replay"]);
        let default = registry.default_backend().unwrap();
        assert_eq!(default.name(), "replay");
    }

    #[test]
    fn set_default_requires_registration() {
        let mut registry = BackendRegistry::new();
        registry.register(ReplayBackend::new());
        assert!(registry.set_default("tract").is_err());
        registry.register(FailingBackend);
        registry.set_default("failing").unwrap();
        let mut backend = registry.default_backend().unwrap();
        assert!(backend.detect(&Frame::blank(0, 4, 4)).is_err());
    }

    #[test]
    fn shared_handle_reaches_backend_state() {
        let mut registry = BackendRegistry::new();
        registry.register(
            ReplayBackend::new().with_detections(0, vec![Detection::person_at(Point::new(5, 5))]),
        );
        let mut handle = registry.get("replay").unwrap();
        let found = handle.detect(&Frame::blank(0, 16, 16)).unwrap();
        assert_eq!(found.len(), 1);
        assert!(handle.detect(&Frame::blank(1, 16, 16)).unwrap().is_empty());
    }
}
