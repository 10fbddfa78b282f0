use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::{DetectParams, DetectionBox};
use crate::frame::Frame;

use super::backend::DetectorBackend;

/// Backend handle shared between stream workers.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
///
/// Models are loaded once and shared by every stream. Backends are wrapped in
/// `Mutex` because `DetectorBackend::detect` takes `&mut self`; each stream
/// holds the lock only for the duration of one frame.
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

    /// Registry holding a single backend, which is also the default.
    pub fn with_backend<B: DetectorBackend + 'static>(backend: B) -> Self {
        let mut registry = Self::new();
        registry.register(backend);
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    /// A backend with the same name replaces the earlier one.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        log::info!("detector backend registered: {}", name);
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
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

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends in name order.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Named backend, or the default when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<SharedBackend> {
        match name {
            Some(name) => self
                .get(name)
                .ok_or_else(|| anyhow!("backend '{}' not registered", name)),
            None => self
                .default_backend()
                .ok_or_else(|| anyhow!("no detector backend registered")),
        }
    }

    /// Run detection on a frame with the named (or default) backend.
    pub fn detect(
        &self,
        name: Option<&str>,
        frame: &Frame,
        params: &DetectParams,
    ) -> Result<Vec<DetectionBox>> {
        let backend = self.resolve(name)?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.detect(frame, params)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
