//! Script callback registry keyed by stage and menu path

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{FrameStage, ScriptContext};

/// Callback invoked while the scheduler is at its stage
pub type ScriptCallback = Arc<dyn Fn(&ScriptContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Unique callback identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(Uuid);

impl CallbackId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Menu element path, e.g. `["Misc", "Scripts", "Grenade helper"]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MenuPath(Vec<String>);

impl MenuPath {
    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for MenuPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// One registered callback
#[derive(Clone)]
pub(crate) struct Registration {
    pub id: CallbackId,
    pub path: MenuPath,
    pub callback: ScriptCallback,
}

#[derive(Default)]
struct RegistryInner {
    /// Callbacks per stage, in registration order
    stages: HashMap<FrameStage, Vec<Registration>>,
    /// Element paths in first-registration order, each listed once
    elements: Vec<MenuPath>,
}

/// Thread-safe registry of script callbacks
#[derive(Default)]
pub struct CallbackRegistry {
    inner: RwLock<RegistryInner>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `stage` under `path`. Registering the same
    /// path again adds the callback but not a second element.
    pub fn register<F>(&self, stage: FrameStage, path: MenuPath, callback: F) -> CallbackId
    where
        F: Fn(&ScriptContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = CallbackId::new();
        let callback: ScriptCallback = Arc::new(callback);
        let mut inner = self.inner.write();
        if !inner.elements.contains(&path) {
            inner.elements.push(path.clone());
        }
        debug!(stage = %stage, path = %path, id = %id, "Callback registered");
        inner
            .stages
            .entry(stage)
            .or_default()
            .push(Registration { id, path, callback });
        id
    }

    /// Remove one callback. Returns false if the id is unknown.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut inner = self.inner.write();
        for registrations in inner.stages.values_mut() {
            if let Some(position) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(position);
                debug!(id = %id, "Callback unregistered");
                return true;
            }
        }
        false
    }

    /// Registered element paths, each once
    pub fn elements(&self) -> Vec<MenuPath> {
        self.inner.read().elements.clone()
    }

    pub fn len(&self, stage: FrameStage) -> usize {
        self.inner.read().stages.get(&stage).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().stages.values().all(Vec::is_empty)
    }

    /// Callbacks for `stage` at this moment, in registration order
    pub(crate) fn for_stage(&self, stage: FrameStage) -> Vec<Registration> {
        self.inner.read().stages.get(&stage).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &ScriptContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn element_registration_is_idempotent_by_path() {
        let registry = CallbackRegistry::new();
        let path = MenuPath::new(["Misc", "Helper"]);
        registry.register(FrameStage::RenderStart, path.clone(), noop);
        registry.register(FrameStage::RenderStart, path.clone(), noop);
        registry.register(FrameStage::NetUpdateEnd, path.clone(), noop);

        assert_eq!(registry.elements(), vec![path]);
        assert_eq!(registry.len(FrameStage::RenderStart), 2);
        assert_eq!(registry.len(FrameStage::NetUpdateEnd), 1);
    }

    #[test]
    fn unregister_removes_only_that_callback() {
        let registry = CallbackRegistry::new();
        let path = MenuPath::new(["A"]);
        let first = registry.register(FrameStage::FrameStart, path.clone(), noop);
        let second = registry.register(FrameStage::FrameStart, path, noop);

        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        let left: Vec<_> = registry.for_stage(FrameStage::FrameStart).iter().map(|r| r.id).collect();
        assert_eq!(left, vec![second]);
    }

    #[test]
    fn menu_path_displays_with_slashes() {
        assert_eq!(MenuPath::new(["Misc", "Scripts"]).to_string(), "Misc/Scripts");
    }
}
