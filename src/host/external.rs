//! Opaque key/value accessors for externally owned state (convars, menu, data files)

use dashmap::DashMap;

use super::PropValue;

/// Name of the convar that scales all falling objects
pub const SV_GRAVITY: &str = "sv_gravity";

/// Externally owned state addressed by key. No consistency contract beyond
/// "last write observed".
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<PropValue>;
    fn set(&self, key: &str, value: PropValue);

    fn get_float(&self, key: &str) -> Option<f32> {
        self.get(key).and_then(|v| v.as_float()).map(|v| v as f32)
    }
}

/// In-memory store used for convars and menu values
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, PropValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with the convars the mirror reads
    pub fn with_defaults() -> Self {
        let store = Self::new();
        store.set(SV_GRAVITY, PropValue::Float(800.0));
        store
    }

    /// Join a menu path into a single key
    pub fn path_key(path: &[impl AsRef<str>]) -> String {
        path.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join("/")
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<PropValue> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: PropValue) {
        self.values.insert(key.to_string(), value);
    }
}
