use std::collections::HashMap;

use crate::{
    config::{ENDPOINT_KEY, PREFS_NAMESPACE},
    error::SettingsError,
};

/// Persistent string preferences, scoped to one namespace.
pub trait SettingsStore {
    fn get_string(&mut self, key: &str) -> Result<Option<String>, SettingsError>;
    fn put_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError>;
}

/// Typed access to the persisted endpoint setting.
#[derive(Debug)]
pub struct EndpointSettings<S> {
    store: S,
}

impl<S: SettingsStore> EndpointSettings<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn namespace(&self) -> &'static str {
        PREFS_NAMESPACE
    }

    pub fn endpoint(&mut self) -> Result<String, SettingsError> {
        Ok(self.store.get_string(ENDPOINT_KEY)?.unwrap_or_default())
    }

    pub fn set_endpoint(&mut self, endpoint: &str) -> Result<(), SettingsError> {
        self.store.put_string(ENDPOINT_KEY, endpoint)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl SettingsStore for MemoryStore {
    fn get_string(&mut self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.values.get(key).cloned())
    }

    fn put_string(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
