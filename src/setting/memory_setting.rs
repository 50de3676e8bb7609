use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;

use super::Settings;

/// Volatile settings namespace for hosts without flash storage.
///
/// Clones share the same map, so a test can keep a handle and inspect what
/// the application committed.
#[derive(Clone, Default)]
pub struct MemorySettings {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self
    }
}

impl Settings for MemorySettings {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn erase_key(&mut self, key: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_storage() {
        let mut settings = MemorySettings::new().with_value("download_url", "http://x/a.bin");
        let observer = settings.clone();

        settings.erase_key("download_url").expect("erase");
        assert_eq!(observer.get_string("download_url"), None);

        settings.set_string("aec_mode", "device_side").expect("set");
        assert_eq!(observer.get_string("aec_mode").as_deref(), Some("device_side"));
    }
}
