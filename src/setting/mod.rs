use anyhow::Result;

pub mod memory_setting;
#[cfg(target_os = "espidf")]
pub mod nvs_setting;

pub use memory_setting::MemorySettings;
#[cfg(target_os = "espidf")]
pub use nvs_setting::NvsSetting;

/// One namespace of the persistent key/value store.
pub trait Settings: Send {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&mut self, key: &str, value: &str) -> Result<()>;
    fn erase_key(&mut self, key: &str) -> Result<()>;
}
