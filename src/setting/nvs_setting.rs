use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, EspNvsPartition, NvsDefault};
use log::warn;

use super::Settings;

///https://docs.esp-rs.org/esp-idf-svc/esp_idf_svc/nvs/struct.EspNvs.html
pub struct NvsSetting {
    nvs: EspNvs<NvsDefault>,
}

impl NvsSetting {
    pub fn new(partition: EspDefaultNvsPartition, namespace: &str) -> Result<Self> {
        let partition: EspNvsPartition<NvsDefault> = partition;
        let nvs: EspNvs<NvsDefault> = EspNvs::new(partition, namespace, true)?;
        Ok(Self { nvs })
    }
}

impl Settings for NvsSetting {
    fn get_string(&self, key: &str) -> Option<String> {
        // URLs can be long; the IDF caps strings at 4000 bytes.
        const MAX_STR_LEN: usize = 512;
        let mut buffer = [0u8; MAX_STR_LEN];
        match self.nvs.get_str(key, &mut buffer) {
            Ok(value) => value.map(str::to_string),
            Err(e) => {
                warn!("Failed to read setting {}: {:?}", key, e);
                None
            }
        }
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.nvs.set_str(key, value)?;
        Ok(())
    }

    fn erase_key(&mut self, key: &str) -> Result<()> {
        self.nvs.remove(key)?;
        Ok(())
    }
}
