use serde::Deserialize;
use serde::Serialize;

use super::invalid;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TreeConfig {
    /// Maximum node payload in bytes
    #[serde(default = "default_max_data_bytes")]
    pub max_data_bytes: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_data_bytes: default_max_data_bytes(),
        }
    }
}

impl TreeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_data_bytes == 0 {
            return Err(invalid("max_data_bytes must be > 0".into()));
        }
        Ok(())
    }
}

fn default_max_data_bytes() -> usize {
    1024 * 1024
}
