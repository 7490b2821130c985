use serde::{Deserialize, Serialize};

pub use crate::ingest::IngestConfig;
pub use crate::tee::TeeConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub tee: TeeConfig,
    #[serde(default)]
    pub work: WorkConfig,
}

/// Work queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkConfig {
    /// Uploads processed at once by batch ingest (default: 4)
    #[serde(default = "default_ordered_limit")]
    pub ordered_limit: usize,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            ordered_limit: default_ordered_limit(),
        }
    }
}

fn default_ordered_limit() -> usize {
    4
}
