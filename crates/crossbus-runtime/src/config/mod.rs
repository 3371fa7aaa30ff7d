//! Bus config loader (strict parsing).

pub mod schema;

use std::fs;

use crossbus_core::error::{BusError, Result};

pub use schema::{BusConfig, BusSection};

pub fn load_from_file(path: &str) -> Result<BusConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| BusError::BadConfig(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BusConfig> {
    let cfg: BusConfig = serde_yaml::from_str(s)
        .map_err(|e| BusError::BadConfig(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
