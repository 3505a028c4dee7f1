//! YAML loading with validation.
//!
//! Every loader tags failures with the offending file so reconciler logs
//! point straight at the document an operator has to fix.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;
use validator::Validate;

use crate::errors::{Error, Result};

use super::{CdsConfig, EdsConfig, LdsConfig, RdsConfig};

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!(file = %path.display(), "loading config file");

    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;

    serde_yaml::from_str(&data).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
}

fn load_sequence<T: DeserializeOwned + Validate>(path: &Path) -> Result<Vec<T>> {
    let configs: Vec<T> = read_yaml(path)?;
    for config in &configs {
        config
            .validate()
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
    }
    Ok(configs)
}

pub fn load_cds(path: &Path) -> Result<Vec<CdsConfig>> {
    load_sequence(path)
}

pub fn load_eds(path: &Path) -> Result<Vec<EdsConfig>> {
    load_sequence(path)
}

pub fn load_rds(path: &Path) -> Result<Vec<RdsConfig>> {
    load_sequence(path)
}

pub fn load_lds(path: &Path) -> Result<LdsConfig> {
    let config: LdsConfig = read_yaml(path)?;
    config
        .validate()
        .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
    Ok(config)
}
