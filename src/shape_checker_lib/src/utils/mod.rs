//! This module contains various utility modules and helper functions.

pub mod debug;
pub mod log;

use crate::prelude::*;
use anyhow::Context;

/// Get the contents of a configuration file from the user configuration directory.
pub fn read_config_file(filename: &str) -> Result<serde_json::Value, Error> {
    let project_dirs = directories::ProjectDirs::from("", "", "shape_checker")
        .context("Could not discern location of configuration files.")?;
    let config_dir = project_dirs.config_dir();
    let config_path = config_dir.join(filename);
    let config_file =
        std::fs::read_to_string(config_path).context("Could not read configuration file")?;
    Ok(serde_json::from_str(&config_file)?)
}
