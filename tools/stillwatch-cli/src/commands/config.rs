//! Print, validate, or write the effective configuration.

use std::path::PathBuf;

use stillwatch_common::config::{config_file_path, AppConfig};

pub fn run(config: &AppConfig, path: Option<PathBuf>, check: bool, write: bool) -> anyhow::Result<()> {
    config.validate()?;

    if write {
        let path = path.unwrap_or_else(config_file_path);
        config.save_to(&path)?;
        println!("Config written to: {}", path.display());
        return Ok(());
    }

    if check {
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
