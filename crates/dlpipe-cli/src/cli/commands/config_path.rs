//! `dlpipe config-path` – print where the default config lives.

use anyhow::Result;
use dlpipe_core::config;

pub fn run_config_path() -> Result<()> {
    let path = config::config_path()?;
    let note = if path.exists() { "" } else { " (not created yet)" };
    println!("{}{}", path.display(), note);
    Ok(())
}
