//! CLI command handlers. Each command is in its own file.

mod check;
mod config_path;
mod run;

pub use check::run_check;
pub use config_path::run_config_path;
pub use run::{run_pipeline, RunOverrides};
