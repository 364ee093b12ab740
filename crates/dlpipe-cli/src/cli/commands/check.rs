//! `dlpipe check` – validate config and manifest without downloading.

use anyhow::Result;
use dlpipe_core::config::PipelineConfig;
use dlpipe_core::site::{Manifest, ManifestSettings};

pub fn run_check(cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let policy = cfg.backoff_policy()?;
    let settings = ManifestSettings::from_table(&cfg.site)?;

    println!("concurrency:      {}", cfg.concurrency);
    println!(
        "retries:          {} (backoff {:?} .. {:?}{})",
        policy.max_retries,
        policy.initial,
        policy.max,
        if policy.jitter { ", jitter" } else { "" }
    );
    println!("on task failure:  {}", cfg.on_task_failure);
    println!("manifest:         {}", settings.manifest.display());
    println!("output dir:       {}", settings.output_dir.display());
    println!(
        "login:            {}",
        settings.auth_url.as_deref().unwrap_or("(none)")
    );

    let manifest = Manifest::load(&settings.manifest)?;
    let selected = manifest
        .tasks
        .iter()
        .filter(|t| settings.only.is_empty() || settings.only.contains(&t.name))
        .count();
    println!("tasks:            {} ({} selected)", manifest.tasks.len(), selected);
    Ok(())
}
