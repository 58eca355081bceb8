//! Repository analysis preview: `devagent analyze`.

use anyhow::{Context, Result};
use std::path::Path;

use devagent::analyzer::Analyzer;

pub fn cmd_analyze(path: &Path) -> Result<()> {
    if !path.is_dir() {
        anyhow::bail!("Not a directory: {}", path.display());
    }
    let analysis = Analyzer::default().analyze(path)?;
    let json = serde_json::to_string_pretty(&analysis).context("Failed to encode analysis")?;
    println!("{}", json);
    Ok(())
}
