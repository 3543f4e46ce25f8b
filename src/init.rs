use crate::config::{DEFAULT_CONFIG, FILENAME};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Write the default `revly.config.toml` into `dir` unless one exists.
/// Returns whether a file was created.
pub fn run(dir: &Path) -> Result<bool> {
    let path = dir.join(FILENAME);
    if path.exists() {
        println!("A config file already exists at {}. Skipping creation.", path.display());
        println!("To regenerate, delete the file and rerun `revly init`.");
        return Ok(false);
    }

    fs::write(&path, DEFAULT_CONFIG).with_context(|| format!("writing {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("  Endpoint: OpenRouter chat completions");
    println!("  API key:  export LLM_API_KEY=<your-api-key>");
    println!();
    println!("Edit the file to change the endpoint, the model list, or the pair interval.");
    Ok(true)
}
