//! `gemrelay init`: Write a starter config file.

use gemrelay_config::AppConfig;
use std::path::Path;

pub fn run(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    write_example(path, force)?;
    println!("Wrote {}", path.display());
    println!("Fill in the client cookies, then run `gemrelay serve`.");
    Ok(())
}

fn write_example(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::example_toml())?;
    Ok(())
}
