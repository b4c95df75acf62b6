use pipsync_core::Config;
use std::path::Path;

/// Show the effective configuration as pretty-printed JSON.
pub fn show(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(p) if p.exists() => println!("# {}", p.display()),
        Some(p) => println!("# {} (not found, defaults)", p.display()),
        None => println!("# defaults"),
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, use --force to overwrite",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
