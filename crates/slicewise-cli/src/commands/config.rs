use std::path::Path;

use anyhow::Context;
use slicewise_core::SlicewiseConfig;

/// Load `path`, or fall back to defaults when no path is given.
pub fn load(path: Option<&Path>) -> anyhow::Result<SlicewiseConfig> {
    match path {
        Some(path) => SlicewiseConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(SlicewiseConfig::default()),
    }
}

pub fn print_default() -> anyhow::Result<()> {
    print!("{}", SlicewiseConfig::default().to_toml_string()?);
    Ok(())
}
