use std::{fs, path::Path};

use acapella_core::Config;
use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub const ENV_SNAPSHOT: &str = "./envs/last";

pub fn setup_tracing() {
  let subscriber = FmtSubscriber::builder()
    .with_max_level(Level::INFO)
    .with_target(false)
    .finish();

  tracing::subscriber::set_global_default(subscriber).expect("Setting default subscriber failed");
}

/// Records the resolved configuration so a run can be reproduced later.
pub fn save_env(config: &Config, path: impl AsRef<Path>) -> Result<()> {
  let path = path.as_ref();
  if let Some(dir) = path.parent() {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
  }

  let json = serde_json::to_string_pretty(config)?;
  fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn snapshot_creates_its_directory() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("envs").join("last");
    let config = Config {
      epochs: 3,
      ..Config::default()
    };

    save_env(&config, &path).unwrap();
    let back: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(back["epochs"], 3);
    assert_eq!(back["chop"]["name"], "tile");
  }
}
