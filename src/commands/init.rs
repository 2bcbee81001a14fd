//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::IssueDb;
use std::path::PathBuf;
use tracing::info;

/// Initialize configuration and database in the given base directory
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<Config> {
    let mut config = Config::default();
    config.init_paths(base_dir);

    if config.paths.config_file.exists() && !force {
        return Err(Error::AlreadyInitialized(
            config.paths.config_file.display().to_string(),
        ));
    }

    std::fs::create_dir_all(&config.paths.base_dir)?;
    config.save()?;

    // Create the metadata database with its schema
    let db = IssueDb::connect(&config).await?;
    db.init_schema().await?;

    info!("Initialized triage at {:?}", config.paths.base_dir);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_config_and_db() {
        let tmp = TempDir::new().unwrap();
        let config = cmd_init(Some(tmp.path().to_path_buf()), false).await.unwrap();

        assert!(config.paths.config_file.exists());
        assert!(config.paths.db_file.exists());
        assert!(config.is_initialized());
    }

    #[tokio::test]
    async fn test_init_refuses_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        cmd_init(Some(tmp.path().to_path_buf()), false).await.unwrap();

        let err = cmd_init(Some(tmp.path().to_path_buf()), false).await;
        assert!(matches!(err, Err(Error::AlreadyInitialized(_))));

        assert!(cmd_init(Some(tmp.path().to_path_buf()), true).await.is_ok());
    }
}
