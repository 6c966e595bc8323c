use std::path::Path;

use crate::config::Config;
use crate::database::schema::{self, StoreStatus};
use crate::database::Database;
use crate::error::AppError;
use crate::reconcile::cascade::{repair_derived_links, RepairReport};

/// Classify a candidate store file without changing it
pub fn validate_store(path: &Path) -> StoreStatus {
    let status = schema::validate_store(path);
    log::info!("Store {} is {:?}", path.display(), status);
    status
}

/// Open an existing store, upgrading it if needed
pub fn open_store(path: &Path, repair: bool) -> Result<Database, AppError> {
    log::info!("Opening store {}", path.display());
    let db = Database::open(path)?;

    let report = db.migration_report();
    if !report.applied.is_empty() || !report.failed.is_empty() {
        log::info!(
            "Store upgraded from {} to {}: applied {:?}",
            report.from_version,
            report.to_version,
            report.applied
        );
    }
    for (version, error) in &report.failed {
        log::error!("Migration {} failed: {}", version, error);
    }
    if repair || !report.failed.is_empty() {
        repair_derived_links(&db)?;
    }
    Ok(db)
}

/// Create a new, empty store
pub fn create_store(path: &Path) -> Result<Database, AppError> {
    log::info!("Creating store {}", path.display());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Database::create(path).map_err(AppError::from)
}

/// Open the configured store, creating it on first use
pub fn open_or_create_store(config: &Config) -> Result<Database, AppError> {
    if config.store_path.exists() {
        open_store(&config.store_path, config.repair_on_open)
    } else {
        create_store(&config.store_path)
    }
}

pub fn close_store(db: Database) -> Result<(), AppError> {
    db.close().map_err(AppError::from)
}

/// Rebuild the derived species links from segment identifications
pub fn repair_store(db: &Database) -> Result<RepairReport, AppError> {
    log::info!("Repairing derived links in {}", db.path().display());
    repair_derived_links(db).map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::status_message;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        Config {
            store_path: dir.path().join("survey").join("bats.db"),
            log_level: "debug".to_string(),
            repair_on_open: true,
        }
    }

    #[test]
    fn test_first_open_creates_store() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);

        let db = open_or_create_store(&config).unwrap();
        close_store(db).unwrap();
        assert_eq!(validate_store(&config.store_path), StoreStatus::Ok);

        let db = open_or_create_store(&config).unwrap();
        assert!(repair_store(&db).unwrap().is_empty());
    }

    #[test]
    fn test_open_failure_reports_message() {
        let temp = TempDir::new().unwrap();
        let result = open_store(&temp.path().join("missing.db"), false);
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(status_message(&result).contains("missing.db"));
    }
}
