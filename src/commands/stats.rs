use serde::Serialize;

use crate::database::{BatStats, Database};
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub schema_version: f64,
    pub sessions: i64,
    pub bats: Vec<BatStats>,
}

/// Sessions, recordings and segments each species was identified in
pub fn get_bat_stats(db: &Database) -> Result<Vec<BatStats>, AppError> {
    db.get_bat_stats().map_err(AppError::from)
}

pub fn get_store_stats(db: &Database) -> Result<StoreStats, AppError> {
    let (_, sessions) = db.list_sessions(1, 0)?;
    Ok(StoreStats {
        schema_version: db.migration_report().to_version,
        sessions,
        bats: db.get_bat_stats()?,
    })
}
