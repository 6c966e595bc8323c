use crate::annotation::{normalize_tags, parse_comment, ParsedComment, Vocabulary};
use crate::database::{Bat, Database};
use crate::error::AppError;
use crate::reconcile::cascade;

/// Get all species in display order
pub fn get_bats(db: &Database) -> Result<Vec<Bat>, AppError> {
    db.get_bats().map_err(AppError::from)
}

/// Insert a species, or update the one with the same genus and species
pub fn save_bat(db: &Database, bat: &Bat) -> Result<i64, AppError> {
    log::info!("Saving species {} ({} {})", bat.name, bat.genus, bat.species);
    db.merge_bat(bat).map_err(AppError::from)
}

pub fn delete_bat(db: &Database, id: i64) -> Result<(), AppError> {
    log::info!("Deleting species {}", id);
    cascade::delete_bat(db, id).map_err(AppError::from)
}

/// What the current vocabulary reads out of a comment, without saving anything
pub fn preview_comment(db: &Database, comment: &str) -> Result<ParsedComment, AppError> {
    let vocabulary = Vocabulary::new(&db.get_bats()?);
    Ok(parse_comment(comment, &vocabulary))
}

/// Rewrite the species tags in a comment to their stored spelling
pub fn normalize_comment(db: &Database, comment: &str) -> Result<String, AppError> {
    let vocabulary = Vocabulary::new(&db.get_bats()?);
    Ok(normalize_tags(comment, &vocabulary))
}
