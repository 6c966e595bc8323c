use crate::database::links::{self, IMAGE_OWNERS};
use crate::database::{BinaryImage, Call, Database};
use crate::error::AppError;
use crate::reconcile::{self, LinkDiff, BAT_IMAGES, CALL_IMAGES};

pub fn get_call(db: &Database, id: i64) -> Result<Call, AppError> {
    db.get_call(id)?
        .ok_or_else(|| AppError::NotFound(format!("call {}", id)))
}

/// Detach a call from every segment and delete it
pub fn delete_call(db: &Database, id: i64) -> Result<(), AppError> {
    log::info!("Deleting call {}", id);
    get_call(db, id)?;
    db.remove_links_for_member(links::SEGMENT_CALL, id)?;
    reconcile::delete_call_if_orphaned(db, id)?;
    Ok(())
}

pub fn get_image(db: &Database, id: i64) -> Result<BinaryImage, AppError> {
    db.get_image(id)?
        .ok_or_else(|| AppError::NotFound(format!("image {}", id)))
}

/// Replace the reference images attached to a species
pub fn set_bat_images(
    db: &Database,
    bat_id: i64,
    images: &[BinaryImage],
) -> Result<LinkDiff, AppError> {
    if db.get_bat(bat_id)?.is_none() {
        return Err(AppError::NotFound(format!("species {}", bat_id)));
    }
    reconcile::reconcile_links(db, &BAT_IMAGES, bat_id, images).map_err(AppError::from)
}

/// Replace the images attached to a call
pub fn set_call_images(
    db: &Database,
    call_id: i64,
    images: &[BinaryImage],
) -> Result<LinkDiff, AppError> {
    get_call(db, call_id)?;
    reconcile::reconcile_links(db, &CALL_IMAGES, call_id, images).map_err(AppError::from)
}

/// Detach an image from every owner and delete it
pub fn delete_image(db: &Database, id: i64) -> Result<(), AppError> {
    log::info!("Deleting image {}", id);
    get_image(db, id)?;
    for link in IMAGE_OWNERS {
        db.remove_links_for_member(link, id)?;
    }
    db.delete_image_if_orphaned(id)?;
    Ok(())
}
