//! Reconciliation of edited data against the store.
//!
//! [`reconcile_links`] is the one diff/apply routine every link relation goes
//! through. The matcher, pipeline and cascade modules build on it.

pub mod cascade;
pub mod matcher;
pub mod pipeline;

use anyhow::Result;
use serde::Serialize;

use crate::database::links::{self, LinkTable};
use crate::database::{is_unassigned, Bat, BinaryImage, Call, Database};

/// Links changed by one reconcile, as member ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkDiff {
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
}

impl LinkDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// One owner-to-member relation that [`reconcile_links`] can diff.
pub trait LinkRelation {
    type Member;

    fn link(&self) -> LinkTable;

    fn member_id(&self, member: &Self::Member) -> i64;

    fn member_exists(&self, db: &Database, id: i64) -> Result<bool>;

    /// Store a member that has no identity yet and return its new id.
    fn insert_member(&self, db: &Database, member: &Self::Member) -> Result<i64>;

    /// Called after the last link from the owner to `member_id` was removed.
    fn after_unlink(&self, _db: &Database, _member_id: i64) -> Result<()> {
        Ok(())
    }
}

/// Species identified in a segment.
pub struct BatSegments;

impl LinkRelation for BatSegments {
    type Member = Bat;

    fn link(&self) -> LinkTable {
        links::BAT_SEGMENT
    }

    fn member_id(&self, bat: &Bat) -> i64 {
        bat.id
    }

    fn member_exists(&self, db: &Database, id: i64) -> Result<bool> {
        Ok(db.get_bat(id)?.is_some())
    }

    fn insert_member(&self, db: &Database, bat: &Bat) -> Result<i64> {
        db.merge_bat(bat)
    }
}

/// The call recorded for a segment. Callers keep the target to one call.
pub struct SegmentCalls;

impl LinkRelation for SegmentCalls {
    type Member = Call;

    fn link(&self) -> LinkTable {
        links::SEGMENT_CALL
    }

    fn member_id(&self, call: &Call) -> i64 {
        call.id
    }

    fn member_exists(&self, db: &Database, id: i64) -> Result<bool> {
        Ok(db.get_call(id)?.is_some())
    }

    fn insert_member(&self, db: &Database, call: &Call) -> Result<i64> {
        db.insert_call(call)
    }

    fn after_unlink(&self, db: &Database, call_id: i64) -> Result<()> {
        delete_call_if_orphaned(db, call_id)?;
        Ok(())
    }
}

/// Images owned through one of the three image link tables.
pub struct OwnedImages(pub LinkTable);

pub const SEGMENT_IMAGES: OwnedImages = OwnedImages(links::SEGMENT_IMAGE);
pub const BAT_IMAGES: OwnedImages = OwnedImages(links::BAT_IMAGE);
pub const CALL_IMAGES: OwnedImages = OwnedImages(links::CALL_IMAGE);

impl LinkRelation for OwnedImages {
    type Member = BinaryImage;

    fn link(&self) -> LinkTable {
        self.0
    }

    fn member_id(&self, image: &BinaryImage) -> i64 {
        image.id
    }

    fn member_exists(&self, db: &Database, id: i64) -> Result<bool> {
        Ok(db.get_image(id)?.is_some())
    }

    fn insert_member(&self, db: &Database, image: &BinaryImage) -> Result<i64> {
        db.insert_image(image)
    }

    fn after_unlink(&self, db: &Database, image_id: i64) -> Result<()> {
        if db.delete_image_if_orphaned(image_id)? {
            log::debug!("Deleted orphaned image {}", image_id);
        }
        Ok(())
    }
}

/// Make the members linked to `owner` equal `target`.
///
/// Links to members not in `target` are removed. Members without an identity
/// are stored first and then linked; existing members only get the link.
/// Ids in `target` that name nothing in the store are skipped.
pub fn reconcile_links<R: LinkRelation>(
    db: &Database,
    relation: &R,
    owner: i64,
    target: &[R::Member],
) -> Result<LinkDiff> {
    let link = relation.link();
    let current = db.linked_members(link, owner)?;
    let wanted: Vec<i64> = target
        .iter()
        .map(|m| relation.member_id(m))
        .filter(|id| !is_unassigned(*id))
        .collect();

    let mut diff = LinkDiff::default();

    for &member in current.iter().filter(|id| !wanted.contains(*id)) {
        db.remove_link(link, owner, member)?;
        relation.after_unlink(db, member)?;
        diff.removed.push(member);
    }

    for member in target {
        let id = relation.member_id(member);
        if is_unassigned(id) {
            let new_id = relation.insert_member(db, member)?;
            if db.insert_link_if_absent(link, owner, new_id)? && !diff.added.contains(&new_id) {
                diff.added.push(new_id);
            }
        } else if !current.contains(&id) && !diff.added.contains(&id) {
            if !relation.member_exists(db, id)? {
                log::warn!("{}: no member {} to link to {}, skipping", link.table, id, owner);
                continue;
            }
            db.insert_link(link, owner, id)?;
            diff.added.push(id);
        }
    }

    if !diff.is_empty() {
        log::debug!(
            "{} owner {}: +{:?} -{:?}",
            link.table,
            owner,
            diff.added,
            diff.removed
        );
    }
    Ok(diff)
}

/// Delete a call no segment refers to any more, along with its image links.
pub(crate) fn delete_call_if_orphaned(db: &Database, call_id: i64) -> Result<bool> {
    if !db.link_owners(links::SEGMENT_CALL, call_id)?.is_empty() {
        return Ok(false);
    }
    let images = db.linked_members(links::CALL_IMAGE, call_id)?;
    db.remove_links_for_owner(links::CALL_IMAGE, call_id)?;
    for image in images {
        db.delete_image_if_orphaned(image)?;
    }
    db.delete_call_row(call_id)?;
    Ok(true)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::database::Database;
    use tempfile::TempDir;

    pub fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::create(&db_path).unwrap();
        (db, temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::setup_test_db;
    use super::*;
    use crate::database::{Recording, Session};
    use chrono::NaiveDate;

    fn segment(db: &Database) -> i64 {
        let session = Session::new("KEN-01", NaiveDate::from_ymd_opt(2021, 7, 14).unwrap());
        let session_id = db.merge_session(&session).unwrap();
        let recording_id = db
            .merge_recording(&Recording::new(session_id, "pass.wav"))
            .unwrap();
        db.insert_segment(recording_id, 1000, 2000, "").unwrap()
    }

    #[test]
    fn test_new_members_are_inserted_then_linked() {
        let (db, _temp) = setup_test_db();
        let seg = segment(&db);

        let diff = reconcile_links(
            &db,
            &BatSegments,
            seg,
            &[Bat::new("Noctule", "Nyctalus", "noctula")],
        )
        .unwrap();

        assert_eq!(diff.added.len(), 1);
        assert!(diff.removed.is_empty());
        assert_eq!(db.linked_members(links::BAT_SEGMENT, seg).unwrap(), diff.added);
        assert!(db.get_bat(diff.added[0]).unwrap().is_some());
    }

    #[test]
    fn test_removes_only_what_left_the_target() {
        let (db, _temp) = setup_test_db();
        let seg = segment(&db);
        let a = db.merge_bat(&Bat::new("Noctule", "Nyctalus", "noctula")).unwrap();
        let b = db.merge_bat(&Bat::new("Serotine", "Eptesicus", "serotinus")).unwrap();
        db.insert_link(links::BAT_SEGMENT, seg, a).unwrap();
        db.insert_link(links::BAT_SEGMENT, seg, b).unwrap();

        let mut keep = Bat::new("Serotine", "Eptesicus", "serotinus");
        keep.id = b;
        let diff = reconcile_links(&db, &BatSegments, seg, &[keep]).unwrap();

        assert_eq!(diff.removed, vec![a]);
        assert!(diff.added.is_empty());
        assert_eq!(db.linked_members(links::BAT_SEGMENT, seg).unwrap(), vec![b]);
        // The species itself is untouched.
        assert!(db.get_bat(a).unwrap().is_some());
    }

    #[test]
    fn test_unchanged_target_is_a_no_op() {
        let (db, _temp) = setup_test_db();
        let seg = segment(&db);
        let id = db.merge_bat(&Bat::new("Noctule", "Nyctalus", "noctula")).unwrap();
        db.insert_link(links::BAT_SEGMENT, seg, id).unwrap();
        let bat = db.get_bat(id).unwrap().unwrap();

        let diff = reconcile_links(&db, &BatSegments, seg, &[bat]).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_unknown_member_id_is_skipped() {
        let (db, _temp) = setup_test_db();
        let seg = segment(&db);
        let mut ghost = Bat::new("Ghost", "Nullus", "nullus");
        ghost.id = 999;

        let diff = reconcile_links(&db, &BatSegments, seg, &[ghost]).unwrap();
        assert!(diff.is_empty());
        assert!(db.linked_members(links::BAT_SEGMENT, seg).unwrap().is_empty());
    }

    #[test]
    fn test_unlinked_image_is_deleted_when_orphaned() {
        let (db, _temp) = setup_test_db();
        let seg = segment(&db);
        let diff = reconcile_links(
            &db,
            &SEGMENT_IMAGES,
            seg,
            &[BinaryImage::new(vec![1, 2, 3], "sonogram")],
        )
        .unwrap();
        let image = diff.added[0];

        reconcile_links(&db, &SEGMENT_IMAGES, seg, &[]).unwrap();
        assert!(db.get_image(image).unwrap().is_none());
    }

    #[test]
    fn test_unlinked_image_survives_with_other_owner() {
        let (db, _temp) = setup_test_db();
        let seg = segment(&db);
        let bat = db.merge_bat(&Bat::new("Noctule", "Nyctalus", "noctula")).unwrap();
        let image = db.insert_image(&BinaryImage::new(vec![9], "reference")).unwrap();
        db.insert_link(links::SEGMENT_IMAGE, seg, image).unwrap();
        db.insert_link(links::BAT_IMAGE, bat, image).unwrap();

        let diff = reconcile_links(&db, &SEGMENT_IMAGES, seg, &[]).unwrap();
        assert_eq!(diff.removed, vec![image]);
        assert!(db.get_image(image).unwrap().is_some());
        assert_eq!(db.linked_members(links::BAT_IMAGE, bat).unwrap(), vec![image]);
    }

    #[test]
    fn test_unlinked_call_is_deleted() {
        let (db, _temp) = setup_test_db();
        let seg = segment(&db);
        let mut call = Call::new();
        call.start_frequency = Some(45.0);
        let diff = reconcile_links(&db, &SegmentCalls, seg, &[call]).unwrap();
        let call_id = diff.added[0];

        reconcile_links(&db, &SegmentCalls, seg, &[]).unwrap();
        assert!(db.get_call(call_id).unwrap().is_none());
    }
}
