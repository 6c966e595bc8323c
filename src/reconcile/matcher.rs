//! Maps an edited segment onto the persisted segment it most likely came from.

use anyhow::Result;

use crate::database::{Database, Segment, SegmentEdit};

/// Overlap in ms between `[a_start, a_end]` and `[b_start, b_end]`, or `None`
/// when neither interval touches the other.
///
/// Two intervals overlap when the first starts inside the second, ends inside
/// it, lies wholly within it, or wholly contains it.
pub fn overlap_ms(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> Option<i64> {
    let starts_inside = a_start >= b_start && a_start <= b_end;
    let ends_inside = a_end >= b_start && a_end <= b_end;
    let within = a_start >= b_start && a_end <= b_end;
    let contains = a_start <= b_start && a_end >= b_end;
    if starts_inside || ends_inside || within || contains {
        Some(a_end.min(b_end) - a_start.max(b_start))
    } else {
        None
    }
}

/// The candidate with the greatest overlap. On a tie the earliest candidate
/// in `candidates` wins.
///
/// The zero segment only competes with a zero edit, and a zero edit only
/// with the zero segment.
pub fn best_overlap<'a>(edit: &SegmentEdit, candidates: &'a [Segment]) -> Option<&'a Segment> {
    let mut best: Option<(&Segment, i64)> = None;
    for candidate in candidates {
        if candidate.is_zero() != edit.is_zero() {
            continue;
        }
        let Some(overlap) =
            overlap_ms(edit.start_ms, edit.end_ms, candidate.start_ms, candidate.end_ms)
        else {
            continue;
        };
        if best.map_or(true, |(_, current)| overlap > current) {
            best = Some((candidate, overlap));
        }
    }
    best.map(|(segment, _)| segment)
}

/// Whether an overlapping candidate really is the edited segment: same text,
/// or same start and end.
///
/// When both the text and the timing changed this says no, and the edit
/// becomes a new segment. That also happens to a segment the user genuinely
/// moved and re-worded; there is no way to tell the two apart here.
pub fn accepts_candidate(edit: &SegmentEdit, candidate: &Segment) -> bool {
    edit.comment == candidate.comment
        || (edit.start_ms == candidate.start_ms && edit.end_ms == candidate.end_ms)
}

/// Id of the persisted segment of `recording_id` that `edit` corresponds
/// to, if any.
///
/// Segments in `claimed` were already matched by another edit of the same
/// batch and are never returned. The zero segment stays matchable so a
/// recording keeps a single one.
pub fn match_segment(
    db: &Database,
    edit: &SegmentEdit,
    recording_id: i64,
    claimed: &[i64],
) -> Result<Option<i64>> {
    let segments: Vec<Segment> = db
        .segments_for_recording(recording_id)?
        .into_iter()
        .filter(|s| s.is_zero() || !claimed.contains(&s.id))
        .collect();

    if let Some(id) = edit.id {
        if segments.iter().any(|s| s.id == id) {
            return Ok(Some(id));
        }
        log::debug!(
            "Segment {} is not an unclaimed segment of recording {}, matching by overlap",
            id,
            recording_id
        );
    }

    Ok(best_overlap(edit, &segments)
        .filter(|candidate| accepts_candidate(edit, candidate))
        .map(|candidate| candidate.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Recording, Session};
    use crate::reconcile::test_support::setup_test_db;
    use chrono::NaiveDate;

    fn seg(id: i64, start_ms: i64, end_ms: i64, comment: &str) -> Segment {
        Segment {
            id,
            recording_id: 1,
            start_ms,
            end_ms,
            comment: comment.to_string(),
        }
    }

    fn recording(db: &Database) -> i64 {
        let session = Session::new("KEN-01", NaiveDate::from_ymd_opt(2021, 7, 14).unwrap());
        let session_id = db.merge_session(&session).unwrap();
        db.merge_recording(&Recording::new(session_id, "pass.wav")).unwrap()
    }

    #[test]
    fn test_overlap_conditions() {
        // starts inside
        assert_eq!(overlap_ms(1500, 3000, 1000, 2000), Some(500));
        // ends inside
        assert_eq!(overlap_ms(500, 1200, 1000, 2000), Some(200));
        // within
        assert_eq!(overlap_ms(1200, 1800, 1000, 2000), Some(600));
        // contains
        assert_eq!(overlap_ms(0, 5000, 1000, 2000), Some(1000));
        assert_eq!(overlap_ms(2500, 3000, 1000, 2000), None);
    }

    #[test]
    fn test_largest_overlap_wins() {
        let candidates = vec![seg(1, 0, 1000, "a"), seg(2, 900, 3000, "b")];
        let edit = SegmentEdit::new(800, 2000, "b");
        assert_eq!(best_overlap(&edit, &candidates).map(|s| s.id), Some(2));
    }

    #[test]
    fn test_equal_overlap_goes_to_first_candidate() {
        // Both candidates overlap the edit by exactly 500 ms.
        let candidates = vec![seg(3, 500, 1500, "x"), seg(4, 1500, 2500, "x")];
        let edit = SegmentEdit::new(1000, 2000, "x");
        assert_eq!(best_overlap(&edit, &candidates).map(|s| s.id), Some(3));

        let reversed = vec![seg(4, 1500, 2500, "x"), seg(3, 500, 1500, "x")];
        assert_eq!(best_overlap(&edit, &reversed).map(|s| s.id), Some(4));
    }

    #[test]
    fn test_zero_segment_only_matches_zero_edit() {
        let candidates = vec![seg(1, 0, 0, ""), seg(2, 0, 400, "")];
        let timed = SegmentEdit::new(0, 300, "");
        assert_eq!(best_overlap(&timed, &candidates).map(|s| s.id), Some(2));

        let zero = SegmentEdit::new(0, 0, "");
        assert_eq!(best_overlap(&zero, &candidates).map(|s| s.id), Some(1));
    }

    #[test]
    fn test_accepts_same_text_or_same_timing() {
        let existing = seg(1, 1000, 2000, "Noctule");
        assert!(accepts_candidate(&SegmentEdit::new(1100, 2100, "Noctule"), &existing));
        assert!(accepts_candidate(&SegmentEdit::new(1000, 2000, "Pip"), &existing));
    }

    #[test]
    fn test_both_changed_is_not_a_match() {
        // Known limitation: a segment both moved and re-worded reads as new.
        let existing = seg(1, 1000, 2000, "Noctule");
        let edit = SegmentEdit::new(1100, 2100, "Noctule feeding buzz");
        assert!(!accepts_candidate(&edit, &existing));
        assert!(best_overlap(&edit, std::slice::from_ref(&existing)).is_some());
    }

    #[test]
    fn test_match_by_id_ignores_overlap() {
        let (db, _temp) = setup_test_db();
        let rec = recording(&db);
        let first = db.insert_segment(rec, 0, 1000, "first").unwrap();
        let seventh = db.insert_segment(rec, 5000, 6000, "other").unwrap();

        let mut edit = SegmentEdit::new(0, 1000, "first");
        edit.id = Some(seventh);
        assert_eq!(match_segment(&db, &edit, rec, &[]).unwrap(), Some(seventh));

        edit.id = None;
        assert_eq!(match_segment(&db, &edit, rec, &[]).unwrap(), Some(first));
    }

    #[test]
    fn test_id_from_other_recording_falls_back_to_overlap() {
        let (db, _temp) = setup_test_db();
        let rec = recording(&db);
        let own = db.insert_segment(rec, 0, 1000, "pass").unwrap();
        let session_id = db.get_recording(rec).unwrap().unwrap().session_id;
        let other = db.merge_recording(&Recording::new(session_id, "other.wav")).unwrap();
        let foreign = db.insert_segment(other, 0, 1000, "pass").unwrap();

        let mut edit = SegmentEdit::new(0, 1000, "pass");
        edit.id = Some(foreign);
        assert_eq!(match_segment(&db, &edit, rec, &[]).unwrap(), Some(own));
    }

    #[test]
    fn test_claimed_segment_is_skipped() {
        let (db, _temp) = setup_test_db();
        let rec = recording(&db);
        let wide = db.insert_segment(rec, 1000, 3000, "pass").unwrap();

        let edit = SegmentEdit::new(2000, 3000, "pass");
        assert_eq!(match_segment(&db, &edit, rec, &[]).unwrap(), Some(wide));
        assert_eq!(match_segment(&db, &edit, rec, &[wide]).unwrap(), None);

        let mut by_id = SegmentEdit::new(2000, 3000, "pass");
        by_id.id = Some(wide);
        assert_eq!(match_segment(&db, &by_id, rec, &[wide]).unwrap(), None);

        let zero = db.insert_segment(rec, 0, 0, "").unwrap();
        let zero_edit = SegmentEdit::new(0, 0, "");
        assert_eq!(match_segment(&db, &zero_edit, rec, &[zero]).unwrap(), Some(zero));
    }

    #[test]
    fn test_no_candidates() {
        let (db, _temp) = setup_test_db();
        let rec = recording(&db);
        let edit = SegmentEdit::new(0, 1000, "pass");
        assert_eq!(match_segment(&db, &edit, rec, &[]).unwrap(), None);
    }
}
