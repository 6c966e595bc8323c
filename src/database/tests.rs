// Store-level tests for sessions, recordings, species, calls and images
// Run with: cargo test --package bat-survey --lib database::tests

#[cfg(test)]
mod lifecycle_tests {
    use crate::database::lifecycle::StoreState;
    use crate::database::migrations::{build_at_version, read_version, CURRENT_VERSION};
    use crate::database::schema::{validate_store, StoreStatus};
    use crate::database::{Database, NO_BATS};
    use rusqlite::Connection;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.db");

        let db = Database::create(&path).unwrap();
        assert_eq!(db.state(), StoreState::Open);
        assert!(db.find_bat_id_by_name(NO_BATS).unwrap().is_some());
        db.close().unwrap();

        assert_eq!(validate_store(&path), StoreStatus::Ok);
        let db = Database::open(&path).unwrap();
        assert!(db.migration_report().applied.is_empty());
        // Still exactly one placeholder.
        assert_eq!(
            db.get_bats().unwrap().iter().filter(|b| b.name == NO_BATS).count(),
            1
        );
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.db");
        std::fs::write(&path, b"").unwrap();
        assert!(Database::create(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_bad() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nope.db");
        assert_eq!(validate_store(&path), StoreStatus::Bad);
        assert!(Database::open(&path).is_err());
    }

    #[test]
    fn test_not_a_store_is_bad() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("other.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE songs (id INTEGER PRIMARY KEY)").unwrap();
        drop(conn);

        assert_eq!(validate_store(&path), StoreStatus::Bad);
        assert!(Database::open(&path).is_err());
    }

    #[test]
    fn test_garbage_file_is_bad() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("garbage.db");
        std::fs::write(&path, b"this is not sqlite at all, just some text").unwrap();
        assert_eq!(validate_store(&path), StoreStatus::Bad);
    }

    #[test]
    fn test_open_upgrades_5_31_store() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("legacy.db");
        let conn = Connection::open(&path).unwrap();
        build_at_version(&conn, 5.31).unwrap();
        drop(conn);

        assert_eq!(validate_store(&path), StoreStatus::Old);

        let db = Database::open(&path).unwrap();
        let report = db.migration_report();
        assert_eq!(report.from_version, 5.31);
        assert_eq!(report.to_version, CURRENT_VERSION);
        assert_eq!(report.applied, vec![6.0, 6.1]);
        db.close().unwrap();

        let conn = Connection::open(&path).unwrap();
        assert_eq!(read_version(&conn).unwrap(), Some(6.2));
        drop(conn);
        assert_eq!(validate_store(&path), StoreStatus::Ok);
    }
}

#[cfg(test)]
mod session_tests {
    use crate::database::{Database, Session, SESSION_TAG_MAX_LEN};
    use chrono::{NaiveDate, NaiveTime};
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::create(&db_path).unwrap();
        (db, temp_dir)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // =========================================================================
    // Merge
    // =========================================================================

    #[test]
    fn test_merge_session_basic() {
        let (db, _temp) = setup_test_db();
        let mut session = Session::new("KEN-01", date(2021, 7, 14));
        session.location = Some("Kenfig dunes".to_string());
        session.start_time = NaiveTime::from_hms_opt(20, 30, 0);
        let id = db.merge_session(&session).unwrap();
        assert!(id > 0);

        let stored = db.get_session(id).unwrap().unwrap();
        assert_eq!(stored.tag, "KEN-01");
        assert_eq!(stored.location.as_deref(), Some("Kenfig dunes"));
        assert_eq!(stored.start_time, NaiveTime::from_hms_opt(20, 30, 0));
        assert_eq!(stored.end_date, None);
    }

    #[test]
    fn test_merge_session_same_tag_updates() {
        let (db, _temp) = setup_test_db();
        let first = db.merge_session(&Session::new("KEN-01", date(2021, 7, 14))).unwrap();

        let mut again = Session::new("KEN-01", date(2021, 7, 15));
        again.weather = Some("Dry, light wind".to_string());
        let second = db.merge_session(&again).unwrap();

        assert_eq!(first, second);
        let stored = db.get_session(first).unwrap().unwrap();
        assert_eq!(stored.start_date, date(2021, 7, 15));
        assert_eq!(db.list_sessions(10, 0).unwrap().1, 1);
    }

    #[test]
    fn test_merge_session_by_id_can_rename() {
        let (db, _temp) = setup_test_db();
        let id = db.merge_session(&Session::new("KEN-01", date(2021, 7, 14))).unwrap();
        let mut renamed = db.get_session(id).unwrap().unwrap();
        renamed.tag = "KEN-01a".to_string();
        assert_eq!(db.merge_session(&renamed).unwrap(), id);
        assert!(db.get_session_by_tag("KEN-01").unwrap().is_none());
    }

    #[test]
    fn test_merge_session_empty_tag_rejected() {
        let (db, _temp) = setup_test_db();
        assert!(db.merge_session(&Session::new("   ", date(2021, 7, 14))).is_err());
    }

    #[test]
    fn test_merge_session_long_tag_truncated() {
        let (db, _temp) = setup_test_db();
        let long_tag = "T".repeat(500);
        let id = db.merge_session(&Session::new(&long_tag, date(2021, 7, 14))).unwrap();
        let stored = db.get_session(id).unwrap().unwrap();
        assert_eq!(stored.tag.chars().count(), SESSION_TAG_MAX_LEN);
    }

    #[test]
    fn test_merge_session_special_characters() {
        let (db, _temp) = setup_test_db();
        let tags = vec![
            "O'Brien's field",
            "Drop; DROP TABLE sessions;--",
            "Señor 日本語",
        ];
        for tag in tags {
            let id = db.merge_session(&Session::new(tag, date(2021, 7, 14))).unwrap();
            assert_eq!(db.get_session(id).unwrap().unwrap().tag, tag);
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[test]
    fn test_list_sessions_paged_newest_first() {
        let (db, _temp) = setup_test_db();
        for day in 1..=5 {
            db.merge_session(&Session::new(&format!("S{}", day), date(2021, 7, day)))
                .unwrap();
        }

        let (page, total) = db.list_sessions(2, 0).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].tag, "S5");
        assert_eq!(page[1].tag, "S4");

        let (page, _) = db.list_sessions(2, 4).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].tag, "S1");
    }

    #[test]
    fn test_sessions_in_date_range_uses_end_date() {
        let (db, _temp) = setup_test_db();
        let mut overnight = Session::new("NIGHT", date(2021, 7, 14));
        overnight.end_date = Some(date(2021, 7, 15));
        db.merge_session(&overnight).unwrap();
        db.merge_session(&Session::new("LATER", date(2021, 8, 1))).unwrap();

        let found = db.sessions_in_date_range(date(2021, 7, 15), date(2021, 7, 20)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tag, "NIGHT");
    }
}

#[cfg(test)]
mod recording_tests {
    use crate::database::{Database, Recording, Session};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn setup_db_with_session() -> (Database, TempDir, i64) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::create(&db_path).unwrap();
        let session = db
            .merge_session(&Session::new("KEN-01", NaiveDate::from_ymd_opt(2021, 7, 14).unwrap()))
            .unwrap();
        (db, temp_dir, session)
    }

    #[test]
    fn test_merge_recording_basic() {
        let (db, _temp, session) = setup_db_with_session();
        let id = db.merge_recording(&Recording::new(session, "PIP_001.wav")).unwrap();
        let stored = db.get_recording(id).unwrap().unwrap();
        assert_eq!(stored.name, "PIP_001.wav");
        assert_eq!(stored.session_id, session);

        let (page, _) = db.list_sessions(10, 0).unwrap();
        assert_eq!(page[0].recording_count, 1);
    }

    #[test]
    fn test_merge_recording_upper_case_extension() {
        let (db, _temp, session) = setup_db_with_session();
        assert!(db.merge_recording(&Recording::new(session, "PIP_001.WAV")).is_ok());
    }

    #[test]
    fn test_merge_recording_same_name_updates() {
        let (db, _temp, session) = setup_db_with_session();
        let first = db.merge_recording(&Recording::new(session, "a.wav")).unwrap();
        let mut again = Recording::new(session, "a.wav");
        again.notes = Some("second visit".to_string());
        assert_eq!(db.merge_recording(&again).unwrap(), first);
        assert_eq!(db.recordings_for_session(session).unwrap().len(), 1);
    }

    #[test]
    fn test_merge_recording_rejects_non_media() {
        let (db, _temp, session) = setup_db_with_session();
        assert!(db.merge_recording(&Recording::new(session, "notes.txt")).is_err());
        assert!(db.merge_recording(&Recording::new(session, "")).is_err());
        assert!(db.recordings_for_session(session).unwrap().is_empty());
    }

    #[test]
    fn test_merge_recording_unknown_session() {
        let (db, _temp, _) = setup_db_with_session();
        assert!(db.merge_recording(&Recording::new(999, "a.wav")).is_err());
    }

    #[test]
    fn test_segments_in_id_order() {
        let (db, _temp, session) = setup_db_with_session();
        let rec = db.merge_recording(&Recording::new(session, "a.wav")).unwrap();
        let late = db.insert_segment(rec, 5000, 6000, "late").unwrap();
        let early = db.insert_segment(rec, 0, 1000, "early").unwrap();

        let ids: Vec<i64> = db.segments_for_recording(rec).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![late, early]);

        db.update_segment_fields(early, 100, 900, "edited").unwrap();
        let seg = db.get_segment(early).unwrap().unwrap();
        assert_eq!((seg.start_ms, seg.end_ms, seg.comment.as_str()), (100, 900, "edited"));
    }
}

#[cfg(test)]
mod bat_tests {
    use crate::database::links;
    use crate::database::{Bat, BinaryImage, Call, Database, NO_BATS};
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::create(&db_path).unwrap();
        (db, temp_dir)
    }

    // =========================================================================
    // Species
    // =========================================================================

    #[test]
    fn test_merge_bat_with_tags() {
        let (db, _temp) = setup_test_db();
        let pip =
            Bat::new("Pipistrelle", "Pipistrellus", "pipistrellus").with_tags(&["MOL", "Ppip"]);
        let id = db.merge_bat(&pip).unwrap();
        let bat = db.get_bat(id).unwrap().unwrap();
        assert_eq!(bat.tags, vec!["MOL", "Ppip"]);
        assert!(bat.sort_index > 0);
    }

    #[test]
    fn test_merge_bat_matches_on_binomial() {
        let (db, _temp) = setup_test_db();
        let first = db
            .merge_bat(&Bat::new("Pipistrelle", "Pipistrellus", "pipistrellus"))
            .unwrap();
        let second = db
            .merge_bat(&Bat::new("Common Pipistrelle", "pipistrellus", "PIPISTRELLUS"))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(db.get_bat(first).unwrap().unwrap().name, "Common Pipistrelle");
    }

    #[test]
    fn test_merge_bat_diffs_tags() {
        let (db, _temp) = setup_test_db();
        let id = db
            .merge_bat(&Bat::new("Noctule", "Nyctalus", "noctula").with_tags(&["Nnoc", "NN"]))
            .unwrap();
        let retagged =
            Bat::new("Noctule", "Nyctalus", "noctula").with_tags(&["NN", "Noc", "NN", " "]);
        db.merge_bat(&retagged).unwrap();
        assert_eq!(db.get_bat(id).unwrap().unwrap().tags, vec!["NN", "Noc"]);
    }

    #[test]
    fn test_merge_bat_requires_name() {
        let (db, _temp) = setup_test_db();
        assert!(db.merge_bat(&Bat::new("  ", "Nyctalus", "noctula")).is_err());
    }

    #[test]
    fn test_bats_in_sort_order() {
        let (db, _temp) = setup_test_db();
        let mut late = Bat::new("Serotine", "Eptesicus", "serotinus");
        late.sort_index = 100;
        db.merge_bat(&late).unwrap();
        let mut early = Bat::new("Noctule", "Nyctalus", "noctula");
        early.sort_index = 50;
        db.merge_bat(&early).unwrap();

        let names: Vec<String> = db.get_bats().unwrap().into_iter().map(|b| b.name).collect();
        let noctule = names.iter().position(|n| n == "Noctule").unwrap();
        let serotine = names.iter().position(|n| n == "Serotine").unwrap();
        assert!(noctule < serotine);
        assert!(names.contains(&NO_BATS.to_string()));
    }

    #[test]
    fn test_placeholder_not_duplicated() {
        let (db, _temp) = setup_test_db();
        let a = db.ensure_placeholder_bat().unwrap();
        let b = db.ensure_placeholder_bat().unwrap();
        assert_eq!(a, b);
    }

    // =========================================================================
    // Calls and images
    // =========================================================================

    #[test]
    fn test_call_round_trip_and_update() {
        let (db, _temp) = setup_test_db();
        let mut call = Call::new();
        call.peak_frequency = Some(46.5);
        call.peak_frequency_variation = Some(1.5);
        call.call_type = Some("FM-QCF".to_string());
        let id = db.insert_call(&call).unwrap();

        let stored = db.get_call(id).unwrap().unwrap();
        assert!(stored.same_parameters(&call));

        call.call_function = Some("social".to_string());
        db.update_call(id, &call).unwrap();
        assert_eq!(
            db.get_call(id).unwrap().unwrap().call_function.as_deref(),
            Some("social")
        );
    }

    #[test]
    fn test_image_kept_while_owned() {
        let (db, _temp) = setup_test_db();
        let bat = db.merge_bat(&Bat::new("Noctule", "Nyctalus", "noctula")).unwrap();
        let image = db.insert_image(&BinaryImage::new(vec![0x89, 0x50], "wing")).unwrap();
        db.insert_link(links::BAT_IMAGE, bat, image).unwrap();

        assert_eq!(db.image_owner_count(image).unwrap(), 1);
        assert!(!db.delete_image_if_orphaned(image).unwrap());

        db.remove_links_for_owner(links::BAT_IMAGE, bat).unwrap();
        assert!(db.delete_image_if_orphaned(image).unwrap());
        assert!(db.get_image(image).unwrap().is_none());
    }

    #[test]
    fn test_image_description_update() {
        let (db, _temp) = setup_test_db();
        let image = db.insert_image(&BinaryImage::new(vec![1], "old")).unwrap();
        db.update_image_description(image, "new").unwrap();
        let stored = db.get_image(image).unwrap().unwrap();
        assert_eq!(stored.description, "new");
        assert_eq!(stored.image_type, "PNG");
    }

    #[test]
    fn test_linked_members_deduplicated_in_insert_order() {
        let (db, _temp) = setup_test_db();
        let a = db.merge_bat(&Bat::new("Noctule", "Nyctalus", "noctula")).unwrap();
        let b = db.merge_bat(&Bat::new("Serotine", "Eptesicus", "serotinus")).unwrap();
        let image = db.insert_image(&BinaryImage::new(vec![1], "x")).unwrap();
        db.insert_link(links::BAT_IMAGE, b, image).unwrap();
        db.insert_link(links::BAT_IMAGE, a, image).unwrap();
        db.insert_link(links::BAT_IMAGE, b, image).unwrap();

        assert_eq!(db.link_owners(links::BAT_IMAGE, image).unwrap(), {
            let mut owners = vec![a, b];
            owners.sort();
            owners
        });
        assert_eq!(db.remove_link(links::BAT_IMAGE, b, image).unwrap(), 2);
    }
}

#[cfg(test)]
mod stats_tests {
    use crate::database::links;
    use crate::database::{Bat, Database, Recording, Session};
    use crate::reconcile::cascade::repair_derived_links;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn test_bat_stats_counts_distinct_containers() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::create(&temp_dir.path().join("test.db")).unwrap();
        let session = db
            .merge_session(&Session::new("KEN-01", NaiveDate::from_ymd_opt(2021, 7, 14).unwrap()))
            .unwrap();
        let rec = db.merge_recording(&Recording::new(session, "a.wav")).unwrap();
        let bat = db.merge_bat(&Bat::new("Noctule", "Nyctalus", "noctula")).unwrap();
        for start in [0, 2000] {
            let seg = db.insert_segment(rec, start, start + 500, "Noctule").unwrap();
            db.insert_link(links::BAT_SEGMENT, seg, bat).unwrap();
        }
        repair_derived_links(&db).unwrap();

        let stats = db.get_bat_stats().unwrap();
        let noctule = stats.iter().find(|s| s.bat_id == bat).unwrap();
        assert_eq!((noctule.sessions, noctule.recordings, noctule.segments), (1, 1, 2));
    }
}
