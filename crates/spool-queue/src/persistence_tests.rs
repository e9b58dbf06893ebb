
    use super::*;
    use crate::task::{NewTask, PriorityBounds, Task, TaskType};
    use tempfile::TempDir;

    fn engine(dir: &TempDir, retention: usize) -> PersistenceEngine {
        PersistenceEngine::new(dir.path(), retention)
    }

    fn document_with(ids: &[&str]) -> QueueDocument {
        let mut doc = QueueDocument::empty();
        for id in ids {
            let task = Task::from_new(
                id.to_string(),
                NewTask::new(TaskType::Custom, format!("payload {}", id)).with_external_ref("org/repo#1"),
                &PriorityBounds::default(),
                3,
            )
            .unwrap();
            doc.tasks.push(task);
        }
        doc
    }

    fn temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.contains(".tmp-"))
            .collect()
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let doc = engine(&dir, 10).load().unwrap();
        assert!(doc.tasks.is_empty());
        assert!(!dir.path().join(QUEUE_FILE).exists());
    }

    #[test]
    fn test_save_then_load_is_field_exact() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);
        let doc = document_with(&["a", "b"]);

        engine.save(&doc).unwrap();
        assert_eq!(engine.load().unwrap(), doc);
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_save_creates_data_dir() {
        let dir = TempDir::new().unwrap();
        let nested = PersistenceEngine::new(dir.path().join("x/y"), 10);
        nested.save(&QueueDocument::empty()).unwrap();
        assert!(dir.path().join("x/y").join(QUEUE_FILE).exists());
    }

    #[test]
    fn test_load_garbage_is_corruption() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(QUEUE_FILE), "{ not json").unwrap();

        let err = engine(&dir, 10).load().unwrap_err();
        assert!(matches!(err, QueueError::JsonCorruption { .. }));
    }

    #[test]
    fn test_load_invalid_task_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut doc = document_with(&["a"]);
        doc.tasks[0].id = "../escape".to_string();
        fs::write(
            dir.path().join(QUEUE_FILE),
            serde_json::to_vec(&doc).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            engine(&dir, 10).load(),
            Err(QueueError::JsonCorruption { .. })
        ));
    }

    #[test]
    fn test_load_keeps_priorities_outside_current_bounds() {
        let dir = TempDir::new().unwrap();
        let mut doc = document_with(&["a"]);
        doc.tasks[0].priority = 42;
        fs::write(
            dir.path().join(QUEUE_FILE),
            serde_json::to_vec(&doc).unwrap(),
        )
        .unwrap();

        let loaded = engine(&dir, 10).load().unwrap();
        assert_eq!(loaded.tasks[0].priority, 42);
    }

    fn age_file(path: &Path, by: Duration) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_save_sweeps_abandoned_temp_files() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);
        fs::create_dir_all(engine.backups_dir()).unwrap();

        let old_live = dir.path().join(".queue.json.tmp-1-dead");
        let old_backup = engine.backups_dir().join(".x.json.tmp-1-dead");
        let fresh = dir.path().join(".queue.json.tmp-2-busy");
        for path in [&old_live, &old_backup, &fresh] {
            fs::write(path, "partial").unwrap();
        }
        age_file(&old_live, Duration::from_secs(3600));
        age_file(&old_backup, Duration::from_secs(3600));

        engine.save(&document_with(&["a"])).unwrap();

        assert!(!old_live.exists());
        assert!(!old_backup.exists());
        assert!(fresh.exists());
        assert_eq!(engine.load().unwrap().tasks.len(), 1);
    }

    #[test]
    fn test_sweep_ignores_regular_files() {
        let dir = TempDir::new().unwrap();
        let keep = dir.path().join("notes.tmp-1");
        fs::write(&keep, "x").unwrap();
        age_file(&keep, Duration::from_secs(3600));

        assert_eq!(sweep_stale_temp_files(dir.path(), Duration::ZERO), 0);
        assert!(keep.exists());
        assert_eq!(sweep_stale_temp_files(&dir.path().join("missing"), Duration::ZERO), 0);
    }

    #[test]
    fn test_interrupted_write_leaves_prior_document() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);
        let doc = document_with(&["a"]);
        engine.save(&doc).unwrap();

        // A writer that died between temp write and rename.
        fs::write(dir.path().join(".queue.json.tmp-1-deadbeef"), "{\"version\":").unwrap();

        assert_eq!(engine.load().unwrap(), doc);
    }

    #[test]
    fn test_failed_rename_keeps_prior_and_cleans_temp() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);

        // A non-empty directory at the target path makes the rename fail.
        let target = dir.path().join(QUEUE_FILE);
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), "x").unwrap();

        let err = engine.save(&document_with(&["a"])).unwrap_err();
        assert!(matches!(err, QueueError::Persistence { .. }));
        assert!(target.join("keep").exists());
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_backup_and_list() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);

        let info = engine.backup(&document_with(&["a", "b"]), "manual").unwrap();
        assert_eq!(info.reason, "manual");
        assert_eq!(info.task_count, Some(2));
        assert!(info.path.exists());
        assert!(validate_backup_id(&info.id).is_ok());

        let listed = engine.list_backups().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, info.id);
        assert_eq!(listed[0].reason, "manual");
        assert!(listed[0].is_valid());
        assert_eq!(
            listed[0].created_at.timestamp_millis(),
            info.created_at.timestamp_millis()
        );
    }

    #[test]
    fn test_backup_reason_is_sanitized() {
        let dir = TempDir::new().unwrap();
        let info = engine(&dir, 10)
            .backup(&QueueDocument::empty(), "Before Upgrade/v2")
            .unwrap();
        assert_eq!(info.reason, "before_upgrade_v2");
        assert!(validate_backup_id(&info.id).is_ok());
    }

    #[test]
    fn test_backups_pruned_oldest_first() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 2);

        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(engine.backup(&document_with(&["a"]), &format!("b{}", i)).unwrap().id);
            std::thread::sleep(Duration::from_millis(3));
        }

        let listed: Vec<String> = engine.list_backups().unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(listed, vec![ids[3].clone(), ids[2].clone()]);
    }

    #[test]
    fn test_invalid_backup_listed_not_deleted() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);
        let info = engine.backup(&document_with(&["a"]), "manual").unwrap();
        fs::write(&info.path, "garbage").unwrap();

        let listed = engine.list_backups().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_valid());
        assert!(info.path.exists());
    }

    #[test]
    fn test_latest_valid_backup_skips_broken() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);
        let good = engine.backup(&document_with(&["a"]), "good").unwrap();
        std::thread::sleep(Duration::from_millis(3));
        let bad = engine.backup(&document_with(&["b"]), "bad").unwrap();
        fs::write(&bad.path, "{").unwrap();

        let (info, doc) = engine.latest_valid_backup().unwrap().unwrap();
        assert_eq!(info.id, good.id);
        assert_eq!(doc.tasks[0].id, "a");
    }

    #[test]
    fn test_latest_valid_backup_none() {
        let dir = TempDir::new().unwrap();
        assert!(engine(&dir, 10).latest_valid_backup().unwrap().is_none());
    }

    #[test]
    fn test_restore_takes_pre_restore_backup() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);
        let saved = engine.backup(&document_with(&["old"]), "manual").unwrap();
        engine.save(&document_with(&["new"])).unwrap();

        let restored = engine.restore(&saved.id).unwrap();
        assert_eq!(restored.tasks[0].id, "old");
        assert_eq!(engine.load().unwrap().tasks[0].id, "old");

        let backups = engine.list_backups().unwrap();
        assert_eq!(backups.len(), 2);
        let pre = backups.iter().find(|b| b.reason == "pre-restore").unwrap();
        assert_eq!(pre.task_count, Some(1));
        assert_eq!(engine.load_backup(&pre.id).unwrap().tasks[0].id, "new");
    }

    #[test]
    fn test_restore_over_corrupt_live_document() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);
        let saved = engine.backup(&document_with(&["a"]), "manual").unwrap();
        fs::write(engine.queue_path(), "not json").unwrap();

        engine.restore(&saved.id).unwrap();
        assert_eq!(engine.load().unwrap().tasks.len(), 1);

        let quarantined: Vec<_> = fs::read_dir(engine.backups_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".json.corrupt"))
            .collect();
        assert_eq!(quarantined.len(), 1);
    }

    #[test]
    fn test_restore_rejects_bad_ids() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);

        for id in ["../queue", "", "20260101T000000000Z-x", "nope"] {
            assert!(matches!(
                engine.restore(id),
                Err(QueueError::InvalidBackup { .. })
            ));
        }
        assert!(matches!(
            engine.restore("20260101T000000000Z-manual-0123abcd"),
            Err(QueueError::InvalidBackup { .. })
        ));
    }

    #[test]
    fn test_quarantine_corrupt() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, 10);
        assert!(engine.quarantine_corrupt().unwrap().is_none());

        fs::write(engine.queue_path(), "broken bytes").unwrap();
        let path = engine.quarantine_corrupt().unwrap().unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "broken bytes");
        assert!(engine.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_parse_backup_id() {
        let (at, reason) = parse_backup_id("20260315T081502123Z-pre-restore-0a1b2c3d").unwrap();
        assert_eq!(reason, "pre-restore");
        assert_eq!(at.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(), "2026-03-15T08:15:02.123");

        assert!(parse_backup_id("20260315T081502123Z--0a1b2c3d").is_none());
        assert!(parse_backup_id("20260315T081502123Z-x-zzzzzzzz").is_none());
        assert!(parse_backup_id("2026-x-0a1b2c3d").is_none());
    }
