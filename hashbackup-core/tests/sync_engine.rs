use hashbackup_core::digest::DigestAlgorithm;
use hashbackup_core::manifest::{Manifest, ManifestFile};
use hashbackup_core::notify::{Category, Event};
use hashbackup_core::pipeline::ChunkHashPipeline;
use hashbackup_core::sync::{SyncConfig, SyncEngine, SyncPlan, SyncReport};
use hashbackup_core::Error;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

struct Dirs {
    _td: tempfile::TempDir,
    src: PathBuf,
    dst: PathBuf,
}

fn dirs() -> Dirs {
    let td = tempfile::tempdir().unwrap();
    let src = td.path().join("src");
    let dst = td.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::create_dir(&dst).unwrap();
    Dirs { _td: td, src, dst }
}

fn config(d: &Dirs) -> SyncConfig {
    let mut cfg = SyncConfig::new(&d.src, &d.dst);
    cfg.workers = 3;
    cfg.chunk_size = 1024;
    cfg.queue_capacity = 4;
    cfg
}

fn run(cfg: SyncConfig) -> (SyncReport, Vec<Event>) {
    let mut events: Vec<Event> = Vec::new();
    let report = SyncEngine::new(cfg).run(&mut events).unwrap();
    (report, events)
}

fn names(events: &[Event], category: Category) -> Vec<&str> {
    events.iter().filter(|e| e.category == category).map(|e| e.name.as_str()).collect()
}

fn manifest(dir: &Path) -> Manifest {
    ManifestFile::load(dir, DigestAlgorithm::Sha1).unwrap().1
}

fn digest(path: &Path, cfg: &SyncConfig) -> String {
    let mut pool = ChunkHashPipeline::start(cfg.pipeline_config()).unwrap();
    pool.hash_file(path).unwrap()
}

fn write_random(path: &Path, len: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    fs::write(path, data).unwrap();
}

#[test]
fn new_files_are_copied_and_recorded_on_both_sides() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"alpha").unwrap();
    write_random(&d.src.join("b.bin"), 5000, 1);

    let (report, events) = run(config(&d));
    assert_eq!(names(&events, Category::New), vec!["a.txt", "b.bin"]);
    assert_eq!(names(&events, Category::Copying), vec!["a.txt", "b.bin"]);
    assert_eq!(report, SyncReport { new: 2, copied: 2, ..Default::default() });

    for n in ["a.txt", "b.bin"] {
        assert_eq!(fs::read(d.src.join(n)).unwrap(), fs::read(d.dst.join(n)).unwrap());
    }
    let src_m = manifest(&d.src);
    let dst_m = manifest(&d.dst);
    assert_eq!(src_m, dst_m);
    assert_eq!(src_m.len(), 2);
    assert_eq!(src_m.get("b.bin"), Some(&digest(&d.src.join("b.bin"), &config(&d))));
}

#[test]
fn second_run_without_changes_does_nothing() {
    let d = dirs();
    write_random(&d.src.join("a.bin"), 3000, 2);
    fs::write(d.src.join("b.txt"), b"bee").unwrap();
    run(config(&d));
    let before = fs::read(d.dst.join(".sha1")).unwrap();

    let (report, events) = run(config(&d));
    assert!(events.is_empty(), "unexpected events: {events:?}");
    assert_eq!(report, SyncReport::default());
    assert_eq!(fs::read(d.dst.join(".sha1")).unwrap(), before);
}

#[test]
fn tracked_but_never_copied_file_is_new_via_cross_classification() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"hello").unwrap();
    let h1 = digest(&d.src.join("a.txt"), &config(&d));
    fs::write(d.src.join(".sha1"), format!("{h1}   a.txt\r\n")).unwrap();

    let (report, events) = run(config(&d));
    assert_eq!(
        events,
        vec![
            Event { category: Category::New, name: "a.txt".into() },
            Event { category: Category::Copying, name: "a.txt".into() },
        ]
    );
    assert_eq!(report.copied, 1);
    assert_eq!(manifest(&d.src).get("a.txt"), Some(&h1));
    assert_eq!(manifest(&d.dst).get("a.txt"), Some(&h1));
    assert_eq!(fs::read(d.dst.join("a.txt")).unwrap(), b"hello");
}

#[test]
fn orphan_is_deleted_in_delete_mode() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"a").unwrap();
    fs::write(d.src.join("b.txt"), b"b").unwrap();
    run(config(&d));
    fs::remove_file(d.src.join("b.txt")).unwrap();

    let mut cfg = config(&d);
    cfg.delete = true;
    let (report, events) = run(cfg);
    assert_eq!(names(&events, Category::MissingFromSource), vec!["b.txt"]);
    assert_eq!(report.removed, 1);
    assert!(!d.dst.join("b.txt").exists());
    assert!(d.dst.join("a.txt").exists());
    let dst_m = manifest(&d.dst);
    assert!(!dst_m.contains("b.txt"));
    assert!(dst_m.contains("a.txt"));
}

#[test]
fn orphan_is_kept_without_delete_mode() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"a").unwrap();
    fs::write(d.src.join("b.txt"), b"b").unwrap();
    run(config(&d));
    fs::remove_file(d.src.join("b.txt")).unwrap();

    let (report, events) = run(config(&d));
    assert!(names(&events, Category::MissingFromSource).is_empty());
    assert_eq!(report.removed, 0);
    assert!(d.dst.join("b.txt").exists());
    assert!(manifest(&d.dst).contains("b.txt"));
    assert!(!manifest(&d.src).contains("b.txt"));
}

#[test]
fn untracked_destination_file_is_an_orphan() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"a").unwrap();
    fs::write(d.dst.join("stray.txt"), b"s").unwrap();

    let mut cfg = config(&d);
    cfg.delete = true;
    let (report, events) = run(cfg);
    assert_eq!(names(&events, Category::MissingFromSource), vec!["stray.txt"]);
    assert_eq!(report.removed, 1);
    assert!(!d.dst.join("stray.txt").exists());
}

#[test]
fn same_name_untracked_on_both_sides_is_copied_not_deleted() {
    let d = dirs();
    fs::write(d.src.join("x.txt"), b"new").unwrap();
    fs::write(d.dst.join("x.txt"), b"old").unwrap();

    let mut cfg = config(&d);
    cfg.delete = true;
    let (report, events) = run(cfg);
    assert!(names(&events, Category::MissingFromSource).is_empty(), "{events:?}");
    assert_eq!(names(&events, Category::Copying), vec!["x.txt"]);
    assert_eq!(report.removed, 0);
    assert_eq!(fs::read(d.dst.join("x.txt")).unwrap(), b"new");
}

#[test]
fn untracked_backup_survives_when_source_cannot_be_hashed() {
    let d = dirs();
    fs::create_dir(d.src.join("x")).unwrap();
    fs::write(d.dst.join("x"), b"backup").unwrap();

    let mut cfg = config(&d);
    cfg.delete = true;
    let (report, events) = run(cfg);
    assert!(names(&events, Category::MissingFromSource).is_empty(), "{events:?}");
    assert_eq!(names(&events, Category::Skipped), vec!["x"]);
    assert_eq!(report, SyncReport { new: 1, skipped: 1, ..Default::default() });
    assert_eq!(fs::read(d.dst.join("x")).unwrap(), b"backup");
}

#[test]
fn orphan_that_cannot_be_deleted_is_logged_and_run_continues() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"a").unwrap();
    fs::write(d.dst.join("stray.txt"), b"s").unwrap();
    fs::create_dir(d.dst.join("sub")).unwrap();

    let mut cfg = config(&d);
    cfg.delete = true;
    let (report, events) = run(cfg);
    assert_eq!(names(&events, Category::MissingFromSource), vec!["stray.txt", "sub"]);
    assert_eq!(report, SyncReport { new: 1, removed: 1, copied: 1, ..Default::default() });
    assert!(!d.dst.join("stray.txt").exists());
    assert!(d.dst.join("sub").is_dir());
    let dst_m = manifest(&d.dst);
    assert_eq!(dst_m.names().collect::<Vec<_>>(), vec!["a.txt"]);
}

#[test]
fn failed_copy_forgets_destination_entry() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"first").unwrap();
    run(config(&d));
    assert!(manifest(&d.dst).contains("a.txt"));

    fs::remove_file(d.dst.join("a.txt")).unwrap();
    fs::create_dir(d.dst.join("a.txt")).unwrap();
    fs::write(d.src.join("a.txt"), b"second").unwrap();

    let mut cfg = config(&d);
    cfg.sync = true;
    let expected = digest(&d.src.join("a.txt"), &cfg);
    let (report, events) = run(cfg);
    assert_eq!(names(&events, Category::Modified), vec!["a.txt"]);
    assert_eq!(names(&events, Category::Copying), vec!["a.txt"]);
    assert_eq!(names(&events, Category::Skipped), vec!["a.txt"]);
    assert_eq!(report, SyncReport { modified: 1, skipped: 1, ..Default::default() });
    assert!(!manifest(&d.dst).contains("a.txt"));
    assert_eq!(manifest(&d.src).get("a.txt"), Some(&expected));
}

#[test]
fn sync_mode_recopies_modified_file() {
    let d = dirs();
    write_random(&d.src.join("a.bin"), 4000, 3);
    fs::write(d.src.join("same.txt"), b"unchanged").unwrap();
    run(config(&d));
    write_random(&d.src.join("a.bin"), 4000, 4);

    let mut cfg = config(&d);
    cfg.sync = true;
    let (report, events) = run(cfg);
    assert_eq!(names(&events, Category::Modified), vec!["a.bin"]);
    assert_eq!(names(&events, Category::Copying), vec!["a.bin"]);
    assert_eq!(report.modified, 1);
    assert_eq!(report.copied, 1);

    assert_eq!(fs::read(d.src.join("a.bin")).unwrap(), fs::read(d.dst.join("a.bin")).unwrap());
    let fresh = digest(&d.src.join("a.bin"), &config(&d));
    assert_eq!(manifest(&d.src).get("a.bin"), Some(&fresh));
    assert_eq!(manifest(&d.dst).get("a.bin"), Some(&fresh));
}

#[test]
fn append_mode_ignores_modified_content() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"first").unwrap();
    run(config(&d));
    let recorded = manifest(&d.dst).get("a.txt").cloned();
    fs::write(d.src.join("a.txt"), b"second").unwrap();

    let (report, events) = run(config(&d));
    assert!(events.is_empty());
    assert_eq!(report.copied, 0);
    assert_eq!(fs::read(d.dst.join("a.txt")).unwrap(), b"first");
    assert_eq!(manifest(&d.dst).get("a.txt").cloned(), recorded);
}

#[test]
fn file_removed_from_destination_is_copied_again() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"a").unwrap();
    run(config(&d));
    fs::remove_file(d.dst.join("a.txt")).unwrap();

    let (_, events) = run(config(&d));
    assert_eq!(names(&events, Category::New), vec!["a.txt"]);
    assert_eq!(names(&events, Category::Copying), vec!["a.txt"]);
    assert_eq!(fs::read(d.dst.join("a.txt")).unwrap(), b"a");
}

#[test]
fn unreadable_entry_is_skipped_and_run_continues() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"a").unwrap();
    fs::create_dir(d.src.join("sub")).unwrap();

    let (report, events) = run(config(&d));
    assert_eq!(names(&events, Category::Skipped), vec!["sub"]);
    assert_eq!(names(&events, Category::Copying), vec!["a.txt"]);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.copied, 1);
    assert!(!manifest(&d.src).contains("sub"));
    assert!(!manifest(&d.dst).contains("sub"));
}

#[test]
fn malformed_source_manifest_aborts_the_run() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"a").unwrap();
    fs::write(d.src.join(".sha1"), b"garbage line\r\n").unwrap();

    let mut events: Vec<Event> = Vec::new();
    let err = SyncEngine::new(config(&d)).run(&mut events).unwrap_err();
    assert!(matches!(err, Error::Format { line: 1, .. }), "unexpected error: {err:?}");
    assert!(events.is_empty());
    assert!(!d.dst.join("a.txt").exists());
}

#[test]
fn missing_source_directory_is_fatal() {
    let d = dirs();
    let mut cfg = config(&d);
    cfg.source = d.src.join("missing");
    let err = SyncEngine::new(cfg).run(&mut Vec::<Event>::new()).unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "unexpected error: {err:?}");
}

#[test]
fn blake3_runs_use_their_own_manifest() {
    let d = dirs();
    fs::write(d.src.join("a.txt"), b"a").unwrap();
    let mut cfg = config(&d);
    cfg.algorithm = DigestAlgorithm::Blake3;
    run(cfg);

    assert!(d.dst.join(".blake3").is_file());
    assert!(!d.dst.join(".sha1").exists());
    let m = ManifestFile::load(&d.dst, DigestAlgorithm::Blake3).unwrap().1;
    assert_eq!(m.get("a.txt").map(String::len), Some(64));
}

#[test]
fn one_pool_serves_consecutive_runs_with_same_result_as_any_size() {
    let d = dirs();
    write_random(&d.src.join("big.bin"), 50 * 1024 + 3, 5);
    write_random(&d.src.join("small.bin"), 100, 6);

    let mut single = config(&d);
    single.workers = 1;
    let mut pool = ChunkHashPipeline::start(single.pipeline_config()).unwrap();
    SyncEngine::new(single.clone()).run_with(&mut pool, &mut Vec::<Event>::new()).unwrap();
    let first = manifest(&d.dst);

    let mut wide = config(&d);
    wide.workers = 8;
    wide.sync = true;
    let (report, _) = run(wide);
    assert_eq!(report.modified, 0);
    assert_eq!(manifest(&d.dst), first);

    let again = SyncEngine::new(single).run_with(&mut pool, &mut Vec::<Event>::new()).unwrap();
    assert_eq!(again.copied, 0);
    pool.stop();
}

fn set(v: &[&str]) -> BTreeSet<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[test]
fn classify_builds_new_cross_and_orphan_sets() {
    let d = "0".repeat(40);
    let source: Manifest =
        ["tracked", "never_copied"].iter().map(|n| (n.to_string(), d.clone())).collect();
    let destination: Manifest =
        ["tracked", "gone_from_source"].iter().map(|n| (n.to_string(), d.clone())).collect();

    let plan = SyncPlan::classify(
        &set(&["tracked", "never_copied", "fresh"]),
        &source,
        &destination,
        &set(&["tracked", "gone_from_source", "untracked", "fresh"]),
    );
    assert_eq!(plan.source_new, set(&["fresh"]));
    assert_eq!(plan.cross_new, set(&["never_copied"]));
    assert_eq!(plan.orphans, set(&["gone_from_source", "untracked"]));
    assert_eq!(plan.effective_new(), set(&["fresh", "never_copied"]));
}
