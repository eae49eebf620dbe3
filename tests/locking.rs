mod support;

use std::sync::{Arc, Barrier};
use std::thread;

use fcoord::bus::MessageKind;
use fcoord::conflict::{ConflictKind, Severity};
use fcoord::events::CoordEvent;
use fcoord::lease::LockKind;
use fcoord::registry::LockStatus;
use support::TestProject;

#[test]
fn exclusive_blocks_readers_and_writers() {
    let project = TestProject::new();
    let svc = project.service();
    let file = project.write_file("src/lib.rs", "pub fn a() {}");

    assert!(svc.request_file_lock(&file, "alice", LockKind::Exclusive).unwrap());
    assert!(!svc.request_file_lock(&file, "bob", LockKind::Read).unwrap());
    assert!(!svc.request_file_lock(&file, "bob", LockKind::Write).unwrap());

    let state = svc.file_state(&file).unwrap();
    assert_eq!(state.lock_status, LockStatus::Exclusive);
    assert_eq!(state.lock_holder.as_deref(), Some("alice"));
    assert!(state.lock_expires_at.is_some());
}

#[test]
fn holder_can_upgrade_its_own_lock() {
    let project = TestProject::new();
    let svc = project.service();
    let file = project.write_file("plan.md", "draft");

    assert!(svc.request_file_lock(&file, "alice", LockKind::Read).unwrap());
    assert!(svc.request_file_lock(&file, "alice", LockKind::Write).unwrap());
    assert_eq!(svc.file_state(&file).unwrap().lock_status, LockStatus::Write);
}

#[test]
fn denial_notifies_holder_and_emits_violation() {
    let project = TestProject::new();
    let svc = project.service();
    let file = project.write_file("plan.md", "draft");
    svc.register_agent("alice").unwrap();
    svc.register_agent("bob").unwrap();

    svc.request_file_lock(&file, "alice", LockKind::Write).unwrap();
    assert_eq!(svc.pending_messages("alice"), 0);

    let mut events = svc.subscribe();
    assert!(!svc.request_file_lock(&file, "bob", LockKind::Write).unwrap());

    let names: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| match event {
            CoordEvent::Conflict { conflict } => {
                assert_eq!(conflict.kind, ConflictKind::LockViolation);
                assert_eq!(conflict.severity, Severity::Medium);
                "conflict"
            }
            CoordEvent::MessageSent { .. } => "message",
            _ => "other",
        })
        .collect();
    assert!(names.contains(&"conflict"));

    let inbox = svc.get_messages("alice").unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, MessageKind::Conflict);
    assert_eq!(inbox[0].from, "bob");
}

#[test]
fn grants_are_broadcast_to_other_agents() {
    let project = TestProject::new();
    let svc = project.service();
    let file = project.write_file("plan.md", "draft");
    svc.register_agent("alice").unwrap();
    svc.register_agent("bob").unwrap();

    svc.request_file_lock(&file, "alice", LockKind::Write).unwrap();

    let inbox = svc.get_messages("bob").unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, MessageKind::Notification);
    assert!(inbox[0].to.is_broadcast());
}

#[test]
fn auto_merge_backs_up_contended_file() {
    let project = TestProject::new();
    let settings = project.settings();
    let backup_dir = settings.backup_dir.clone();
    let svc = project.service();
    let file = project.write_file("plan.md", "draft");

    svc.request_file_lock(&file, "alice", LockKind::Write).unwrap();
    assert!(!svc.request_file_lock(&file, "bob", LockKind::Write).unwrap());

    let backups: Vec<_> = std::fs::read_dir(&backup_dir)
        .expect("backup dir created")
        .filter_map(|entry| entry.ok())
        .collect();
    assert_eq!(backups.len(), 1);
    let name = backups[0].file_name().to_string_lossy().into_owned();
    assert!(name.starts_with("plan.md."));
    assert!(name.ends_with(".bak"));
}

#[test]
fn repeated_denials_reuse_the_backup_of_unchanged_content() {
    let project = TestProject::new();
    let backup_dir = project.settings().backup_dir;
    let svc = project.service();
    let file = project.write_file("plan.md", "draft");
    let count = || std::fs::read_dir(&backup_dir).unwrap().count();

    svc.request_file_lock(&file, "alice", LockKind::Write).unwrap();
    for _ in 0..3 {
        assert!(!svc.request_file_lock(&file, "bob", LockKind::Write).unwrap());
    }
    assert_eq!(count(), 1);

    std::fs::write(&file, "draft, revised").unwrap();
    assert!(!svc.request_file_lock(&file, "carol", LockKind::Write).unwrap());
    assert_eq!(count(), 2);
}

#[test]
fn every_spelling_of_a_file_shares_one_lock() {
    let project = TestProject::new();
    let svc = project.service();
    let file = project.write_file("docs/plan.txt", "draft");
    let dotted = project
        .path()
        .join("docs/./../docs/plan.txt")
        .to_string_lossy()
        .into_owned();

    assert!(svc.request_file_lock(&file, "alice", LockKind::Write).unwrap());
    assert!(!svc.request_file_lock(&dotted, "bob", LockKind::Write).unwrap());
    assert!(!svc
        .request_file_lock(&file.to_uppercase(), "carol", LockKind::Write)
        .unwrap());
    assert_eq!(svc.get_conflict_stats().tracked_files, 1);
}

#[test]
fn racing_writers_get_exactly_one_grant() {
    const RACERS: usize = 8;
    let project = TestProject::new();
    let svc = Arc::new(project.service());
    let file = project.write_file("plan.md", "draft");
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles: Vec<_> = (0..RACERS)
        .map(|n| {
            let svc = Arc::clone(&svc);
            let barrier = Arc::clone(&barrier);
            let file = file.clone();
            thread::spawn(move || {
                barrier.wait();
                svc.request_file_lock(&file, &format!("agent-{n}"), LockKind::Write)
                    .unwrap()
            })
        })
        .collect();

    let granted = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|granted| *granted)
        .count();
    assert_eq!(granted, 1);

    let state = svc.file_state(&file).unwrap();
    assert_eq!(state.lock_status, LockStatus::Write);
    assert!(state.lock_holder.unwrap().starts_with("agent-"));
}

#[test]
fn stats_count_live_locks() {
    let project = TestProject::new();
    let svc = project.service();
    let a = project.write_file("a.txt", "a");
    let b = project.write_file("b.txt", "b");
    svc.register_agent("alice").unwrap();

    svc.request_file_lock(&a, "alice", LockKind::Write).unwrap();
    svc.request_file_lock(&b, "alice", LockKind::Read).unwrap();
    let stats = svc.get_conflict_stats();
    assert_eq!(stats.tracked_files, 2);
    assert_eq!(stats.active_locks, 2);
    assert_eq!(stats.active_agents, 1);

    svc.release_file_lock(&a, "alice").unwrap();
    assert_eq!(svc.get_conflict_stats().active_locks, 1);
}
