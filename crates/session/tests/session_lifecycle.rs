use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use multipad_core::{
    CloseDecision, EditorEvent, EventBus, FailureKind, FileSystem, MemoryFileSystem, Policy,
    ResourceGuard, ResourceLimits, SessionData, TabRegistry, MIB,
};
use multipad_session::{
    AutosaveOutcome, EditorContext, LargeFileConfirmation, PriorSession, RecoveryChoice,
    SessionConfig, SessionState, WriteOutcome,
};
use multipad_settings::RecentFilesStore;

const SESSION: &str = "/data/session.json";
const AUTOSAVE: &str = "/data/autosave.json";
const WAIT: Duration = Duration::from_secs(5);

const RECENT: &str = "/data/recent.db";

fn quiet_config() -> SessionConfig {
    SessionConfig {
        autosave_enabled: false,
        ..SessionConfig::default()
    }
}

fn context_with(
    fs: &Arc<MemoryFileSystem>,
    limits: ResourceLimits,
    config: SessionConfig,
) -> EditorContext {
    let guard = ResourceGuard::new(fs.clone(), Arc::new(|| Some(64 * MIB)), limits);
    EditorContext::with_parts(SESSION, AUTOSAVE, guard, config)
}

fn context_with_limits(fs: &Arc<MemoryFileSystem>, limits: ResourceLimits) -> EditorContext {
    context_with(fs, limits, quiet_config())
}

fn context(fs: &Arc<MemoryFileSystem>) -> EditorContext {
    context_with_limits(fs, ResourceLimits::default())
}

fn record(fs: &MemoryFileSystem, path: &str) -> Option<SessionData> {
    fs.contents(Path::new(path))
        .map(|bytes| SessionData::from_json(&bytes).expect("valid session record"))
}

fn autosave(ctx: &mut EditorContext) {
    let AutosaveOutcome::Submitted(ticket) = ctx.autosave_now() else {
        panic!("autosave was not submitted");
    };
    assert_eq!(ctx.store().writer().wait(ticket, WAIT), WriteOutcome::Written);
}

#[test]
fn unclean_record_is_recovered_verbatim_and_dirty() {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut previous = TabRegistry::new(EventBus::new());
    let id = previous.create_tab(None);
    previous.insert_text(id, "draft").unwrap();
    fs.insert(SESSION, previous.snapshot().to_json().unwrap());

    let mut ctx = context(&fs);
    let events = ctx.subscribe();
    let prior = ctx.open_session().unwrap();
    assert!(prior.is_crash());
    assert!(events
        .try_iter()
        .any(|event| matches!(event, EditorEvent::RecoveryAvailable(_))));

    let summary = ctx.resume(&prior, RecoveryChoice::Recover).unwrap();
    assert!(summary.recovered);
    assert_eq!(summary.restored.len(), 1);
    let doc = ctx.registry().get(summary.restored[0]).unwrap();
    assert_eq!(doc.content(), "draft");
    assert!(doc.is_dirty());
    assert_ne!(doc.id(), id);
    assert_eq!(ctx.store().state(), SessionState::Active);
}

#[test]
fn autosaved_draft_survives_a_crash() {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut first = context(&fs);
    first.start(RecoveryChoice::Recover).unwrap();
    first.type_text("draft").unwrap();
    autosave(&mut first);
    drop(first);

    let mut second = context(&fs);
    let prior = second.open_session().unwrap();
    let PriorSession::Crashed(data) = &prior else {
        panic!("expected crash recovery, got {prior:?}");
    };
    assert_eq!(data.tabs[0].content.as_deref(), Some("draft"));

    second.resume(&prior, RecoveryChoice::Recover).unwrap();
    let doc = second.registry().documents().next().unwrap();
    assert_eq!(doc.content(), "draft");
    assert!(doc.is_dirty());
}

#[test]
fn discarding_recovery_clears_both_records() {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut first = context(&fs);
    first.start(RecoveryChoice::Recover).unwrap();
    first.type_text("draft").unwrap();
    autosave(&mut first);
    drop(first);

    let mut second = context(&fs);
    let prior = second.open_session().unwrap();
    let summary = second.resume(&prior, RecoveryChoice::Discard).unwrap();
    assert!(summary.restored.is_empty());
    assert!(second.registry().is_empty());
    assert!(record(&fs, AUTOSAVE).is_none());

    // Activation writes a fresh crash marker after the records were cleared.
    let marker = record(&fs, SESSION).unwrap();
    assert!(!marker.clean_shutdown);
    assert!(marker.tabs.is_empty());
}

#[test]
fn clean_quit_sets_flag_and_next_start_skips_recovery() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/a.txt", "hello");

    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    assert!(!record(&fs, SESSION).unwrap().clean_shutdown);

    let id = ctx
        .open_file(Path::new("/docs/a.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap()
        .id;
    ctx.type_text(">> ").unwrap();

    let err = ctx.request_quit(CloseDecision::Prompt).unwrap_err();
    assert_eq!(err.classify(), FailureKind::UnsavedChanges);
    assert_eq!(ctx.store().state(), SessionState::Active);
    let last = ctx.reporter().history().pop().unwrap();
    assert_eq!(last.policy, Policy::BlockAndPrompt);

    let report = ctx.request_quit(CloseDecision::SaveFirst).unwrap();
    assert_eq!(report.final_write, Some(WriteOutcome::Written));
    assert_eq!(ctx.store().state(), SessionState::Closed);
    assert!(ctx.registry().get(id).is_some_and(|doc| !doc.is_dirty()));
    assert_eq!(fs.contents(Path::new("/docs/a.txt")).unwrap(), b">> hello");

    let saved = record(&fs, SESSION).unwrap();
    assert!(saved.clean_shutdown);
    assert!(record(&fs, AUTOSAVE).is_none());

    let mut next = context(&fs);
    let prior = next.open_session().unwrap();
    assert!(matches!(prior, PriorSession::CleanShutdown(_)));
    assert!(!prior.is_crash());
}

#[test]
fn clean_restore_reads_files_from_disk() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/a.txt", "v1");

    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.open_file(Path::new("/docs/a.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    ctx.new_tab(Some("scratch"));
    ctx.shutdown().unwrap();

    fs.insert("/docs/a.txt", "v2 from another editor");

    let mut next = context(&fs);
    let summary = next.start(RecoveryChoice::Recover).unwrap();
    assert!(!summary.recovered);
    assert_eq!(summary.restored.len(), 2);
    let docs: Vec<_> = next.registry().documents().collect();
    assert_eq!(docs[0].content(), "v2 from another editor");
    assert!(!docs[0].is_dirty());
    assert_eq!(docs[1].content(), "scratch");
    assert!(docs[1].is_dirty());
    assert_eq!(next.registry().active_index(), Some(1));
}

#[test]
fn missing_file_is_skipped_during_clean_restore() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/gone.txt", "soon gone");

    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.open_file(Path::new("/docs/gone.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    ctx.request_quit(CloseDecision::Prompt).unwrap();
    fs.remove(Path::new("/docs/gone.txt")).unwrap();

    let mut next = context(&fs);
    let summary = next.start(RecoveryChoice::Recover).unwrap();
    assert!(summary.restored.is_empty());
    assert_eq!(summary.skipped, vec![Path::new("/docs/gone.txt").to_path_buf()]);
    assert_eq!(next.reporter().count(FailureKind::ReadFailure), 1);
}

#[test]
fn autosave_is_skipped_when_disk_is_short() {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.type_text("unsaved").unwrap();

    fs.set_available_space(1024);
    let writes = fs.write_count();
    let outcome = ctx.autosave_now();

    assert_eq!(outcome, AutosaveOutcome::Skipped(FailureKind::InsufficientDiskSpace));
    assert_eq!(fs.write_count(), writes);
    assert_eq!(ctx.reporter().count(FailureKind::InsufficientDiskSpace), 1);
    let report = ctx.reporter().history().pop().unwrap();
    assert_eq!(report.policy, Policy::WarnAndContinue);

    // The control thread keeps going and the next tick retries.
    ctx.type_text("!").unwrap();
    fs.set_available_space(u64::MAX);
    autosave(&mut ctx);
    assert_eq!(ctx.reporter().count(FailureKind::InsufficientDiskSpace), 1);
}

#[test]
fn autosaves_requested_during_a_write_coalesce() {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();

    ctx.type_text("a").unwrap();
    fs.hold_writes();
    let AutosaveOutcome::Submitted(first) = ctx.autosave_now() else {
        panic!("first autosave not submitted");
    };
    assert!(fs.wait_for_blocked_writers(1, WAIT));

    ctx.type_text("b").unwrap();
    let AutosaveOutcome::Submitted(second) = ctx.autosave_now() else {
        panic!("second autosave not submitted");
    };
    ctx.type_text("c").unwrap();
    let AutosaveOutcome::Submitted(third) = ctx.autosave_now() else {
        panic!("third autosave not submitted");
    };
    fs.release_writes();

    let writer = ctx.store().writer();
    assert_eq!(writer.wait(third, WAIT), WriteOutcome::Written);
    assert_eq!(writer.wait(second, WAIT), WriteOutcome::Written);
    assert_eq!(writer.wait(first, WAIT), WriteOutcome::Written);
    assert_eq!(writer.stats().superseded, 1);

    let writes = fs.writes_to(Path::new(AUTOSAVE));
    assert_eq!(writes.len(), 2);
    let last = SessionData::from_json(&writes[1]).unwrap();
    assert_eq!(last.tabs[0].content.as_deref(), Some("abc"));
}

#[test]
fn saving_one_tab_keeps_other_autosaved_content() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/a.txt", "a");
    fs.insert("/docs/b.txt", "b");

    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    let a = ctx
        .open_file(Path::new("/docs/a.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap()
        .id;
    let b = ctx
        .open_file(Path::new("/docs/b.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap()
        .id;
    ctx.registry_mut().insert_text(a, "edit-a ").unwrap();
    ctx.registry_mut().insert_text(b, "edit-b ").unwrap();
    autosave(&mut ctx);

    ctx.save(a).unwrap();
    let after_first = record(&fs, AUTOSAVE).expect("autosave kept for tab b");
    let tab_a = after_first
        .tabs
        .iter()
        .find(|tab| tab.path.as_deref() == Some(Path::new("/docs/a.txt")))
        .unwrap();
    let tab_b = after_first
        .tabs
        .iter()
        .find(|tab| tab.path.as_deref() == Some(Path::new("/docs/b.txt")))
        .unwrap();
    assert!(tab_a.content.is_none());
    assert!(!tab_a.is_dirty);
    assert_eq!(tab_b.content.as_deref(), Some("edit-b b"));
    assert!(tab_b.is_dirty);

    ctx.save(b).unwrap();
    assert!(record(&fs, AUTOSAVE).is_none());
}

#[test]
fn opening_an_open_path_activates_the_existing_tab() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/a.txt", "a");
    fs.insert("/docs/b.txt", "b");

    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    let a = ctx
        .open_file(Path::new("/docs/a.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    ctx.open_file(Path::new("/docs/b.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();

    let again = ctx
        .open_file(Path::new("/docs/./a.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    assert!(again.already_open);
    assert_eq!(again.id, a.id);
    assert_eq!(ctx.registry().len(), 2);
    assert_eq!(ctx.registry().active_id(), Some(a.id));
    assert_eq!(ctx.reporter().count(FailureKind::DuplicateTab), 1);
}

#[test]
fn huge_files_need_confirmation() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/large.txt", vec![b'a'; 6]);
    fs.insert("/docs/huge.txt", vec![b'a'; 16]);
    let limits = ResourceLimits {
        large_file_bytes: 4,
        huge_file_bytes: 8,
        ..ResourceLimits::default()
    };

    let mut ctx = context_with_limits(&fs, limits);
    ctx.start(RecoveryChoice::Recover).unwrap();

    ctx.open_file(Path::new("/docs/large.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    let warning = ctx.reporter().history().pop().unwrap();
    assert_eq!(warning.failure.kind, FailureKind::FileTooLarge);
    assert_eq!(warning.policy, Policy::WarnAndContinue);

    let err = ctx
        .open_file(Path::new("/docs/huge.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap_err();
    assert_eq!(err.classify(), FailureKind::FileTooLarge);
    assert_eq!(ctx.registry().len(), 1);

    ctx.open_file(Path::new("/docs/huge.txt"), LargeFileConfirmation::Confirmed)
        .unwrap();
    assert_eq!(ctx.registry().len(), 2);
}

#[test]
fn closing_a_dirty_tab_requires_a_decision() {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    let id = ctx.type_text("unsaved").unwrap();

    let err = ctx.close_tab(id, CloseDecision::Prompt).unwrap_err();
    assert_eq!(err.classify(), FailureKind::UnsavedChanges);
    assert_eq!(ctx.registry().len(), 1);

    let err = ctx.close_tab(id, CloseDecision::SaveFirst).unwrap_err();
    assert!(matches!(err, multipad_session::SessionError::NoPath(_)));

    ctx.close_tab(id, CloseDecision::Discard).unwrap();
    assert!(ctx.registry().is_empty());
}

#[test]
fn quit_with_discard_drops_untitled_drafts() {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.type_text("throwaway").unwrap();

    let report = ctx.request_quit(CloseDecision::Discard).unwrap();
    assert!(report.session_cleared);
    assert!(record(&fs, SESSION).is_none());

    let mut next = context(&fs);
    assert_eq!(next.open_session().unwrap(), PriorSession::None);
}

#[test]
fn failed_final_write_still_closes() {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.new_tab(Some("kept"));

    fs.fail_writes(Some(std::io::ErrorKind::PermissionDenied));
    let report = ctx.shutdown().unwrap();
    assert!(matches!(report.final_write, Some(WriteOutcome::Failed(_))));
    assert!(!report.is_clean());
    assert_eq!(ctx.store().state(), SessionState::Closed);

    let logged = ctx.reporter().history().pop().unwrap();
    assert_eq!(logged.policy, Policy::LogOnly);
}

#[test]
fn unsaved_edits_survive_a_clean_shutdown() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/a.txt", "hello");

    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.open_file(Path::new("/docs/a.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    ctx.type_text("UNSAVED ").unwrap();
    let report = ctx.shutdown().unwrap();
    assert_eq!(report.final_write, Some(WriteOutcome::Written));
    assert!(record(&fs, SESSION).unwrap().clean_shutdown);

    let mut next = context(&fs);
    let summary = next.start(RecoveryChoice::Recover).unwrap();
    assert!(!summary.recovered);
    let doc = next.registry().documents().next().unwrap();
    assert_eq!(doc.path(), Some(Path::new("/docs/a.txt")));
    assert_eq!(doc.content(), "UNSAVED hello");
    assert!(doc.is_dirty());
    assert_eq!(fs.contents(Path::new("/docs/a.txt")).unwrap(), b"hello");
}

#[test]
fn quit_with_discard_reverts_named_edits() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/a.txt", "hello");

    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.open_file(Path::new("/docs/a.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    ctx.type_text("throwaway ").unwrap();
    let report = ctx.request_quit(CloseDecision::Discard).unwrap();
    assert_eq!(report.final_write, Some(WriteOutcome::Written));

    let saved = record(&fs, SESSION).unwrap();
    assert!(saved.tabs[0].content.is_none());
    assert!(!saved.tabs[0].is_dirty);

    let mut next = context(&fs);
    next.start(RecoveryChoice::Recover).unwrap();
    let doc = next.registry().documents().next().unwrap();
    assert_eq!(doc.content(), "hello");
    assert!(!doc.is_dirty());
}

#[test]
fn dirty_tabs_return_even_when_restore_is_off() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/a.txt", "a");
    fs.insert("/docs/b.txt", "b");

    let mut ctx = context(&fs);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.open_file(Path::new("/docs/a.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    ctx.open_file(Path::new("/docs/b.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    ctx.type_text("edit ").unwrap();
    ctx.shutdown().unwrap();

    let config = SessionConfig {
        restore_on_startup: false,
        ..quiet_config()
    };
    let mut next = context_with(&fs, ResourceLimits::default(), config);
    let summary = next.start(RecoveryChoice::Recover).unwrap();
    assert_eq!(summary.restored.len(), 1);
    let doc = next.registry().documents().next().unwrap();
    assert_eq!(doc.path(), Some(Path::new("/docs/b.txt")));
    assert_eq!(doc.content(), "edit b");
    assert_eq!(next.registry().active_id(), Some(doc.id()));
}

#[test]
fn discarded_draft_is_not_offered_after_a_crash() {
    let fs = Arc::new(MemoryFileSystem::new());
    let mut first = context(&fs);
    first.start(RecoveryChoice::Recover).unwrap();
    let id = first.type_text("secret draft").unwrap();
    autosave(&mut first);

    first.close_tab(id, CloseDecision::Discard).unwrap();
    let AutosaveOutcome::Settled(ticket) = first.autosave_now() else {
        panic!("autosave record was not settled");
    };
    assert_eq!(first.store().writer().wait(ticket, WAIT), WriteOutcome::Written);
    assert_eq!(first.autosave_now(), AutosaveOutcome::NothingDirty);
    drop(first);

    let mut second = context(&fs);
    let prior = second.open_session().unwrap();
    assert!(prior.is_crash());
    let data = prior.data().unwrap();
    assert!(data
        .tabs
        .iter()
        .all(|tab| tab.content.as_deref() != Some("secret draft")));

    let summary = second.resume(&prior, RecoveryChoice::Recover).unwrap();
    assert!(summary.restored.is_empty());
    assert!(second.registry().is_empty());
}

#[test]
fn autosave_is_skipped_under_memory_pressure() {
    let fs = Arc::new(MemoryFileSystem::new());
    let limits = ResourceLimits {
        memory_threshold_bytes: 32 * MIB,
        ..ResourceLimits::default()
    };
    let mut ctx = context_with_limits(&fs, limits);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.type_text("unsaved").unwrap();

    let writes = fs.write_count();
    assert_eq!(
        ctx.autosave_now(),
        AutosaveOutcome::Skipped(FailureKind::MemoryPressure)
    );
    assert_eq!(fs.write_count(), writes);
    assert!(record(&fs, AUTOSAVE).is_none());
    let report = ctx.reporter().history().pop().unwrap();
    assert_eq!(report.failure.kind, FailureKind::MemoryPressure);
    assert_eq!(report.policy, Policy::WarnAndContinue);
}

#[test]
fn slow_final_write_times_out_and_still_closes() {
    let fs = Arc::new(MemoryFileSystem::new());
    let config = SessionConfig {
        shutdown_timeout: Duration::from_millis(100),
        ..quiet_config()
    };
    let mut ctx = context_with(&fs, ResourceLimits::default(), config);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.new_tab(Some("kept"));

    fs.hold_writes();
    let started = Instant::now();
    let report = ctx.shutdown().unwrap();
    let elapsed = started.elapsed();
    fs.release_writes();

    assert_eq!(report.final_write, Some(WriteOutcome::TimedOut));
    assert!(!report.is_clean());
    assert!(elapsed < WAIT, "shutdown waited {elapsed:?}");
    assert_eq!(ctx.store().state(), SessionState::Closed);
    let logged = ctx.reporter().history().pop().unwrap();
    assert_eq!(logged.failure.kind, FailureKind::WriteFailure);
    assert_eq!(logged.policy, Policy::LogOnly);
}

#[test]
fn ticker_drives_autosave_through_pump() {
    let fs = Arc::new(MemoryFileSystem::new());
    let config = SessionConfig {
        autosave_enabled: true,
        autosave_interval: Duration::from_millis(20),
        ..SessionConfig::default()
    };
    let mut ctx = context_with(&fs, ResourceLimits::default(), config);
    ctx.start(RecoveryChoice::Recover).unwrap();
    ctx.type_text("ticked").unwrap();

    let deadline = Instant::now() + WAIT;
    let outcome = loop {
        if let Some(outcome) = ctx.pump() {
            break outcome;
        }
        assert!(Instant::now() < deadline, "no autosave tick arrived");
        thread::sleep(Duration::from_millis(5));
    };
    let AutosaveOutcome::Submitted(ticket) = outcome else {
        panic!("tick did not submit an autosave: {outcome:?}");
    };
    assert_eq!(ctx.store().writer().wait(ticket, WAIT), WriteOutcome::Written);
    let saved = record(&fs, AUTOSAVE).unwrap();
    assert_eq!(saved.tabs[0].content.as_deref(), Some("ticked"));

    ctx.shutdown().unwrap();
    assert_eq!(ctx.pump(), None);
}

#[test]
fn opened_and_saved_files_are_remembered() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("/docs/a.txt", "a");
    fs.insert("/docs/b.txt", "b");
    let recent = || RecentFilesStore::load(RECENT, 10, fs.clone()).unwrap();

    let mut ctx = context(&fs).with_recent_files(recent());
    ctx.start(RecoveryChoice::Recover).unwrap();
    let a = ctx
        .open_file(Path::new("/docs/a.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap()
        .id;
    ctx.open_file(Path::new("/docs/b.txt"), LargeFileConfirmation::NotConfirmed)
        .unwrap();
    ctx.registry_mut().insert_text(a, "x").unwrap();
    ctx.save(a).unwrap();
    let listed: Vec<_> = ctx.recent_files().iter().cloned().collect();
    assert_eq!(
        listed,
        vec![
            Path::new("/docs/a.txt").to_path_buf(),
            Path::new("/docs/b.txt").to_path_buf()
        ]
    );
    ctx.shutdown().unwrap();

    fs.remove(Path::new("/docs/b.txt")).unwrap();
    let mut next = context(&fs).with_recent_files(recent());
    let summary = next.start(RecoveryChoice::Recover).unwrap();
    assert_eq!(summary.skipped, vec![Path::new("/docs/b.txt").to_path_buf()]);
    let listed: Vec<_> = recent().iter().cloned().collect();
    assert_eq!(listed, vec![Path::new("/docs/a.txt").to_path_buf()]);
}
