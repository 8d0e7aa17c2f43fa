//! 背景寫入器：一次只進行一個寫入，較新的快照取代等待中的快照。 / Background writer with coalescing.
//!
//! Snapshots are taken on the control thread and handed over by value. At
//! most one write runs at a time, and per slot at most one snapshot waits
//! behind it: a newer submission replaces the waiting one instead of queueing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use multipad_core::{ErrorReporter, Failure, FileOperation, SessionData};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::slot::{SessionSlot, Slot};

/// 寫入統計。 / Diagnostics counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    pub completed: u64,
    pub superseded: u64,
    pub cancelled: u64,
    pub failed: u64,
}

/// Handle for waiting on one submission (or whatever superseded it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    slot: Slot,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Failed(Failure),
    Cancelled,
    TimedOut,
}

#[derive(Debug)]
struct Job {
    seq: u64,
    data: SessionData,
    operation: FileOperation,
}

#[derive(Debug, Default)]
struct WriterState {
    pending: BTreeMap<Slot, Job>,
    in_flight: Option<Slot>,
    next_seq: u64,
    finished: BTreeMap<Slot, (u64, WriteOutcome)>,
    stats: WriterStats,
    stopping: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<WriterState>,
    changed: Condvar,
    io: Mutex<()>,
}

#[derive(Debug)]
pub struct PersistWriter {
    shared: Arc<Shared>,
    slots: Arc<BTreeMap<Slot, SessionSlot>>,
    reporter: ErrorReporter,
    worker: Option<JoinHandle<()>>,
}

impl PersistWriter {
    pub fn spawn(session: SessionSlot, autosave: SessionSlot, reporter: ErrorReporter) -> Self {
        let shared = Arc::new(Shared::default());
        let slots = Arc::new(BTreeMap::from([
            (Slot::Session, session),
            (Slot::Autosave, autosave),
        ]));
        let worker = {
            let shared = Arc::clone(&shared);
            let slots = Arc::clone(&slots);
            let reporter = reporter.clone();
            thread::Builder::new()
                .name("multipad-writer".into())
                .spawn(move || run(&shared, &slots, &reporter))
                .map_err(|err| warn!(error = %err, "writer thread unavailable"))
                .ok()
        };
        Self {
            shared,
            slots,
            reporter,
            worker,
        }
    }

    pub fn slot(&self, slot: Slot) -> &SessionSlot {
        &self.slots[&slot]
    }

    /// 提交快照；若同一位置已有等待中的快照則取代之。 / Queues a snapshot, superseding any snapshot still waiting for `slot`.
    pub fn submit(&self, slot: Slot, data: SessionData, operation: FileOperation) -> Ticket {
        let mut state = self.shared.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        let job = Job {
            seq,
            data,
            operation,
        };
        if let Some(old) = state.pending.insert(slot, job) {
            state.stats.superseded += 1;
            debug!(?slot, superseded = old.seq, by = seq, "coalesced pending write");
        }
        drop(state);
        self.shared.changed.notify_all();
        if self.worker.is_none() {
            self.drain_inline();
        }
        Ticket { slot, seq }
    }

    /// 取消等待中的寫入（進行中的不受影響）。 / Drops the waiting snapshot for `slot`; a write already running is left alone.
    pub fn cancel_pending(&self, slot: Slot) -> bool {
        let mut state = self.shared.state.lock();
        match state.pending.remove(&slot) {
            Some(job) => {
                state.stats.cancelled += 1;
                state.finished.insert(slot, (job.seq, WriteOutcome::Cancelled));
                drop(state);
                self.shared.changed.notify_all();
                true
            }
            None => false,
        }
    }

    /// Rewrites the snapshot still waiting for `slot`, if any.
    pub fn modify_pending(&self, slot: Slot, edit: impl FnOnce(&mut SessionData)) -> bool {
        let mut state = self.shared.state.lock();
        match state.pending.get_mut(&slot) {
            Some(job) => {
                edit(&mut job.data);
                true
            }
            None => false,
        }
    }

    /// 等待寫入完成，最多 `timeout`。 / Blocks until the ticket's write (or its superseder) finished, or `timeout` passes.
    pub fn wait(&self, ticket: Ticket, timeout: Duration) -> WriteOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some((seq, outcome)) = state.finished.get(&ticket.slot) {
                if *seq >= ticket.seq {
                    return outcome.clone();
                }
            }
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return WriteOutcome::TimedOut;
            }
        }
    }

    /// Waits until nothing is pending or in flight.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.pending.is_empty() || state.in_flight.is_some() {
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return false;
            }
        }
        true
    }

    /// 與背景寫入互斥地執行同步 I/O（手動儲存、標記寫入）。 / Runs synchronous I/O exclusively with the background write.
    pub fn exclusive<R>(&self, io: impl FnOnce() -> R) -> R {
        let _guard = self.shared.io.lock();
        io()
    }

    /// Synchronous write that still respects the single-writer rule.
    pub fn write_now(&self, slot: Slot, data: &SessionData) -> Result<(), SessionError> {
        self.exclusive(|| self.slot(slot).save(data))
    }

    pub fn stats(&self) -> WriterStats {
        self.shared.state.lock().stats
    }

    pub fn is_busy(&self) -> bool {
        let state = self.shared.state.lock();
        state.in_flight.is_some() || !state.pending.is_empty()
    }

    // Without a worker thread the write happens on the caller; coalescing degenerates to write-through.
    fn drain_inline(&self) {
        loop {
            let Some((slot, job)) = self.shared.state.lock().pending.pop_first() else {
                return;
            };
            let outcome = self.exclusive(|| write_job(&self.slots[&slot], &job));
            finish(&self.shared, slot, job.seq, outcome, &self.reporter);
        }
    }
}

impl Drop for PersistWriter {
    fn drop(&mut self) {
        self.shared.state.lock().stopping = true;
        self.shared.changed.notify_all();
        // The worker drains what is pending and exits; it is not joined so a slow disk cannot hold up teardown.
        drop(self.worker.take());
    }
}

fn run(shared: &Shared, slots: &BTreeMap<Slot, SessionSlot>, reporter: &ErrorReporter) {
    loop {
        let (slot, job) = {
            let mut state = shared.state.lock();
            loop {
                if let Some((slot, job)) = state.pending.pop_first() {
                    state.in_flight = Some(slot);
                    break (slot, job);
                }
                if state.stopping {
                    return;
                }
                shared.changed.wait(&mut state);
            }
        };
        let outcome = {
            let _io = shared.io.lock();
            write_job(&slots[&slot], &job)
        };
        finish(shared, slot, job.seq, outcome, reporter);
    }
}

fn write_job(slot: &SessionSlot, job: &Job) -> Result<(), (Failure, SessionError)> {
    slot.save(&job.data).map_err(|err| {
        let failure = match &err {
            SessionError::Io { path, source, .. } => {
                Failure::from_io(job.operation, Some(path), source)
            }
            other => Failure::new(other.classify(), job.operation)
                .with_path(slot.path())
                .with_detail(other.to_string()),
        };
        (failure, err)
    })
}

fn finish(
    shared: &Shared,
    slot: Slot,
    seq: u64,
    result: Result<(), (Failure, SessionError)>,
    reporter: &ErrorReporter,
) {
    let outcome = match result {
        Ok(()) => {
            debug!(?slot, seq, "session record written");
            WriteOutcome::Written
        }
        Err((failure, err)) => {
            debug!(?slot, seq, error = %err, "session record write failed");
            reporter.report(failure.clone());
            WriteOutcome::Failed(failure)
        }
    };
    let mut state = shared.state.lock();
    match outcome {
        WriteOutcome::Written => state.stats.completed += 1,
        _ => state.stats.failed += 1,
    }
    state.in_flight = None;
    state.finished.insert(slot, (seq, outcome));
    drop(state);
    shared.changed.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use multipad_core::{EventBus, FailureKind, MemoryFileSystem, SessionTab};
    use std::io::ErrorKind;
    use std::path::Path;

    fn snapshot(label: &str) -> SessionData {
        SessionData::new(
            vec![SessionTab {
                path: None,
                content: Some(label.into()),
                cursor: 0,
                is_dirty: true,
                encoding: None,
                line_ending: None,
                has_bom: false,
                origin: None,
            }],
            Some(0),
        )
    }

    fn writer(fs: &Arc<MemoryFileSystem>) -> (PersistWriter, ErrorReporter) {
        let reporter = ErrorReporter::new(EventBus::new());
        let writer = PersistWriter::spawn(
            SessionSlot::new("/data/session.json", fs.clone()),
            SessionSlot::new("/data/autosave.json", fs.clone()),
            reporter.clone(),
        );
        (writer, reporter)
    }

    fn written_labels(fs: &MemoryFileSystem, path: &str) -> Vec<String> {
        fs.writes_to(Path::new(path))
            .iter()
            .map(|bytes| {
                SessionData::from_json(bytes).unwrap().tabs[0]
                    .content
                    .clone()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn requests_during_a_write_coalesce_into_the_latest() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (writer, _) = writer(&fs);
        fs.hold_writes();

        writer.submit(Slot::Autosave, snapshot("a"), FileOperation::Autosaving);
        assert!(fs.wait_for_blocked_writers(1, Duration::from_secs(5)));
        writer.submit(Slot::Autosave, snapshot("b"), FileOperation::Autosaving);
        let last = writer.submit(Slot::Autosave, snapshot("c"), FileOperation::Autosaving);

        fs.release_writes();
        assert_eq!(writer.wait(last, Duration::from_secs(5)), WriteOutcome::Written);
        assert!(writer.wait_idle(Duration::from_secs(5)));
        assert_eq!(written_labels(&fs, "/data/autosave.json"), vec!["a", "c"]);
        assert_eq!(writer.stats().superseded, 1);
        assert_eq!(writer.stats().completed, 2);
    }

    #[test]
    fn superseded_ticket_resolves_with_its_replacement() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (writer, _) = writer(&fs);
        fs.hold_writes();

        writer.submit(Slot::Session, snapshot("first"), FileOperation::Autosaving);
        assert!(fs.wait_for_blocked_writers(1, Duration::from_secs(5)));
        let stale = writer.submit(Slot::Session, snapshot("stale"), FileOperation::Autosaving);
        writer.submit(Slot::Session, snapshot("fresh"), FileOperation::Autosaving);

        fs.release_writes();
        assert_eq!(writer.wait(stale, Duration::from_secs(5)), WriteOutcome::Written);
        assert!(writer.wait_idle(Duration::from_secs(5)));
        assert_eq!(
            written_labels(&fs, "/data/session.json"),
            vec!["first", "fresh"]
        );
    }

    #[test]
    fn wait_times_out_while_disk_is_stuck() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (writer, _) = writer(&fs);
        fs.hold_writes();

        let ticket = writer.submit(Slot::Session, snapshot("x"), FileOperation::ShutdownFlush);
        assert_eq!(
            writer.wait(ticket, Duration::from_millis(50)),
            WriteOutcome::TimedOut
        );
        fs.release_writes();
        assert!(writer.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn failures_are_counted_and_reported() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (writer, reporter) = writer(&fs);
        fs.fail_writes(Some(ErrorKind::PermissionDenied));

        let ticket = writer.submit(Slot::Autosave, snapshot("x"), FileOperation::Autosaving);
        match writer.wait(ticket, Duration::from_secs(5)) {
            WriteOutcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::PermissionDenied)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(writer.stats().failed, 1);
        assert_eq!(reporter.count(FailureKind::PermissionDenied), 1);
    }

    #[test]
    fn cancelled_pending_write_never_lands() {
        let fs = Arc::new(MemoryFileSystem::new());
        let (writer, _) = writer(&fs);
        fs.hold_writes();

        writer.submit(Slot::Session, snapshot("busy"), FileOperation::Saving);
        assert!(fs.wait_for_blocked_writers(1, Duration::from_secs(5)));
        let ticket = writer.submit(Slot::Autosave, snapshot("late"), FileOperation::Autosaving);
        assert!(writer.cancel_pending(Slot::Autosave));
        assert_eq!(
            writer.wait(ticket, Duration::from_secs(1)),
            WriteOutcome::Cancelled
        );

        fs.release_writes();
        assert!(writer.wait_idle(Duration::from_secs(5)));
        assert!(fs.writes_to(Path::new("/data/autosave.json")).is_empty());
    }
}
