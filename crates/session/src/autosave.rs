//! 自動儲存計時器。 / Periodic autosave ticks.
//!
//! The ticker thread only sends tick messages. The control thread drains
//! them and runs the autosave pass itself, so document state is never
//! touched off the control thread.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// 可重複複製的取消旗標。 / Cloneable cancellation flag that can also be waited on.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        *flag.lock() = true;
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps up to `timeout`; returns `true` as soon as the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (flag, signal) = &*self.inner;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if signal.wait_until(&mut cancelled, deadline).timed_out() {
                return *cancelled;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveTick {
    pub seq: u64,
    pub at: Instant,
}

#[derive(Debug)]
pub struct AutosaveTicker {
    token: CancellationToken,
    ticks: Receiver<AutosaveTick>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl AutosaveTicker {
    pub fn start(interval: Duration) -> Self {
        let token = CancellationToken::new();
        let (tx, ticks) = mpsc::channel();
        let handle = {
            let token = token.clone();
            thread::Builder::new()
                .name("multipad-autosave".into())
                .spawn(move || {
                    let mut seq = 0;
                    while !token.wait_timeout(interval) {
                        seq += 1;
                        let tick = AutosaveTick {
                            seq,
                            at: Instant::now(),
                        };
                        if tx.send(tick).is_err() {
                            break;
                        }
                    }
                    debug!("autosave ticker stopped");
                })
                .map_err(|err| warn!(error = %err, "autosave ticker unavailable"))
                .ok()
        };
        Self {
            token,
            ticks,
            handle,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 取出累積的計時；多個累積的計時合併為一次。 / Drains queued ticks. Ticks that piled up while the control thread was busy collapse into one.
    pub fn take_due(&self) -> Option<AutosaveTick> {
        let mut latest = None;
        loop {
            match self.ticks.try_recv() {
                Ok(tick) => latest = Some(tick),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return latest,
            }
        }
    }

    pub fn stop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AutosaveTicker {
    fn drop(&mut self) {
        self.stop();
    }
}
