//! Background hot updates.
//!
//! A [`HotUpdater`] owns one worker thread that polls a [`SnapshotSource`]:
//!
//! ```text
//!            start()                      stop()
//!   Idle ─────────────▶ Polling ─────────────────▶ Idle
//!                        │   ▲
//!              fetch ok/ │   │ wait current_delay
//!              fetch err ▼   │
//!                       cycle
//! ```
//!
//! A successful cycle whose checksum differs from the last delivered one
//! invokes the update callback; an unchanged checksum is silent. Failures
//! go to the error callback and widen the polling interval exponentially up
//! to `max_interval`; the next success resets it.
//!
//! A panic in the source or in a callback is caught on the worker. A
//! panicking fetch counts as a failed cycle; a panicking callback is
//! logged and polling continues.
//!
//! [`HotUpdater::refresh_once`] asks the worker for an extra fetch between
//! cycles. It delivers a changed snapshot like a cycle would but leaves the
//! backoff alone and does not invoke the error callback.

use crate::config::HotUpdateConfig;
use crate::error::{CfenvError, CfenvResult};
use crate::fetcher::SnapshotSource;
use crate::snapshot::Snapshot;
use crate::transport::CancelToken;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "cfenv-hot-updater";

/// Poll granularity of a bounded [`HotUpdater::stop`].
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Callback invoked with each new snapshot.
pub type UpdateCallback = Box<dyn FnMut(&Snapshot, UpdateReason) + Send>;

/// Callback invoked with each failed cycle.
pub type ErrorCallback = Box<dyn FnMut(&CfenvError) + Send>;

/// Why an update callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    /// First delivery, from the bootstrap cycle.
    Initial,
    /// The remote checksum changed.
    Changed,
}

impl UpdateReason {
    /// Returns the reason as a lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateReason::Initial => "initial",
            UpdateReason::Changed => "changed",
        }
    }
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of an updater's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdaterStatus {
    /// Whether the updater is started.
    pub running: bool,
    /// Completed refresh cycles, successful or not.
    pub cycles: u64,
    /// Failed cycles in a row.
    pub consecutive_errors: u32,
    /// Delay before the next cycle.
    pub current_delay: Duration,
    /// Checksum of the last delivered snapshot.
    pub last_checksum: Option<String>,
    /// Message of the most recent failure; cleared on success.
    pub last_error: Option<String>,
}

/// Result of one refresh cycle, as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A new checksum was seen; the snapshot should be delivered.
    Changed,
    /// Same checksum as the last delivery.
    Unchanged,
    /// The fetch failed.
    Failed,
}

/// Polling state of one worker.
///
/// Owned by the worker alone; [`UpdaterStatus`] is the published copy.
#[derive(Debug, Clone)]
pub struct RefreshState {
    config: HotUpdateConfig,
    last_checksum: Option<String>,
    consecutive_errors: u32,
    current_delay: Duration,
    cycles: u64,
}

impl RefreshState {
    /// Creates the initial state for a configuration.
    pub fn new(config: HotUpdateConfig) -> Self {
        let config = config.normalized();
        Self {
            current_delay: config.interval,
            config,
            last_checksum: None,
            consecutive_errors: 0,
            cycles: 0,
        }
    }

    /// Records a successful fetch of a snapshot with `checksum`.
    pub fn record_success(&mut self, checksum: &str) -> CycleOutcome {
        self.cycles += 1;
        self.consecutive_errors = 0;
        self.current_delay = self.config.interval;
        self.observe(checksum)
    }

    /// Compares `checksum` with the last delivered one without touching
    /// the cycle count or the backoff.
    pub fn observe(&mut self, checksum: &str) -> CycleOutcome {
        if self.last_checksum.as_deref() == Some(checksum) {
            CycleOutcome::Unchanged
        } else {
            self.last_checksum = Some(checksum.to_string());
            CycleOutcome::Changed
        }
    }

    /// Records a failed fetch and widens the delay.
    pub fn record_failure(&mut self) -> CycleOutcome {
        self.cycles += 1;
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.current_delay = self.config.delay_after_failures(self.consecutive_errors);
        CycleOutcome::Failed
    }

    /// Delay before the next cycle.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Failed cycles in a row.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Checksum of the last delivered snapshot.
    pub fn last_checksum(&self) -> Option<&str> {
        self.last_checksum.as_deref()
    }

    /// Completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn status(&self, running: bool, last_error: Option<String>) -> UpdaterStatus {
        UpdaterStatus {
            running,
            cycles: self.cycles,
            consecutive_errors: self.consecutive_errors,
            current_delay: self.current_delay,
            last_checksum: self.last_checksum.clone(),
            last_error,
        }
    }
}

struct Callbacks {
    on_update: UpdateCallback,
    on_error: Option<ErrorCallback>,
}

enum Command {
    Stop,
    Refresh(Sender<CfenvResult<bool>>),
}

#[derive(Default)]
struct Control {
    commands: Option<Sender<Command>>,
    cancel: Option<CancelToken>,
    handle: Option<JoinHandle<()>>,
}

/// Keeps a snapshot up to date by polling in the background.
///
/// Callbacks run sequentially on the worker thread. Once
/// [`stop`](Self::stop) returns `true`, no further callback fires.
pub struct HotUpdater {
    source: Arc<dyn SnapshotSource>,
    config: HotUpdateConfig,
    callbacks: Arc<Mutex<Callbacks>>,
    running: Arc<AtomicBool>,
    status: Arc<RwLock<UpdaterStatus>>,
    current: Arc<RwLock<Option<Arc<Snapshot>>>>,
    worker_thread: Arc<Mutex<Option<ThreadId>>>,
    control: Mutex<Control>,
}

impl HotUpdater {
    /// Creates a stopped updater.
    pub fn new<U>(
        source: Arc<dyn SnapshotSource>,
        on_update: U,
        on_error: Option<ErrorCallback>,
        config: HotUpdateConfig,
    ) -> Self
    where
        U: FnMut(&Snapshot, UpdateReason) + Send + 'static,
    {
        let config = config.normalized();
        let status = UpdaterStatus {
            current_delay: config.interval,
            ..UpdaterStatus::default()
        };
        Self {
            source,
            config,
            callbacks: Arc::new(Mutex::new(Callbacks {
                on_update: Box::new(on_update),
                on_error,
            })),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(status)),
            current: Arc::new(RwLock::new(None)),
            worker_thread: Arc::new(Mutex::new(None)),
            control: Mutex::new(Control::default()),
        }
    }

    /// Returns the effective configuration.
    pub fn config(&self) -> &HotUpdateConfig {
        &self.config
    }

    /// Starts the worker. Does nothing if already running.
    ///
    /// A worker left detached by a timed-out [`stop`](Self::stop) is joined
    /// first, so two workers never poll at once.
    pub fn start(&self) -> std::io::Result<()> {
        let mut control = self.control.lock();
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(previous) = control.handle.take() {
            join_worker(previous);
        }

        let (commands_tx, commands) = mpsc::channel();
        let cancel = CancelToken::new();
        let worker = Worker {
            source: Arc::clone(&self.source),
            callbacks: Arc::clone(&self.callbacks),
            status: Arc::clone(&self.status),
            current: Arc::clone(&self.current),
            worker_thread: Arc::clone(&self.worker_thread),
            running: Arc::clone(&self.running),
            state: RefreshState::new(self.config.clone()),
            bootstrap: self.config.bootstrap,
            cancel: cancel.clone(),
            commands,
        };

        self.running.store(true, Ordering::SeqCst);
        *self.status.write() = worker.state.status(true, None);

        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run());
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.status.write().running = false;
                return Err(e);
            }
        };

        control.commands = Some(commands_tx);
        control.cancel = Some(cancel);
        control.handle = Some(handle);
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            max_interval_ms = self.config.max_interval.as_millis() as u64,
            bootstrap = self.config.bootstrap,
            "hot updater started"
        );
        Ok(())
    }

    /// Stops the worker and waits for it.
    ///
    /// With `None` the wait is unbounded. With a timeout the worker is left
    /// detached if it has not finished in time; it exits at its next check
    /// without further callbacks, and a later `stop(None)` joins it.
    /// Returns `true` once no worker remains.
    pub fn stop(&self, timeout: Option<Duration>) -> bool {
        let mut control = self.control.lock();
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
        }
        if let Some(commands) = control.commands.take() {
            let _ = commands.send(Command::Stop);
        }
        self.status.write().running = false;

        let Some(handle) = control.handle.take() else {
            return true;
        };

        let joined = match timeout {
            None => {
                join_worker(handle);
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !handle.is_finished() && Instant::now() < deadline {
                    thread::sleep(JOIN_POLL.min(timeout));
                }
                if handle.is_finished() {
                    join_worker(handle);
                    true
                } else {
                    control.handle = Some(handle);
                    false
                }
            }
        };

        if was_running {
            info!(joined, "hot updater stopped");
        }
        joined
    }

    /// Returns true between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns a copy of the current status.
    pub fn status(&self) -> UpdaterStatus {
        self.status.read().clone()
    }

    /// Returns the last snapshot handed to the update callback.
    ///
    /// Survives [`stop`](Self::stop) and restarts; `None` until the first
    /// delivery.
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    /// Fetches once on the worker, outside the polling schedule.
    ///
    /// Returns `Ok(true)` if the snapshot changed and was delivered with
    /// [`UpdateReason::Changed`], `Ok(false)` if the checksum was already
    /// delivered. A failed fetch is returned here; it does not reach the
    /// error callback or change the polling delay. Blocks until the worker
    /// has served the request, so it must not be called from a callback.
    pub fn refresh_once(&self) -> CfenvResult<bool> {
        if *self.worker_thread.lock() == Some(thread::current().id()) {
            return Err(CfenvError::ReentrantRefresh);
        }
        let commands = {
            let control = self.control.lock();
            if !self.running.load(Ordering::SeqCst) {
                return Err(CfenvError::NotRunning);
            }
            control.commands.clone().ok_or(CfenvError::NotRunning)?
        };

        let (reply_tx, reply_rx) = mpsc::channel();
        commands
            .send(Command::Refresh(reply_tx))
            .map_err(|_| CfenvError::NotRunning)?;
        reply_rx.recv().unwrap_or(Err(CfenvError::Cancelled))
    }
}

impl Drop for HotUpdater {
    fn drop(&mut self) {
        self.stop(Some(Duration::ZERO));
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("hot updater worker panicked");
    }
}

/// Extracts a readable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Worker {
    source: Arc<dyn SnapshotSource>,
    callbacks: Arc<Mutex<Callbacks>>,
    status: Arc<RwLock<UpdaterStatus>>,
    current: Arc<RwLock<Option<Arc<Snapshot>>>>,
    worker_thread: Arc<Mutex<Option<ThreadId>>>,
    running: Arc<AtomicBool>,
    state: RefreshState,
    bootstrap: bool,
    cancel: CancelToken,
    commands: Receiver<Command>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        // A worker unwinding past its own guards leaves nothing polling.
        if thread::panicking() {
            self.running.store(false, Ordering::SeqCst);
            self.status.write().running = false;
        }
    }
}

impl Worker {
    fn run(mut self) {
        *self.worker_thread.lock() = Some(thread::current().id());
        let mut reason = UpdateReason::Initial;
        if !self.bootstrap {
            reason = UpdateReason::Changed;
            if self.wait(self.state.current_delay()) {
                return;
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.cycle(reason);
            reason = UpdateReason::Changed;
            if self.wait(self.state.current_delay()) {
                break;
            }
        }
        debug!("hot updater worker exiting");
    }

    /// Waits for `delay` while serving refresh requests; returns true if
    /// the updater was stopped.
    fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.commands.recv_timeout(remaining) {
                Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => return true,
                Ok(Command::Refresh(reply)) => {
                    let result = self.refresh_on_demand();
                    let _ = reply.send(result);
                    if self.cancel.is_cancelled() {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return self.cancel.is_cancelled(),
            }
        }
    }

    fn fetch(&self) -> CfenvResult<Snapshot> {
        panic::catch_unwind(AssertUnwindSafe(|| self.source.fetch(&self.cancel)))
            .unwrap_or_else(|payload| Err(CfenvError::Panic(panic_message(payload.as_ref()))))
    }

    fn cycle(&mut self, reason: UpdateReason) {
        let result = self.fetch();
        if self.cancel.is_cancelled() {
            return;
        }

        let last_error = match result {
            Ok(snapshot) => {
                match self.state.record_success(snapshot.checksum()) {
                    CycleOutcome::Changed => self.deliver(snapshot, reason),
                    _ => debug!("snapshot unchanged"),
                }
                None
            }
            Err(error) => {
                self.state.record_failure();
                warn!(
                    error = %error,
                    consecutive_errors = self.state.consecutive_errors(),
                    next_delay_ms = self.state.current_delay().as_millis() as u64,
                    "refresh cycle failed"
                );
                self.report(&error);
                Some(error.to_string())
            }
        };
        self.publish(last_error);
    }

    fn refresh_on_demand(&mut self) -> CfenvResult<bool> {
        let snapshot = self.fetch()?;
        self.cancel.check()?;

        let changed = self.state.observe(snapshot.checksum()) == CycleOutcome::Changed;
        if changed {
            self.deliver(snapshot, UpdateReason::Changed);
        } else {
            debug!("on-demand refresh found no change");
        }
        let last_error = self.status.read().last_error.clone();
        self.publish(last_error);
        Ok(changed)
    }

    fn deliver(&self, snapshot: Snapshot, reason: UpdateReason) {
        let snapshot = Arc::new(snapshot);
        let mut callbacks = self.callbacks.lock();
        // stop() may have run while the lock was contended.
        if self.cancel.is_cancelled() {
            return;
        }
        *self.current.write() = Some(Arc::clone(&snapshot));
        info!(
            reason = %reason,
            entries = snapshot.len(),
            updated_at = %snapshot.metadata.updated_at,
            "snapshot updated"
        );
        let on_update = &mut callbacks.on_update;
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| on_update(&*snapshot, reason)));
        if let Err(payload) = delivered {
            warn!(panic = %panic_message(payload.as_ref()), "update callback panicked");
        }
    }

    fn report(&self, error: &CfenvError) {
        let mut callbacks = self.callbacks.lock();
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(on_error) = callbacks.on_error.as_mut() else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| on_error(error))) {
            warn!(panic = %panic_message(payload.as_ref()), "error callback panicked");
        }
    }

    fn publish(&self, last_error: Option<String>) {
        let running = self.running.load(Ordering::SeqCst);
        *self.status.write() = self.state.status(running, last_error);
    }
}
