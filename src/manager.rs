// Transfer queue manager: schedules concurrent upload/download workers,
// each with its own SFTP session, and exposes thread-safe snapshots plus a
// coalesceable change-notification channel.
mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;

use crate::client::SharedClient;
use crate::types::SessionOptions;
use crate::util::{epoch_ms, human_bytes, lock_unpoisoned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferKind {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Queued,
    Running,
    Paused,
    Done,
    Error,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error | TaskStatus::Canceled)
    }
}

/// One queued transfer. `src` is local for uploads and remote for
/// downloads; `dst` is the opposite side.
#[derive(Debug, Clone, Serialize)]
pub struct TransferTask {
    /// Stable identifier for cross-thread updates.
    pub id: u64,
    pub kind: TransferKind,
    pub src: String,
    pub dst: String,
    /// If true, the next attempt tries byte-range continuation.
    pub resume_hint: bool,
    /// KB/s; 0 = unlimited.
    pub speed_limit_kbps: u32,
    /// 0..=100.
    pub progress: u8,
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// Measured over recent progress ticks.
    pub current_speed_kbps: f64,
    /// -1 = unknown.
    pub eta_seconds: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: TaskStatus,
    pub error: String,
    /// Epoch ms of the terminal transition; 0 while non-terminal.
    pub finished_at_ms: i64,
}

impl TransferTask {
    fn new(id: u64, kind: TransferKind, src: String, dst: String) -> Self {
        Self {
            id,
            kind,
            src,
            dst,
            resume_hint: false,
            speed_limit_kbps: 0,
            progress: 0,
            bytes_done: 0,
            bytes_total: 0,
            current_speed_kbps: 0.0,
            eta_seconds: -1,
            attempts: 0,
            max_attempts: 3,
            status: TaskStatus::Queued,
            error: String::new(),
            finished_at_ms: 0,
        }
    }
}

/// User decision when the transfer target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteChoice {
    Skip,
    Overwrite,
    Resume,
}

/// Size/mtime summary of one side of a conflict, shown in the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictSide {
    pub size: u64,
    /// Epoch seconds; 0 = unknown.
    pub mtime: u64,
}

impl std::fmt::Display for ConflictSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.mtime > 0 {
            write!(f, "{} ({} bytes), mtime {}", human_bytes(self.size), self.size, self.mtime)
        } else {
            write!(f, "{} ({} bytes), mtime ?", human_bytes(self.size), self.size)
        }
    }
}

/// Conflict prompt: (filename, local side, remote side) -> decision. The
/// scheduler blocks on it during precheck; implementations that need the UI
/// thread marshal internally (e.g. a channel round-trip) before returning.
pub type OverwritePrompt = dyn Fn(&str, &ConflictSide, &ConflictSide) -> OverwriteChoice + Send + Sync;

pub(crate) struct QueueState {
    pub(crate) tasks: Vec<TransferTask>,
    pub(crate) paused_tasks: HashSet<u64>,
    pub(crate) canceled_tasks: HashSet<u64>,
    pub(crate) workers: HashMap<u64, JoinHandle<()>>,
    pub(crate) client: Option<SharedClient>,
    pub(crate) session_opts: Option<SessionOptions>,
    pub(crate) overwrite_prompt: Option<Arc<OverwritePrompt>>,
    pub(crate) next_id: u64,
}

pub(crate) struct ManagerInner {
    // Protects tasks, the auxiliary sets, the workers map, the injected
    // client and the stored session options.
    pub(crate) queue: Mutex<QueueState>,
    // Serializes new_connection_like across worker threads; backends may
    // not tolerate concurrent session setup.
    pub(crate) conn_factory: Mutex<()>,
    pub(crate) paused: AtomicBool,
    pub(crate) running: AtomicUsize,
    pub(crate) global_speed_kbps: AtomicU32,
    pub(crate) max_concurrent: AtomicUsize,
    pub(crate) changed_tx: Sender<()>,
    pub(crate) changed_rx: Receiver<()>,
}

impl ManagerInner {
    pub(crate) fn notify_changed(&self) {
        let _ = self.changed_tx.send(());
    }

    /// Run `f` on the task with the given id, if it still exists.
    pub(crate) fn with_task<R>(&self, id: u64, f: impl FnOnce(&mut TransferTask) -> R) -> Option<R> {
        let mut q = lock_unpoisoned(&self.queue);
        q.tasks.iter_mut().find(|t| t.id == id).map(f)
    }

    pub(crate) fn is_canceled(&self, id: u64) -> bool {
        lock_unpoisoned(&self.queue).canceled_tasks.contains(&id)
    }

    pub(crate) fn is_paused_task(&self, id: u64) -> bool {
        lock_unpoisoned(&self.queue).paused_tasks.contains(&id)
    }

    /// Cancel predicate handed to backend transfers: global pause, per-task
    /// pause, or per-task cancel.
    pub(crate) fn should_cancel(&self, id: u64) -> bool {
        if self.paused.load(Ordering::SeqCst) {
            return true;
        }
        let q = lock_unpoisoned(&self.queue);
        q.canceled_tasks.contains(&id) || q.paused_tasks.contains(&id)
    }
}

pub struct TransferManager {
    inner: Arc<ManagerInner>,
}

impl Default for TransferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferManager {
    pub fn new() -> Self {
        let (changed_tx, changed_rx) = unbounded();
        Self {
            inner: Arc::new(ManagerInner {
                queue: Mutex::new(QueueState {
                    tasks: Vec::new(),
                    paused_tasks: HashSet::new(),
                    canceled_tasks: HashSet::new(),
                    workers: HashMap::new(),
                    client: None,
                    session_opts: None,
                    overwrite_prompt: None,
                    next_id: 1,
                }),
                conn_factory: Mutex::new(()),
                paused: AtomicBool::new(false),
                running: AtomicUsize::new(0),
                global_speed_kbps: AtomicU32::new(0),
                max_concurrent: AtomicUsize::new(2),
                changed_tx,
                changed_rx,
            }),
        }
    }

    /// Inject the client the worker factory derives sessions from. Not
    /// owned by the manager; the caller keeps it alive until
    /// [`Self::clear_client`].
    pub fn set_client(&self, client: SharedClient) {
        lock_unpoisoned(&self.inner.queue).client = Some(client);
    }

    /// Session options used to create independent worker connections.
    pub fn set_session_options(&self, opts: SessionOptions) {
        lock_unpoisoned(&self.inner.queue).session_opts = Some(opts);
    }

    pub fn set_overwrite_prompt(
        &self,
        prompt: impl Fn(&str, &ConflictSide, &ConflictSide) -> OverwriteChoice + Send + Sync + 'static,
    ) {
        lock_unpoisoned(&self.inner.queue).overwrite_prompt = Some(Arc::new(prompt));
    }

    /// Pause the queue, join every worker, then drop the injected client
    /// and session options.
    pub fn clear_client(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        self.join_workers();
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            q.client = None;
            q.session_opts = None;
        }
        self.inner.running.store(0, Ordering::SeqCst);
    }

    pub fn set_max_concurrent(&self, n: usize) {
        self.inner.max_concurrent.store(n.max(1), Ordering::SeqCst);
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent.load(Ordering::SeqCst)
    }

    /// Global speed limit in KB/s; 0 = unlimited. Honored on the next
    /// progress tick of every running transfer.
    pub fn set_global_speed_limit_kbps(&self, kbps: u32) {
        self.inner.global_speed_kbps.store(kbps, Ordering::SeqCst);
    }

    pub fn global_speed_limit_kbps(&self) -> u32 {
        self.inner.global_speed_kbps.load(Ordering::SeqCst)
    }

    pub fn is_queue_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Coalesceable change notifications. Listeners read actual state via
    /// [`Self::tasks_snapshot`]; one receiver is expected to drain this.
    pub fn change_events(&self) -> Receiver<()> {
        self.inner.changed_rx.clone()
    }

    pub fn enqueue_upload(&self, local: impl Into<String>, remote: impl Into<String>) -> u64 {
        self.enqueue(TransferKind::Upload, local.into(), remote.into())
    }

    pub fn enqueue_download(&self, remote: impl Into<String>, local: impl Into<String>) -> u64 {
        self.enqueue(TransferKind::Download, remote.into(), local.into())
    }

    fn enqueue(&self, kind: TransferKind, src: String, dst: String) -> u64 {
        let id = {
            let mut q = lock_unpoisoned(&self.inner.queue);
            let id = q.next_id;
            q.next_id += 1;
            q.tasks.push(TransferTask::new(id, kind, src, dst));
            id
        };
        self.inner.notify_changed();
        if !self.is_queue_paused() {
            self.schedule();
        }
        id
    }

    /// Attempt to launch queued tasks up to the concurrency ceiling.
    /// Idempotent and callable from any thread; concurrent invocations are
    /// coalesced by the queue mutex and the bounded running counter.
    pub fn schedule(&self) {
        worker::schedule(&self.inner);
    }

    /// Thread-safe deep copy of the task list.
    pub fn tasks_snapshot(&self) -> Vec<TransferTask> {
        lock_unpoisoned(&self.inner.queue).tasks.clone()
    }

    /// Pause the whole queue. Running workers observe the flag through
    /// their cancel predicate and finish with status Paused.
    pub fn pause_all(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        self.inner.notify_changed();
    }

    pub fn resume_all(&self) {
        let mut changed = self.inner.paused.swap(false, Ordering::SeqCst);
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            let q = &mut *q;
            for t in q.tasks.iter_mut() {
                if t.status == TaskStatus::Paused {
                    t.status = TaskStatus::Queued;
                    t.resume_hint = true;
                    q.paused_tasks.remove(&t.id);
                    changed = true;
                }
            }
        }
        if changed {
            self.inner.notify_changed();
        }
        self.schedule();
    }

    pub fn pause_task(&self, id: u64) {
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            if q.canceled_tasks.contains(&id) {
                return;
            }
            let q = &mut *q;
            if let Some(t) = q.tasks.iter_mut().find(|t| t.id == id)
                && matches!(t.status, TaskStatus::Queued | TaskStatus::Running)
            {
                q.paused_tasks.insert(id);
                t.status = TaskStatus::Paused;
            }
        }
        self.inner.notify_changed();
    }

    pub fn resume_task(&self, id: u64) {
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            q.paused_tasks.remove(&id);
            if let Some(t) = q.tasks.iter_mut().find(|t| t.id == id)
                && t.status == TaskStatus::Paused
            {
                t.status = TaskStatus::Queued;
                t.resume_hint = true;
            }
        }
        self.inner.notify_changed();
        self.schedule();
    }

    pub fn cancel_task(&self, id: u64) {
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            q.canceled_tasks.insert(id);
            q.paused_tasks.remove(&id);
            if let Some(t) = q.tasks.iter_mut().find(|t| t.id == id)
                && !t.status.is_terminal()
            {
                t.status = TaskStatus::Canceled;
                t.finished_at_ms = epoch_ms();
            }
        }
        self.inner.notify_changed();
    }

    /// Cancel every non-terminal task; running workers stop at the next
    /// cancel-predicate poll.
    pub fn cancel_all(&self) {
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            let q = &mut *q;
            for t in q.tasks.iter_mut() {
                if !t.status.is_terminal() {
                    q.canceled_tasks.insert(t.id);
                    q.paused_tasks.remove(&t.id);
                    t.status = TaskStatus::Canceled;
                    t.finished_at_ms = epoch_ms();
                }
            }
        }
        self.inner.notify_changed();
    }

    /// Requeue every task in Error or Canceled with counters reset.
    pub fn retry_failed(&self) {
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            let q = &mut *q;
            for t in q.tasks.iter_mut() {
                if matches!(t.status, TaskStatus::Error | TaskStatus::Canceled) {
                    reset_for_retry(t);
                    q.canceled_tasks.remove(&t.id);
                }
            }
        }
        self.inner.notify_changed();
        self.schedule();
    }

    pub fn retry_task(&self, id: u64) {
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            let q = &mut *q;
            if let Some(t) = q.tasks.iter_mut().find(|t| t.id == id)
                && matches!(t.status, TaskStatus::Error | TaskStatus::Canceled)
            {
                reset_for_retry(t);
                q.canceled_tasks.remove(&id);
            }
        }
        self.inner.notify_changed();
        self.schedule();
    }

    pub fn clear_completed(&self) {
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            q.tasks.retain(|t| t.status != TaskStatus::Done);
        }
        self.inner.notify_changed();
    }

    pub fn clear_failed_canceled(&self) {
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            let QueueState { tasks, canceled_tasks, .. } = &mut *q;
            tasks.retain(|t| {
                let drop = matches!(t.status, TaskStatus::Error | TaskStatus::Canceled);
                if drop {
                    canceled_tasks.remove(&t.id);
                }
                !drop
            });
        }
        self.inner.notify_changed();
    }

    /// Purge terminal tasks whose terminal transition is older than
    /// `minutes`. The two flags select which terminal families to purge.
    pub fn clear_finished_older_than(
        &self,
        minutes: i64,
        clear_done: bool,
        clear_failed_canceled: bool,
    ) {
        let cutoff = epoch_ms() - minutes.max(0) * 60_000;
        {
            let mut q = lock_unpoisoned(&self.inner.queue);
            let QueueState { tasks, canceled_tasks, .. } = &mut *q;
            tasks.retain(|t| {
                let selected = match t.status {
                    TaskStatus::Done => clear_done,
                    TaskStatus::Error | TaskStatus::Canceled => clear_failed_canceled,
                    _ => false,
                };
                let drop = selected && t.finished_at_ms > 0 && t.finished_at_ms <= cutoff;
                if drop {
                    canceled_tasks.remove(&t.id);
                }
                !drop
            });
        }
        self.inner.notify_changed();
    }

    /// Per-task speed limit in KB/s; 0 = unlimited. When both a task and a
    /// global limit are set the lower one wins.
    pub fn set_task_speed_limit(&self, id: u64, kbps: u32) {
        self.inner.with_task(id, |t| t.speed_limit_kbps = kbps);
        self.inner.notify_changed();
    }

    fn join_workers(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut q = lock_unpoisoned(&self.inner.queue);
            q.workers.drain().map(|(_, h)| h).collect()
        };
        for h in handles {
            let _ = h.join();
        }
    }
}

fn reset_for_retry(t: &mut TransferTask) {
    t.status = TaskStatus::Queued;
    t.attempts = 0;
    t.progress = 0;
    t.bytes_done = 0;
    t.current_speed_kbps = 0.0;
    t.eta_seconds = -1;
    t.error.clear();
    t.finished_at_ms = 0;
}

impl Drop for TransferManager {
    fn drop(&mut self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        self.join_workers();
    }
}
