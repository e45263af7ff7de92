// Scheduler loop and worker thread body. Prechecks run on the scheduling
// thread with a short-lived session; each worker then owns its own client
// for the duration of one transfer.
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use filetime::FileTime;

use super::{
    ConflictSide, ManagerInner, OverwriteChoice, OverwritePrompt, TaskStatus, TransferKind,
    TransferTask,
};
use crate::client::SftpClient;
use crate::error::{ClientError, EngineError};
use crate::util::{epoch_ms, lock_unpoisoned, retry_with_backoff};

const CONNECT_ATTEMPTS: usize = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);
// Progress notifications are rate limited; state transitions always notify.
const NOTIFY_INTERVAL: Duration = Duration::from_millis(50);

enum Precheck {
    Proceed,
    Skip,
    Fail(String),
}

/// Build an isolated client for one worker task. Factory calls are
/// serialized and retried with exponential backoff.
pub(super) fn create_worker_client(
    inner: &ManagerInner,
) -> Result<Box<dyn SftpClient + Send>, EngineError> {
    let (client, opts) = {
        let q = lock_unpoisoned(&inner.queue);
        (q.client.clone(), q.session_opts.clone())
    };
    let client = client.ok_or(EngineError::NoClient)?;
    let opts = opts.ok_or(EngineError::NoSessionOptions)?;

    retry_with_backoff(CONNECT_ATTEMPTS, CONNECT_BACKOFF, |attempt| {
        let _factory = lock_unpoisoned(&inner.conn_factory);
        let base = lock_unpoisoned(&client);
        base.new_connection_like(&opts).map_err(|e| {
            tracing::debug!("worker connection attempt {} failed: {}", attempt + 1, e);
            EngineError::ConnectionFactory(e.to_string())
        })
    })
}

pub(super) fn schedule(inner: &Arc<ManagerInner>) {
    loop {
        if inner.paused.load(Ordering::SeqCst) {
            return;
        }
        if inner.running.load(Ordering::SeqCst) >= inner.max_concurrent.load(Ordering::SeqCst) {
            return;
        }

        let (task, prompt) = {
            let mut q = lock_unpoisoned(&inner.queue);
            if q.client.is_none() {
                return;
            }
            let prompt = q.overwrite_prompt.clone();
            let Some(t) = q.tasks.iter_mut().find(|t| t.status == TaskStatus::Queued) else {
                return;
            };
            t.status = TaskStatus::Running;
            t.progress = 0;
            t.error.clear();
            (t.clone(), prompt)
        };
        inner.notify_changed();
        let task_id = task.id;

        let mut resume = task.resume_hint;
        let mut pre = match create_worker_client(inner) {
            Ok(c) => c,
            Err(e) => {
                fail_task(inner, task_id, e.to_string());
                continue;
            }
        };
        let outcome = precheck(&task, pre.as_mut(), prompt.as_deref(), &mut resume);
        pre.disconnect();
        match outcome {
            Precheck::Proceed => {}
            Precheck::Skip => {
                inner.with_task(task_id, |t| {
                    t.status = TaskStatus::Done;
                    t.finished_at_ms = epoch_ms();
                });
                inner.notify_changed();
                continue;
            }
            Precheck::Fail(msg) => {
                fail_task(inner, task_id, msg);
                continue;
            }
        }

        // A previous worker for the same id may still be parked in the map;
        // join it before starting a fresh one. A worker rescheduling its own
        // id must not join itself.
        let stale = lock_unpoisoned(&inner.queue).workers.remove(&task_id);
        if let Some(old) = stale
            && old.thread().id() != std::thread::current().id()
        {
            let _ = old.join();
        }

        inner.running.fetch_add(1, Ordering::SeqCst);
        let worker_inner = Arc::clone(inner);
        let handle = std::thread::spawn(move || {
            run_transfer(&worker_inner, &task, resume);
            worker_inner.running.fetch_sub(1, Ordering::SeqCst);
            schedule(&worker_inner);
        });
        lock_unpoisoned(&inner.queue).workers.insert(task_id, handle);
    }
}

/// Resolve conflicts and ensure target parent directories before the
/// transfer starts. Runs on the scheduling thread with its own session.
fn precheck(
    task: &TransferTask,
    client: &mut dyn SftpClient,
    prompt: Option<&OverwritePrompt>,
    resume: &mut bool,
) -> Precheck {
    match task.kind {
        TransferKind::Upload => {
            match client.exists(&task.dst) {
                Err(e) => return Precheck::Fail(e.to_string()),
                Ok((true, _)) => {
                    let remote = client
                        .stat(&task.dst)
                        .map(|fi| ConflictSide { size: fi.size, mtime: fi.mtime })
                        .unwrap_or_default();
                    let local = local_side(Path::new(&task.src));
                    match ask(prompt, file_name(&task.src), &local, &remote) {
                        OverwriteChoice::Skip => return Precheck::Skip,
                        OverwriteChoice::Resume => *resume = true,
                        OverwriteChoice::Overwrite => {}
                    }
                }
                Ok((false, _)) => {}
            }
            if let Some(parent) = remote_parent(&task.dst)
                && let Err(e) = ensure_remote_dir(client, &parent)
            {
                tracing::warn!("could not prepare remote dir {}: {}", parent, e);
            }
        }
        TransferKind::Download => {
            let dst = Path::new(&task.dst);
            if dst.exists() {
                let remote = client
                    .stat(&task.src)
                    .map(|fi| ConflictSide { size: fi.size, mtime: fi.mtime })
                    .unwrap_or_default();
                let local = local_side(dst);
                match ask(prompt, file_name(&task.dst), &local, &remote) {
                    OverwriteChoice::Skip => return Precheck::Skip,
                    OverwriteChoice::Resume => *resume = true,
                    OverwriteChoice::Overwrite => {}
                }
            }
            if let Some(parent) = dst.parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!("could not prepare local dir {}: {}", parent.display(), e);
            }
        }
    }
    Precheck::Proceed
}

fn ask(
    prompt: Option<&OverwritePrompt>,
    name: &str,
    local: &ConflictSide,
    remote: &ConflictSide,
) -> OverwriteChoice {
    match prompt {
        Some(p) => p(name, local, remote),
        // No prompt installed: proceed and overwrite.
        None => OverwriteChoice::Overwrite,
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn local_side(path: &Path) -> ConflictSide {
    match std::fs::metadata(path) {
        Ok(md) => {
            let mtime = md
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            ConflictSide { size: md.len(), mtime }
        }
        Err(_) => ConflictSide::default(),
    }
}

fn remote_parent(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        return None; // parent is the root
    }
    Some(trimmed[..idx].to_string())
}

/// Walk the directory chain and mkdir each missing level. Only an
/// `exists == false` with an empty error triggers a mkdir; probe failures
/// abort the walk.
fn ensure_remote_dir(client: &mut dyn SftpClient, dir: &str) -> Result<(), ClientError> {
    let mut cur = String::from("/");
    for part in dir.split('/').filter(|s| !s.is_empty()) {
        let next =
            if cur == "/" { format!("/{}", part) } else { format!("{}/{}", cur, part) };
        match client.exists(&next)? {
            (true, _) => {}
            (false, _) => client.mkdir(&next, 0o755)?,
        }
        cur = next;
    }
    Ok(())
}

fn fail_task(inner: &ManagerInner, id: u64, message: String) {
    inner.with_task(id, |t| {
        t.status = TaskStatus::Error;
        t.error = message;
        t.finished_at_ms = epoch_ms();
    });
    inner.notify_changed();
}

struct ProgressState {
    last_done: u64,
    last_tick: Instant,
    speed_done: u64,
    speed_tick: Instant,
    last_notify: Instant,
}

impl ProgressState {
    fn new() -> Self {
        let now = Instant::now();
        Self { last_done: 0, last_tick: now, speed_done: 0, speed_tick: now, last_notify: now }
    }
}

fn run_transfer(inner: &Arc<ManagerInner>, task: &TransferTask, resume: bool) {
    let task_id = task.id;
    let mut client = match create_worker_client(inner) {
        Ok(c) => c,
        Err(e) => {
            fail_task(inner, task_id, e.to_string());
            return;
        }
    };

    inner.with_task(task_id, |t| t.attempts += 1);
    inner.notify_changed();

    let cancel_inner = Arc::clone(inner);
    let should_cancel = move || cancel_inner.should_cancel(task_id);

    let mut state = ProgressState::new();
    let progress_inner = Arc::clone(inner);
    let mut progress =
        move |done: u64, total: u64| progress_tick(&progress_inner, task_id, done, total, &mut state);

    let result = match task.kind {
        TransferKind::Upload => client.put(
            Path::new(&task.src),
            &task.dst,
            Some(&mut progress),
            Some(&should_cancel),
            resume,
        ),
        TransferKind::Download => client.get(
            &task.src,
            Path::new(&task.dst),
            Some(&mut progress),
            Some(&should_cancel),
            resume,
        ),
    };

    match result {
        Ok(()) => {
            if task.kind == TransferKind::Download {
                restore_local_mtime(client.as_mut(), &task.src, &task.dst);
            }
            inner.with_task(task_id, |t| {
                t.progress = 100;
                if t.bytes_total > 0 {
                    t.bytes_done = t.bytes_total;
                }
                t.status = TaskStatus::Done;
                t.finished_at_ms = epoch_ms();
            });
        }
        Err(e) => {
            if should_cancel() {
                let canceled = inner.is_canceled(task_id);
                inner.with_task(task_id, |t| {
                    if canceled {
                        t.status = TaskStatus::Canceled;
                        t.finished_at_ms = epoch_ms();
                    } else {
                        t.status = TaskStatus::Paused;
                    }
                });
            } else {
                fail_task(inner, task_id, e.to_string());
            }
        }
    }

    client.disconnect();
    inner.notify_changed();
}

/// Preserve the remote modification time on the downloaded copy. Failures
/// are logged, never raised.
fn restore_local_mtime(client: &mut dyn SftpClient, remote: &str, local: &str) {
    let mtime = match client.stat(remote) {
        Ok(fi) => fi.mtime,
        Err(e) => {
            tracing::debug!("stat after download failed for {}: {}", remote, e);
            return;
        }
    };
    if mtime == 0 {
        return;
    }
    let path = Path::new(local);
    if !path.exists() {
        return;
    }
    if let Err(e) = filetime::set_file_mtime(path, FileTime::from_unix_time(mtime as i64, 0)) {
        tracing::warn!("failed to set mtime for {}: {}", local, e);
    }
}

fn progress_tick(
    inner: &ManagerInner,
    id: u64,
    done: u64,
    total: u64,
    state: &mut ProgressState,
) {
    let task_limit = {
        let mut q = lock_unpoisoned(&inner.queue);
        match q.tasks.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                if total > 0 {
                    // hold back 100 until the terminal transition lands
                    t.progress = (((done.min(total) * 100) / total) as u8).min(99);
                }
                t.bytes_done = done;
                t.bytes_total = total;
                let elapsed = state.speed_tick.elapsed().as_secs_f64();
                if elapsed >= 0.1 && done >= state.speed_done {
                    let kbps = (done - state.speed_done) as f64 / elapsed / 1024.0;
                    t.current_speed_kbps = kbps;
                    t.eta_seconds = if kbps > 0.0 && total > done {
                        ((total - done) as f64 / (kbps * 1024.0)).ceil() as i64
                    } else {
                        -1
                    };
                    state.speed_done = done;
                    state.speed_tick = Instant::now();
                }
                t.speed_limit_kbps
            }
            None => 0,
        }
    };

    if state.last_notify.elapsed() >= NOTIFY_INTERVAL {
        inner.notify_changed();
        state.last_notify = Instant::now();
    }

    let global = inner.global_speed_kbps.load(Ordering::SeqCst);
    let effective = if task_limit > 0 && global > 0 {
        task_limit.min(global)
    } else if task_limit > 0 {
        task_limit
    } else {
        global
    };
    if effective > 0 && done > state.last_done {
        let delta = (done - state.last_done) as f64;
        let expected = delta / (effective as f64 * 1024.0);
        let elapsed = state.last_tick.elapsed().as_secs_f64();
        if elapsed < expected {
            let shortfall = expected - elapsed;
            if shortfall > 0.0005 {
                std::thread::sleep(Duration::from_secs_f64(shortfall));
            }
        }
        state.last_tick = Instant::now();
        state.last_done = done;
    }
}
