use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
/// Queue state stays usable even if a worker panics mid-update.
pub(crate) fn lock_unpoisoned<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Convert a byte count into a human readable string using IEC units
/// (KiB/MiB/GiB). Used when formatting conflict-prompt side information.
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Current wall-clock time as epoch milliseconds.
pub fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Retry `op` up to `attempts` times with exponential backoff
/// `base * 2^i` between attempts. The closure receives the 0-based attempt
/// index so callers can log per-attempt context.
pub fn retry_with_backoff<T, E, F>(attempts: usize, base: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Result<T, E>,
{
    let mut last_err: Option<E> = None;
    for i in 0..attempts.max(1) {
        match op(i) {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if i + 1 < attempts {
                    std::thread::sleep(base * (1u32 << i));
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt runs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.00 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.00 MiB");
    }

    #[test]
    fn retry_succeeds_after_transient_failures() {
        let mut calls = 0usize;
        let res: Result<usize, &str> = retry_with_backoff(3, Duration::from_millis(1), |i| {
            calls += 1;
            if i < 2 { Err("transient") } else { Ok(i) }
        });
        assert_eq!(res, Ok(2));
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_returns_last_error() {
        let res: Result<(), String> =
            retry_with_backoff(3, Duration::from_millis(1), |i| Err(format!("attempt {}", i)));
        assert_eq!(res.unwrap_err(), "attempt 2");
    }
}
