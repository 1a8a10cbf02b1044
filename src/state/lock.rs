use crate::state::warn::{self, WarnEvent};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(3);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

pub fn lock_path_for(resource: &Path) -> PathBuf {
    let mut raw = resource.as_os_str().to_os_string();
    raw.push(".lock");
    PathBuf::from(raw)
}

/// Scoped cross-process lock on `<resource>.lock`. The lock is released when
/// the guard drops, which also covers unwinding out of the guarded body.
///
/// When the platform offers no advisory lock, or the lock cannot be taken
/// within the wait budget, the guard is *degraded*: the body still runs and
/// racing writers may lose updates.
#[derive(Debug)]
pub struct ExclusiveAccess {
    file: Option<File>,
    lock_path: PathBuf,
}

impl ExclusiveAccess {
    pub fn acquire(resource: &Path, wait: Duration) -> Self {
        let lock_path = lock_path_for(resource);
        match try_acquire(&lock_path, wait) {
            Ok(file) => Self {
                file: Some(file),
                lock_path,
            },
            Err(err) => {
                warn::emit(WarnEvent {
                    code: "LOCK_DEGRADED",
                    component: "lock",
                    action: "acquire",
                    path: &lock_path.display().to_string(),
                    fallback: "unlocked-best-effort",
                    err: &err.to_string(),
                });
                Self {
                    file: None,
                    lock_path,
                }
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ExclusiveAccess {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

fn try_acquire(lock_path: &Path, wait: Duration) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;

    let started = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                if started.elapsed() >= wait {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("lock still contended after {}ms", wait.as_millis()),
                    ));
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run `body` while holding the exclusive lock associated with `resource`.
pub fn with_exclusive_access<T>(resource: &Path, body: impl FnOnce() -> T) -> T {
    with_exclusive_access_waiting(resource, DEFAULT_LOCK_WAIT, body)
}

pub fn with_exclusive_access_waiting<T>(
    resource: &Path,
    wait: Duration,
    body: impl FnOnce() -> T,
) -> T {
    let _guard = ExclusiveAccess::acquire(resource, wait);
    body()
}

#[cfg(test)]
mod tests {
    use super::{ExclusiveAccess, lock_path_for, with_exclusive_access};
    use fs2::FileExt;
    use std::fs::OpenOptions;
    use std::panic;
    use std::time::Duration;
    use tempfile::tempdir;

    fn lock_is_free(resource: &std::path::Path) -> bool {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path_for(resource))
            .expect("open lock");
        let free = file.try_lock_exclusive().is_ok();
        if free {
            let _ = FileExt::unlock(&file);
        }
        free
    }

    #[test]
    fn body_result_is_returned_and_lock_released() {
        let tmp = tempdir().expect("tempdir");
        let resource = tmp.path().join("usage.json");
        let out = with_exclusive_access(&resource, || {
            assert!(!lock_is_free(&resource));
            41 + 1
        });
        assert_eq!(out, 42);
        assert!(lock_is_free(&resource));
    }

    #[test]
    fn lock_is_released_when_body_panics() {
        let tmp = tempdir().expect("tempdir");
        let resource = tmp.path().join("usage.json");
        let result = panic::catch_unwind(|| {
            with_exclusive_access(&resource, || panic!("body failed"));
        });
        assert!(result.is_err());
        assert!(lock_is_free(&resource));
    }

    #[test]
    fn contended_lock_degrades_after_wait_budget() {
        let tmp = tempdir().expect("tempdir");
        let resource = tmp.path().join("usage.json");
        let held = ExclusiveAccess::acquire(&resource, Duration::from_millis(10));
        assert!(held.is_held());

        let second = ExclusiveAccess::acquire(&resource, Duration::from_millis(60));
        assert!(!second.is_held());
        drop(held);
        assert!(ExclusiveAccess::acquire(&resource, Duration::from_millis(10)).is_held());
    }

    #[test]
    fn unusable_lock_location_degrades_to_no_op() {
        let tmp = tempdir().expect("tempdir");
        let blocker = tmp.path().join("plain-file");
        std::fs::write(&blocker, "x").expect("write");
        let resource = blocker.join("usage.json");
        let ran = with_exclusive_access(&resource, || true);
        assert!(ran);
    }
}
