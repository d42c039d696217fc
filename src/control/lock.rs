use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use fs4::FileExt;
use tracing::{debug, warn};

use crate::util::ensure_directory;

/// Exclusive claim on the data directory for the lifetime of one harvest.
///
/// The claim is an advisory lock on the open lock file, so the OS drops it
/// when the owner exits. The file content is the owner's pid, for `status`
/// and `kill`. Dropping the guard removes the file.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    pid: u32,
    file: File,
}

impl WriterLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        let pid = std::process::id();
        for _ in 0..3 {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .with_context(|| format!("failed to open lock {}", path.display()))?;

            if let Err(error) = file.try_lock_exclusive() {
                if error.kind() == ErrorKind::WouldBlock {
                    let owner = read_lock_owner(path)?
                        .map(|owner| owner.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    bail!(
                        "another harvest (pid {owner}) is writing; lock held at {}",
                        path.display()
                    );
                }
                return Err(error)
                    .with_context(|| format!("failed to lock {}", path.display()));
            }

            // A releasing writer may have unlinked the file we opened.
            if !is_current_file(&file, path)? {
                debug!(path = %path.display(), "lock file replaced while acquiring, retrying");
                continue;
            }

            let mut previous = String::new();
            file.read_to_string(&mut previous)
                .with_context(|| format!("failed to read lock {}", path.display()))?;
            match previous.trim() {
                "" => {}
                raw => match raw.parse::<u32>() {
                    Ok(owner) => {
                        warn!(path = %path.display(), owner, "reclaiming stale writer lock")
                    }
                    Err(_) => warn!(path = %path.display(), "reclaiming garbled writer lock"),
                },
            }

            file.set_len(0)
                .with_context(|| format!("failed to truncate lock {}", path.display()))?;
            file.seek(SeekFrom::Start(0))
                .with_context(|| format!("failed to rewind lock {}", path.display()))?;
            writeln!(file, "{pid}")
                .with_context(|| format!("failed to write lock {}", path.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to sync lock {}", path.display()))?;

            debug!(path = %path.display(), pid, "writer lock acquired");
            return Ok(Self {
                path: path.to_path_buf(),
                pid,
                file,
            });
        }

        bail!("could not acquire writer lock at {}", path.display())
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        // Unlink while still holding the lock; the handle closes afterwards.
        if matches!(is_current_file(&self.file, &self.path), Ok(true)) {
            if let Err(error) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %error, "failed to release writer lock");
            }
        }
    }
}

fn is_current_file(file: &File, path: &Path) -> Result<bool> {
    let held = file
        .metadata()
        .with_context(|| format!("failed to stat lock {}", path.display()))?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error).with_context(|| format!("failed to stat lock {}", path.display())),
    }
}

/// The pid recorded in the lock file; `None` when there is no lock or its
/// content is not a pid.
pub fn read_lock_owner(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(raw.trim().parse::<u32>().ok()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error).with_context(|| format!("failed to read lock {}", path.display())),
    }
}

pub fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    if pid == 0 {
        return false;
    }

    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Asks the process to terminate (SIGTERM).
pub fn terminate(pid: u32) -> Result<()> {
    let status = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status()
        .with_context(|| format!("failed to run kill for pid {pid}"))?;

    if !status.success() {
        bail!("kill -TERM {pid} exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_records_pid_and_is_released_on_drop() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("state").join("writer.lock");

        {
            let lock = WriterLock::acquire(&path).expect("lock should be acquired");
            assert_eq!(lock.pid(), std::process::id());
            assert_eq!(
                read_lock_owner(&path).expect("lock readable"),
                Some(std::process::id())
            );
        }

        assert!(!path.exists());
    }

    #[test]
    fn live_owner_refuses_second_writer() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("writer.lock");

        let _held = WriterLock::acquire(&path).expect("first lock");
        let second = WriterLock::acquire(&path);
        assert!(second.is_err());
        assert!(path.exists());
    }

    #[test]
    fn stale_or_garbled_lock_is_reclaimed() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("writer.lock");

        fs::write(&path, "not-a-pid\n").expect("seed lock");
        let lock = WriterLock::acquire(&path).expect("garbled lock reclaimed");
        drop(lock);

        fs::write(&path, "4000000000\n").expect("seed lock");
        let lock = WriterLock::acquire(&path).expect("dead owner reclaimed");
        assert_eq!(read_lock_owner(&path).expect("readable"), Some(lock.pid()));
    }

    #[test]
    fn concurrent_reclaim_of_stale_lock_admits_one_writer() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("writer.lock");

        for _ in 0..50 {
            fs::write(&path, "4000000000\n").expect("seed lock");
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let barrier = Arc::clone(&barrier);
                    let path = path.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        WriterLock::acquire(&path)
                    })
                })
                .collect();

            let results: Vec<Result<WriterLock>> = handles
                .into_iter()
                .map(|handle| handle.join().expect("thread should not panic"))
                .collect();
            assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
            drop(results);
            assert!(!path.exists());
        }
    }

    #[test]
    fn missing_lock_has_no_owner() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(read_lock_owner(&dir.path().join("none.lock")).expect("ok"), None);
    }
}
