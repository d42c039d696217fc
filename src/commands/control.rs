use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::KillArgs;
use crate::context::DataLayout;
use crate::control::lock::{process_alive, read_lock_owner, terminate};
use crate::control::{CheckpointStore, CommandFile};
use crate::model::ControlAction;
use crate::util::remove_file_if_exists;

const KILL_GRACE: Duration = Duration::from_secs(2);
const KILL_POLL: Duration = Duration::from_millis(200);

/// Writes a pause or stop request for the running harvest.
pub fn request(layout: &DataLayout, action: ControlAction) -> Result<()> {
    let owner = read_lock_owner(&layout.lock_path())?;
    if !owner.is_some_and(process_alive) {
        warn!(
            action = action.as_str(),
            "no running harvest found; the command will be discarded by the next run"
        );
    }

    let command = CommandFile::new(layout.command_path()).issue(action)?;
    info!(
        action = command.action.as_str(),
        issued_at = %command.timestamp,
        path = %layout.command_path().display(),
        "control command written; it takes effect at the next year boundary"
    );
    Ok(())
}

pub fn kill(layout: &DataLayout, args: KillArgs) -> Result<()> {
    if !args.confirm {
        bail!("kill terminates the running harvest immediately; pass --confirm to proceed");
    }

    let lock_path = layout.lock_path();
    let Some(pid) = read_lock_owner(&lock_path)? else {
        bail!("no harvest writer lock at {}", lock_path.display());
    };

    if !process_alive(pid) {
        remove_file_if_exists(&lock_path)?;
        info!(pid, "writer already gone, removed stale lock");
        return Ok(());
    }

    terminate(pid)?;
    info!(pid, "sent SIGTERM to harvest");

    let mut waited = Duration::ZERO;
    while process_alive(pid) && waited < KILL_GRACE {
        thread::sleep(KILL_POLL);
        waited += KILL_POLL;
    }

    if process_alive(pid) {
        warn!(pid, "harvest still alive after grace period");
        return Ok(());
    }

    if remove_file_if_exists(&lock_path)? {
        info!(path = %lock_path.display(), "removed writer lock");
    }
    warn!("the last checkpoint may predate the killed year; resume will redo it");
    Ok(())
}

/// Removes checkpoint, pending command and lock. Refuses while a writer is live.
pub fn clear(layout: &DataLayout) -> Result<()> {
    let lock_path = layout.lock_path();
    if let Some(pid) = read_lock_owner(&lock_path)?.filter(|pid| process_alive(*pid)) {
        bail!("harvest pid {pid} is running; stop or kill it before clearing state");
    }

    let removed_checkpoint = CheckpointStore::new(layout.checkpoint_path()).clear()?;
    let removed_command = CommandFile::new(layout.command_path()).clear()?;
    let removed_lock = remove_file_if_exists(&lock_path)?;

    info!(
        checkpoint = removed_checkpoint,
        command = removed_command,
        lock = removed_lock,
        "control state cleared"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::CommandSource;
    use tempfile::TempDir;

    #[test]
    fn request_writes_command_file() {
        let dir = TempDir::new().expect("tempdir");
        let layout = DataLayout::new(dir.path());

        request(&layout, ControlAction::Pause).expect("request");
        let mut commands = CommandFile::new(layout.command_path());
        assert_eq!(commands.poll(), Some(ControlAction::Pause));
    }

    #[test]
    fn kill_requires_confirmation() {
        let dir = TempDir::new().expect("tempdir");
        let layout = DataLayout::new(dir.path());

        assert!(kill(&layout, KillArgs { confirm: false }).is_err());
        assert!(kill(&layout, KillArgs { confirm: true }).is_err());
    }

    #[test]
    fn kill_removes_lock_of_dead_writer() {
        let dir = TempDir::new().expect("tempdir");
        let layout = DataLayout::new(dir.path());
        std::fs::create_dir_all(layout.state_dir()).expect("state dir");
        std::fs::write(layout.lock_path(), "4000000000\n").expect("seed lock");

        kill(&layout, KillArgs { confirm: true }).expect("kill");
        assert!(!layout.lock_path().exists());
    }

    #[test]
    fn clear_removes_state_artifacts() {
        let dir = TempDir::new().expect("tempdir");
        let layout = DataLayout::new(dir.path());
        CommandFile::new(layout.command_path())
            .issue(ControlAction::Stop)
            .expect("issue");
        std::fs::write(layout.checkpoint_path(), "{}").expect("seed checkpoint");
        std::fs::write(layout.lock_path(), "4000000000\n").expect("seed lock");

        clear(&layout).expect("clear");
        assert!(!layout.command_path().exists());
        assert!(!layout.checkpoint_path().exists());
        assert!(!layout.lock_path().exists());
    }

    #[test]
    fn clear_refuses_while_writer_is_live() {
        let dir = TempDir::new().expect("tempdir");
        let layout = DataLayout::new(dir.path());
        std::fs::create_dir_all(layout.state_dir()).expect("state dir");
        std::fs::write(layout.lock_path(), format!("{}\n", std::process::id()))
            .expect("seed lock");

        assert!(clear(&layout).is_err());
        assert!(layout.lock_path().exists());
    }
}
