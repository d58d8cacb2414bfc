//! Child processes that take their descendants down with them

use std::io;
use std::process::{Output, Stdio};
use tokio::process::Command;
#[cfg(unix)]
use tracing::{debug, warn};

/// Kills a process group when dropped
///
/// `kill_on_drop` only reaches the direct child; whatever a `sh -c` script
/// forked would otherwise outlive it.
struct GroupGuard {
    pgid: Option<u32>,
}

impl Drop for GroupGuard {
    #[cfg(unix)]
    fn drop(&mut self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid else {
            return;
        };
        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            Ok(()) => debug!("Killed leftover processes of group {}", pgid),
            Err(Errno::ESRCH) => {}
            Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
        }
    }

    #[cfg(not(unix))]
    fn drop(&mut self) {
        let _ = self.pgid;
    }
}

/// Run `command` to completion, capturing stdout and stderr
///
/// The command gets a process group of its own. The group is killed when the
/// command finishes or when this future is dropped (timeout, cancellation),
/// so no descendant survives it.
pub(crate) async fn output_in_own_group(command: &mut Command) -> io::Result<Output> {
    #[cfg(unix)]
    command.process_group(0);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn()?;
    let _group = GroupGuard { pgid: child.id() };
    child.wait_with_output().await
}
