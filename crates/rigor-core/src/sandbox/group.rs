//! The sandbox child's process group.
//!
//! The interpreter is spawned as the leader of a fresh group, so anything it
//! forks can be killed with it. The group is killed when the attempt ends,
//! whatever the outcome, and again on drop if the executor future is abandoned.

use tokio::process::Command;

/// Put the child in a new process group led by itself.
pub(crate) fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

#[derive(Debug)]
pub(crate) struct ProcessGroup {
    #[cfg(unix)]
    pgid: Option<nix::unistd::Pid>,
}

impl ProcessGroup {
    /// Take ownership of the group led by `pid`.
    pub(crate) fn adopt(pid: Option<u32>) -> Self {
        #[cfg(unix)]
        {
            Self {
                pgid: pid
                    .and_then(|p| i32::try_from(p).ok())
                    .map(nix::unistd::Pid::from_raw),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = pid;
            Self {}
        }
    }

    /// SIGKILL every process left in the group. Only the first call signals.
    pub(crate) fn kill(&mut self) {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};

            let Some(pgid) = self.pgid.take() else {
                return;
            };
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => {
                    tracing::warn!(pgid = pgid.as_raw(), error = %e, "failed to kill sandbox process group");
                }
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}
