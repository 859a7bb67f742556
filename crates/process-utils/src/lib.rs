//! Small process-related helpers shared across the workspace.
//!
//! External tools (the media extractor, the audio encoder) are driven as
//! child processes; this crate centralizes how they are spawned and how
//! they are torn down when a phase times out or a job is cancelled.

use std::ffi::OsStr;
use std::time::Duration;

use tracing::warn;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Terminate a child process and wait up to `grace` for it to be reaped.
///
/// Returns `true` if the process exited within the grace window. A process
/// that survives the grace window is logged and left to the OS; the caller
/// must not assume its output files are in a consistent state.
pub async fn kill_with_grace(child: &mut tokio::process::Child, grace: Duration) -> bool {
    if let Err(e) = child.start_kill() {
        // InvalidInput means the child already exited and was reaped.
        if e.kind() != std::io::ErrorKind::InvalidInput {
            warn!(error = %e, "failed to signal child process");
            return false;
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(_status)) => true,
        Ok(Err(e)) => {
            warn!(error = %e, "failed to reap killed child process");
            false
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "child process unresponsive to kill");
            false
        }
    }
}

/// Trimmed tail of a tool's stderr, suitable for embedding in an error.
///
/// Keeps at most `max_bytes` from the end, on a char boundary.
pub fn output_tail(output: &str, max_bytes: usize) -> String {
    let trimmed = output.trim();
    if trimmed.len() <= max_bytes {
        return trimmed.to_owned();
    }
    let mut start = trimmed.len() - max_bytes;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_tail_keeps_short_output() {
        assert_eq!(output_tail("  error: boom \n", 64), "error: boom");
    }

    #[test]
    fn output_tail_truncates_on_char_boundary() {
        let s = "xё".repeat(100);
        let tail = output_tail(&s, 15);
        assert!(tail.len() <= 15);
        assert!(tail.chars().count() > 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_with_grace_stops_a_sleeping_child() {
        let mut child = tokio_command("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        assert!(kill_with_grace(&mut child, Duration::from_secs(5)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_with_grace_tolerates_already_exited_child() {
        let mut child = tokio_command("true").spawn().expect("spawn true");
        child.wait().await.expect("wait");
        assert!(kill_with_grace(&mut child, Duration::from_secs(1)).await);
    }
}
