//! Process-group termination: graceful before forceful.

use std::time::Duration;

use tokio::process::Child;

/// Window between SIGTERM and SIGKILL. Wide enough for a trap handler to
/// run and the child to exit on its own.
const TERM_GRACE: Duration = Duration::from_millis(800);
const KILL_SETTLE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Terminate a child and its whole descendant tree.
///
/// Signals the child's process group: SIGTERM first, then SIGKILL once the
/// grace window elapses. The group id is read from the kernel rather than
/// assumed equal to the pid. A child that was already reaped is left alone.
#[cfg(unix)]
pub async fn kill_process_group(child: &mut Child) {
    let Some(pid) = child.id() else {
        // Already reaped; signalling a recycled pid would be a stray shot.
        return;
    };
    let pid = pid as libc::pid_t;

    let pgid = unsafe { libc::getpgid(pid) };
    if pgid <= 0 {
        // Group lookup failed; fall back to the direct pid.
        unsafe { libc::kill(pid, libc::SIGTERM) };
        if wait_for_exit(child, KILL_SETTLE).await {
            return;
        }
        unsafe { libc::kill(pid, libc::SIGKILL) };
        let _ = wait_for_exit(child, KILL_SETTLE).await;
        return;
    }

    unsafe { libc::kill(-pgid, libc::SIGTERM) };
    if wait_for_exit(child, TERM_GRACE).await {
        return;
    }

    unsafe { libc::kill(-pgid, libc::SIGKILL) };
    let _ = wait_for_exit(child, KILL_SETTLE).await;
}

#[cfg(not(unix))]
pub async fn kill_process_group(child: &mut Child) {
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Poll for exit without blocking. `try_wait` doubles as the non-destructive
/// existence check and reaps the child the moment it is gone, so the process
/// is never waited twice.
#[cfg(unix)]
async fn wait_for_exit(child: &mut Child, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
