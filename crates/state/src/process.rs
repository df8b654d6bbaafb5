//! OS process liveness and signalling by pid.

use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};

fn snapshot(pid: u32) -> (System, Pid) {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    (sys, pid)
}

/// Whether `pid` refers to a live (non-zombie) process.
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let (sys, pid) = snapshot(pid);
    sys.process(pid)
        .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}

/// Ask a process to shut down (SIGTERM). Returns whether a signal was sent.
pub fn terminate(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let (sys, pid) = snapshot(pid);
    sys.process(pid)
        .and_then(|p| p.kill_with(Signal::Term))
        .unwrap_or(false)
}

/// Poll until `pid` has exited or `timeout` elapses. Returns whether it exited.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!is_alive(0));
        assert!(!terminate(0));
    }

    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn wait_for_exit_returns_immediately_for_dead_pid() {
        assert!(wait_for_exit(0, Duration::from_millis(10)).await);
    }
}
