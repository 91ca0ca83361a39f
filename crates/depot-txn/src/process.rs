//! Liveness checks for marker owners.

use std::fs;

/// Returns `true` if a process with `pid` is running on this host.
#[cfg(target_os = "linux")]
pub fn is_process_alive(pid: u32) -> bool {
    // A zombie has exited but still owns its pid; treat it as dead.
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => process_state(&stat) != Some('Z'),
        Err(e) => e.kind() != std::io::ErrorKind::NotFound,
    }
}

/// State field of a `/proc/<pid>/stat` line. The command name may contain
/// spaces and parentheses, so the state is read after the last `)`.
#[cfg(any(target_os = "linux", test))]
fn process_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

/// Without a cheap probe, every owner is assumed alive and stale markers are
/// only reclaimed by age.
#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

/// Best-effort name of this host, used to scope pid liveness checks.
pub fn local_host() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn state_is_read_after_the_command_name() {
        assert_eq!(process_state("42 (worker) S 1 42 42"), Some('S'));
        assert_eq!(process_state("43 (odd ) name) Z 1 43 43"), Some('Z'));
        assert_eq!(process_state("garbage"), None);
    }

    #[test]
    fn host_is_never_empty() {
        assert!(!local_host().is_empty());
    }
}
