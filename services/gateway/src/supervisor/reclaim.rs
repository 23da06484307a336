//! Reclaiming the engine port from a previous engine instance
//!
//! A stale engine left behind by an earlier run keeps the port bound and
//! makes the new engine fail to start. Everything here is best effort:
//! failures are logged and startup continues.

use std::io;

use tracing::{info, warn};

/// Kill every other process listening on `port`; returns the pids signalled
pub fn reclaim_port(port: u16) -> Vec<i32> {
    let pids = match listening_pids(port) {
        Ok(pids) => pids,
        Err(e) => {
            warn!(port, "Could not look up processes listening on port: {}", e);
            return Vec::new();
        }
    };

    if pids.is_empty() {
        info!(port, "Query engine is not running on port");
        return pids;
    }

    info!(port, ?pids, "Found process listening on query engine port, killing it");
    pids.into_iter().filter(|pid| kill(*pid)).collect()
}

/// Pids of other processes with a listening TCP socket on `port`
#[cfg(target_os = "linux")]
pub fn listening_pids(port: u16) -> io::Result<Vec<i32>> {
    use procfs::net::TcpState;
    use procfs::process::FDTarget;
    use std::collections::HashSet;

    let to_io = |e: procfs::ProcError| io::Error::other(e.to_string());

    let mut inodes = HashSet::new();
    for entry in procfs::net::tcp()
        .map_err(to_io)?
        .into_iter()
        .chain(procfs::net::tcp6().unwrap_or_default())
    {
        if entry.state == TcpState::Listen && entry.local_address.port() == port {
            inodes.insert(entry.inode);
        }
    }
    if inodes.is_empty() {
        return Ok(Vec::new());
    }

    let own_pid = own_pid();
    let mut pids = Vec::new();
    for process in procfs::process::all_processes().map_err(to_io)?.flatten() {
        if process.pid == own_pid {
            continue;
        }
        // Processes of other users cannot be inspected; skip them.
        let Ok(fds) = process.fd() else {
            continue;
        };
        let owns_socket = fds.flatten().any(|fd| {
            matches!(fd.target, FDTarget::Socket(inode) if inodes.contains(&inode))
        });
        if owns_socket {
            pids.push(process.pid);
        }
    }
    Ok(pids)
}

/// Pids of other processes with a listening TCP socket on `port`
#[cfg(all(unix, not(target_os = "linux")))]
pub fn listening_pids(port: u16) -> io::Result<Vec<i32>> {
    let output = std::process::Command::new("lsof")
        .args(["-t", "-s", "TCP:LISTEN", "-i"])
        .arg(format!("tcp:{port}"))
        .output()?;

    // lsof exits non-zero when nothing matches.
    let own_pid = own_pid();
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse::<i32>().ok())
        .filter(|pid| *pid != own_pid)
        .collect())
}

/// Pids of other processes with a listening TCP socket on `port`
#[cfg(not(unix))]
pub fn listening_pids(_port: u16) -> io::Result<Vec<i32>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "port reclaiming is not supported on this platform",
    ))
}

fn own_pid() -> i32 {
    i32::try_from(std::process::id()).unwrap_or(i32::MAX)
}

#[cfg(unix)]
fn kill(pid: i32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => {
            info!(pid, "Killed stale query engine process");
            true
        }
        Err(e) => {
            warn!(pid, "Error killing stale query engine process: {}", e);
            false
        }
    }
}

#[cfg(not(unix))]
fn kill(pid: i32) -> bool {
    warn!(pid, "Killing processes is not supported on this platform");
    false
}
