//! PID files for supervised processes.
//!
//! One PID file per process name, containing a decimal PID. A file whose
//! content does not parse, or whose PID is no longer alive, is stale and
//! cleaned without error.

use std::path::Path;

use mesh_core::error::Result;

/// Write the PID file, creating parent directories as needed.
pub async fn write_pid(path: &Path, pid: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, pid.to_string()).await?;
    Ok(())
}

/// Read a PID file. Missing or corrupt files read as `None` (stale).
pub async fn read_pid(path: &Path) -> Option<u32> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    content.trim().parse::<u32>().ok()
}

/// Remove a PID file; missing files are fine.
pub async fn remove_pid(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}

/// Whether a process with this PID is currently alive.
pub fn is_alive(pid: u32) -> bool {
    // A PID that does not fit a signed pid_t would alias a process group
    // when negated; treat it as dead instead of probing.
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        // Signal 0 probes existence without delivering anything.
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
