//! Local process supervision: start, track and stop agent processes.
//!
//! Detached processes run in their own process group so stop signals
//! reach the whole tree; stdio goes to a rotated log file and the PID
//! lands in `pids/<sanitized-name>.pid`. Stopping escalates from SIGTERM
//! to SIGKILL after the configured timeout. A stale PID file (process no
//! longer alive, or unparsable content) is cleaned without error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use mesh_core::error::{MeshError, Result};
use mesh_core::env;

use crate::config::ControllerConfig;
use crate::logfile;
use crate::output::ProcessRow;
use crate::pidfile;
use crate::sanitize::sanitize_name;

/// What kind of process a record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Agent,
    Registry,
}

/// One supervised local process.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub name: String,
    pub pid: u32,
    pub pid_file_path: PathBuf,
    pub kind: ProcessKind,
    pub start_time: DateTime<Utc>,
    pub log_path: PathBuf,
    pub command: String,
    pub working_dir: PathBuf,
}

/// Options for starting one process.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub detach: bool,
    pub log_level: Option<String>,
    pub env_overrides: Vec<(String, String)>,
}

/// Find the interpreter for an agent script: walk up from the script
/// directory looking for a `.venv` virtual environment, falling back to
/// the system interpreter.
pub fn detect_interpreter(script: &Path) -> PathBuf {
    let mut dir = script.parent();
    while let Some(current) = dir {
        let candidate = current.join(".venv").join("bin").join("python");
        if candidate.exists() {
            return candidate;
        }
        dir = current.parent();
    }
    PathBuf::from("python3")
}

/// Parse a `.env` file next to the script: `KEY=VALUE` lines, `#`
/// comments, optional surrounding quotes on the value.
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'');
        entries.push((key.to_string(), value.to_string()));
    }
    entries
}

/// The environment a supervised process starts with.
fn compose_env(
    config: &ControllerConfig,
    script_dir: Option<&Path>,
    options: &StartOptions,
) -> HashMap<String, String> {
    let mut composed: HashMap<String, String> = std::env::vars().collect();
    composed.insert(env::REGISTRY_URL.to_string(), config.registry_url.clone());
    composed.insert(
        env::LOG_LEVEL.to_string(),
        options
            .log_level
            .clone()
            .unwrap_or_else(|| config.log_level.clone()),
    );
    if env::debug_mode() {
        composed.insert(env::DEBUG_MODE.to_string(), "true".to_string());
    }
    if let Some(dir) = script_dir {
        if let Ok(content) = std::fs::read_to_string(dir.join(".env")) {
            for (key, value) in parse_env_file(&content) {
                composed.insert(key, value);
            }
        }
    }
    for (key, value) in &options.env_overrides {
        composed.insert(key.clone(), value.clone());
    }
    composed
}

/// Single-host supervisor over the controller's state root.
pub struct Supervisor {
    config: ControllerConfig,
}

impl Supervisor {
    pub fn new(config: ControllerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Start an agent script, detached or in the foreground.
    ///
    /// Starting a name that already has a live process is a hard error.
    pub async fn start_agent(
        &self,
        name: &str,
        script: &Path,
        options: &StartOptions,
    ) -> Result<ProcessRecord> {
        if !script.exists() {
            return Err(MeshError::not_found("agent script", script.display().to_string()));
        }
        let interpreter = detect_interpreter(script);
        let script_dir = script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut command = Command::new(&interpreter);
        command.arg(script);
        command.current_dir(&script_dir);
        let display = format!("{} {}", interpreter.display(), script.display());
        self.spawn(name, ProcessKind::Agent, command, display, script_dir, Some(script), options)
            .await
    }

    /// Start the registry binary: the one installed next to meshctl if
    /// present, otherwise whatever `PATH` resolves.
    pub async fn start_registry(&self, options: &StartOptions) -> Result<ProcessRecord> {
        let sibling = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("mesh-registry")))
            .filter(|candidate| candidate.exists());
        let program = sibling.unwrap_or_else(|| PathBuf::from("mesh-registry"));
        let mut command = Command::new(&program);
        command.arg("--db").arg(self.config.db_path());
        let working_dir = std::env::current_dir()?;
        command.current_dir(&working_dir);
        self.spawn(
            "registry",
            ProcessKind::Registry,
            command,
            "mesh-registry".to_string(),
            working_dir,
            None,
            options,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn spawn(
        &self,
        name: &str,
        kind: ProcessKind,
        mut command: Command,
        display: String,
        working_dir: PathBuf,
        script: Option<&Path>,
        options: &StartOptions,
    ) -> Result<ProcessRecord> {
        let sanitized = sanitize_name(name);
        let pid_path = self.config.pid_path(name);
        if let Some(existing) = pidfile::read_pid(&pid_path).await {
            if pidfile::is_alive(existing) {
                return Err(MeshError::conflict(format!(
                    "{} is already running (pid {}); stop it first",
                    name, existing
                )));
            }
            debug!(name = %name, pid = existing, "cleaning stale pid file");
            pidfile::remove_pid(&pid_path).await;
        }

        command.env_clear();
        command.envs(compose_env(
            &self.config,
            script.and_then(|s| s.parent()),
            options,
        ));

        let log_path = logfile::log_path(&self.config.logs_dir(), &sanitized, 0);
        let child = if options.detach {
            logfile::rotate(&self.config.logs_dir(), &sanitized).await?;
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?;
            let log_file_err = log_file.try_clone()?;
            command.stdin(Stdio::null());
            command.stdout(Stdio::from(log_file));
            command.stderr(Stdio::from(log_file_err));
            command.kill_on_drop(false);
            #[cfg(unix)]
            unsafe {
                // New session, new process group: stop signals target the
                // whole tree via killpg.
                command.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
            command
                .spawn()
                .map_err(|e| MeshError::internal(format!("failed to spawn {}: {}", name, e)))?
        } else {
            command.kill_on_drop(false);
            command
                .spawn()
                .map_err(|e| MeshError::internal(format!("failed to spawn {}: {}", name, e)))?
        };

        let pid = child
            .id()
            .ok_or_else(|| MeshError::internal("spawned process has no pid"))?;
        pidfile::write_pid(&pid_path, pid).await?;
        info!(name = %name, pid, detach = options.detach, "process started");

        let record = ProcessRecord {
            name: name.to_string(),
            pid,
            pid_file_path: pid_path.clone(),
            kind,
            start_time: Utc::now(),
            log_path,
            command: display,
            working_dir,
        };

        if !options.detach {
            self.wait_foreground(child, &record).await?;
        }
        Ok(record)
    }

    /// Foreground mode: wait for the child, forwarding SIGINT/SIGTERM as
    /// a graceful group stop.
    async fn wait_foreground(&self, mut child: tokio::process::Child, record: &ProcessRecord) -> Result<()> {
        let outcome = tokio::select! {
            status = child.wait() => status.map(Some),
            _ = tokio::signal::ctrl_c() => Ok(None),
        };
        match outcome {
            Ok(Some(status)) => {
                info!(name = %record.name, code = status.code(), "process exited");
            }
            Ok(None) => {
                info!(name = %record.name, "interrupt received; stopping");
                signal_group(record.pid, StopSignal::Term);
                let _ = tokio::time::timeout(self.config.shutdown_timeout, child.wait()).await;
                signal_group(record.pid, StopSignal::Kill);
            }
            Err(err) => return Err(err.into()),
        }
        pidfile::remove_pid(&record.pid_file_path).await;
        Ok(())
    }

    /// Stop one named process: SIGTERM the group, escalate to SIGKILL
    /// after `timeout`, then remove the PID file.
    pub async fn stop(&self, name: &str, timeout: Duration, force: bool) -> Result<()> {
        let pid_path = self.config.pid_path(name);
        let Some(pid) = pidfile::read_pid(&pid_path).await else {
            return Err(MeshError::not_found("supervised process", name));
        };
        if !pidfile::is_alive(pid) {
            debug!(name = %name, pid, "stale pid file cleaned");
            pidfile::remove_pid(&pid_path).await;
            return Ok(());
        }

        if force {
            signal_group(pid, StopSignal::Kill);
        } else {
            signal_group(pid, StopSignal::Term);
            let deadline = tokio::time::Instant::now() + timeout;
            while pidfile::is_alive(pid) && tokio::time::Instant::now() < deadline {
                sleep(Duration::from_millis(100)).await;
            }
            if pidfile::is_alive(pid) {
                warn!(name = %name, pid, "graceful stop timed out; killing group");
                signal_group(pid, StopSignal::Kill);
            }
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pidfile::is_alive(pid) && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(50)).await;
        }
        pidfile::remove_pid(&pid_path).await;
        info!(name = %name, pid, "process stopped");
        Ok(())
    }

    /// Every process with a PID file, alive or stale.
    pub async fn list_processes(&self) -> Vec<ProcessRow> {
        let mut rows = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(self.config.pids_dir()).await else {
            return rows;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pid") {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            let pid = pidfile::read_pid(&path).await;
            let alive = pid.map(pidfile::is_alive).unwrap_or(false);
            let log_path = logfile::log_path(&self.config.logs_dir(), &name, 0);
            rows.push(ProcessRow {
                name,
                pid,
                alive,
                log_path: log_path.display().to_string(),
            });
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Stop everything: agents in parallel first, the registry last.
    /// With `clean`, also remove the registry database, logs and PID files.
    pub async fn stop_all(&self, keep_registry: bool, timeout: Duration, force: bool, clean: bool) -> Result<()> {
        let rows = self.list_processes().await;
        let agents: Vec<String> = rows
            .iter()
            .filter(|r| r.name != "registry")
            .map(|r| r.name.clone())
            .collect();

        let stops = agents.iter().map(|name| self.stop(name, timeout, force));
        for (name, outcome) in agents.iter().zip(futures::future::join_all(stops).await) {
            match outcome {
                Ok(()) => {}
                Err(MeshError::NotFound { .. }) => {}
                Err(err) => warn!(name = %name, error = %err, "stop failed"),
            }
        }

        if !keep_registry && rows.iter().any(|r| r.name == "registry") {
            match self.stop("registry", timeout, force).await {
                Ok(()) | Err(MeshError::NotFound { .. }) => {}
                Err(err) => warn!(error = %err, "registry stop failed"),
            }
        }

        if clean {
            self.clean_state().await?;
        }
        Ok(())
    }

    /// Delete the registry database file, all log files and all PID files.
    pub async fn clean_state(&self) -> Result<()> {
        let db = self.config.db_path();
        if db.exists() {
            tokio::fs::remove_file(&db).await?;
            info!(path = %db.display(), "registry database removed");
        }
        for dir in [self.config.logs_dir(), self.config.pids_dir()] {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum StopSignal {
    Term,
    Kill,
}

/// Deliver a signal to the whole process group, falling back to the
/// single process if it has no group of its own.
fn signal_group(pid: u32, signal: StopSignal) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, killpg, Signal};
        use nix::unistd::Pid;
        let sig = match signal {
            StopSignal::Term => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };
        let target = Pid::from_raw(pid as i32);
        if killpg(target, sig).is_err() {
            let _ = kill(target, sig);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(root: &Path) -> ControllerConfig {
        ControllerConfig::load_from(root.to_path_buf()).unwrap()
    }

    #[test]
    fn test_parse_env_file() {
        let content = r#"
# comment
KEY=value
export EXPORTED=yes
QUOTED="with spaces"
SINGLE='single'
BROKEN LINE
EMPTY=
"#;
        let entries = parse_env_file(content);
        let map: HashMap<_, _> = entries.into_iter().collect();
        assert_eq!(map["KEY"], "value");
        assert_eq!(map["EXPORTED"], "yes");
        assert_eq!(map["QUOTED"], "with spaces");
        assert_eq!(map["SINGLE"], "single");
        assert_eq!(map["EMPTY"], "");
        assert!(!map.contains_key("BROKEN LINE"));
    }

    #[test]
    fn test_detect_interpreter_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let venv_bin = dir.path().join(".venv").join("bin");
        std::fs::create_dir_all(&venv_bin).unwrap();
        std::fs::write(venv_bin.join("python"), "").unwrap();
        let nested = dir.path().join("agents").join("hello");
        std::fs::create_dir_all(&nested).unwrap();
        let script = nested.join("main.py");
        std::fs::write(&script, "print('hi')").unwrap();

        assert_eq!(detect_interpreter(&script), venv_bin.join("python"));
    }

    #[test]
    fn test_detect_interpreter_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("main.py");
        std::fs::write(&script, "").unwrap();
        assert_eq!(detect_interpreter(&script), PathBuf::from("python3"));
    }

    #[tokio::test]
    async fn test_start_missing_script_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(test_config(dir.path()));
        let err = supervisor
            .start_agent("ghost", Path::new("/no/such/script.py"), &StartOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        // Simulate a live process by pointing the pid file at ourselves.
        pidfile::write_pid(&config.pid_path("busy"), std::process::id())
            .await
            .unwrap();
        let supervisor = Supervisor::new(config);
        let script = dir.path().join("agent.py");
        std::fs::write(&script, "").unwrap();
        let err = supervisor
            .start_agent("busy", &script, &StartOptions { detach: true, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_stop_cleans_stale_pid() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pid_path = config.pid_path("stale");
        // A PID that cannot be a live process.
        pidfile::write_pid(&pid_path, u32::MAX - 1).await.unwrap();
        let supervisor = Supervisor::new(config);
        supervisor
            .stop("stale", Duration::from_secs(1), false)
            .await
            .unwrap();
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn test_stop_unknown_name_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(test_config(dir.path()));
        let err = supervisor
            .stop("never-started", Duration::from_secs(1), false)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_clean_state_removes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        tokio::fs::create_dir_all(config.logs_dir()).await.unwrap();
        tokio::fs::create_dir_all(config.pids_dir()).await.unwrap();
        tokio::fs::write(config.logs_dir().join("a.log"), "x").await.unwrap();
        tokio::fs::write(config.pids_dir().join("a.pid"), "1").await.unwrap();

        let supervisor = Supervisor::new(config.clone());
        supervisor.clean_state().await.unwrap();
        assert!(!config.logs_dir().join("a.log").exists());
        assert!(!config.pids_dir().join("a.pid").exists());
    }
}
