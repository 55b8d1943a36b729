//! Supervisor lifecycle against real processes (Unix only).

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use meshctl::config::ControllerConfig;
use meshctl::logfile;
use meshctl::pidfile;
use meshctl::supervisor::{StartOptions, Supervisor};

fn test_config(root: &Path) -> ControllerConfig {
    ControllerConfig::load_from(root.to_path_buf()).unwrap()
}

/// Create a fake agent: a `.venv` whose interpreter is a shell, and a
/// "script" that is really a shell script. The supervisor only cares
/// that the interpreter runs the script.
fn fake_agent(root: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let venv_bin = root.join(".venv").join("bin");
    std::fs::create_dir_all(&venv_bin).unwrap();
    let python = venv_bin.join("python");
    if !python.exists() {
        std::os::unix::fs::symlink("/bin/sh", &python).unwrap();
    }
    let script = root.join(format!("{}.py", name));
    std::fs::write(&script, body).unwrap();
    script
}

#[tokio::test]
async fn detached_start_writes_pid_and_stop_kills_group() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let supervisor = Supervisor::new(config.clone());
    let script = fake_agent(dir.path(), "sleeper", "sleep 30\n");

    let record = supervisor
        .start_agent("sleeper", &script, &StartOptions { detach: true, ..Default::default() })
        .await
        .unwrap();
    assert!(pidfile::is_alive(record.pid));
    assert_eq!(pidfile::read_pid(&config.pid_path("sleeper")).await, Some(record.pid));

    // A second start of the same name must be refused while it runs.
    let err = supervisor
        .start_agent("sleeper", &script, &StartOptions { detach: true, ..Default::default() })
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 409);

    supervisor
        .stop("sleeper", Duration::from_secs(5), false)
        .await
        .unwrap();
    assert!(!pidfile::is_alive(record.pid));
    assert!(!config.pid_path("sleeper").exists());
}

#[tokio::test]
async fn stop_kills_children_in_the_group() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let supervisor = Supervisor::new(config.clone());
    // The agent spawns its own child; both must die with the group.
    let script = fake_agent(dir.path(), "parent", "sleep 30 &\nCHILD=$!\nwait $CHILD\n");

    let record = supervisor
        .start_agent("parent", &script, &StartOptions { detach: true, ..Default::default() })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(pidfile::is_alive(record.pid));

    supervisor
        .stop("parent", Duration::from_secs(5), false)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!pidfile::is_alive(record.pid));
}

#[tokio::test]
async fn restart_rotates_logs_up_to_five_generations() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let supervisor = Supervisor::new(config.clone());
    let script = fake_agent(dir.path(), "chatty", "echo run output\n");

    for _ in 0..6 {
        let record = supervisor
            .start_agent("chatty", &script, &StartOptions { detach: true, ..Default::default() })
            .await
            .unwrap();
        // Wait for the short-lived process to finish writing and exit.
        for _ in 0..50 {
            if !pidfile::is_alive(record.pid) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        pidfile::remove_pid(&config.pid_path("chatty")).await;
    }

    let logs = config.logs_dir();
    for generation in 0..logfile::MAX_GENERATIONS {
        assert!(
            logfile::log_path(&logs, "chatty", generation).exists(),
            "generation {} missing",
            generation
        );
    }
    assert!(!logs.join("chatty.5.log").exists());

    let lines = logfile::view(
        &logs,
        "chatty",
        &logfile::ViewOptions { previous: 2, ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(lines, vec!["run output"]);
}

#[tokio::test]
async fn list_processes_reports_liveness() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let supervisor = Supervisor::new(config.clone());
    let script = fake_agent(dir.path(), "sleeper", "sleep 30\n");

    supervisor
        .start_agent("sleeper", &script, &StartOptions { detach: true, ..Default::default() })
        .await
        .unwrap();
    pidfile::write_pid(&config.pid_path("dead"), u32::MAX - 1)
        .await
        .unwrap();

    let rows = supervisor.list_processes().await;
    let sleeper = rows.iter().find(|r| r.name == "sleeper").unwrap();
    assert!(sleeper.alive);
    let dead = rows.iter().find(|r| r.name == "dead").unwrap();
    assert!(!dead.alive);

    supervisor
        .stop_all(false, Duration::from_secs(5), false, true)
        .await
        .unwrap();
    assert!(supervisor.list_processes().await.is_empty());
}
