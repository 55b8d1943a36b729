//! Log files: rotation on start, and the `meshctl logs` viewer.
//!
//! Each supervised process writes `<name>.log`; starting it again shifts
//! the existing generations (`name.log → name.1.log → … → name.4.log`)
//! and deletes the oldest, so at most five generations exist. The viewer
//! supports tailing, time filtering with per-line timestamp parsing, and
//! following via filesystem notifications.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};
use notify::{RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use mesh_core::error::{MeshError, Result};

/// Generations kept per process: the live log plus four rotated ones.
pub const MAX_GENERATIONS: usize = 5;

/// Path of one log generation. Generation 0 is the live file.
pub fn log_path(dir: &Path, name: &str, generation: usize) -> PathBuf {
    if generation == 0 {
        dir.join(format!("{}.log", name))
    } else {
        dir.join(format!("{}.{}.log", name, generation))
    }
}

/// Shift generations before a new run: the oldest is deleted, everything
/// else moves one slot down, and the live name becomes free.
pub async fn rotate(dir: &Path, name: &str) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let oldest = log_path(dir, name, MAX_GENERATIONS - 1);
    if oldest.exists() {
        tokio::fs::remove_file(&oldest).await?;
    }
    for generation in (0..MAX_GENERATIONS - 1).rev() {
        let from = log_path(dir, name, generation);
        if from.exists() {
            tokio::fs::rename(&from, log_path(dir, name, generation + 1)).await?;
        }
    }
    Ok(())
}

/// A `--since` argument: either a relative duration (`5m`, `2h`) or an
/// absolute timestamp (RFC 3339, `YYYY-MM-DD HH:MM:SS`, or `HH:MM:SS`
/// today, local time).
pub fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(duration) = humantime::parse_duration(raw) {
        return Ok(Utc::now()
            - chrono::Duration::from_std(duration)
                .map_err(|e| MeshError::validation(format!("duration out of range: {}", e)))?);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        if let Some(local) = Local.from_local_datetime(&naive).single() {
            return Ok(local.with_timezone(&Utc));
        }
    }
    if let Ok(time) = NaiveTime::parse_from_str(raw, "%H:%M:%S") {
        let today = Local::now().date_naive().and_time(time);
        if let Some(local) = Local.from_local_datetime(&today).single() {
            return Ok(local.with_timezone(&Utc));
        }
    }
    Err(MeshError::validation(format!(
        "cannot parse --since value {:?} (try 5m, 2h, HH:MM:SS or RFC 3339)",
        raw
    )))
}

/// Best-effort timestamp of one log line.
///
/// Understands RFC 3339 prefixes and `YYYY-MM-DD HH:MM:SS[.frac]`
/// prefixes (local time). Lines without a timestamp inherit no time and
/// pass every `--since` filter, matching how multi-line messages behave.
pub fn parse_line_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let head: &str = line.get(..line.len().min(40))?;
    // RFC 3339 / tracing default: 2026-01-01T12:00:00.123456Z
    if let Some(end) = head.find(|c: char| c == ' ' || c == '\t') {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&head[..end]) {
            return Some(ts.with_timezone(&Utc));
        }
    } else if let Ok(ts) = DateTime::parse_from_rfc3339(head.trim_end()) {
        return Some(ts.with_timezone(&Utc));
    }
    // Plain "YYYY-MM-DD HH:MM:SS" prefix.
    if head.len() >= 19 {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&head[..19], "%Y-%m-%d %H:%M:%S") {
            return Local
                .from_local_datetime(&naive)
                .single()
                .map(|local| local.with_timezone(&Utc));
        }
    }
    None
}

/// Options for one `meshctl logs` invocation.
#[derive(Debug, Clone, Default)]
pub struct ViewOptions {
    /// Show the Nth previous run instead of the live log.
    pub previous: usize,
    /// Only the last N lines.
    pub tail: Option<usize>,
    /// Only lines at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// Select and filter the lines to display.
pub fn filter_lines(content: &str, options: &ViewOptions) -> Vec<String> {
    let mut lines: Vec<&str> = content.lines().collect();
    if let Some(since) = options.since {
        lines.retain(|line| match parse_line_timestamp(line) {
            Some(ts) => ts >= since,
            None => true,
        });
    }
    if let Some(tail) = options.tail {
        let skip = lines.len().saturating_sub(tail);
        lines.drain(..skip);
    }
    lines.into_iter().map(str::to_string).collect()
}

/// Read one generation of a process log and apply the view options.
pub async fn view(dir: &Path, name: &str, options: &ViewOptions) -> Result<Vec<String>> {
    if options.previous >= MAX_GENERATIONS {
        return Err(MeshError::validation(format!(
            "--previous must be below {}",
            MAX_GENERATIONS
        )));
    }
    let path = log_path(dir, name, options.previous);
    let content = tokio::fs::read_to_string(&path).await.map_err(|_| {
        MeshError::not_found("log file", path.display().to_string())
    })?;
    Ok(filter_lines(&content, options))
}

/// Follow the live log, printing appended data until interrupted.
///
/// Uses a filesystem watcher rather than polling; rotation (the file being
/// replaced) restarts from the top of the new file.
pub async fn follow(dir: &Path, name: &str, options: &ViewOptions) -> Result<()> {
    let path = log_path(dir, name, 0);
    for line in view(dir, name, options).await? {
        println!("{}", line);
    }
    let mut offset = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);

    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if event.is_ok() {
            let _ = tx.blocking_send(());
        }
    })
    .map_err(|e| MeshError::internal(format!("failed to start log watcher: {}", e)))?;
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| MeshError::internal(format!("failed to watch log directory: {}", e)))?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            changed = rx.recv() => {
                if changed.is_none() {
                    return Ok(());
                }
            }
            // The watcher can miss events on some platforms; a slow tick
            // keeps the tail honest.
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        }

        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            continue;
        };
        let len = metadata.len();
        if len < offset {
            offset = 0;
        }
        if len == offset {
            continue;
        }
        let Ok(mut file) = tokio::fs::File::open(&path).await else {
            continue;
        };
        if file.seek(SeekFrom::Start(offset)).await.is_err() {
            continue;
        }
        let mut buf = String::new();
        if file.read_to_string(&mut buf).await.is_ok() {
            offset = len;
            print!("{}", buf);
        }
    }
}
