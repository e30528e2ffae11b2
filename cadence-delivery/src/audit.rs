//! Per-run audit trail
//!
//! Every run writes a plain-text log named `schedule_{YYYYmmdd_HHMMSS}.log`
//! into the configured directory:
//!
//! - a session header (start time and local UTC offset)
//! - one block per email attempt
//! - one block per compensation attempt
//! - a summary footer
//!
//! Failed runs additionally get a `crash_{YYYYmmdd_HHMMSS}.log` holding the
//! error and its source chain.
//!
//! Each block is mirrored as a structured `tracing` event:
//!
//! - `RunStarted`
//! - `EmailScheduled`
//! - `DeferredCompensation`
//! - `RunCompleted`
//! - `RunFailed`
//!
//! Recipient addresses in those events can be redacted through
//! [`AuditConfig::redact_recipients`]. The file itself always carries the
//! full address.
//!
//! Logging never fails a run. An unwritable directory or file is reported
//! once through `tracing::warn!` and the log carries on as a no-op.

use std::{
    error::Error as StdError,
    fmt::{Display, Write as _},
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    schedule::Clock,
    types::{CompensationResult, DispatchOutcome, RunSummary},
};

const RULE: &str =
    "================================================================================";

const SUBJECT_LIMIT: usize = 50;

const FILE_TIMESTAMP: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Write audit files. Tracing events are emitted regardless.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory receiving `schedule_*.log` and `crash_*.log` files
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Redact recipient addresses from tracing events
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_directory(),
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_directory() -> PathBuf {
    PathBuf::from("logs")
}

/// Redact the local part of an address, keeping the domain
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if !redact {
        return email.to_string();
    }

    email
        .split_once('@')
        .map_or_else(|| "[REDACTED]".to_string(), |(_, domain)| format!("[REDACTED]@{domain}"))
}

/// Shorten a subject for the log, marking the cut with `...`
#[must_use]
pub fn truncate_subject(subject: &str) -> String {
    match subject.char_indices().nth(SUBJECT_LIMIT) {
        Some((cut, _)) => format!("{}...", &subject[..cut]),
        None => subject.to_string(),
    }
}

/// The local zone's current offset from UTC, e.g. `+05:30`
#[must_use]
pub fn local_utc_offset() -> String {
    Local::now().offset().to_string()
}

fn show<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "None".to_string(), |value| value.to_string())
}

/// Append-only log for a single run
pub struct AuditLog {
    config: AuditConfig,
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
    file: Option<File>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .field("open", &self.file.is_some())
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Create the run's log file and write the session header
    pub fn open(config: AuditConfig, clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        let offset = local_utc_offset();

        tracing::event!(
            tracing::Level::INFO,
            event = "RunStarted",
            started = %started,
            utc_offset = %offset,
            "Audit: Run started"
        );

        let mut log = Self {
            config,
            clock,
            path: None,
            file: None,
        };

        if !log.config.enabled {
            return log;
        }

        let stem = format!("schedule_{}", started.format(FILE_TIMESTAMP));

        match create_log_file(&log.config.directory, &stem) {
            Ok((path, file)) => {
                log.file = Some(file);
                log.path = Some(path);
            }
            Err(err) => {
                tracing::warn!(
                    "Unable to open audit log {stem} in {}: {err}; continuing without one",
                    log.config.directory.display()
                );
            }
        }

        log.append(&format!(
            "{RULE}\nCadence Scheduling Log\nSession started: {started}\nSystem timezone offset: UTC{offset}\n{RULE}\n\n"
        ));

        log
    }

    /// Path of the log file, if one is being written
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Record one email attempt
    pub fn email(&mut self, outcome: &DispatchOutcome) {
        let subject = truncate_subject(&outcome.subject);

        tracing::event!(
            tracing::Level::INFO,
            event = "EmailScheduled",
            step = outcome.step,
            recipient = %redact_email(&outcome.recipient, self.config.redact_recipients),
            identity = %show(outcome.identity.as_deref()),
            scheduled = %show(outcome.scheduled),
            disposition = %outcome.disposition,
            submitted = outcome.submitted,
            error = %show(outcome.error.as_deref()),
            "Audit: Email scheduled"
        );

        let now = self.clock.now();
        let mut block = String::new();
        let _ = writeln!(block, "--- Email #{} ---", outcome.step);
        let _ = writeln!(block, "Logged at: {now}");
        let _ = writeln!(block, "Recipient: {}", outcome.recipient);
        let _ = writeln!(block, "Subject: {subject}");
        let _ = writeln!(
            block,
            "Sending identity: {}",
            outcome.identity.as_deref().unwrap_or("N/A")
        );
        let _ = writeln!(block, "Raw date: '{}'", outcome.raw_date);
        let _ = writeln!(block, "Raw time: '{}'", outcome.raw_time);
        let _ = writeln!(block, "Parsed send time: {}", show(outcome.parsed));
        let _ = writeln!(block, "Final naive local time: {}", show(outcome.scheduled));
        let _ = writeln!(block, "System local time: {now}");
        let _ = writeln!(block, "System TZ offset: UTC{}", local_utc_offset());
        let _ = writeln!(block, "Disposition: {}", outcome.disposition);
        let _ = writeln!(block, "Submit called: {}", outcome.submitted);
        if let Some(item_id) = &outcome.item_id {
            let _ = writeln!(block, "Item ID: {item_id}");
        }
        if let Some(error) = &outcome.error {
            let _ = writeln!(block, "ERROR: {error}");
        }
        block.push('\n');

        self.append(&block);
    }

    /// Record one compensation attempt
    pub fn compensation(&mut self, result: &CompensationResult) {
        if let Some(error) = &result.error {
            tracing::event!(
                tracing::Level::WARN,
                event = "DeferredCompensation",
                desired = %show(result.desired),
                shift = %show(result.shift),
                applied = result.applied,
                error = %error,
                "Audit: Deferred delivery compensation failed"
            );
        } else {
            tracing::event!(
                tracing::Level::INFO,
                event = "DeferredCompensation",
                desired = %show(result.desired),
                shift = %show(result.shift),
                applied = result.applied,
                "Audit: Deferred delivery compensation"
            );
        }

        let mut block = String::from("  [Timezone Compensation]\n");
        let _ = writeln!(block, "    Desired local time: {}", show(result.desired));
        let _ = writeln!(block, "    First readback: {}", show(result.first_readback));
        let _ = writeln!(block, "    Detected shift: {}", show(result.shift));
        let _ = writeln!(block, "    Compensation applied: {}", result.applied);
        if result.applied {
            let _ = writeln!(block, "    Corrected time: {}", show(result.corrected));
            let _ = writeln!(block, "    Final readback: {}", show(result.final_readback));
        }
        if let Some(error) = &result.error {
            let _ = writeln!(block, "    ERROR: {error}");
        }

        self.append(&block);
    }

    /// Write the summary footer
    pub fn summary(&mut self, summary: &RunSummary) {
        tracing::event!(
            tracing::Level::INFO,
            event = "RunCompleted",
            contacts = summary.contacts,
            processed = summary.processed(),
            submitted = summary.submitted,
            drafts = summary.drafts,
            flushed = summary.flushed,
            "Audit: Run completed"
        );

        self.append(&format!(
            "\n{RULE}\nSession completed: {}\nTotal emails processed: {}\nFlush triggered: {}\n{RULE}\n",
            self.clock.now(),
            summary.processed(),
            summary.flushed
        ));
    }

    /// Write a crash record next to the run log
    ///
    /// Returns the crash file's path, or `None` if it could not be written.
    pub fn crash(&self, error: &(dyn StdError + 'static)) -> Option<PathBuf> {
        let failed = self.clock.now();

        tracing::event!(
            tracing::Level::ERROR,
            event = "RunFailed",
            error = %error,
            "Audit: Run failed"
        );

        if !self.config.enabled {
            return None;
        }

        let mut record = format!("Run failed at {failed}\nError: {error}\n");
        let mut source = error.source();
        while let Some(cause) = source {
            let _ = writeln!(record, "Caused by: {cause}");
            source = cause.source();
        }

        let stem = format!("crash_{}", failed.format(FILE_TIMESTAMP));

        match create_log_file(&self.config.directory, &stem).and_then(|(path, mut file)| {
            file.write_all(record.as_bytes())?;
            Ok(path)
        }) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!("Unable to write crash record {stem}: {err}");
                None
            }
        }
    }

    /// Flush and close the log
    pub fn close(mut self) {
        if let Some(mut file) = self.file.take()
            && let Err(err) = file.flush()
        {
            tracing::warn!("Unable to flush audit log: {err}");
        }
    }

    fn append(&mut self, text: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };

        if let Err(err) = file.write_all(text.as_bytes()) {
            tracing::warn!("Audit log write failed: {err}; further records are dropped");
            self.file = None;
        }
    }
}

/// Upper bound on the `_N` suffix for logs created in the same second
const MAX_SUFFIX: u32 = 100;

/// Create `<stem>.log` in `directory`, never reusing an existing file
fn create_log_file(directory: &Path, stem: &str) -> std::io::Result<(PathBuf, File)> {
    fs::create_dir_all(directory)?;

    for suffix in 0..MAX_SUFFIX {
        let name = if suffix == 0 {
            format!("{stem}.log")
        } else {
            format!("{stem}_{suffix}.log")
        };
        let path = directory.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("{stem}: too many logs for the same second"),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::{
        error::{DispatchError, TransportError},
        schedule::FixedClock,
        types::Disposition,
    };

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock(
            NaiveDateTime::parse_from_str("2026-03-02 07:00:05", "%Y-%m-%d %H:%M:%S").unwrap(),
        ))
    }

    fn config(directory: &Path) -> AuditConfig {
        AuditConfig {
            directory: directory.to_path_buf(),
            ..AuditConfig::default()
        }
    }

    #[test]
    fn test_redact_email() {
        assert_eq!(
            redact_email("user@example.com", true),
            "[REDACTED]@example.com"
        );
        assert_eq!(redact_email("user@example.com", false), "user@example.com");
        assert_eq!(redact_email("invalid", true), "[REDACTED]");
    }

    #[test]
    fn test_truncate_subject() {
        let long = "x".repeat(60);
        assert_eq!(truncate_subject(&long), format!("{}...", "x".repeat(50)));
        assert_eq!(truncate_subject(&"y".repeat(50)), "y".repeat(50));
        assert_eq!(truncate_subject("short"), "short");

        let accented = "\u{e9}".repeat(51);
        assert_eq!(truncate_subject(&accented).chars().count(), 53);
    }

    #[test]
    fn test_log_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AuditLog::open(config(dir.path()), clock());

        let path = log.path().unwrap().to_path_buf();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "schedule_20260302_070005.log"
        );

        let mut outcome = DispatchOutcome::new(1, "ana@example.com", Disposition::Deferred);
        outcome.subject = "A".repeat(70);
        outcome.raw_time = "9:00 AM".to_string();
        outcome.submitted = true;
        outcome.item_id = Some("mem-0000".to_string());

        log.compensation(&CompensationResult {
            shift: Some(TimeDelta::hours(7)),
            applied: true,
            ..CompensationResult::default()
        });
        log.email(&outcome);
        log.summary(&RunSummary {
            contacts: 1,
            created: 1,
            submitted: 1,
            flushed: true,
            ..RunSummary::default()
        });
        log.close();

        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with(RULE));
        assert!(text.contains("Session started: 2026-03-02 07:00:05"));
        assert!(text.contains("--- Email #1 ---"));
        assert!(text.contains(&format!("Subject: {}...", "A".repeat(50))));
        assert!(text.contains("Raw time: '9:00 AM'"));
        assert!(text.contains("Sending identity: N/A"));
        assert!(text.contains("Item ID: mem-0000"));
        assert!(text.contains("Compensation applied: true"));
        assert!(text.contains("Total emails processed: 1"));
        assert!(text.contains("Flush triggered: true"));
        assert!(text.find("[Timezone Compensation]") < text.find("--- Email #1 ---"));
    }

    #[test]
    fn test_crash_record_has_source_chain() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(config(dir.path()), clock());

        let error = DispatchError::Submission {
            step: 2,
            recipient: "ana@example.com".to_string(),
            source: TransportError::Rejected("quota".to_string()),
        };
        let path = log.crash(&error).unwrap();

        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "crash_20260302_070005.log"
        );
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("Error: Failed to submit email #2 to ana@example.com"));
        assert!(text.contains("Caused by: Message rejected: quota"));
    }

    #[test]
    fn test_same_second_runs_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();

        let first = AuditLog::open(config(dir.path()), clock());
        let second = AuditLog::open(config(dir.path()), clock());

        assert_eq!(
            first.path().unwrap().file_name().unwrap().to_string_lossy(),
            "schedule_20260302_070005.log"
        );
        assert_eq!(
            second.path().unwrap().file_name().unwrap().to_string_lossy(),
            "schedule_20260302_070005_1.log"
        );

        let crash = second.crash(&DispatchError::Unavailable("offline".to_string()));
        let again = second.crash(&DispatchError::Unavailable("offline".to_string()));
        assert_ne!(crash, again);

        first.close();
        second.close();

        let header = fs::read_to_string(dir.path().join("schedule_20260302_070005.log")).unwrap();
        assert_eq!(header.matches("Session started").count(), 1);
    }

    #[test]
    fn test_unwritable_directory_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        let mut log = AuditLog::open(config(&blocker.join("logs")), clock());
        assert!(log.path().is_none());

        log.email(&DispatchOutcome::new(1, "ana@example.com", Disposition::Draft));
        log.close();
    }

    #[test]
    fn test_disabled_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(
            AuditConfig {
                enabled: false,
                ..config(dir.path())
            },
            clock(),
        );

        assert!(log.path().is_none());
        assert!(log.crash(&TransportError::NoIdentity).is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
