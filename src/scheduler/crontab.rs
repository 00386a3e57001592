/*!
 * OS crontab registry
 *
 * Registers time-based schedules with the user's crontab as a sentinel
 * comment followed by the cron line. All operations are read-modify-write:
 * fetch the current table, drop any pair owned by the schedule id, append
 * the new pair, install.
 */

use std::io::Write;
use std::process::{Command, Stdio};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::{BallastError, Result};
use crate::scheduler::ScheduleConfig;
use crate::size::format_bytes;

pub const SCHEDULE_COMMENT_PREFIX: &str = "# Unraid Rebalancer Schedule: ";

/// Access to the OS cron table. The system implementation shells out to
/// `crontab`; tests substitute an in-memory table.
pub trait CrontabBackend: Send + Sync {
    fn read(&self) -> Result<Vec<String>>;
    fn install(&self, lines: &[String]) -> Result<()>;
}

/// The real user crontab, via `crontab -l` and `crontab <file>`.
pub struct SystemCrontab;

impl CrontabBackend for SystemCrontab {
    fn read(&self) -> Result<Vec<String>> {
        let output = Command::new("crontab")
            .arg("-l")
            .stderr(Stdio::null())
            .output()
            .map_err(|e| BallastError::Crontab(format!("failed to run crontab -l: {}", e)))?;
        if !output.status.success() {
            // No crontab installed yet
            return Ok(Vec::new());
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().map(|l| l.to_string()).collect())
    }

    fn install(&self, lines: &[String]) -> Result<()> {
        let mut file = NamedTempFile::new()
            .map_err(|e| BallastError::Crontab(format!("temp file: {}", e)))?;
        for line in lines {
            writeln!(file, "{}", line)
                .map_err(|e| BallastError::Crontab(format!("write crontab: {}", e)))?;
        }
        file.flush()
            .map_err(|e| BallastError::Crontab(format!("flush crontab: {}", e)))?;

        let status = Command::new("crontab")
            .arg(file.path())
            .status()
            .map_err(|e| BallastError::Crontab(format!("failed to run crontab: {}", e)))?;
        if !status.success() {
            return Err(BallastError::Crontab(format!(
                "crontab install exited with {}",
                status
            )));
        }
        Ok(())
    }
}

/// Manages this tool's entries inside the cron table.
pub struct CrontabRegistry {
    backend: Box<dyn CrontabBackend>,
    /// Command used in generated cron lines, normally the installed binary
    command: String,
}

impl CrontabRegistry {
    pub fn new(command: &str) -> Self {
        Self {
            backend: Box::new(SystemCrontab),
            command: command.to_string(),
        }
    }

    pub fn with_backend(command: &str, backend: Box<dyn CrontabBackend>) -> Self {
        Self {
            backend,
            command: command.to_string(),
        }
    }

    /// Install or refresh the entry pair for a schedule.
    pub fn install_schedule(&self, schedule: &ScheduleConfig) -> Result<()> {
        let expression = schedule.cron_expression.as_deref().ok_or_else(|| {
            BallastError::Crontab(format!(
                "schedule {} has no cron expression",
                schedule.schedule_id
            ))
        })?;

        let mut lines = self.backend.read()?;
        remove_schedule_lines(&schedule.schedule_id, &mut lines);
        lines.push(comment_line(&schedule.schedule_id));
        lines.push(format!(
            "{} {}",
            expression,
            self.generate_command(schedule)
        ));
        self.backend.install(&lines)?;
        info!(schedule = %schedule.schedule_id, "registered crontab entry");
        Ok(())
    }

    /// Remove the entry pair for a schedule. Missing entries are not errors.
    pub fn remove_schedule(&self, schedule_id: &str) -> Result<()> {
        let mut lines = self.backend.read()?;
        let before = lines.len();
        remove_schedule_lines(schedule_id, &mut lines);
        if lines.len() < before {
            self.backend.install(&lines)?;
            info!(schedule = schedule_id, "removed crontab entry");
        } else {
            warn!(schedule = schedule_id, "no crontab entry to remove");
        }
        Ok(())
    }

    /// Schedule ids currently registered in the cron table.
    pub fn list_installed(&self) -> Result<Vec<String>> {
        let lines = self.backend.read()?;
        Ok(lines
            .iter()
            .filter_map(|l| l.strip_prefix(SCHEDULE_COMMENT_PREFIX))
            .map(|id| id.trim().to_string())
            .collect())
    }

    /// Command line invoked by cron for a schedule.
    fn generate_command(&self, schedule: &ScheduleConfig) -> String {
        let mut parts = vec![self.command.clone()];
        let params = &schedule.rebalance;

        match params.target_percent {
            Some(pct) => parts.push(format!("--target-percent {}", pct)),
            None => {
                parts.push("--target-percent -1".to_string());
                parts.push(format!("--headroom-percent {}", params.headroom_percent));
            }
        }
        parts.push(format!("--mode {}", schedule.rebalance.mode.as_str()));
        parts.push(format!(
            "--min-unit-size {}",
            format_bytes(params.min_unit_size).replace(' ', "")
        ));
        if let Some(ref disks) = params.include_disks {
            parts.push(format!("--include-disks {}", disks.join(",")));
        }
        if let Some(ref disks) = params.exclude_disks {
            parts.push(format!("--exclude-disks {}", disks.join(",")));
        }
        if let Some(ref shares) = params.exclude_shares {
            parts.push(format!("--exclude-shares {}", shares.join(",")));
        }
        if !params.exclude_globs.is_empty() {
            parts.push(format!("--exclude-globs '{}'", params.exclude_globs.join(",")));
        }
        parts.push("--execute".to_string());
        parts.join(" ")
    }
}

fn comment_line(schedule_id: &str) -> String {
    format!("{}{}", SCHEDULE_COMMENT_PREFIX, schedule_id)
}

/// Drop the sentinel comment for `schedule_id` and the non-comment line
/// that follows it.
pub fn remove_schedule_lines(schedule_id: &str, lines: &mut Vec<String>) {
    let sentinel = comment_line(schedule_id);
    let mut i = 0;
    while i < lines.len() {
        if lines[i] == sentinel {
            lines.remove(i);
            if i < lines.len() && !lines[i].starts_with('#') {
                lines.remove(i);
            }
        } else {
            i += 1;
        }
    }
}

/// In-memory crontab backend, for tests and dry-run inspection.
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct MockCrontab {
        pub lines: Arc<Mutex<Vec<String>>>,
    }

    impl CrontabBackend for MockCrontab {
        fn read(&self) -> Result<Vec<String>> {
            Ok(self.lines.lock().expect("mock lock").clone())
        }

        fn install(&self, lines: &[String]) -> Result<()> {
            *self.lines.lock().expect("mock lock") = lines.to_vec();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockCrontab;
    use super::*;
    use crate::scheduler::templates;

    fn registry() -> (MockCrontab, CrontabRegistry) {
        let mock = MockCrontab::default();
        let registry = CrontabRegistry::with_backend(
            "/usr/local/bin/ballast",
            Box::new(mock.clone()),
        );
        (mock, registry)
    }

    #[test]
    fn test_install_writes_sentinel_pair() {
        let (mock, registry) = registry();
        let schedule = templates::nightly_light(2).unwrap();
        registry.install_schedule(&schedule).unwrap();

        let lines = mock.lines.lock().unwrap().clone();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            format!("{}{}", SCHEDULE_COMMENT_PREFIX, schedule.schedule_id)
        );
        assert!(lines[1].starts_with("0 2 * * * /usr/local/bin/ballast"));
        assert!(lines[1].contains("--execute"));
    }

    #[test]
    fn test_install_is_read_modify_write() {
        let (mock, registry) = registry();
        mock.lines
            .lock()
            .unwrap()
            .push("0 1 * * * /usr/bin/backup".to_string());

        let schedule = templates::nightly_light(2).unwrap();
        registry.install_schedule(&schedule).unwrap();
        // Installing again replaces, not duplicates
        registry.install_schedule(&schedule).unwrap();

        let lines = mock.lines.lock().unwrap().clone();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "0 1 * * * /usr/bin/backup");
    }

    #[test]
    fn test_remove_drops_comment_and_command() {
        let (mock, registry) = registry();
        let schedule = templates::nightly_light(2).unwrap();
        registry.install_schedule(&schedule).unwrap();
        registry.remove_schedule(&schedule.schedule_id).unwrap();
        assert!(mock.lines.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_leaves_unrelated_lines() {
        let mut lines = vec![
            "# some other comment".to_string(),
            "0 1 * * * /usr/bin/backup".to_string(),
            format!("{}nightly", SCHEDULE_COMMENT_PREFIX),
            "0 2 * * * ballast --execute".to_string(),
        ];
        remove_schedule_lines("nightly", &mut lines);
        assert_eq!(
            lines,
            vec![
                "# some other comment".to_string(),
                "0 1 * * * /usr/bin/backup".to_string(),
            ]
        );
    }

    #[test]
    fn test_list_installed() {
        let (_mock, registry) = registry();
        let a = templates::nightly_light(2).unwrap();
        let b = templates::weekly_full(0, 3).unwrap();
        registry.install_schedule(&a).unwrap();
        registry.install_schedule(&b).unwrap();

        let ids = registry.list_installed().unwrap();
        assert!(ids.contains(&a.schedule_id));
        assert!(ids.contains(&b.schedule_id));
    }
}
