use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ExtendSettings;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("schedule file {0} not found")]
    NotFound(PathBuf),

    #[error("cannot access schedule file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("no schedule line matching {0:?}")]
    JobMissing(String),
}

/// One crontab line in typed form: the minute field, the hour field as
/// a list of hour values, and the untouched remainder of the line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronEntry {
    minute: String,
    hours: Vec<u32>,
    tail: Vec<String>,
}

impl CronEntry {
    /// Returns `None` when the line has fewer than two fields. An hour
    /// field that does not parse as comma-joined numbers yields an
    /// empty `hours` list; callers fall back to the configured default.
    fn parse(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace().map(str::to_owned);
        let minute = tokens.next()?;
        let hour_field = tokens.next()?;
        let hours = hour_field
            .split(',')
            .map(|h| h.parse().ok())
            .collect::<Option<Vec<u32>>>()
            .unwrap_or_default();
        Some(Self {
            minute,
            hours,
            tail: tokens.collect(),
        })
    }

    fn render(&self) -> String {
        let hour_field = self
            .hours
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut fields = vec![self.minute.clone(), hour_field];
        fields.extend(self.tail.iter().cloned());
        fields.join(" ")
    }
}

/// Owns the persisted shutdown job: a single crontab line identified
/// by a substring match on the invoked program name. All mutation is
/// read-whole-file, rewrite-matching-line, write-whole-file; callers
/// are serialized by the external scheduler.
pub struct ScheduleStore {
    path: PathBuf,
    job_marker: String,
    default_hour: u32,
    default_minutes: u32,
    max_hour: u32,
}

impl ScheduleStore {
    pub fn new(path: &Path, settings: &ExtendSettings) -> Self {
        Self {
            path: path.to_path_buf(),
            job_marker: settings.job_marker.clone(),
            default_hour: settings.default_hour,
            default_minutes: settings.default_minutes,
            max_hour: settings.max_hour,
        }
    }

    /// Pushes the next shutdown `extend_hours` later, wrapping at
    /// midnight and clamping to the configured ceiling hour. Returns
    /// the human-readable `HH:MM` time the shutdown is now planned at.
    pub fn extend(&self, extend_hours: u32) -> Result<String, ScheduleError> {
        self.apply_extend(extend_hours, true)
    }

    /// Same arithmetic as [`extend`](Self::extend) without touching
    /// the file. Used in dry-run mode.
    pub fn preview_extend(&self, extend_hours: u32) -> Result<String, ScheduleError> {
        self.apply_extend(extend_hours, false)
    }

    fn apply_extend(&self, extend_hours: u32, commit: bool) -> Result<String, ScheduleError> {
        let mut lines = self.read_lines()?;
        let index = self.managed_line(&lines)?;
        let mut entry =
            CronEntry::parse(&lines[index]).ok_or_else(|| self.job_missing())?;

        let current_hour = entry.hours.first().copied().unwrap_or(self.default_hour);
        let new_hour = (current_hour + extend_hours) % 24;
        // A ceiling of 0 means midnight, which sits at 24 for the
        // wrap comparison.
        let ceiling = if self.max_hour == 0 { 24 } else { self.max_hour };

        let shutdown_time = if new_hour >= ceiling {
            entry.hours = vec![self.max_hour];
            format!("{:02}:{:02}", self.max_hour, self.default_minutes)
        } else {
            entry.hours = vec![new_hour, self.max_hour];
            format!("{:02}:{:02}", new_hour, self.default_minutes)
        };

        if commit {
            lines[index] = entry.render();
            self.write_lines(&lines)?;
        }
        Ok(shutdown_time)
    }

    /// Rewrites the managed line back to the default schedule
    /// (`default_hour,max_hour` at `default_minutes`). Called after
    /// every successful shutdown so extensions never survive a power
    /// cycle.
    pub fn reset_to_default(&self) -> Result<(), ScheduleError> {
        let mut lines = self.read_lines()?;
        let index = self.managed_line(&lines)?;
        let mut entry =
            CronEntry::parse(&lines[index]).ok_or_else(|| self.job_missing())?;

        entry.minute = self.default_minutes.to_string();
        entry.hours = vec![self.default_hour, self.max_hour];

        lines[index] = entry.render();
        self.write_lines(&lines)
    }

    fn managed_line(&self, lines: &[String]) -> Result<usize, ScheduleError> {
        lines
            .iter()
            .position(|line| line.contains(&self.job_marker))
            .ok_or_else(|| self.job_missing())
    }

    fn job_missing(&self) -> ScheduleError {
        ScheduleError::JobMissing(self.job_marker.clone())
    }

    fn read_lines(&self) -> Result<Vec<String>, ScheduleError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.split('\n').map(str::to_owned).collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ScheduleError::NotFound(self.path.clone()))
            }
            Err(e) => Err(ScheduleError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    fn write_lines(&self, lines: &[String]) -> Result<(), ScheduleError> {
        std::fs::write(&self.path, lines.join("\n")).map_err(|e| ScheduleError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ExtendSettings {
        ExtendSettings {
            default_hour: 22,
            default_minutes: 30,
            max_hour: 23,
            keyword: "stay up".into(),
            allowed_senders: vec!["alice@example.com".into()],
            extend_hours: 2,
            job_marker: "power-off".into(),
        }
    }

    fn store_with(content: &str, settings: &ExtendSettings) -> (tempfile::TempDir, ScheduleStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crontab");
        std::fs::write(&path, content).unwrap();
        let store = ScheduleStore::new(&path, settings);
        (dir, store)
    }

    const CRONTAB: &str = "\
*/5 * * * * power-warden /config/warden.json power-on\n\
30 22,23 * * * power-warden /config/warden.json power-off\n";

    #[test]
    fn extend_wraps_past_midnight() {
        let (dir, store) = store_with(CRONTAB, &settings());
        // 22 + 2 = 24, wraps to 0, still under the ceiling of 23.
        let time = store.extend(2).unwrap();
        assert_eq!(time, "00:30");
        let content = std::fs::read_to_string(dir.path().join("crontab")).unwrap();
        assert!(content.contains("30 0,23 * * * power-warden /config/warden.json power-off"));
    }

    #[test]
    fn extend_from_twenty_by_five() {
        let (dir, store) = store_with(
            "30 20,23 * * * power-warden /config/warden.json power-off\n",
            &settings(),
        );
        let time = store.extend(5).unwrap();
        assert_eq!(time, "01:30");
        let content = std::fs::read_to_string(dir.path().join("crontab")).unwrap();
        assert!(content.contains("30 1,23"));
    }

    #[test]
    fn extend_clamps_at_ceiling() {
        let (dir, store) = store_with(
            "30 21,23 * * * power-warden /config/warden.json power-off\n",
            &settings(),
        );
        let time = store.extend(2).unwrap();
        assert_eq!(time, "23:30");
        let content = std::fs::read_to_string(dir.path().join("crontab")).unwrap();
        assert!(content.contains("30 23 * * *"));
    }

    #[test]
    fn midnight_ceiling_acts_as_twenty_four() {
        let mut s = settings();
        s.max_hour = 0;
        let (_dir, store) = store_with(
            "30 22,0 * * * power-warden /config/warden.json power-off\n",
            &s,
        );
        // 22 + 1 = 23, under a ceiling of 24, so no clamping.
        assert_eq!(store.extend(1).unwrap(), "23:30");
    }

    #[test]
    fn preview_does_not_write() {
        let (dir, store) = store_with(CRONTAB, &settings());
        assert_eq!(store.preview_extend(2).unwrap(), "00:30");
        let content = std::fs::read_to_string(dir.path().join("crontab")).unwrap();
        assert_eq!(content, CRONTAB);
    }

    #[test]
    fn reset_is_idempotent_under_extend_zero() {
        let (_dir, store) = store_with(CRONTAB, &settings());
        let baseline = store.extend(0).unwrap();

        store.extend(3).unwrap();
        store.reset_to_default().unwrap();
        assert_eq!(store.extend(0).unwrap(), baseline);
    }

    #[test]
    fn reset_restores_default_fields() {
        let (dir, store) = store_with(CRONTAB, &settings());
        store.extend(2).unwrap();
        store.reset_to_default().unwrap();
        let content = std::fs::read_to_string(dir.path().join("crontab")).unwrap();
        assert!(content.contains("30 22,23 * * * power-warden /config/warden.json power-off"));
        // The unrelated line is untouched.
        assert!(content.contains("*/5 * * * * power-warden /config/warden.json power-on"));
    }

    #[test]
    fn unparsable_hour_field_falls_back_to_default() {
        let (_dir, store) = store_with(
            "30 nonsense * * * power-warden /config/warden.json power-off\n",
            &settings(),
        );
        // default_hour 22 + 1 = 23 hits the ceiling, so it clamps.
        assert_eq!(store.extend(1).unwrap(), "23:30");
    }

    #[test]
    fn missing_job_line_is_an_error() {
        let (_dir, store) = store_with("*/5 * * * * something-else\n", &settings());
        assert!(matches!(
            store.extend(1),
            Err(ScheduleError::JobMissing(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(&dir.path().join("nope"), &settings());
        assert!(matches!(store.extend(1), Err(ScheduleError::NotFound(_))));
    }
}
